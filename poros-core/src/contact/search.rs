//! Uniform-grid search for master facets.
//!
//! Every facet is binned into all cells its bounding box, grown by the
//! search radius, overlaps. A query then only looks at the cell holding
//! the query point: any facet closer than the radius is guaranteed to be
//! listed there.

use super::surface::ContactSurface;
use crate::physics::StateView;
use crate::types::{Point3, Vec3};
use std::collections::HashMap;

/// Most cells a single facet may occupy before the grid coarsens.
const MAX_CELLS_PER_FACET: i64 = 4096;

type CellKey = (i64, i64, i64);

/// Spatial hash over the facets of one surface.
#[derive(Debug, Clone)]
pub struct FacetGrid {
    inv_cell_size: f64,
    radius: f64,
    cells: HashMap<CellKey, Vec<usize>>,
}

impl FacetGrid {
    /// Bin the current facets of `surface` for queries within `radius`.
    pub fn build(surface: &ContactSurface, view: &StateView, radius: f64) -> Self {
        let boxes: Vec<(Point3, Point3)> = (0..surface.facets().len())
            .map(|f| {
                let x = surface.facet_positions(view, f);
                let mut lo = x[0];
                let mut hi = x[0];
                for p in &x[1..] {
                    lo = lo.inf(p);
                    hi = hi.sup(p);
                }
                (lo - Vec3::repeat(radius), hi + Vec3::repeat(radius))
            })
            .collect();

        let size = surface.mean_facet_size(view);
        let mut cell_size = if size > 0.0 && size.is_finite() { size } else { radius.max(1.0) };
        // a large radius must not explode the cell count
        while boxes.iter().any(|(lo, hi)| cell_count(lo, hi, 1.0 / cell_size) > MAX_CELLS_PER_FACET) {
            cell_size *= 2.0;
        }

        let mut grid = Self {
            inv_cell_size: 1.0 / cell_size,
            radius,
            cells: HashMap::new(),
        };
        for (f, (lo, hi)) in boxes.iter().enumerate() {
            let (a, b) = (grid.key(lo), grid.key(hi));
            for i in a.0..=b.0 {
                for j in a.1..=b.1 {
                    for k in a.2..=b.2 {
                        grid.cells.entry((i, j, k)).or_default().push(f);
                    }
                }
            }
        }
        grid
    }

    fn key(&self, p: &Point3) -> CellKey {
        (
            (p.x * self.inv_cell_size).floor() as i64,
            (p.y * self.inv_cell_size).floor() as i64,
            (p.z * self.inv_cell_size).floor() as i64,
        )
    }

    /// Search radius the grid was built for.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Facets that may lie within the radius of `p`, ascending.
    pub fn candidates(&self, p: &Point3) -> &[usize] {
        self.cells.get(&self.key(p)).map_or(&[], Vec::as_slice)
    }

    /// Number of occupied cells.
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }
}

fn cell_count(lo: &Point3, hi: &Point3, inv: f64) -> i64 {
    (0..3)
        .map(|d| ((hi[d] * inv).floor() - (lo[d] * inv).floor()) as i64 + 1)
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::{DofKind, DofLayout, EquationMap};
    use crate::mesh::Mesh;

    /// A 3×3 grid of unit quads in the plane z = 0.
    fn tiles() -> Mesh {
        let mut mesh = Mesh::new();
        for j in 0..4 {
            for i in 0..4 {
                mesh.add_node(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut facets = Vec::new();
        for j in 0..3 {
            for i in 0..3 {
                let n0 = j * 4 + i;
                facets.push(vec![n0, n0 + 1, n0 + 5, n0 + 4]);
            }
        }
        mesh.add_surface("tiles", facets).unwrap();
        mesh
    }

    #[test]
    fn test_candidates_cover_nearby_facets() {
        let mesh = tiles();
        let surface = ContactSurface::from_mesh(&mesh, 0).unwrap();
        let eqs = EquationMap::new(mesh.n_nodes(), DofLayout::from_kinds(DofKind::DISPLACEMENT));
        let values = vec![0.0; eqs.n_nodes() * 3];
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        let grid = FacetGrid::build(&surface, &view, 0.25);

        let c = grid.candidates(&Point3::new(1.5, 1.5, 0.1));
        assert!(c.contains(&4));

        let corner = grid.candidates(&Point3::new(1.1, 1.1, 0.0));
        for f in [0, 1, 3, 4] {
            assert!(corner.contains(&f), "facet {} missing", f);
        }
        assert!(grid.candidates(&Point3::new(10.0, 10.0, 10.0)).is_empty());
    }

    #[test]
    fn test_huge_radius_stays_bounded() {
        let mesh = tiles();
        let surface = ContactSurface::from_mesh(&mesh, 0).unwrap();
        let eqs = EquationMap::new(mesh.n_nodes(), DofLayout::from_kinds(DofKind::DISPLACEMENT));
        let values = vec![0.0; eqs.n_nodes() * 3];
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        let grid = FacetGrid::build(&surface, &view, 1000.0);
        assert_eq!(grid.candidates(&Point3::new(0.0, 0.0, 500.0)).len(), 9);
        assert!(grid.n_cells() as i64 <= 9 * MAX_CELLS_PER_FACET);
    }
}
