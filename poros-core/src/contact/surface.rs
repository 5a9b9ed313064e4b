//! Contact surfaces and their integration-point state.

use crate::dof::{DofKind, EquationMap};
use crate::element::facet::FacetType;
use crate::error::{Error, Result};
use crate::mesh::{Mesh, SurfaceFacet};
use crate::physics::StateView;
use crate::types::{Natural2, Point3, Vec3};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Fixed location of an integration point on its own facet.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub facet: usize,
    pub rs: Natural2,
    /// Quadrature weight times the reference surface Jacobian.
    pub weight: f64,
}

/// Per integration point contact state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Penetration along the master normal (positive in contact).
    pub gap: f64,
    /// Outward master normal at the projection.
    pub normal: Vec3,
    /// Natural coordinates of the projection on the master facet.
    pub rs: Natural2,
    /// Master facet, `None` when the point did not project.
    pub master: Option<usize>,
    /// Normal multiplier.
    pub lmd: f64,
    /// Normal penalty.
    pub epsn: f64,
    /// Net contact pressure at the last update.
    pub ln: f64,
    /// Pressure gap `p_slave - p_master`.
    pub pg: f64,
    /// Pressure multiplier.
    pub lmp: f64,
    /// Pressure penalty.
    pub epsp: f64,
}

impl Default for ContactPoint {
    fn default() -> Self {
        Self {
            gap: 0.0,
            normal: Vec3::zeros(),
            rs: Vector2::zeros(),
            master: None,
            lmd: 0.0,
            epsn: 1.0,
            ln: 0.0,
            pg: 0.0,
            lmp: 0.0,
            epsp: 1.0,
        }
    }
}

impl ContactPoint {
    /// Regularized multiplier `Lmd + eps·g`.
    pub fn pressure(&self) -> f64 {
        self.lmd + self.epsn * self.gap
    }

    /// Paired and in compression.
    pub fn is_active(&self) -> bool {
        self.master.is_some() && self.pressure() > 0.0
    }

    /// Regularized fluid flux multiplier.
    pub fn flux(&self) -> f64 {
        self.lmp + self.epsp * self.pg
    }
}

/// A mesh surface taking part in contact.
#[derive(Debug, Clone)]
pub struct ContactSurface {
    name: String,
    facets: Vec<SurfaceFacet>,
    stations: Vec<Station>,
    points: Vec<ContactPoint>,
}

impl ContactSurface {
    /// Bind to mesh surface `surface` and lay out integration points on the
    /// reference geometry.
    pub fn from_mesh(mesh: &Mesh, surface: usize) -> Result<Self> {
        let src = mesh
            .surface(surface)
            .ok_or_else(|| Error::Mesh(format!("surface {} does not exist", surface)))?;
        if src.facets.is_empty() {
            return Err(Error::Mesh(format!("surface '{}' has no facets", src.name)));
        }

        let mut stations = Vec::with_capacity(src.n_integration_points());
        for (f, facet) in src.facets.iter().enumerate() {
            let x: Vec<Point3> = facet.nodes.iter().map(|&n| mesh.nodes()[n]).collect();
            for gp in facet.facet_type.gauss_points() {
                let rs = Vector2::new(gp.xi(), gp.eta());
                let (_, j) = facet.facet_type.normal(&x, &rs);
                if j <= 0.0 {
                    return Err(Error::Mesh(format!(
                        "facet {} of surface '{}' is degenerate",
                        f, src.name
                    )));
                }
                stations.push(Station {
                    facet: f,
                    rs,
                    weight: gp.weight * j,
                });
            }
        }

        Ok(Self {
            name: src.name.clone(),
            facets: src.facets.clone(),
            points: vec![ContactPoint::default(); stations.len()],
            stations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn facets(&self) -> &[SurfaceFacet] {
        &self.facets
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn points(&self) -> &[ContactPoint] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [ContactPoint] {
        &mut self.points
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Replace the point state; lengths must agree.
    pub fn load_points(&mut self, points: &[ContactPoint]) -> Result<()> {
        if points.len() != self.points.len() {
            return Err(Error::Checkpoint(format!(
                "surface '{}' has {} contact points, state holds {}",
                self.name,
                self.points.len(),
                points.len()
            )));
        }
        self.points.clone_from_slice(points);
        Ok(())
    }

    /// Current nodal positions of facet `f`.
    pub fn facet_positions(&self, view: &StateView, f: usize) -> Vec<Point3> {
        self.facets[f].nodes.iter().map(|&n| view.position(n)).collect()
    }

    /// Reference nodal positions of facet `f`.
    pub fn facet_reference(&self, mesh: &Mesh, f: usize) -> Vec<Point3> {
        self.facets[f].nodes.iter().map(|&n| mesh.nodes()[n]).collect()
    }

    /// Current position of integration point `i`.
    pub fn station_position(&self, view: &StateView, i: usize) -> Point3 {
        let st = &self.stations[i];
        self.facets[st.facet]
            .facet_type
            .position(&self.facet_positions(view, st.facet), &st.rs)
    }

    /// Nodal field value interpolated at (facet, rs).
    pub fn interpolate(&self, view: &StateView, f: usize, rs: &Natural2, kind: DofKind) -> f64 {
        let facet = &self.facets[f];
        let n = facet.facet_type.shape(rs);
        facet.nodes.iter().zip(n).map(|(&node, ni)| ni * view.value(node, kind)).sum()
    }

    /// Facet area in the reference configuration.
    pub fn facet_area(&self, mesh: &Mesh, f: usize) -> f64 {
        self.facets[f].facet_type.area(&self.facet_reference(mesh, f))
    }

    /// Square root of the mean current facet area.
    pub fn mean_facet_size(&self, view: &StateView) -> f64 {
        let total: f64 = (0..self.facets.len())
            .map(|f| self.facets[f].facet_type.area(&self.facet_positions(view, f)))
            .sum();
        (total / self.facets.len() as f64).sqrt()
    }

    /// Distinct nodes of the surface, ascending.
    pub fn nodes(&self) -> Vec<usize> {
        let mut nodes: Vec<usize> = self.facets.iter().flat_map(|f| f.nodes.iter().copied()).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Location vector of facet `f` over `kinds`.
    pub fn facet_lm(&self, eqs: &EquationMap, f: usize, kinds: &[DofKind]) -> Vec<Option<usize>> {
        eqs.lm(&self.facets[f].nodes, kinds)
    }

    pub fn facet_type(&self, f: usize) -> FacetType {
        self.facets[f].facet_type
    }

    /// Pressure-weighted sums `(Σ Ln·w, Σ w)` over points in compression.
    pub fn pressure_resultant(&self) -> (f64, f64) {
        self.points
            .iter()
            .zip(&self.stations)
            .filter(|(p, _)| p.is_active())
            .fold((0.0, 0.0), |(f, a), (p, st)| (f + p.pressure() * st.weight, a + st.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofLayout;
    use approx::assert_relative_eq;

    fn plate() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ]);
        mesh.add_surface("plate", vec![vec![0, 1, 2, 3]]).unwrap();
        mesh
    }

    #[test]
    fn test_station_weights_sum_to_area() {
        let mesh = plate();
        let surface = ContactSurface::from_mesh(&mesh, 0).unwrap();
        assert_eq!(surface.n_points(), 4);
        let total: f64 = surface.stations().iter().map(|s| s.weight).sum();
        assert_relative_eq!(total, 4.0, epsilon = 1e-12);
        assert_relative_eq!(surface.facet_area(&mesh, 0), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_station_position_follows_displacement() {
        let mesh = plate();
        let surface = ContactSurface::from_mesh(&mesh, 0).unwrap();
        let eqs = EquationMap::new(4, DofLayout::from_kinds(DofKind::DISPLACEMENT));
        let values: Vec<f64> = (0..4).flat_map(|_| [0.0, 0.0, 0.5]).collect();
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        for i in 0..surface.n_points() {
            assert_relative_eq!(surface.station_position(&view, i).z, 0.5, epsilon = 1e-14);
        }
        assert_relative_eq!(surface.mean_facet_size(&view), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_active_requires_pairing_and_compression() {
        let mut p = ContactPoint { gap: 0.1, epsn: 10.0, ..ContactPoint::default() };
        assert!(!p.is_active());
        p.master = Some(0);
        assert!(p.is_active());
        p.gap = -0.1;
        assert!(!p.is_active());
        p.lmd = 2.0;
        assert_relative_eq!(p.pressure(), 1.0);
        assert!(p.is_active());
    }

    #[test]
    fn test_missing_surface_rejected() {
        assert!(ContactSurface::from_mesh(&plate(), 3).is_err());
    }
}
