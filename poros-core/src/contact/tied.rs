//! Tied surfaces.
//!
//! Every slave node is glued to the point of the master surface it
//! projects onto the first time the interface is evaluated. The vector gap
//! `x_m(rs) - x_s` is penalized in all directions, in tension as well as in
//! compression.

use super::search::FacetGrid;
use super::surface::ContactSurface;
use super::{multiplier_change, AugmentOutcome, ContactInterface, ContactKind, ContactSummary, InterfaceState};
use crate::assembly::{scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::config::TiedConfig;
use crate::dof::{DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::physics::{PhysicsModule, StateView};
use crate::sparse::CompactSymmMatrix;
use crate::types::{Natural2, Point3, Vec3};
use nalgebra::{DMatrix, DVector, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// State of one tied slave node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiedPoint {
    pub master: Option<usize>,
    pub rs: Natural2,
    /// `x_m(rs) - x_s`.
    pub gap: Vec3,
    /// Multiplier (traction) vector.
    pub lm: Vec3,
}

impl Default for TiedPoint {
    fn default() -> Self {
        Self {
            master: None,
            rs: Vector2::zeros(),
            gap: Vec3::zeros(),
            lm: Vec3::zeros(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TiedInterface {
    name: String,
    config: TiedConfig,
    nodes: Vec<usize>,
    master: ContactSurface,
    points: Vec<TiedPoint>,
    paired: bool,
    revision: u64,
}

impl TiedInterface {
    pub fn new(mesh: &Mesh, slave: usize, master: usize, config: TiedConfig) -> Result<Self> {
        config.validate()?;
        let slave_surface = mesh
            .surface(slave)
            .ok_or_else(|| Error::Mesh(format!("surface {} does not exist", slave)))?;
        let nodes = slave_surface.nodes();
        let master = ContactSurface::from_mesh(mesh, master)?;
        Ok(Self {
            name: format!("tied {}/{}", slave_surface.name, master.name()),
            config,
            points: vec![TiedPoint::default(); nodes.len()],
            nodes,
            master,
            paired: false,
            revision: 0,
        })
    }

    pub fn points(&self) -> &[TiedPoint] {
        &self.points
    }

    /// Slave nodes in point order.
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    fn traction(&self, p: &TiedPoint) -> Vec3 {
        p.lm + p.gap * self.config.penalty
    }

    fn pair(&mut self, view: &StateView) {
        let radius = self.config.search_radius * self.master.mean_facet_size(view);
        let grid = FacetGrid::build(&self.master, view, radius);
        let positions: Vec<Vec<Point3>> = (0..self.master.facets().len())
            .map(|f| self.master.facet_positions(view, f))
            .collect();
        let mut paired = 0;
        for (p, &node) in self.points.iter_mut().zip(&self.nodes) {
            let x = view.position(node);
            let best = grid
                .candidates(&x)
                .iter()
                .filter_map(|&f| {
                    let ft = self.master.facet_type(f);
                    let rs = ft.project(&positions[f], &x, self.config.search_tolerance)?;
                    let dist = (ft.position(&positions[f], &rs) - x).norm();
                    (dist <= radius).then_some((f, rs, dist))
                })
                .min_by(|a, b| a.2.total_cmp(&b.2));
            *p = TiedPoint::default();
            if let Some((f, rs, _)) = best {
                p.master = Some(f);
                p.rs = rs;
                paired += 1;
            }
        }
        debug!(interface = %self.name, paired, total = self.points.len(), "tied nodes paired");
        self.paired = true;
        self.revision += 1;
    }

    fn node_list(&self, i: usize, f: usize) -> Vec<usize> {
        std::iter::once(self.nodes[i])
            .chain(self.master.facets()[f].nodes.iter().copied())
            .collect()
    }

    /// `[-1, N_1, .., N_m]` weights of the gap on the element nodes.
    fn weights(&self, p: &TiedPoint, f: usize) -> Vec<f64> {
        let n = self.master.facet_type(f).shape(&p.rs);
        std::iter::once(-1.0)
            .chain(n.iter().take(self.master.facets()[f].nodes.len()).copied())
            .collect()
    }
}

impl ContactInterface for TiedInterface {
    fn kind(&self) -> ContactKind {
        ContactKind::Tied
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dof_kinds(&self) -> Vec<DofKind> {
        DofKind::DISPLACEMENT.to_vec()
    }

    fn init(&mut self, _mesh: &Mesh, _modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        self.points.iter_mut().for_each(|p| *p = TiedPoint::default());
        self.paired = false;
        Ok(())
    }

    fn updates_search(&self, _iteration: usize) -> bool {
        false
    }

    fn project_surface(&mut self, view: &StateView, _update_search: bool) -> Result<()> {
        if !self.paired {
            self.pair(view);
        }
        for (i, p) in self.points.iter_mut().enumerate() {
            let Some(f) = p.master else { continue };
            let xm = self.master.facet_positions(view, f);
            p.gap = self.master.facet_type(f).position(&xm, &p.rs) - view.position(self.nodes[i]);
        }
        Ok(())
    }

    fn build_profile(&self, _mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.master.map(|f| eqs.lm(&self.node_list(i, f), &DofKind::DISPLACEMENT)))
            .collect()
    }

    fn contact_forces(&self, view: &StateView, r: &mut [f64]) -> Result<()> {
        let blocks: Vec<ElementVector> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let f = p.master?;
                let t = self.traction(p);
                let w = self.weights(p, f);
                // the slave weight is -1, so the slave node is pulled along +t
                let fe = DVector::from_iterator(
                    3 * w.len(),
                    w.iter().flat_map(|wa| {
                        let force = -t * *wa;
                        [force.x, force.y, force.z]
                    }),
                );
                Some(ElementVector {
                    lm: view.eqs.lm(&self.node_list(i, f), &DofKind::DISPLACEMENT),
                    fe,
                })
            })
            .collect();
        scatter_vectors(r, &blocks, &self.name)
    }

    fn contact_stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        let eps = self.config.penalty;
        let blocks: Vec<ElementMatrix> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let f = p.master?;
                let w = self.weights(p, f);
                let n = w.len();
                let mut ke = DMatrix::zeros(3 * n, 3 * n);
                for a in 0..n {
                    for b in 0..n {
                        for c in 0..3 {
                            ke[(3 * a + c, 3 * b + c)] = eps * w[a] * w[b];
                        }
                    }
                }
                Some(ElementMatrix {
                    lm: view.eqs.lm(&self.node_list(i, f), &DofKind::DISPLACEMENT),
                    ke,
                })
            })
            .collect();
        scatter_matrices(k, &blocks, &self.name)
    }

    fn augment(&mut self, naug: usize) -> AugmentOutcome {
        if !self.config.augmented_lagrangian {
            return AugmentOutcome::Converged;
        }
        let norm0: f64 = self.points.iter().map(|p| p.lm.norm_squared()).sum();
        let norm1: f64 = self
            .points
            .iter()
            .filter(|p| p.master.is_some())
            .map(|p| self.traction(p).norm_squared())
            .sum();
        let lnorm = multiplier_change(norm0, norm1);
        let outcome = AugmentOutcome::decide(
            lnorm <= self.config.atol,
            naug,
            self.config.augmentations.min,
            self.config.augmentations.max,
        );
        info!(interface = %self.name, naug, multiplier_change = lnorm, ?outcome, "augmentation");

        if outcome == AugmentOutcome::Pending {
            let eps = self.config.penalty;
            for p in self.points.iter_mut().filter(|p| p.master.is_some()) {
                p.lm += p.gap * eps;
            }
        }
        outcome
    }

    fn pairing_revision(&self) -> u64 {
        self.revision
    }

    fn save_state(&self) -> InterfaceState {
        InterfaceState::Tied(self.points.clone())
    }

    fn load_state(&mut self, state: &InterfaceState) -> Result<()> {
        let InterfaceState::Tied(points) = state else {
            return Err(super::kind_mismatch(ContactKind::Tied, state.kind()));
        };
        if points.len() != self.points.len() {
            return Err(Error::Checkpoint(format!(
                "tied interface has {} nodes, state holds {}",
                self.points.len(),
                points.len()
            )));
        }
        self.points.clone_from_slice(points);
        self.paired = true;
        self.revision += 1;
        Ok(())
    }

    fn summary(&self) -> ContactSummary {
        let active: Vec<&TiedPoint> = self.points.iter().filter(|p| p.master.is_some()).collect();
        let mean = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|p| self.traction(p).norm()).sum::<f64>() / active.len() as f64
        };
        ContactSummary {
            name: self.name.clone(),
            kind: ContactKind::Tied,
            active: active.len(),
            total: self.points.len(),
            mean_pressure: mean,
            max_gap: active.iter().map(|p| p.gap.norm()).fold(0.0, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofLayout;
    use crate::sparse::SparseMatrixProfile;
    use approx::assert_relative_eq;

    /// Master quad (nodes 0-3) and a coincident slave quad (nodes 4-7),
    /// plus a stray slave node far away (8).
    fn sandwich() -> Mesh {
        let mut mesh = Mesh::new();
        for _ in 0..2 {
            mesh.add_nodes([
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ]);
        }
        mesh.add_node(Point3::new(5.0, 5.0, 5.0));
        mesh.add_surface("master", vec![vec![0, 1, 2, 3]]).unwrap();
        mesh.add_surface("slave", vec![vec![4, 7, 6, 5], vec![8, 4, 5]]).unwrap();
        mesh
    }

    fn setup(config: TiedConfig) -> (Mesh, EquationMap, TiedInterface) {
        let mesh = sandwich();
        let mut eqs = EquationMap::new(9, DofLayout::from_kinds(DofKind::DISPLACEMENT));
        eqs.renumber();
        let mut c = TiedInterface::new(&mesh, 1, 0, config).unwrap();
        c.init(&mesh, &[]).unwrap();
        (mesh, eqs, c)
    }

    #[test]
    fn test_pairing_skips_distant_nodes() {
        let (mesh, eqs, mut c) = setup(TiedConfig::default());
        let values = vec![0.0; 27];
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        c.project_surface(&view, true).unwrap();
        assert_eq!(c.nodes(), &[4, 5, 6, 7, 8]);
        assert!(c.points()[..4].iter().all(|p| p.master == Some(0)));
        assert_eq!(c.points()[4].master, None);
        assert_eq!(c.summary().active, 4);
    }

    #[test]
    fn test_separation_is_resisted_in_tension() {
        let (mesh, eqs, mut c) = setup(TiedConfig { penalty: 10.0, ..TiedConfig::default() });
        let zero = vec![0.0; 27];
        c.project_surface(&StateView { mesh: &mesh, eqs: &eqs, values: &zero, time: 0.0 }, true)
            .unwrap();

        // lift node 6 by 0.1
        let mut values = zero.clone();
        values[3 * 6 + 2] = 0.1;
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        c.project_surface(&view, false).unwrap();
        let mut r = vec![0.0; 27];
        c.contact_forces(&view, &mut r).unwrap();
        // pulled back down with eps·gap, reaction on master node 2
        assert_relative_eq!(r[3 * 6 + 2], -1.0, epsilon = 1e-12);
        assert_relative_eq!(r[3 * 2 + 2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stiffness_is_consistent_with_forces() {
        let (mesh, eqs, mut c) = setup(TiedConfig { penalty: 10.0, ..TiedConfig::default() });
        let zero = vec![0.0; 27];
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &zero, time: 0.0 };
        c.project_surface(&view, true).unwrap();

        let mut profile = SparseMatrixProfile::new(27);
        for lm in c.build_profile(&mesh, &eqs) {
            profile.add_element(&lm);
        }
        let mut k = CompactSymmMatrix::new();
        k.create(&profile);
        c.contact_stiffness(&view, &mut k).unwrap();

        let mut du = zero.clone();
        du[3 * 5] = 0.02;
        du[3 * 7 + 1] = -0.03;
        let mut f = vec![0.0; 27];
        k.mult_vector(&du, &mut f).unwrap();

        let moved = StateView { values: &du, ..view };
        c.project_surface(&moved, false).unwrap();
        let mut r = vec![0.0; 27];
        c.contact_forces(&moved, &mut r).unwrap();
        for i in 0..27 {
            assert_relative_eq!(f[i], -r[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_augmentation_accumulates_multiplier() {
        let config = TiedConfig { penalty: 10.0, augmented_lagrangian: true, ..TiedConfig::default() };
        let (mesh, eqs, mut c) = setup(config);
        let mut values = vec![0.0; 27];
        c.project_surface(&StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 }, true)
            .unwrap();
        values[3 * 4] = 0.1;
        c.project_surface(&StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 }, false)
            .unwrap();
        assert_eq!(c.augment(0), AugmentOutcome::Pending);
        assert_relative_eq!(c.points()[0].lm.x, -1.0, epsilon = 1e-12);

        let saved = c.save_state();
        let (_, _, mut other) = setup(TiedConfig::default());
        other.load_state(&saved).unwrap();
        assert_eq!(other.points(), c.points());
    }
}
