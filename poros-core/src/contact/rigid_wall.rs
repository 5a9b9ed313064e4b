//! Nodes against a fixed rigid plane.

use super::{multiplier_change, AugmentOutcome, ContactInterface, ContactKind, ContactSummary, InterfaceState};
use crate::assembly::{scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::config::RigidWallConfig;
use crate::dof::{DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::physics::{PhysicsModule, StateView};
use crate::sparse::CompactSymmMatrix;
use crate::types::Vec3;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::info;

/// State of one wall node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallPoint {
    /// Penetration below the plane.
    pub gap: f64,
    pub lm: f64,
}

#[derive(Debug, Clone)]
pub struct RigidWallInterface {
    name: String,
    config: RigidWallConfig,
    normal: Vec3,
    nodes: Vec<usize>,
    points: Vec<WallPoint>,
}

impl RigidWallInterface {
    /// Constrain the nodes of mesh surface `surface`.
    pub fn new(mesh: &Mesh, surface: usize, config: RigidWallConfig) -> Result<Self> {
        config.validate()?;
        let src = mesh
            .surface(surface)
            .ok_or_else(|| Error::Mesh(format!("surface {} does not exist", surface)))?;
        let nodes = src.nodes();
        let normal = Vec3::from(config.normal).normalize();
        Ok(Self {
            name: format!("rigid wall {}", src.name),
            points: vec![WallPoint::default(); nodes.len()],
            config,
            normal,
            nodes,
        })
    }

    pub fn points(&self) -> &[WallPoint] {
        &self.points
    }

    fn pressure(&self, p: &WallPoint) -> f64 {
        p.lm + self.config.penalty * p.gap
    }
}

impl ContactInterface for RigidWallInterface {
    fn kind(&self) -> ContactKind {
        ContactKind::RigidWall
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dof_kinds(&self) -> Vec<DofKind> {
        DofKind::DISPLACEMENT.to_vec()
    }

    fn init(&mut self, _mesh: &Mesh, _modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        self.points.iter_mut().for_each(|p| *p = WallPoint::default());
        Ok(())
    }

    fn project_surface(&mut self, view: &StateView, _update_search: bool) -> Result<()> {
        for (p, &node) in self.points.iter_mut().zip(&self.nodes) {
            p.gap = self.config.offset - self.normal.dot(&view.position(node));
        }
        Ok(())
    }

    fn build_profile(&self, _mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>> {
        self.nodes
            .iter()
            .map(|&n| eqs.lm(&[n], &DofKind::DISPLACEMENT))
            .collect()
    }

    fn contact_forces(&self, view: &StateView, r: &mut [f64]) -> Result<()> {
        let blocks: Vec<ElementVector> = self
            .points
            .iter()
            .zip(&self.nodes)
            .filter_map(|(p, &node)| {
                let tn = self.pressure(p);
                (tn > 0.0).then(|| ElementVector {
                    lm: view.eqs.lm(&[node], &DofKind::DISPLACEMENT),
                    fe: DVector::from_column_slice((self.normal * tn).as_slice()),
                })
            })
            .collect();
        scatter_vectors(r, &blocks, &self.name)
    }

    fn contact_stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        let nnt = self.normal * self.normal.transpose() * self.config.penalty;
        let blocks: Vec<ElementMatrix> = self
            .points
            .iter()
            .zip(&self.nodes)
            .filter(|(p, _)| self.pressure(p) > 0.0)
            .map(|(_, &node)| ElementMatrix {
                lm: view.eqs.lm(&[node], &DofKind::DISPLACEMENT),
                ke: DMatrix::from_column_slice(3, 3, nnt.as_slice()),
            })
            .collect();
        scatter_matrices(k, &blocks, &self.name)
    }

    fn augment(&mut self, naug: usize) -> AugmentOutcome {
        if !self.config.augmented_lagrangian {
            return AugmentOutcome::Converged;
        }
        let norm0: f64 = self.points.iter().map(|p| p.lm * p.lm).sum();
        let updated: Vec<f64> = self.points.iter().map(|p| self.pressure(p).max(0.0)).collect();
        let norm1: f64 = updated.iter().map(|l| l * l).sum();
        let lnorm = multiplier_change(norm0, norm1);
        let outcome = AugmentOutcome::decide(
            lnorm <= self.config.atol,
            naug,
            self.config.augmentations.min,
            self.config.augmentations.max,
        );
        info!(interface = %self.name, naug, multiplier_change = lnorm, ?outcome, "augmentation");
        if outcome == AugmentOutcome::Pending {
            for (p, lm) in self.points.iter_mut().zip(updated) {
                p.lm = lm;
            }
        }
        outcome
    }

    fn pairing_revision(&self) -> u64 {
        0
    }

    fn save_state(&self) -> InterfaceState {
        InterfaceState::RigidWall(self.points.clone())
    }

    fn load_state(&mut self, state: &InterfaceState) -> Result<()> {
        let InterfaceState::RigidWall(points) = state else {
            return Err(super::kind_mismatch(ContactKind::RigidWall, state.kind()));
        };
        if points.len() != self.points.len() {
            return Err(Error::Checkpoint(format!(
                "rigid wall has {} nodes, state holds {}",
                self.points.len(),
                points.len()
            )));
        }
        self.points.clone_from_slice(points);
        Ok(())
    }

    fn summary(&self) -> ContactSummary {
        let loads: Vec<f64> = self.points.iter().map(|p| self.pressure(p)).filter(|t| *t > 0.0).collect();
        ContactSummary {
            name: self.name.clone(),
            kind: ContactKind::RigidWall,
            active: loads.len(),
            total: self.points.len(),
            mean_pressure: if loads.is_empty() { 0.0 } else { loads.iter().sum::<f64>() / loads.len() as f64 },
            max_gap: self.points.iter().map(|p| p.gap).fold(0.0, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofLayout;
    use crate::types::Point3;
    use approx::assert_relative_eq;

    fn setup(config: RigidWallConfig) -> (Mesh, EquationMap, RigidWallInterface) {
        let mut mesh = Mesh::new();
        mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]);
        mesh.add_surface("bottom", vec![vec![0, 2, 1]]).unwrap();
        let mut eqs = EquationMap::new(3, DofLayout::from_kinds(DofKind::DISPLACEMENT));
        eqs.renumber();
        let mut wall = RigidWallInterface::new(&mesh, 0, config).unwrap();
        wall.init(&mesh, &[]).unwrap();
        (mesh, eqs, wall)
    }

    #[test]
    fn test_only_penetrating_nodes_are_pushed_out() {
        let (mesh, eqs, mut wall) = setup(RigidWallConfig { penalty: 50.0, ..RigidWallConfig::default() });
        // node 0 sinks by 0.02, node 1 lifts by 0.02
        let mut values = vec![0.0; 9];
        values[2] = -0.02;
        values[5] = 0.02;
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        wall.project_surface(&view, true).unwrap();

        let mut r = vec![0.0; 9];
        wall.contact_forces(&view, &mut r).unwrap();
        assert_relative_eq!(r[2], 1.0, epsilon = 1e-12);
        assert_eq!(r[5], 0.0);
        assert_eq!(wall.summary().active, 1);
        assert_relative_eq!(wall.summary().max_gap, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_tilted_wall_normal_is_normalized() {
        let config = RigidWallConfig { normal: [0.0, 3.0, 4.0], offset: 1.0, ..RigidWallConfig::default() };
        let (mesh, eqs, mut wall) = setup(config);
        let values = vec![0.0; 9];
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        wall.project_surface(&view, true).unwrap();
        // node 2 at y = 1: 1 - 0.6
        assert_relative_eq!(wall.points()[2].gap, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_augmentation_converges_when_multiplier_settles() {
        let config = RigidWallConfig {
            penalty: 50.0,
            augmented_lagrangian: true,
            atol: 1e-3,
            ..RigidWallConfig::default()
        };
        let (mesh, eqs, mut wall) = setup(config);
        let mut values = vec![0.0; 9];
        values[2] = -0.02;
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        wall.project_surface(&view, true).unwrap();
        assert_eq!(wall.augment(0), AugmentOutcome::Pending);
        assert_relative_eq!(wall.points()[0].lm, 1.0, epsilon = 1e-12);

        values[2] = 0.0;
        let view = StateView { mesh: &mesh, eqs: &eqs, values: &values, time: 0.0 };
        wall.project_surface(&view, true).unwrap();
        assert_eq!(wall.augment(1), AugmentOutcome::Converged);
    }
}
