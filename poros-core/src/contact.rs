//! Contact constraints.
//!
//! Every surface-pair constraint implements [`ContactInterface`]; the
//! [`ContactConstraintSet`] owns them in the order they were added and is
//! the only thing the equilibrium driver talks to. The concrete kind of an
//! interface is reported through [`ContactKind`] for logging and
//! checkpoints, never used for dispatch.
//!
//! # Submodules
//!
//! - [`surface`] - contact surfaces and integration-point state
//! - [`search`] - uniform-grid master facet search
//! - [`sliding`] - frictionless facet-to-facet sliding, optionally biphasic
//! - [`tied`] - bilateral tied surfaces
//! - [`rigid_wall`] - nodes against a fixed plane

pub mod rigid_wall;
pub mod search;
pub mod sliding;
pub mod surface;
pub mod tied;

pub use rigid_wall::{RigidWallInterface, WallPoint};
pub use search::FacetGrid;
pub use sliding::SlidingInterface;
pub use surface::{ContactPoint, ContactSurface, Station};
pub use tied::{TiedInterface, TiedPoint};

use crate::dof::{DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::physics::{PhysicsModule, StateView};
use crate::sparse::CompactSymmMatrix;
use serde::{Deserialize, Serialize};

/// Contact interface kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactKind {
    Sliding,
    Tied,
    RigidWall,
}

/// Result of one augmentation pass.
///
/// Ordered by severity, so the outcome of a set is the maximum over its
/// interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AugmentOutcome {
    /// Multipliers are stable; nothing was changed.
    Converged,
    /// Multipliers were updated and the inner loop must run again.
    Pending,
    /// The augmentation budget ran out before the multipliers settled.
    Exhausted,
}

impl AugmentOutcome {
    /// Decide from the convergence test and the augmentation count.
    pub(crate) fn decide(converged: bool, naug: usize, min: usize, max: usize) -> Self {
        if converged && naug >= min {
            AugmentOutcome::Converged
        } else if naug >= max && !converged {
            AugmentOutcome::Exhausted
        } else {
            AugmentOutcome::Pending
        }
    }
}

/// Serialized state of one interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterfaceState {
    /// Points of each surface that acts as slave.
    Sliding(Vec<Vec<ContactPoint>>),
    Tied(Vec<TiedPoint>),
    RigidWall(Vec<WallPoint>),
}

impl InterfaceState {
    pub fn kind(&self) -> ContactKind {
        match self {
            InterfaceState::Sliding(_) => ContactKind::Sliding,
            InterfaceState::Tied(_) => ContactKind::Tied,
            InterfaceState::RigidWall(_) => ContactKind::RigidWall,
        }
    }
}

/// Snapshot for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactSummary {
    pub name: String,
    pub kind: ContactKind,
    /// Points (or nodes) carrying load.
    pub active: usize,
    pub total: usize,
    /// Load-weighted mean contact traction over active points.
    pub mean_pressure: f64,
    /// Largest penetration or tie gap.
    pub max_gap: f64,
}

/// A surface-pair constraint.
pub trait ContactInterface: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ContactKind;

    fn name(&self) -> &str;

    /// DOF kinds the interface couples.
    fn dof_kinds(&self) -> Vec<DofKind>;

    /// Size state arrays, pair surfaces and calibrate penalties on the
    /// reference configuration.
    fn init(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()>;

    /// Recompute penalties from the physics modules.
    fn recalibrate_penalty(&mut self, _mesh: &Mesh, _modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        Ok(())
    }

    /// Whether iteration `iteration` of an increment redoes the facet search.
    fn updates_search(&self, _iteration: usize) -> bool {
        true
    }

    /// Refresh gaps, normals and pairings for the state in `view`.
    fn project_surface(&mut self, view: &StateView, update_search: bool) -> Result<()>;

    /// Location vectors of the current pairings.
    fn build_profile(&self, mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>>;

    /// Add contact forces into the residual.
    fn contact_forces(&self, view: &StateView, r: &mut [f64]) -> Result<()>;

    /// Assemble the contact tangent.
    fn contact_stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()>;

    /// Test multiplier convergence and update the multipliers if needed.
    fn augment(&mut self, naug: usize) -> AugmentOutcome;

    /// Changes whenever the set of pairings (and thus the profile) changes.
    fn pairing_revision(&self) -> u64;

    fn save_state(&self) -> InterfaceState;

    fn load_state(&mut self, state: &InterfaceState) -> Result<()>;

    fn summary(&self) -> ContactSummary;
}

fn kind_mismatch(expected: ContactKind, found: ContactKind) -> Error {
    Error::Checkpoint(format!("expected {:?} interface state, found {:?}", expected, found))
}

/// Ordered collection of contact interfaces.
#[derive(Debug, Default)]
pub struct ContactConstraintSet {
    interfaces: Vec<Box<dyn ContactInterface>>,
}

impl ContactConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, interface: Box<dyn ContactInterface>) {
        self.interfaces.push(interface);
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn interfaces(&self) -> &[Box<dyn ContactInterface>] {
        &self.interfaces
    }

    pub fn get(&self, i: usize) -> Option<&dyn ContactInterface> {
        self.interfaces.get(i).map(|c| c.as_ref())
    }

    /// Union of DOF kinds over all interfaces.
    pub fn dof_kinds(&self) -> Vec<DofKind> {
        self.interfaces.iter().flat_map(|c| c.dof_kinds()).collect()
    }

    pub fn init(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        self.interfaces.iter_mut().try_for_each(|c| c.init(mesh, modules))
    }

    pub fn recalibrate_penalty(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        self.interfaces
            .iter_mut()
            .try_for_each(|c| c.recalibrate_penalty(mesh, modules))
    }

    /// Project every interface for iteration `iteration` of the increment.
    pub fn update(&mut self, view: &StateView, iteration: usize) -> Result<()> {
        for c in &mut self.interfaces {
            let search = c.updates_search(iteration);
            c.project_surface(view, search)?;
        }
        Ok(())
    }

    pub fn build_profile(&self, mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>> {
        self.interfaces
            .iter()
            .flat_map(|c| c.build_profile(mesh, eqs))
            .collect()
    }

    pub fn contact_forces(&self, view: &StateView, r: &mut [f64]) -> Result<()> {
        self.interfaces.iter().try_for_each(|c| c.contact_forces(view, r))
    }

    pub fn contact_stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        self.interfaces.iter().try_for_each(|c| c.contact_stiffness(view, k))
    }

    /// Augment every interface; the most severe outcome wins.
    pub fn augment(&mut self, naug: usize) -> AugmentOutcome {
        self.interfaces
            .iter_mut()
            .map(|c| c.augment(naug))
            .max()
            .unwrap_or(AugmentOutcome::Converged)
    }

    /// Combined pairing revision.
    pub fn pairing_revision(&self) -> u64 {
        self.interfaces
            .iter()
            .fold(0u64, |acc, c| acc.wrapping_mul(31).wrapping_add(c.pairing_revision()))
    }

    pub fn save_state(&self) -> Vec<InterfaceState> {
        self.interfaces.iter().map(|c| c.save_state()).collect()
    }

    pub fn load_state(&mut self, states: &[InterfaceState]) -> Result<()> {
        if states.len() != self.interfaces.len() {
            return Err(Error::Checkpoint(format!(
                "{} contact interfaces, state holds {}",
                self.interfaces.len(),
                states.len()
            )));
        }
        for (c, s) in self.interfaces.iter_mut().zip(states) {
            if c.kind() != s.kind() {
                return Err(kind_mismatch(c.kind(), s.kind()));
            }
            c.load_state(s)?;
        }
        Ok(())
    }

    pub fn summaries(&self) -> Vec<ContactSummary> {
        self.interfaces.iter().map(|c| c.summary()).collect()
    }
}

/// Relative change of the multiplier norm, `|L1² - L0²| / L1²`.
pub(crate) fn multiplier_change(norm0: f64, norm1: f64) -> f64 {
    if norm1 > 0.0 {
        (norm1 - norm0).abs() / norm1
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_severity_order() {
        assert!(AugmentOutcome::Exhausted > AugmentOutcome::Pending);
        assert!(AugmentOutcome::Pending > AugmentOutcome::Converged);
    }

    #[test]
    fn test_decide_respects_bounds() {
        assert_eq!(AugmentOutcome::decide(true, 0, 0, 10), AugmentOutcome::Converged);
        assert_eq!(AugmentOutcome::decide(true, 0, 2, 10), AugmentOutcome::Pending);
        assert_eq!(AugmentOutcome::decide(false, 3, 0, 10), AugmentOutcome::Pending);
        assert_eq!(AugmentOutcome::decide(false, 10, 0, 10), AugmentOutcome::Exhausted);
    }

    #[test]
    fn test_multiplier_change() {
        assert_eq!(multiplier_change(0.0, 0.0), 0.0);
        assert_eq!(multiplier_change(0.0, 4.0), 1.0);
        assert!(multiplier_change(3.99, 4.0) < 1e-2);
    }

    #[test]
    fn test_empty_set_is_converged() {
        let mut set = ContactConstraintSet::new();
        assert_eq!(set.augment(0), AugmentOutcome::Converged);
        assert!(set.save_state().is_empty());
        assert!(set.load_state(&[InterfaceState::RigidWall(vec![])]).is_err());
    }
}
