//! Physics modules: the element domains the driver is composed of.
//!
//! The equilibrium driver owns a list of [`PhysicsModule`]s. Each module
//! declares the DOF kinds it needs, contributes to the matrix profile, and
//! adds its part of the residual and tangent. The driver never knows what
//! kind of field a module solves for.
//!
//! # Submodules
//!
//! - [`truss`] - 2-node axial members
//! - [`solid`] - small-strain 8-node hexahedra
//! - [`diffusion`] - steady scalar diffusion on 8-node hexahedra

pub mod diffusion;
pub mod solid;
pub mod truss;

pub use diffusion::DiffusionDomain;
pub use solid::SolidDomain;
pub use truss::{TrussDomain, TrussKinematics};

use crate::dof::{DofBlock, DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::{ElementType, Mesh};
use crate::sparse::CompactSymmMatrix;
use crate::types::Point3;

/// Read-only view of the current solution state.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    pub mesh: &'a Mesh,
    pub eqs: &'a EquationMap,
    /// Nodal values, `n_nodes × dofs_per_node`, prescribed values included.
    pub values: &'a [f64],
    pub time: f64,
}

impl<'a> StateView<'a> {
    /// Nodal value of `kind`; zero when the layout lacks it.
    pub fn value(&self, node: usize, kind: DofKind) -> f64 {
        self.eqs.index(node, kind).map_or(0.0, |k| self.values[k])
    }

    /// Displacement of `node`.
    pub fn displacement(&self, node: usize) -> Point3 {
        Point3::new(
            self.value(node, DofKind::X),
            self.value(node, DofKind::Y),
            self.value(node, DofKind::Z),
        )
    }

    /// Current position of `node`.
    pub fn position(&self, node: usize) -> Point3 {
        self.mesh.nodes()[node] + self.displacement(node)
    }
}

/// A set of elements sharing one field formulation.
pub trait PhysicsModule: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// DOF kinds the module needs at its nodes.
    fn dof_kinds(&self) -> Vec<DofKind>;

    /// One location vector per element, used to build the profile.
    fn location_vectors(&self, mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>>;

    /// Add `-F_int` into the equation-indexed residual `r`.
    fn residual(&self, view: &StateView, r: &mut [f64]) -> Result<()>;

    /// Assemble the tangent `∂F_int/∂u` into `k`.
    fn stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()>;

    /// Stiffness scale `K·A/V` of `element` seen through a facet of area
    /// `facet_area`, for automatic penalty calibration. `None` when the
    /// element is not part of this module or the block is not its field.
    fn surface_stiffness(
        &self,
        _mesh: &Mesh,
        _element: usize,
        _facet_area: f64,
        _block: DofBlock,
    ) -> Option<f64> {
        None
    }
}

/// Validate that every listed element exists and has the expected type.
pub(crate) fn check_elements(mesh: &Mesh, elements: &[usize], expected: ElementType) -> Result<()> {
    for &e in elements {
        match mesh.element(e) {
            Some(conn) if conn.element_type == expected => {}
            Some(conn) => {
                return Err(Error::Mesh(format!(
                    "element {} is {:?}, expected {:?}",
                    e, conn.element_type, expected
                )))
            }
            None => return Err(Error::Mesh(format!("element {} does not exist", e))),
        }
    }
    Ok(())
}
