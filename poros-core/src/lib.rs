//! poros core - nonlinear finite element equilibrium solver
//!
//! Quasi-Newton equilibrium iterations over a sparse symmetric system,
//! with augmented Lagrangian contact constraints:
//! - Physics modules (truss, small-strain solid, scalar diffusion)
//! - Parallel element evaluation using Rayon
//! - Compact symmetric sparse storage (lower triangle, column-wise)
//! - Direct and iterative linear solvers
//! - Sliding, tied and rigid-wall contact
//!
//! # Architecture
//!
//! - [`EquilibriumDriver`]: owns the model and runs one increment at a time
//! - [`PhysicsModule`] trait: residual and tangent of one element domain
//! - [`CompactSymmMatrix`]: the assembled global tangent
//! - [`LinearSolver`] trait: factorization backends
//! - [`ContactConstraintSet`]: contact interfaces behind one trait
//! - [`AutoStepper`]: time-step control outside the driver

pub mod assembly;
pub mod bfgs;
pub mod checkpoint;
pub mod config;
pub mod contact;
pub mod dof;
pub mod driver;
pub mod element;
pub mod error;
pub mod loadcurve;
pub mod material;
pub mod mesh;
pub mod physics;
pub mod registry;
pub mod solver;
pub mod sparse;
pub mod stepper;
pub mod types;

pub use assembly::BoundaryCondition;
pub use checkpoint::Checkpoint;
pub use config::{DriverConfig, RigidWallConfig, SlidingConfig, StepperConfig, TiedConfig, Tolerances};
pub use contact::{AugmentOutcome, ContactConstraintSet, ContactInterface, ContactKind};
pub use dof::{DofKind, EquationMap};
pub use driver::{EquilibriumDriver, StepReport, TimeStepState};
pub use error::{Error, Result};
pub use loadcurve::LoadCurve;
pub use material::Material;
pub use mesh::Mesh;
pub use physics::PhysicsModule;
pub use registry::{MaterialRegistry, ParamList, ParamValue};
pub use solver::{LinearSolver, SolverConfig, SolverType};
pub use sparse::{CompactSymmMatrix, SparseMatrixProfile};
pub use stepper::AutoStepper;
pub use types::{Point3, StrainTensor, StressTensor, Vec3};
