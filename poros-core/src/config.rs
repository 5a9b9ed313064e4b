//! Driver, contact and stepper configuration.
//!
//! Plain structs with defaults; every struct validates itself and reports
//! bad values as [`Error::Config`].

use crate::error::{Error, Result};
use crate::solver::SolverConfig;
use serde::{Deserialize, Serialize};

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value < 0.0 || !value.is_finite() {
        return Err(Error::Config(format!("{} must be a finite non-negative number, got {}", name, value)));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value <= 0.0 || !value.is_finite() {
        return Err(Error::Config(format!("{} must be positive, got {}", name, value)));
    }
    Ok(())
}

/// Convergence tolerances. A zero tolerance disables its check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Displacement (relative increment norm).
    pub dtol: f64,
    /// Energy.
    pub etol: f64,
    /// Residual.
    pub rtol: f64,
    /// Absolute residual below which the iteration is converged outright.
    pub rmin: f64,
    /// Fluid pressure block.
    pub ptol: f64,
    /// Concentration blocks.
    pub ctol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            dtol: 0.001,
            etol: 0.01,
            rtol: 0.0,
            rmin: 1e-20,
            ptol: 0.01,
            ctol: 0.01,
        }
    }
}

impl Tolerances {
    pub fn validate(&self) -> Result<()> {
        check_non_negative("dtol", self.dtol)?;
        check_non_negative("etol", self.etol)?;
        check_non_negative("rtol", self.rtol)?;
        check_non_negative("rmin", self.rmin)?;
        check_non_negative("ptol", self.ptol)?;
        check_non_negative("ctol", self.ctol)?;
        if self.dtol == 0.0 && self.etol == 0.0 && self.rtol == 0.0 {
            return Err(Error::Config("at least one of dtol, etol, rtol must be active".into()));
        }
        Ok(())
    }
}

/// Secant line search along the Newton direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// Accept a step once `|ui·R(s)| <= tolerance·|ui·R(0)|`. Zero disables
    /// the search.
    pub tolerance: f64,
    /// Smallest step length; reaching it counts as a failed search.
    pub min_step: f64,
    pub max_iterations: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.9,
            min_step: 0.01,
            max_iterations: 5,
        }
    }
}

impl LineSearchConfig {
    pub fn validate(&self) -> Result<()> {
        check_non_negative("line search tolerance", self.tolerance)?;
        if self.tolerance >= 1.0 {
            return Err(Error::Config("line search tolerance must be below 1".into()));
        }
        if !(self.min_step > 0.0 && self.min_step < 1.0) {
            return Err(Error::Config(format!(
                "line search min_step {} must lie in (0, 1)",
                self.min_step
            )));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.tolerance > 0.0 && self.max_iterations > 0
    }
}

/// Equilibrium driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub tolerances: Tolerances,
    /// Iterations allowed in one inner loop.
    pub max_iterations: usize,
    /// Tangent reformations allowed in one increment.
    pub max_reformations: usize,
    /// BFGS updates between reformations. Zero gives full Newton.
    pub max_updates: usize,
    /// Largest accepted BFGS condition number estimate.
    pub cmax: f64,
    pub line_search: LineSearchConfig,
    /// Reform the tangent at the start of every increment.
    pub reform_each_step: bool,
    /// Run contact augmentations after convergence.
    pub augmentation: bool,
    /// Treat negative concentrations as a numerical fault.
    pub reject_negative_concentration: bool,
    pub solver: SolverConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_iterations: 50,
            max_reformations: 15,
            max_updates: 10,
            cmax: 1e5,
            line_search: LineSearchConfig::default(),
            reform_each_step: true,
            augmentation: true,
            reject_negative_concentration: false,
            solver: SolverConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Full Newton: reform on every iteration.
    pub fn full_newton() -> Self {
        Self {
            max_updates: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.tolerances.validate()?;
        self.line_search.validate()?;
        self.solver.validate()?;
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be positive".into()));
        }
        if self.max_reformations == 0 {
            return Err(Error::Config("max_reformations must be positive".into()));
        }
        if self.cmax <= 1.0 || !self.cmax.is_finite() {
            return Err(Error::Config(format!("cmax {} must exceed 1", self.cmax)));
        }
        Ok(())
    }
}

/// Augmentation budget shared by the contact interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationLimits {
    /// Augmentations always performed.
    pub min: usize,
    /// Augmentations after which an unconverged interface gives up.
    pub max: usize,
}

impl Default for AugmentationLimits {
    fn default() -> Self {
        Self { min: 0, max: 10 }
    }
}

impl AugmentationLimits {
    fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(Error::Config(format!(
                "minimum augmentations {} exceed maximum {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Facet-to-facet sliding contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingConfig {
    /// Normal penalty, or its scale factor with `auto_penalty`.
    pub penalty: f64,
    /// Scale the penalty by the stiffness of the underlying elements.
    pub auto_penalty: bool,
    /// Swap slave and master for a second pass.
    pub two_pass: bool,
    /// Augmented Lagrangian multiplier updates.
    pub augmented_lagrangian: bool,
    /// Relative multiplier change tolerance.
    pub atol: f64,
    /// RMS gap tolerance; zero disables.
    pub gtol: f64,
    /// RMS pressure gap tolerance; zero disables.
    pub ptol: f64,
    pub augmentations: AugmentationLimits,
    /// Projection tolerance in natural coordinates.
    pub search_tolerance: f64,
    /// Search radius relative to the mean master facet size.
    pub search_radius: f64,
    /// Multiplier of the normal-variation stiffness terms.
    pub higher_order: f64,
    /// Iterations per increment that redo the master facet search.
    /// Zero redoes it every iteration.
    pub segment_updates: usize,
    /// Transfer fluid pressure across the interface.
    pub biphasic: bool,
    /// Pressure penalty (biphasic).
    pub pressure_penalty: f64,
}

impl Default for SlidingConfig {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            auto_penalty: false,
            two_pass: false,
            augmented_lagrangian: false,
            atol: 0.1,
            gtol: 0.0,
            ptol: 0.0,
            augmentations: AugmentationLimits::default(),
            search_tolerance: 0.01,
            search_radius: 1.0,
            higher_order: 1.0,
            segment_updates: 0,
            biphasic: false,
            pressure_penalty: 1.0,
        }
    }
}

impl SlidingConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("penalty", self.penalty)?;
        check_non_negative("atol", self.atol)?;
        check_non_negative("gtol", self.gtol)?;
        check_non_negative("ptol", self.ptol)?;
        check_non_negative("search tolerance", self.search_tolerance)?;
        check_positive("search radius", self.search_radius)?;
        check_non_negative("higher order multiplier", self.higher_order)?;
        if self.biphasic {
            check_positive("pressure penalty", self.pressure_penalty)?;
        }
        self.augmentations.validate()
    }
}

/// Tied (glued) surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiedConfig {
    pub penalty: f64,
    pub augmented_lagrangian: bool,
    pub atol: f64,
    pub augmentations: AugmentationLimits,
    pub search_tolerance: f64,
    pub search_radius: f64,
}

impl Default for TiedConfig {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            augmented_lagrangian: false,
            atol: 0.01,
            augmentations: AugmentationLimits::default(),
            search_tolerance: 0.01,
            search_radius: 1.0,
        }
    }
}

impl TiedConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("penalty", self.penalty)?;
        check_non_negative("atol", self.atol)?;
        check_non_negative("search tolerance", self.search_tolerance)?;
        check_positive("search radius", self.search_radius)?;
        self.augmentations.validate()
    }
}

/// Slave nodes against a fixed plane `n·x = offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidWallConfig {
    /// Plane normal pointing into the admissible half-space.
    pub normal: [f64; 3],
    pub offset: f64,
    pub penalty: f64,
    pub augmented_lagrangian: bool,
    pub atol: f64,
    pub augmentations: AugmentationLimits,
}

impl Default for RigidWallConfig {
    fn default() -> Self {
        Self {
            normal: [0.0, 0.0, 1.0],
            offset: 0.0,
            penalty: 1.0,
            augmented_lagrangian: false,
            atol: 0.01,
            augmentations: AugmentationLimits::default(),
        }
    }
}

impl RigidWallConfig {
    pub fn validate(&self) -> Result<()> {
        let norm = self.normal.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= 0.0 || !norm.is_finite() {
            return Err(Error::Config("rigid wall normal must be non-zero".into()));
        }
        if !self.offset.is_finite() {
            return Err(Error::Config("rigid wall offset must be finite".into()));
        }
        check_positive("penalty", self.penalty)?;
        check_non_negative("atol", self.atol)?;
        self.augmentations.validate()
    }
}

/// Automatic time stepping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    /// Initial increment.
    pub dt0: f64,
    pub dtmin: f64,
    pub dtmax: f64,
    /// Target number of iterations per increment.
    pub iteopt: usize,
    /// Failed attempts allowed before giving up.
    pub max_retries: usize,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            dt0: 0.1,
            dtmin: 1e-4,
            dtmax: 0.1,
            iteopt: 10,
            max_retries: 5,
        }
    }
}

impl StepperConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("dt0", self.dt0)?;
        check_positive("dtmin", self.dtmin)?;
        check_positive("dtmax", self.dtmax)?;
        if !(self.dtmin <= self.dt0 && self.dt0 <= self.dtmax) {
            return Err(Error::Config(format!(
                "time steps must satisfy dtmin <= dt0 <= dtmax ({} <= {} <= {})",
                self.dtmin, self.dt0, self.dtmax
            )));
        }
        if self.iteopt == 0 {
            return Err(Error::Config("iteopt must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(DriverConfig::default().validate().is_ok());
        assert!(DriverConfig::full_newton().validate().is_ok());
        assert!(SlidingConfig::default().validate().is_ok());
        assert!(TiedConfig::default().validate().is_ok());
        assert!(RigidWallConfig::default().validate().is_ok());
        assert!(StepperConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = DriverConfig::default();
        cfg.tolerances.dtol = -1.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = DriverConfig {
            tolerances: Tolerances { dtol: 0.0, etol: 0.0, rtol: 0.0, ..Tolerances::default() },
            ..DriverConfig::default()
        };
        assert!(cfg.validate().is_err());

        // the first factorization already counts as a reformation
        let cfg = DriverConfig { max_reformations: 0, ..DriverConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let sliding = SlidingConfig {
            augmentations: AugmentationLimits { min: 5, max: 2 },
            ..SlidingConfig::default()
        };
        assert!(sliding.validate().is_err());

        let wall = RigidWallConfig { normal: [0.0; 3], ..RigidWallConfig::default() };
        assert!(wall.validate().is_err());

        let stepper = StepperConfig { dt0: 1.0, dtmax: 0.5, ..StepperConfig::default() };
        assert!(stepper.validate().is_err());
    }

    #[test]
    fn test_line_search_switch() {
        assert!(LineSearchConfig::default().is_enabled());
        let off = LineSearchConfig { tolerance: 0.0, ..LineSearchConfig::default() };
        assert!(!off.is_enabled());
        assert!(off.validate().is_ok());
    }
}
