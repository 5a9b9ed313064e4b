//! Error types for poros operations.

use thiserror::Error;

/// Result type alias using poros Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during poros operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Iteration or reformation budget exhausted without meeting tolerances.
    #[error("convergence failure at t = {time}: {iterations} iterations, {reformations} reformations")]
    ConvergenceFailure {
        time: f64,
        iterations: usize,
        reformations: usize,
    },

    /// Factorization reported a singular or non-positive-definite system.
    #[error("singular system: {0}")]
    SingularSystem(String),

    /// Multiplier updates did not stabilize within the augmentation budget.
    #[error("augmentations did not stabilize after {0} passes")]
    AugmentationDivergence(usize),

    /// Assembly before profile creation, or an entry outside the profile.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// NaN or Inf detected in a residual or stiffness contribution.
    #[error("numerical fault: {0}")]
    NumericalFault(String),

    /// Solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Mesh-related errors.
    #[error("mesh error: {0}")]
    Mesh(String),

    /// Invalid material properties.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Invalid configuration values.
    #[error("configuration error: {0}")]
    Config(String),

    /// Checkpoint encode/decode or identity mismatch.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O errors (checkpoint files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Step-level faults that a time stepper may retry with a smaller increment.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConvergenceFailure { .. }
                | Error::SingularSystem(_)
                | Error::AugmentationDivergence(_)
                | Error::NumericalFault(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::SingularSystem("pivot 3".into()).is_recoverable());
        assert!(Error::AugmentationDivergence(10).is_recoverable());
        assert!(!Error::InvalidProfile("(3, 1)".into()).is_recoverable());
        assert!(!Error::Config("dtol".into()).is_recoverable());
    }
}
