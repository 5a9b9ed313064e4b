//! Core data types shared by the solver.
//!
//! - Geometric primitives (points, vectors)
//! - Stress and strain tensors in Voigt notation
//! - Natural coordinates on surface facets

use nalgebra::{Matrix6, Vector2, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (displacement, force, normal, etc.).
pub type Vec3 = Vector3<f64>;

/// Natural coordinates (r, s) of a point on a surface facet.
pub type Natural2 = Vector2<f64>;

/// Symmetric stress tensor in Voigt notation.
///
/// Components are ordered as: [σ_xx, σ_yy, σ_zz, τ_xy, τ_yz, τ_xz]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressTensor(pub Vector6<f64>);

impl StressTensor {
    /// Create a new stress tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero stress state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Hydrostatic (mean) stress.
    pub fn hydrostatic(&self) -> f64 {
        (self.0[0] + self.0[1] + self.0[2]) / 3.0
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Symmetric strain tensor in Voigt notation.
///
/// Components are ordered as: [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz]
/// where γ = 2ε for engineering shear strain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainTensor(pub Vector6<f64>);

impl StrainTensor {
    /// Create a new strain tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero strain state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Volumetric strain.
    pub fn volumetric(&self) -> f64 {
        self.0[0] + self.0[1] + self.0[2]
    }
}

/// Constitutive matrix (material tangent) in Voigt notation.
///
/// Maps strain increments to stress increments: dσ = D · dε
pub type ConstitutiveMatrix = Matrix6<f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hydrostatic_stress() {
        let stress = StressTensor::new([100.0, 200.0, 300.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(stress.hydrostatic(), 200.0, epsilon = 1e-10);
    }

    #[test]
    fn test_volumetric_strain() {
        let strain = StrainTensor::new([0.001, 0.002, 0.003, 0.0, 0.0, 0.0]);
        assert_relative_eq!(strain.volumetric(), 0.006, epsilon = 1e-15);
    }

    #[test]
    fn test_non_finite_stress_detected() {
        let stress = StressTensor::new([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!stress.is_finite());
        assert!(StressTensor::zero().is_finite());
    }
}
