//! Material point evaluators.
//!
//! The solver core never looks inside a constitutive law. Physics modules
//! call one of the traits below at every integration point; each call is a
//! pure function of the point state, so evaluators are shared across
//! threads behind an `Arc`.
//!
//! Only reference laws ship here: isotropic linear elasticity (which also
//! serves as the linear uniaxial law) and constant isotropic permeability.

use crate::error::{Error, Result};
use crate::types::{ConstitutiveMatrix, StrainTensor, StressTensor, Vec3};
use nalgebra::{Matrix3, Matrix6};

/// Solid response: strain in, stress and tangent out.
pub trait SolidMaterial: Send + Sync + std::fmt::Debug {
    /// Stress and material tangent at `strain`.
    fn evaluate(&self, strain: &StrainTensor) -> (StressTensor, ConstitutiveMatrix);

    /// Bulk modulus estimated from the tangent at zero strain.
    ///
    /// Used to scale automatic contact penalties.
    fn bulk_modulus(&self) -> f64 {
        let (_, d) = self.evaluate(&StrainTensor::zero());
        (d[(0, 0)] + d[(1, 1)] + d[(2, 2)] + 2.0 * (d[(0, 1)] + d[(1, 2)] + d[(0, 2)])) / 9.0
    }
}

/// One-dimensional response along a fiber or truss axis.
///
/// The strain measure is chosen by the caller: engineering strain for
/// small-displacement elements, logarithmic strain (with Kirchhoff stress
/// out) for large-deformation ones.
pub trait UniaxialMaterial: Send + Sync + std::fmt::Debug {
    /// Stress and its derivative with respect to `strain`.
    fn evaluate(&self, strain: f64) -> (f64, f64);
}

/// Flux law: `w = -K · grad`, with tangent `dw/d(grad)`.
pub trait FluxMaterial: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, gradient: &Vec3) -> (Vec3, Matrix3<f64>);

    /// Scalar conductivity, used to scale automatic pressure penalties.
    fn conductivity(&self) -> f64 {
        let (_, k) = self.evaluate(&Vec3::zeros());
        -(k[(0, 0)] + k[(1, 1)] + k[(2, 2)]) / 3.0
    }
}

/// Isotropic linear elastic material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Young's modulus.
    pub youngs_modulus: f64,
    /// Poisson's ratio (dimensionless).
    pub poissons_ratio: f64,
}

impl Material {
    /// Create a new isotropic linear elastic material.
    ///
    /// # Errors
    ///
    /// Returns error if `E <= 0` or ν is outside (-1, 0.5).
    pub fn new(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        if youngs_modulus <= 0.0 {
            return Err(Error::InvalidMaterial(
                "Young's modulus must be positive".into(),
            ));
        }
        if poissons_ratio <= -1.0 || poissons_ratio >= 0.5 {
            return Err(Error::InvalidMaterial(
                "Poisson's ratio must be in range (-1, 0.5)".into(),
            ));
        }
        Ok(Self {
            youngs_modulus,
            poissons_ratio,
        })
    }

    /// Shear modulus G = E / (2(1 + ν)).
    pub fn shear_modulus(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poissons_ratio))
    }

    /// Lamé's first parameter λ = Eν / ((1+ν)(1-2ν)).
    pub fn lame_lambda(&self) -> f64 {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;
        e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
    }

    /// 3D constitutive matrix, σ = D·ε in Voigt notation.
    pub fn constitutive_3d(&self) -> ConstitutiveMatrix {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;

        let factor = e / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let c11 = factor * (1.0 - nu);
        let c12 = factor * nu;
        let c44 = factor * (1.0 - 2.0 * nu) / 2.0; // = G

        Matrix6::new(
            c11, c12, c12, 0.0, 0.0, 0.0,
            c12, c11, c12, 0.0, 0.0, 0.0,
            c12, c12, c11, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, c44, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, c44, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, c44,
        )
    }
}

impl SolidMaterial for Material {
    fn evaluate(&self, strain: &StrainTensor) -> (StressTensor, ConstitutiveMatrix) {
        let d = self.constitutive_3d();
        (StressTensor(d * strain.0), d)
    }

    fn bulk_modulus(&self) -> f64 {
        self.youngs_modulus / (3.0 * (1.0 - 2.0 * self.poissons_ratio))
    }
}

impl UniaxialMaterial for Material {
    fn evaluate(&self, strain: f64) -> (f64, f64) {
        (self.youngs_modulus * strain, self.youngs_modulus)
    }
}

/// Constant isotropic permeability (or diffusivity).
#[derive(Debug, Clone, PartialEq)]
pub struct IsotropicPermeability {
    pub perm: f64,
}

impl IsotropicPermeability {
    pub fn new(perm: f64) -> Result<Self> {
        if perm <= 0.0 || !perm.is_finite() {
            return Err(Error::InvalidMaterial("permeability must be positive".into()));
        }
        Ok(Self { perm })
    }
}

impl FluxMaterial for IsotropicPermeability {
    fn evaluate(&self, gradient: &Vec3) -> (Vec3, Matrix3<f64>) {
        (-self.perm * gradient, Matrix3::identity() * -self.perm)
    }

    fn conductivity(&self) -> f64 {
        self.perm
    }
}
