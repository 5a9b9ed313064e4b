//! 8-node hexahedron kinematics.
//!
//! Trilinear shape functions in natural coordinates (ξ, η, ζ) ∈ [-1, 1]³:
//! ```text
//! N_i = (1 + ξ_i*ξ)(1 + η_i*η)(1 + ζ_i*ζ) / 8
//! ```
//!
//! Node numbering (counterclockwise on the bottom face seen from above):
//! ```text
//!        7-------6
//!       /|      /|
//!      4-------5 |
//!      | 3-----|-2
//!      |/      |/
//!      0-------1
//! ```
//!
//! Only geometry lives here: shape functions, spatial gradients and the
//! strain-displacement matrix. Physics modules combine these with their
//! own material evaluators.

use crate::element::gauss::{gauss_hex, GaussPoint};
use crate::error::{Error, Result};
use crate::types::{Point3, Vec3};
use nalgebra::{DMatrix, Matrix3, Vector3};

const XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

/// Local node indices of the six faces, ordered so the facet normal points
/// out of the element.
pub const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [1, 2, 6, 5],
    [2, 3, 7, 6],
    [3, 0, 4, 7],
];

/// Spatial shape-function data at one integration point.
#[derive(Debug, Clone)]
pub struct Hex8Point {
    pub shape: [f64; 8],
    /// ∇N_i in physical coordinates.
    pub grad: [Vec3; 8],
    /// det(J) times the quadrature weight.
    pub jw: f64,
}

/// 8-node hexahedron (trilinear brick).
#[derive(Debug, Clone, Copy, Default)]
pub struct Hex8;

impl Hex8 {
    pub const N_NODES: usize = 8;

    pub fn shape_functions(xi: f64, eta: f64, zeta: f64) -> [f64; 8] {
        let mut n = [0.0; 8];
        for i in 0..8 {
            n[i] = 0.125 * (1.0 + XI[i] * xi) * (1.0 + ETA[i] * eta) * (1.0 + ZETA[i] * zeta);
        }
        n
    }

    /// (∂N/∂ξ, ∂N/∂η, ∂N/∂ζ) per node.
    pub fn shape_derivatives(xi: f64, eta: f64, zeta: f64) -> [Vec3; 8] {
        let mut d = [Vec3::zeros(); 8];
        for i in 0..8 {
            d[i] = Vector3::new(
                0.125 * XI[i] * (1.0 + ETA[i] * eta) * (1.0 + ZETA[i] * zeta),
                0.125 * (1.0 + XI[i] * xi) * ETA[i] * (1.0 + ZETA[i] * zeta),
                0.125 * (1.0 + XI[i] * xi) * (1.0 + ETA[i] * eta) * ZETA[i],
            );
        }
        d
    }

    /// Jacobian with rows ∂(x, y, z)/∂ξ, ∂/∂η, ∂/∂ζ.
    fn jacobian(coords: &[Point3], dn: &[Vec3; 8]) -> Matrix3<f64> {
        let mut j = Matrix3::zeros();
        for (x, d) in coords.iter().zip(dn) {
            j += d * x.transpose();
        }
        j
    }

    /// Shape data at a quadrature point.
    ///
    /// Fails with [`Error::NumericalFault`] on an inverted or degenerate
    /// element.
    pub fn point(coords: &[Point3], gp: &GaussPoint) -> Result<Hex8Point> {
        if coords.len() != Self::N_NODES {
            return Err(Error::Mesh(format!(
                "hex8 requires 8 nodal coordinates, got {}",
                coords.len()
            )));
        }
        let dn = Self::shape_derivatives(gp.xi(), gp.eta(), gp.zeta());
        let j = Self::jacobian(coords, &dn);
        let det_j = j.determinant();
        if det_j <= 0.0 || !det_j.is_finite() {
            return Err(Error::NumericalFault(format!(
                "non-positive jacobian determinant {:e}",
                det_j
            )));
        }
        let j_inv = j
            .try_inverse()
            .ok_or_else(|| Error::NumericalFault("singular element jacobian".into()))?;

        let mut grad = [Vec3::zeros(); 8];
        for i in 0..8 {
            grad[i] = j_inv * dn[i];
        }
        Ok(Hex8Point {
            shape: Self::shape_functions(gp.xi(), gp.eta(), gp.zeta()),
            grad,
            jw: det_j * gp.weight,
        })
    }

    /// Shape data at the 2×2×2 integration points.
    pub fn points(coords: &[Point3]) -> Result<Vec<Hex8Point>> {
        gauss_hex(2).iter().map(|gp| Self::point(coords, gp)).collect()
    }

    /// 6×24 strain-displacement matrix, Voigt order
    /// [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz].
    pub fn b_matrix(grad: &[Vec3; 8]) -> DMatrix<f64> {
        let mut b = DMatrix::zeros(6, 24);
        for (i, g) in grad.iter().enumerate() {
            let col = 3 * i;
            b[(0, col)] = g.x;
            b[(1, col + 1)] = g.y;
            b[(2, col + 2)] = g.z;
            b[(3, col)] = g.y;
            b[(3, col + 1)] = g.x;
            b[(4, col + 1)] = g.z;
            b[(4, col + 2)] = g.y;
            b[(5, col)] = g.z;
            b[(5, col + 2)] = g.x;
        }
        b
    }

    /// Element volume.
    pub fn volume(coords: &[Point3]) -> Result<f64> {
        Ok(Self::points(coords)?.iter().map(|p| p.jw).sum())
    }
}
