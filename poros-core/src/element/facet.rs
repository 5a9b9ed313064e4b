//! Surface facets: shape functions, local frames and closest-point
//! projection.
//!
//! Facet nodes are ordered counterclockwise when seen from outside the
//! body, so `∂x/∂r × ∂x/∂s` is the outward normal.

use crate::element::gauss::{gauss_quad, gauss_tri, GaussPoint};
use crate::types::{Natural2, Point3, Vec3};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Newton iterations allowed in [`FacetType::project`].
const PROJECTION_ITERATIONS: usize = 25;
/// Convergence tolerance on the natural-coordinate update.
const PROJECTION_TOL: f64 = 1e-12;

/// Facet shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetType {
    /// Bilinear quadrilateral on [-1, 1]².
    Quad4,
    /// Linear triangle on the unit simplex.
    Tri3,
}

impl FacetType {
    /// Facet type for a node count.
    pub fn from_nodes(n: usize) -> Option<Self> {
        match n {
            4 => Some(FacetType::Quad4),
            3 => Some(FacetType::Tri3),
            _ => None,
        }
    }

    pub fn n_nodes(self) -> usize {
        match self {
            FacetType::Quad4 => 4,
            FacetType::Tri3 => 3,
        }
    }

    /// Integration points used for contact.
    pub fn gauss_points(self) -> Vec<GaussPoint> {
        match self {
            FacetType::Quad4 => gauss_quad(2),
            FacetType::Tri3 => gauss_tri(),
        }
    }

    /// Natural coordinates of the facet centre.
    pub fn center(self) -> Natural2 {
        match self {
            FacetType::Quad4 => Vector2::new(0.0, 0.0),
            FacetType::Tri3 => Vector2::new(1.0 / 3.0, 1.0 / 3.0),
        }
    }

    /// Shape function values at (r, s). Entries past `n_nodes` are zero.
    pub fn shape(self, rs: &Natural2) -> [f64; 4] {
        let (r, s) = (rs.x, rs.y);
        match self {
            FacetType::Quad4 => [
                0.25 * (1.0 - r) * (1.0 - s),
                0.25 * (1.0 + r) * (1.0 - s),
                0.25 * (1.0 + r) * (1.0 + s),
                0.25 * (1.0 - r) * (1.0 + s),
            ],
            FacetType::Tri3 => [1.0 - r - s, r, s, 0.0],
        }
    }

    /// (∂N/∂r, ∂N/∂s) per node.
    pub fn shape_derivatives(self, rs: &Natural2) -> [Natural2; 4] {
        let (r, s) = (rs.x, rs.y);
        match self {
            FacetType::Quad4 => [
                Vector2::new(-0.25 * (1.0 - s), -0.25 * (1.0 - r)),
                Vector2::new(0.25 * (1.0 - s), -0.25 * (1.0 + r)),
                Vector2::new(0.25 * (1.0 + s), 0.25 * (1.0 + r)),
                Vector2::new(-0.25 * (1.0 + s), 0.25 * (1.0 - r)),
            ],
            FacetType::Tri3 => [
                Vector2::new(-1.0, -1.0),
                Vector2::new(1.0, 0.0),
                Vector2::new(0.0, 1.0),
                Vector2::zeros(),
            ],
        }
    }

    /// Whether (r, s) lies on the facet, with a small tolerance.
    pub fn contains(self, rs: &Natural2, tol: f64) -> bool {
        match self {
            FacetType::Quad4 => rs.x.abs() <= 1.0 + tol && rs.y.abs() <= 1.0 + tol,
            FacetType::Tri3 => rs.x >= -tol && rs.y >= -tol && rs.x + rs.y <= 1.0 + tol,
        }
    }

    /// Position at (r, s).
    pub fn position(self, x: &[Point3], rs: &Natural2) -> Point3 {
        let n = self.shape(rs);
        x.iter().zip(n).map(|(xi, ni)| xi * ni).sum()
    }

    /// Covariant tangents (∂x/∂r, ∂x/∂s).
    pub fn tangents(self, x: &[Point3], rs: &Natural2) -> (Vec3, Vec3) {
        let dn = self.shape_derivatives(rs);
        let mut t1 = Vec3::zeros();
        let mut t2 = Vec3::zeros();
        for (xi, d) in x.iter().zip(dn) {
            t1 += xi * d.x;
            t2 += xi * d.y;
        }
        (t1, t2)
    }

    /// Outward unit normal and surface Jacobian |t1 × t2| at (r, s).
    pub fn normal(self, x: &[Point3], rs: &Natural2) -> (Vec3, f64) {
        let (t1, t2) = self.tangents(x, rs);
        let n = t1.cross(&t2);
        let j = n.norm();
        if j > 0.0 {
            (n / j, j)
        } else {
            (Vec3::zeros(), 0.0)
        }
    }

    /// Mixed derivative ∂²x/∂r∂s; zero for triangles.
    pub fn twist(self, x: &[Point3]) -> Vec3 {
        match self {
            FacetType::Quad4 => 0.25 * (x[0] - x[1] + x[2] - x[3]),
            FacetType::Tri3 => Vec3::zeros(),
        }
    }

    /// Facet area.
    pub fn area(self, x: &[Point3]) -> f64 {
        self.gauss_points()
            .iter()
            .map(|gp| gp.weight * self.normal(x, &Vector2::new(gp.xi(), gp.eta())).1)
            .sum()
    }

    /// Closest point of `p` on the facet spanned by `x`.
    ///
    /// Newton iteration on the stationarity of |x(r, s) - p|². Returns the
    /// natural coordinates when the iteration converges to a point inside
    /// the facet (within `tol`), `None` otherwise.
    pub fn project(self, x: &[Point3], p: &Point3, tol: f64) -> Option<Natural2> {
        let twist = self.twist(x);
        let mut rs = self.center();
        for _ in 0..PROJECTION_ITERATIONS {
            let d = self.position(x, &rs) - p;
            let (t1, t2) = self.tangents(x, &rs);
            let f = Vector2::new(t1.dot(&d), t2.dot(&d));
            let h12 = t1.dot(&t2) + d.dot(&twist);
            let h = Matrix2::new(t1.dot(&t1), h12, h12, t2.dot(&t2));
            let drs = h.try_inverse()? * f;
            rs -= drs;
            if drs.norm() < PROJECTION_TOL {
                return self.contains(&rs, tol).then_some(rs);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(z: f64) -> Vec<Point3> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(2.0, 0.0, z),
            Point3::new(2.0, 2.0, z),
            Point3::new(0.0, 2.0, z),
        ]
    }

    #[test]
    fn test_quad_normal_and_area() {
        let x = square(1.0);
        let (n, j) = FacetType::Quad4.normal(&x, &Vector2::new(0.3, -0.2));
        assert_relative_eq!(n, Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-14);
        assert_relative_eq!(j, 1.0, epsilon = 1e-14);
        assert_relative_eq!(FacetType::Quad4.area(&x), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tri_area() {
        let x = [Point3::zeros(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 3.0, 0.0)];
        assert_relative_eq!(FacetType::Tri3.area(&x), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_onto_flat_quad() {
        let x = square(1.0);
        let rs = FacetType::Quad4.project(&x, &Point3::new(1.5, 0.5, 0.7), 1e-6).unwrap();
        assert_relative_eq!(rs, Vector2::new(0.5, -0.5), epsilon = 1e-10);
        let q = FacetType::Quad4.position(&x, &rs);
        assert_relative_eq!(q, Point3::new(1.5, 0.5, 1.0), epsilon = 1e-10);
    }

    #[test]
    fn test_projection_outside_facet_misses() {
        let x = square(0.0);
        assert!(FacetType::Quad4.project(&x, &Point3::new(3.0, 1.0, 0.2), 1e-6).is_none());
    }

    #[test]
    fn test_projection_onto_warped_quad() {
        let mut x = square(0.0);
        x[2].z = 0.4;
        let p = Point3::new(1.2, 0.9, 1.0);
        let rs = FacetType::Quad4.project(&x, &p, 1e-6).unwrap();
        // the connecting vector is orthogonal to both tangents
        let d = FacetType::Quad4.position(&x, &rs) - p;
        let (t1, t2) = FacetType::Quad4.tangents(&x, &rs);
        assert_relative_eq!(d.dot(&t1), 0.0, epsilon = 1e-9);
        assert_relative_eq!(d.dot(&t2), 0.0, epsilon = 1e-9);
    }
}
