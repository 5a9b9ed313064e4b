//! Gauss quadrature rules.
//!
//! Volume rules for hexahedra and surface rules for the two facet shapes
//! used by contact interfaces (bilinear quads and linear triangles).

/// A quadrature point in natural coordinates with its weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPoint {
    /// Natural coordinates. Surface rules leave the third entry at zero.
    pub coords: [f64; 3],
    /// Integration weight.
    pub weight: f64,
}

impl GaussPoint {
    pub fn new(coords: [f64; 3], weight: f64) -> Self {
        Self { coords, weight }
    }

    #[inline]
    pub fn xi(&self) -> f64 {
        self.coords[0]
    }

    #[inline]
    pub fn eta(&self) -> f64 {
        self.coords[1]
    }

    #[inline]
    pub fn zeta(&self) -> f64 {
        self.coords[2]
    }
}

/// 1D Gauss-Legendre (point, weight) pairs on [-1, 1].
///
/// `n` is clamped to 1..=3.
pub fn gauss_1d(n: usize) -> Vec<(f64, f64)> {
    match n {
        0 | 1 => vec![(0.0, 2.0)],
        2 => {
            let p = 1.0 / 3.0_f64.sqrt();
            vec![(-p, 1.0), (p, 1.0)]
        }
        _ => {
            let p = (3.0 / 5.0_f64).sqrt();
            vec![(-p, 5.0 / 9.0), (0.0, 8.0 / 9.0), (p, 5.0 / 9.0)]
        }
    }
}

/// Tensor-product rule on [-1, 1]³ with `n` points per direction.
pub fn gauss_hex(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(rule.len().pow(3));
    for &(zeta, wz) in &rule {
        for &(eta, wy) in &rule {
            for &(xi, wx) in &rule {
                points.push(GaussPoint::new([xi, eta, zeta], wx * wy * wz));
            }
        }
    }
    points
}

/// Tensor-product rule on [-1, 1]² with `n` points per direction.
pub fn gauss_quad(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(rule.len().pow(2));
    for &(eta, wy) in &rule {
        for &(xi, wx) in &rule {
            points.push(GaussPoint::new([xi, eta, 0.0], wx * wy));
        }
    }
    points
}

/// Three-point rule on the reference triangle (0,0)-(1,0)-(0,1).
///
/// Exact for quadratics; weights sum to the reference area 1/2.
pub fn gauss_tri() -> Vec<GaussPoint> {
    let w = 1.0 / 6.0;
    vec![
        GaussPoint::new([1.0 / 6.0, 1.0 / 6.0, 0.0], w),
        GaussPoint::new([2.0 / 3.0, 1.0 / 6.0, 0.0], w),
        GaussPoint::new([1.0 / 6.0, 2.0 / 3.0, 0.0], w),
    ]
}
