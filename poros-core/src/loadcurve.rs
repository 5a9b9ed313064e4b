//! Piecewise-linear load curves.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Time-dependent scale factor given by (time, value) points.
///
/// Linear between points, constant beyond the first and last point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadCurve {
    points: Vec<(f64, f64)>,
}

impl LoadCurve {
    /// Points must be non-empty with strictly increasing times.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Config("load curve needs at least one point".into()));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(Error::Config("load curve times must increase strictly".into()));
        }
        if points.iter().any(|(t, v)| !t.is_finite() || !v.is_finite()) {
            return Err(Error::Config("load curve points must be finite".into()));
        }
        Ok(Self { points })
    }

    /// Linear ramp from 0 at t = 0 to 1 at `t1`.
    pub fn ramp(t1: f64) -> Result<Self> {
        Self::new(vec![(0.0, 0.0), (t1, 1.0)])
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Curve value at `t`.
    pub fn value(&self, t: f64) -> f64 {
        let k = self.points.partition_point(|&(ti, _)| ti <= t);
        if k == 0 {
            return self.points[0].1;
        }
        if k == self.points.len() {
            return self.points[k - 1].1;
        }
        let (t0, v0) = self.points[k - 1];
        let (t1, v1) = self.points[k];
        v0 + (v1 - v0) * (t - t0) / (t1 - t0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interpolation_and_extrapolation() {
        let lc = LoadCurve::new(vec![(0.0, 0.0), (1.0, 2.0), (3.0, 2.0), (4.0, -1.0)]).unwrap();
        assert_relative_eq!(lc.value(-1.0), 0.0);
        assert_relative_eq!(lc.value(0.25), 0.5);
        assert_relative_eq!(lc.value(1.0), 2.0);
        assert_relative_eq!(lc.value(2.0), 2.0);
        assert_relative_eq!(lc.value(3.5), 0.5);
        assert_relative_eq!(lc.value(10.0), -1.0);
    }

    #[test]
    fn test_invalid_curves_rejected() {
        assert!(LoadCurve::new(vec![]).is_err());
        assert!(LoadCurve::new(vec![(0.0, 0.0), (0.0, 1.0)]).is_err());
        assert!(LoadCurve::new(vec![(0.0, f64::NAN)]).is_err());
    }

    #[test]
    fn test_single_point_is_constant() {
        let lc = LoadCurve::new(vec![(1.0, 3.0)]).unwrap();
        assert_relative_eq!(lc.value(0.0), 3.0);
        assert_relative_eq!(lc.value(5.0), 3.0);
    }
}
