//! Matthies–Strang BFGS updates of a factored tangent.
//!
//! Each accepted update stores a pair of vectors (v, w) so that the
//! updated inverse reads
//!
//! ```text
//! K⁻¹ ← (I + w vᵀ) K⁻¹ (I + v wᵀ)
//! ```
//!
//! and a solve with the updated matrix costs one back-substitution plus
//! two sweeps over the stored pairs.

use crate::error::Result;
use crate::solver::Factorization;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Why an update was not stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateRejection {
    /// The update would no longer be positive definite.
    NotPositive,
    /// Condition number estimate above the limit.
    IllConditioned(f64),
    /// `max_updates` already stored.
    Full,
}

/// Stack of BFGS update vectors.
#[derive(Debug, Clone)]
pub struct BfgsUpdates {
    max_updates: usize,
    cmax: f64,
    v: Vec<Vec<f64>>,
    w: Vec<Vec<f64>>,
}

impl BfgsUpdates {
    pub fn new(max_updates: usize, cmax: f64) -> Self {
        Self {
            max_updates,
            cmax,
            v: Vec::with_capacity(max_updates),
            w: Vec::with_capacity(max_updates),
        }
    }

    /// Number of stored updates.
    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Whether no more updates fit before a reformation.
    pub fn is_full(&self) -> bool {
        self.v.len() >= self.max_updates
    }

    /// Drop all updates (after a reformation).
    pub fn clear(&mut self) {
        self.v.clear();
        self.w.clear();
    }

    /// Try to add the update for step `s·ui` taking the residual from `r0`
    /// to `r1`. `ui` must be the search direction obtained from the current
    /// (updated) inverse applied to `r0`.
    pub fn update(&mut self, s: f64, ui: &[f64], r0: &[f64], r1: &[f64]) -> std::result::Result<f64, UpdateRejection> {
        if self.is_full() {
            return Err(UpdateRejection::Full);
        }
        let d: Vec<f64> = ui.iter().map(|u| s * u).collect();
        let g: Vec<f64> = r0.iter().zip(r1).map(|(a, b)| a - b).collect();
        let h: Vec<f64> = r0.iter().map(|r| s * r).collect();

        let dg = dot(&d, &g);
        let dh = dot(&d, &h);
        let ratio = dg / dh;
        if ratio <= 0.0 || !ratio.is_finite() {
            return Err(UpdateRejection::NotPositive);
        }
        let c = ratio.sqrt();
        if c > self.cmax {
            return Err(UpdateRejection::IllConditioned(c));
        }

        self.v.push(h.iter().zip(&g).map(|(h, g)| -c * h - g).collect());
        self.w.push(d.iter().map(|d| d / dg).collect());
        Ok(c)
    }

    /// Solve with the updated inverse.
    pub fn solve(&self, factor: &dyn Factorization, rhs: &[f64]) -> Result<Vec<f64>> {
        let mut tmp = rhs.to_vec();
        for (v, w) in self.v.iter().zip(&self.w).rev() {
            let wr = dot(w, &tmp);
            tmp.iter_mut().zip(v).for_each(|(t, v)| *t += v * wr);
        }
        let mut x = factor.solve(&tmp)?;
        for (v, w) in self.v.iter().zip(&self.w) {
            let vr = dot(v, &x);
            x.iter_mut().zip(w).for_each(|(x, w)| *x += w * vr);
        }
        Ok(x)
    }
}
