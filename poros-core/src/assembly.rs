//! Element-level assembly.
//!
//! Element contributions are computed in parallel with Rayon into private
//! buffers, then scattered into the global matrix or vector on the calling
//! thread. Nothing is shared mutably while the parallel phase runs.
//!
//! Boundary conditions live here as well: they decide which equations
//! exist and what goes into the external load vector.

use crate::dof::{DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::loadcurve::LoadCurve;
use crate::sparse::{CompactSymmMatrix, SparseMatrixProfile};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Boundary condition types.
///
/// `curve` indexes the driver's load curves; `None` applies `value`
/// unscaled at every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundaryCondition {
    /// Homogeneous Dirichlet condition.
    Fixed { node: usize, dof: DofKind },
    /// Prescribed nodal value (Dirichlet).
    Prescribed {
        node: usize,
        dof: DofKind,
        value: f64,
        curve: Option<usize>,
    },
    /// Applied nodal force or flux (Neumann).
    Force {
        node: usize,
        dof: DofKind,
        value: f64,
        curve: Option<usize>,
    },
}

impl BoundaryCondition {
    /// Node and DOF the condition acts on.
    pub fn target(&self) -> (usize, DofKind) {
        match *self {
            BoundaryCondition::Fixed { node, dof }
            | BoundaryCondition::Prescribed { node, dof, .. }
            | BoundaryCondition::Force { node, dof, .. } => (node, dof),
        }
    }

    /// Whether the condition removes the DOF from the equation system.
    pub fn is_essential(&self) -> bool {
        !matches!(self, BoundaryCondition::Force { .. })
    }

    /// Scaled value at `time`.
    pub fn value_at(&self, time: f64, curves: &[LoadCurve]) -> Result<f64> {
        let (value, curve) = match *self {
            BoundaryCondition::Fixed { .. } => return Ok(0.0),
            BoundaryCondition::Prescribed { value, curve, .. }
            | BoundaryCondition::Force { value, curve, .. } => (value, curve),
        };
        match curve {
            None => Ok(value),
            Some(c) => curves
                .get(c)
                .map(|lc| value * lc.value(time))
                .ok_or_else(|| Error::Config(format!("load curve {} does not exist", c))),
        }
    }
}

/// Element stiffness with its location vector.
#[derive(Debug, Clone)]
pub struct ElementMatrix {
    pub lm: Vec<Option<usize>>,
    pub ke: DMatrix<f64>,
}

/// Element force vector with its location vector.
#[derive(Debug, Clone)]
pub struct ElementVector {
    pub lm: Vec<Option<usize>>,
    pub fe: DVector<f64>,
}

/// Evaluate `f` for every index in parallel, failing on the first error.
pub fn evaluate_parallel<T, F>(n: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
{
    (0..n).into_par_iter().map(f).collect()
}

/// Add element location vectors to a profile.
pub fn build_profile(profile: &mut SparseMatrixProfile, lms: &[Vec<Option<usize>>]) {
    for lm in lms {
        profile.add_element(lm);
    }
}

/// Scatter element matrices into `k`.
///
/// A non-finite entry is reported as [`Error::NumericalFault`] before the
/// offending block touches the matrix.
pub fn scatter_matrices(k: &mut CompactSymmMatrix, blocks: &[ElementMatrix], source: &str) -> Result<()> {
    for block in blocks {
        if block.ke.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericalFault(format!(
                "non-finite stiffness contribution from {}",
                source
            )));
        }
        k.assemble(&block.ke, &block.lm)?;
    }
    Ok(())
}

/// Scatter element vectors into `r` (`r[lm[i]] += fe[i]`).
pub fn scatter_vectors(r: &mut [f64], blocks: &[ElementVector], source: &str) -> Result<()> {
    for block in blocks {
        if block.fe.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericalFault(format!(
                "non-finite residual contribution from {}",
                source
            )));
        }
        for (i, eq) in block.lm.iter().enumerate() {
            if let Some(eq) = eq {
                r[*eq] += block.fe[i];
            }
        }
    }
    Ok(())
}

/// Fix every DOF constrained by an essential condition.
///
/// Returns whether the active set changed; the caller renumbers.
pub fn apply_essential(eqs: &mut EquationMap, bcs: &[BoundaryCondition]) -> Result<bool> {
    let mut changed = false;
    for bc in bcs.iter().filter(|bc| bc.is_essential()) {
        let (node, dof) = bc.target();
        changed |= eqs.fix(node, dof)?;
    }
    Ok(changed)
}

/// Build the external load vector and write prescribed values into the
/// nodal array at `time`.
pub fn apply_loads(
    eqs: &EquationMap,
    bcs: &[BoundaryCondition],
    curves: &[LoadCurve],
    time: f64,
    nodal: &mut [f64],
) -> Result<Vec<f64>> {
    let mut f = vec![0.0; eqs.n_equations()];
    for bc in bcs {
        let (node, dof) = bc.target();
        let value = bc.value_at(time, curves)?;
        let index = eqs
            .index(node, dof)
            .ok_or_else(|| Error::Mesh(format!("node {} has no {:?} degree of freedom", node, dof)))?;
        match bc {
            BoundaryCondition::Fixed { .. } | BoundaryCondition::Prescribed { .. } => {
                nodal[index] = value;
            }
            BoundaryCondition::Force { .. } => {
                if let Some(eq) = eqs.equation(node, dof) {
                    f[eq] += value;
                }
            }
        }
    }
    Ok(f)
}
