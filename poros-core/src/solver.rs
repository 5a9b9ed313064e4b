//! Linear system solvers.
//!
//! The equilibrium driver factors the assembled tangent once per
//! reformation and then solves against it many times (BFGS updates, line
//! searches), so the interface is split into a [`LinearSolver`] that
//! produces a [`Factorization`] and the factorization that solves.
//!
//! # Solver Backends
//!
//! - [`FaerCholeskySolver`]: sparse LLᵀ using the faer library. Reads the
//!   compact lower-triangular storage directly and caches the symbolic
//!   analysis for as long as the profile identity stays the same.
//! - [`FaerLuSolver`]: sparse LU on the expanded symmetric matrix, for
//!   tangents that are not positive definite.
//! - [`JacobiCgSolver`]: Jacobi-preconditioned conjugate gradients over
//!   [`CompactSymmMatrix::mult_vector`].

use crate::error::{Error, Result};
use crate::sparse::CompactSymmMatrix;
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A factored system that can be solved repeatedly.
pub trait Factorization: Send + Sync {
    /// Solve `K x = rhs`.
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>>;
}

/// Linear solver interface.
pub trait LinearSolver: Send + Sync {
    /// Factor the current values of `k`.
    fn factor(&mut self, k: &CompactSymmMatrix) -> Result<Box<dyn Factorization>>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverType {
    /// Sparse Cholesky (symmetric positive definite).
    #[default]
    DirectSymmetric,
    /// Sparse LU.
    DirectGeneral,
    /// Preconditioned conjugate gradients.
    Iterative,
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub solver_type: SolverType,
    /// Relative residual tolerance for iterative solvers.
    pub tolerance: f64,
    /// Maximum iterations for iterative solvers.
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver_type: SolverType::DirectSymmetric,
            tolerance: 1e-12,
            max_iterations: 10000,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(Error::Config(format!(
                "solver tolerance {} must lie in (0, 1)",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config("solver max_iterations must be positive".into()));
        }
        Ok(())
    }
}

/// Select a solver backend.
pub fn select_solver(config: &SolverConfig) -> Box<dyn LinearSolver> {
    match config.solver_type {
        SolverType::DirectSymmetric => Box::new(FaerCholeskySolver::new()),
        SolverType::DirectGeneral => Box::new(FaerLuSolver::new()),
        SolverType::Iterative => Box::new(JacobiCgSolver::new(config.tolerance, config.max_iterations)),
    }
}

fn check_rhs(n: usize, rhs: &[f64]) -> Result<()> {
    if rhs.len() != n {
        return Err(Error::Solver(format!(
            "RHS size mismatch: system {}, rhs {}",
            n,
            rhs.len()
        )));
    }
    Ok(())
}

/// Factorization of a 0×0 system.
struct EmptyFactorization;

impl Factorization for EmptyFactorization {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        check_rhs(0, rhs)?;
        Ok(Vec::new())
    }
}

/// Solve with a faer solver that implements `solve_in_place`.
fn faer_solve(n: usize, rhs: &[f64], solve: impl FnOnce(MatMut<'_, f64>)) -> Result<Vec<f64>> {
    check_rhs(n, rhs)?;
    let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
    solve(x.as_mut());
    let out: Vec<f64> = (0..n).map(|i| x[(i, 0)]).collect();
    if out.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularSystem("solution contains non-finite values".into()));
    }
    Ok(out)
}

/// Sparse Cholesky solver using the faer library.
///
/// The compact matrix already is a lower-triangular CSC matrix, so the
/// buffers are handed to faer as they are.
#[derive(Default)]
pub struct FaerCholeskySolver {
    symbolic: Option<(u64, SymbolicLlt<usize>)>,
}

impl FaerCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lower_csc(k: &CompactSymmMatrix) -> SparseColMat<usize, f64> {
        let n = k.rows();
        // SAFETY: col_ptr is monotone with col_ptr[n] = nnz and row indices
        // are sorted, unique and below n in every column.
        unsafe {
            SparseColMat::new(
                SymbolicSparseColMat::new_unchecked(n, n, k.col_ptr().to_vec(), None, k.row_idx().to_vec()),
                k.values().to_vec(),
            )
        }
    }
}

struct CholeskyFactorization {
    n: usize,
    llt: Llt<usize, f64>,
}

impl Factorization for CholeskyFactorization {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        faer_solve(self.n, rhs, |x| self.llt.solve_in_place(x))
    }
}

impl LinearSolver for FaerCholeskySolver {
    fn factor(&mut self, k: &CompactSymmMatrix) -> Result<Box<dyn Factorization>> {
        let identity = k
            .identity()
            .ok_or_else(|| Error::InvalidProfile("factoring a matrix without a profile".into()))?;
        if identity.rows == 0 {
            return Ok(Box::new(EmptyFactorization));
        }

        let csc = Self::lower_csc(k);
        let symbolic = match &self.symbolic {
            Some((checksum, symbolic)) if *checksum == identity.checksum => symbolic.clone(),
            _ => {
                debug!(rows = identity.rows, nnz = identity.nnz, "symbolic cholesky analysis");
                let symbolic = SymbolicLlt::try_new(csc.as_ref().symbolic(), faer::Side::Lower)
                    .map_err(|e| Error::Solver(format!("symbolic Cholesky analysis failed: {:?}", e)))?;
                self.symbolic = Some((identity.checksum, symbolic.clone()));
                symbolic
            }
        };

        let llt = Llt::try_new_with_symbolic(symbolic, csc.as_ref(), faer::Side::Lower).map_err(|e| match e {
            SparseLltError::Generic(err) => Error::Solver(format!("sparse Cholesky error: {:?}", err)),
            SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                Error::SingularSystem(format!("matrix is not positive definite at pivot {}", index))
            }
        })?;

        Ok(Box::new(CholeskyFactorization { n: identity.rows, llt }))
    }

    fn name(&self) -> &str {
        "faer sparse Cholesky (LLᵀ)"
    }
}

/// Sparse LU solver using the faer library.
#[derive(Debug, Default)]
pub struct FaerLuSolver;

impl FaerLuSolver {
    pub fn new() -> Self {
        Self
    }
}

struct LuFactorization {
    n: usize,
    lu: Lu<usize, f64>,
}

impl Factorization for LuFactorization {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        faer_solve(self.n, rhs, |x| self.lu.solve_in_place(x))
    }
}

impl LinearSolver for FaerLuSolver {
    fn factor(&mut self, k: &CompactSymmMatrix) -> Result<Box<dyn Factorization>> {
        let n = k.rows();
        if n == 0 {
            k.to_csc()?;
            return Ok(Box::new(EmptyFactorization));
        }
        let full = k.to_csc()?;
        // SAFETY: nalgebra-sparse CSC storage has sorted, unique row indices.
        let csc = unsafe {
            SparseColMat::new(
                SymbolicSparseColMat::new_unchecked(
                    n,
                    n,
                    full.col_offsets().to_vec(),
                    None,
                    full.row_indices().to_vec(),
                ),
                full.values().to_vec(),
            )
        };
        let lu = csc
            .as_ref()
            .sp_lu()
            .map_err(|e| Error::SingularSystem(format!("sparse LU failed: {:?}", e)))?;
        Ok(Box::new(LuFactorization { n, lu }))
    }

    fn name(&self) -> &str {
        "faer sparse LU"
    }
}

/// Jacobi-preconditioned conjugate gradients.
#[derive(Debug, Clone)]
pub struct JacobiCgSolver {
    tolerance: f64,
    max_iterations: usize,
}

impl JacobiCgSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

struct CgFactorization {
    k: CompactSymmMatrix,
    inv_diag: Vec<f64>,
    tolerance: f64,
    max_iterations: usize,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Factorization for CgFactorization {
    fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.k.rows();
        check_rhs(n, rhs)?;
        let mut x = vec![0.0; n];
        let b_norm = dot(rhs, rhs).sqrt();
        if b_norm == 0.0 {
            return Ok(x);
        }

        let mut r = rhs.to_vec();
        let mut z: Vec<f64> = r.iter().zip(&self.inv_diag).map(|(r, d)| r * d).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut q = vec![0.0; n];

        for it in 0..self.max_iterations {
            self.k.mult_vector(&p, &mut q)?;
            let pq = dot(&p, &q);
            if pq <= 0.0 || !pq.is_finite() {
                return Err(Error::SingularSystem(format!(
                    "conjugate gradients broke down at iteration {}",
                    it
                )));
            }
            let alpha = rz / pq;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * q[i];
            }
            if dot(&r, &r).sqrt() <= self.tolerance * b_norm {
                debug!(iterations = it + 1, "conjugate gradients converged");
                return Ok(x);
            }
            for i in 0..n {
                z[i] = r[i] * self.inv_diag[i];
            }
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz;
            rz = rz_new;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }
        Err(Error::Solver(format!(
            "conjugate gradients did not converge in {} iterations",
            self.max_iterations
        )))
    }
}

impl LinearSolver for JacobiCgSolver {
    fn factor(&mut self, k: &CompactSymmMatrix) -> Result<Box<dyn Factorization>> {
        if !k.is_created() {
            return Err(Error::InvalidProfile("factoring a matrix without a profile".into()));
        }
        let inv_diag = k
            .diagonal()
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                if d > 0.0 {
                    Ok(1.0 / d)
                } else {
                    Err(Error::SingularSystem(format!("non-positive diagonal {} at row {}", d, i)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(CgFactorization {
            k: k.clone(),
            inv_diag,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
        }))
    }

    fn name(&self) -> &str {
        "Jacobi-preconditioned CG"
    }
}
