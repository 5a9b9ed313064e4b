//! Compact symmetric sparse storage.
//!
//! The global tangent is stored column by column, lower triangle only
//! (row ≥ column), with the diagonal as the first entry of every column.
//! This is the same layout as a lower-triangular CSC matrix, so the
//! direct backends consume the buffers without conversion.
//!
//! The sparsity pattern is declared up front through a
//! [`SparseMatrixProfile`] and stays fixed until the next
//! [`CompactSymmMatrix::create`]. Every write is checked against it; a
//! contribution outside the profile is rejected with
//! [`Error::InvalidProfile`] before any value is touched.

use crate::error::{Error, Result};
use nalgebra::DMatrix;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csc::CscMatrix;
use serde::{Deserialize, Serialize};

/// Declared sparsity pattern: for every column, the rows that may receive
/// contributions. Only the lower triangle is recorded.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrixProfile {
    columns: Vec<Vec<usize>>,
}

impl SparseMatrixProfile {
    /// Create a profile for an `n × n` system containing only the diagonal.
    pub fn new(n: usize) -> Self {
        Self {
            columns: (0..n).map(|j| vec![j]).collect(),
        }
    }

    /// Number of rows/columns.
    pub fn n(&self) -> usize {
        self.columns.len()
    }

    /// Declare the pair (i, j). Order does not matter.
    pub fn add_pair(&mut self, i: usize, j: usize) {
        let (row, col) = if i >= j { (i, j) } else { (j, i) };
        let column = &mut self.columns[col];
        if let Err(pos) = column.binary_search(&row) {
            column.insert(pos, row);
        }
    }

    /// Declare every pair coupled by an element location vector.
    ///
    /// `None` entries (fixed or inactive equations) are skipped.
    pub fn add_element(&mut self, lm: &[Option<usize>]) {
        let active: Vec<usize> = lm.iter().flatten().copied().collect();
        for (a, &i) in active.iter().enumerate() {
            for &j in &active[a..] {
                self.add_pair(i, j);
            }
        }
    }

    /// Rows declared for column `j`, ascending.
    pub fn column(&self, j: usize) -> &[usize] {
        &self.columns[j]
    }

    /// Number of declared lower-triangular entries.
    pub fn nnz(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Fingerprint of the layout [`CompactSymmMatrix::create`] builds from
    /// this profile.
    pub fn identity(&self) -> ProfileIdentity {
        let mut col_ptr = Vec::with_capacity(self.n() + 1);
        col_ptr.push(0);
        for column in &self.columns {
            col_ptr.push(col_ptr[col_ptr.len() - 1] + column.len());
        }
        let row_idx: Vec<usize> = self.columns.iter().flatten().copied().collect();
        ProfileIdentity {
            rows: self.n(),
            nnz: row_idx.len(),
            checksum: layout_checksum(&col_ptr, &row_idx),
        }
    }
}

/// Fingerprint of a matrix layout, stored in checkpoints to make sure a
/// restart is loaded into a system with the same equation structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileIdentity {
    pub rows: usize,
    pub nnz: usize,
    pub checksum: u64,
}

/// Handle to a stored entry. Only obtainable through
/// [`CompactSymmMatrix::locate`]; stale handles fail the bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(usize);

/// Symmetric matrix in compact lower-triangular column storage.
#[derive(Debug, Clone, Default)]
pub struct CompactSymmMatrix {
    n: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
    identity: Option<ProfileIdentity>,
}

impl CompactSymmMatrix {
    /// An empty matrix; [`create`](Self::create) must run before assembly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate storage for `profile`. Destroys any previous values.
    pub fn create(&mut self, profile: &SparseMatrixProfile) {
        let n = profile.n();
        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::with_capacity(profile.nnz());
        col_ptr.push(0);
        for j in 0..n {
            // profile columns are sorted, unique, lower and start at the diagonal
            row_idx.extend_from_slice(profile.column(j));
            col_ptr.push(row_idx.len());
        }

        self.n = n;
        self.values = vec![0.0; row_idx.len()];
        self.identity = Some(profile.identity());
        self.col_ptr = col_ptr;
        self.row_idx = row_idx;
    }

    /// Whether [`create`](Self::create) has been called.
    pub fn is_created(&self) -> bool {
        self.identity.is_some()
    }

    /// Layout fingerprint, `None` before creation.
    pub fn identity(&self) -> Option<ProfileIdentity> {
        self.identity
    }

    /// Number of rows (= columns).
    pub fn rows(&self) -> usize {
        self.n
    }

    /// Number of stored lower-triangular entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column pointers (length `rows + 1`).
    pub fn col_ptr(&self) -> &[usize] {
        &self.col_ptr
    }

    /// Row indices, column by column.
    pub fn row_idx(&self) -> &[usize] {
        &self.row_idx
    }

    /// Stored values, aligned with [`row_idx`](Self::row_idx).
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Reset all values to zero, keeping the profile.
    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// True when no stored value is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Diagonal entries.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|j| self.values[self.col_ptr[j]]).collect()
    }

    fn ensure_created(&self) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(Error::InvalidProfile(
                "matrix used before its profile was created".into(),
            ))
        }
    }

    /// Find the storage slot of (i, j); `i < j` is redirected to (j, i).
    pub fn locate(&self, i: usize, j: usize) -> Option<EntryHandle> {
        let (row, col) = if i >= j { (i, j) } else { (j, i) };
        if !self.is_created() || row >= self.n {
            return None;
        }
        let start = self.col_ptr[col];
        let end = self.col_ptr[col + 1];
        self.row_idx[start..end]
            .binary_search(&row)
            .ok()
            .map(|k| EntryHandle(start + k))
    }

    /// Value stored behind a handle.
    pub fn value(&self, handle: EntryHandle) -> Option<f64> {
        self.values.get(handle.0).copied()
    }

    /// Whether (i, j) is part of the profile.
    pub fn check(&self, i: usize, j: usize) -> bool {
        self.locate(i, j).is_some()
    }

    fn slot(&self, i: usize, j: usize) -> Result<usize> {
        self.ensure_created()?;
        self.locate(i, j)
            .map(|h| h.0)
            .ok_or_else(|| Error::InvalidProfile(format!("entry ({}, {}) is not in the profile", i, j)))
    }

    /// Accumulate `v` into (i, j).
    pub fn add(&mut self, i: usize, j: usize, v: f64) -> Result<()> {
        let k = self.slot(i, j)?;
        self.values[k] += v;
        Ok(())
    }

    /// Overwrite (i, j) with `v`.
    pub fn set(&mut self, i: usize, j: usize, v: f64) -> Result<()> {
        let k = self.slot(i, j)?;
        self.values[k] = v;
        Ok(())
    }

    /// Read (i, j).
    pub fn get(&self, i: usize, j: usize) -> Result<f64> {
        self.slot(i, j).map(|k| self.values[k])
    }

    /// Scatter-add a dense symmetric element matrix.
    ///
    /// `lm[k]` is the global equation of local row/column `k`; `None`
    /// entries are skipped. The active local indices are sorted once and
    /// every column is walked as a merged sorted sequence, so each stored
    /// slot is visited at most once per local column. All slots are
    /// resolved before any value is written.
    pub fn assemble(&mut self, ke: &DMatrix<f64>, lm: &[Option<usize>]) -> Result<()> {
        self.ensure_created()?;
        if ke.nrows() != lm.len() || ke.ncols() != lm.len() {
            return Err(Error::InvalidProfile(format!(
                "element matrix is {}x{} but location vector has {} entries",
                ke.nrows(),
                ke.ncols(),
                lm.len()
            )));
        }

        // (global, local) pairs sorted by global equation
        let mut perm: Vec<(usize, usize)> = lm
            .iter()
            .enumerate()
            .filter_map(|(local, g)| g.map(|g| (g, local)))
            .collect();
        perm.sort_unstable();

        if let Some(&(g, _)) = perm.last() {
            if g >= self.n {
                return Err(Error::InvalidProfile(format!(
                    "equation {} exceeds matrix size {}",
                    g, self.n
                )));
            }
        }

        let mut updates = Vec::with_capacity(perm.len() * (perm.len() + 1) / 2);
        for m in 0..perm.len() {
            let (jg, j) = perm[m];
            let start = self.col_ptr[jg];
            let rows = &self.row_idx[start..self.col_ptr[jg + 1]];
            // local dofs sharing the same global equation all hit the diagonal
            let m0 = perm[..m].partition_point(|&(g, _)| g < jg);
            let mut pos = 0;
            for &(ig, i) in &perm[m0..] {
                while pos < rows.len() && rows[pos] < ig {
                    pos += 1;
                }
                if pos == rows.len() || rows[pos] != ig {
                    return Err(Error::InvalidProfile(format!(
                        "entry ({}, {}) is not in the profile",
                        ig, jg
                    )));
                }
                updates.push((start + pos, ke[(i, j)]));
            }
        }

        for (k, v) in updates {
            self.values[k] += v;
        }
        Ok(())
    }

    /// Scatter-add a rectangular block coupling `lmi` rows to `lmj` columns.
    ///
    /// Only the lower-triangular part (I ≥ J) is taken; each pair is
    /// located by binary search, so any access pattern is accepted.
    pub fn assemble_block(
        &mut self,
        ke: &DMatrix<f64>,
        lmi: &[Option<usize>],
        lmj: &[Option<usize>],
    ) -> Result<()> {
        self.ensure_created()?;
        if ke.nrows() != lmi.len() || ke.ncols() != lmj.len() {
            return Err(Error::InvalidProfile(format!(
                "block is {}x{} but location vectors have {} and {} entries",
                ke.nrows(),
                ke.ncols(),
                lmi.len(),
                lmj.len()
            )));
        }

        let mut updates = Vec::new();
        for (i, gi) in lmi.iter().enumerate() {
            let Some(gi) = *gi else { continue };
            for (j, gj) in lmj.iter().enumerate() {
                let Some(gj) = *gj else { continue };
                if gi >= gj {
                    updates.push((self.slot(gi, gj)?, ke[(i, j)]));
                }
            }
        }

        for (k, v) in updates {
            self.values[k] += v;
        }
        Ok(())
    }

    /// r = A·x, visiting every stored entry once.
    pub fn mult_vector(&self, x: &[f64], r: &mut [f64]) -> Result<()> {
        self.ensure_created()?;
        if x.len() != self.n || r.len() != self.n {
            return Err(Error::Solver(format!(
                "mult_vector size mismatch: matrix {}, x {}, r {}",
                self.n,
                x.len(),
                r.len()
            )));
        }

        r.fill(0.0);
        for j in 0..self.n {
            let xj = x[j];
            let mut rj = 0.0;
            for k in self.col_ptr[j]..self.col_ptr[j + 1] {
                let i = self.row_idx[k];
                let v = self.values[k];
                if i == j {
                    rj += v * xj;
                } else {
                    // lower entry (i, j) and its mirror (j, i)
                    r[i] += v * xj;
                    rj += v * x[i];
                }
            }
            r[j] += rj;
        }
        Ok(())
    }

    /// Expand to a full symmetric CSC matrix.
    pub fn to_csc(&self) -> Result<CscMatrix<f64>> {
        self.ensure_created()?;
        let mut rows = Vec::with_capacity(2 * self.nnz());
        let mut cols = Vec::with_capacity(2 * self.nnz());
        let mut vals = Vec::with_capacity(2 * self.nnz());
        for j in 0..self.n {
            for k in self.col_ptr[j]..self.col_ptr[j + 1] {
                let i = self.row_idx[k];
                rows.push(i);
                cols.push(j);
                vals.push(self.values[k]);
                if i != j {
                    rows.push(j);
                    cols.push(i);
                    vals.push(self.values[k]);
                }
            }
        }
        let coo = CooMatrix::try_from_triplets(self.n, self.n, rows, cols, vals)
            .map_err(|e| Error::Solver(format!("invalid triplet data: {}", e)))?;
        Ok(CscMatrix::from(&coo))
    }
}

/// FNV-1a over the layout arrays.
fn layout_checksum(col_ptr: &[usize], row_idx: &[usize]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    col_ptr
        .iter()
        .chain(row_idx.iter())
        .flat_map(|&v| (v as u64).to_le_bytes())
        .fold(OFFSET, |h, b| (h ^ b as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn full_profile(n: usize) -> SparseMatrixProfile {
        let mut p = SparseMatrixProfile::new(n);
        let lm: Vec<Option<usize>> = (0..n).map(Some).collect();
        p.add_element(&lm);
        p
    }

    #[test]
    fn test_add_accumulates_and_is_symmetric() {
        let mut k = CompactSymmMatrix::new();
        k.create(&full_profile(3));

        k.add(2, 0, 1.5).unwrap();
        k.add(2, 0, 2.25).unwrap();
        k.add(0, 2, 0.25).unwrap(); // redirected to (2, 0)

        assert_relative_eq!(k.get(2, 0).unwrap(), 4.0, epsilon = 1e-15);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(k.get(i, j).unwrap(), k.get(j, i).unwrap());
            }
        }
    }

    #[test]
    fn test_set_overwrites() {
        let mut k = CompactSymmMatrix::new();
        k.create(&full_profile(2));
        k.add(1, 1, 3.0).unwrap();
        k.set(1, 1, -1.0).unwrap();
        assert_eq!(k.get(1, 1).unwrap(), -1.0);
    }

    #[test]
    fn test_entry_outside_profile_rejected() {
        let mut p = SparseMatrixProfile::new(4);
        p.add_pair(1, 0);
        let mut k = CompactSymmMatrix::new();
        k.create(&p);

        assert!(k.check(0, 1));
        assert!(!k.check(3, 0));
        assert!(matches!(k.add(3, 0, 1.0), Err(Error::InvalidProfile(_))));
        assert!(matches!(k.set(0, 3, 1.0), Err(Error::InvalidProfile(_))));
        assert!(matches!(k.get(2, 1), Err(Error::InvalidProfile(_))));
    }

    #[test]
    fn test_use_before_create_rejected() {
        let mut k = CompactSymmMatrix::new();
        let ke = DMatrix::from_element(1, 1, 1.0);
        assert!(matches!(k.assemble(&ke, &[Some(0)]), Err(Error::InvalidProfile(_))));
        assert!(matches!(k.add(0, 0, 1.0), Err(Error::InvalidProfile(_))));
    }

    #[test]
    fn test_assemble_outside_profile_leaves_values_untouched() {
        let mut p = SparseMatrixProfile::new(3);
        p.add_element(&[Some(0), Some(1)]);
        let mut k = CompactSymmMatrix::new();
        k.create(&p);

        let ke = DMatrix::from_element(2, 2, 1.0);
        assert!(k.assemble(&ke, &[Some(0), Some(2)]).is_err());
        assert!(k.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_mult_vector_matches_dense() {
        let dense = DMatrix::from_row_slice(4, 4, &[
            4.0, -1.0, 0.0, 0.5,
            -1.0, 5.0, 2.0, 0.0,
            0.0, 2.0, 6.0, -3.0,
            0.5, 0.0, -3.0, 7.0,
        ]);
        let mut p = SparseMatrixProfile::new(4);
        for i in 0..4 {
            for j in 0..=i {
                if dense[(i, j)] != 0.0 {
                    p.add_pair(i, j);
                }
            }
        }
        let mut k = CompactSymmMatrix::new();
        k.create(&p);
        for i in 0..4 {
            for j in 0..=i {
                if dense[(i, j)] != 0.0 {
                    k.set(i, j, dense[(i, j)]).unwrap();
                }
            }
        }

        let x = [1.0, -2.0, 0.5, 3.0];
        let mut r = [0.0; 4];
        k.mult_vector(&x, &mut r).unwrap();

        let reference = &dense * nalgebra::DVector::from_row_slice(&x);
        for i in 0..4 {
            assert_relative_eq!(r[i], reference[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_three_overlapping_blocks() {
        // springs 0-1, 1-2, 2-3 with stiffness 1, 2, 3
        let blocks = [(1.0, [0, 1]), (2.0, [1, 2]), (3.0, [2, 3])];
        let mut p = SparseMatrixProfile::new(4);
        for (_, dofs) in &blocks {
            p.add_element(&[Some(dofs[0]), Some(dofs[1])]);
        }
        let mut k = CompactSymmMatrix::new();
        k.create(&p);
        for (s, dofs) in &blocks {
            let ke = DMatrix::from_row_slice(2, 2, &[*s, -*s, -*s, *s]);
            k.assemble(&ke, &[Some(dofs[0]), Some(dofs[1])]).unwrap();
        }

        let reference = DMatrix::from_row_slice(4, 4, &[
            1.0, -1.0, 0.0, 0.0,
            -1.0, 3.0, -2.0, 0.0,
            0.0, -2.0, 5.0, -3.0,
            0.0, 0.0, -3.0, 3.0,
        ]);
        let dense = DMatrix::from(&k.to_csc().unwrap());
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(dense[(i, j)], reference[(i, j)], epsilon = 1e-12);
            }
        }
        assert_eq!(k.nnz(), 7);
    }

    #[test]
    fn test_assemble_skips_fixed_and_merges_duplicates() {
        let mut p = SparseMatrixProfile::new(2);
        p.add_element(&[Some(1), None, Some(0), Some(1)]);
        let mut k = CompactSymmMatrix::new();
        k.create(&p);

        let ke = DMatrix::from_fn(4, 4, |i, j| (1 + i + j) as f64);
        k.assemble(&ke, &[Some(1), None, Some(0), Some(1)]).unwrap();

        // global 1 <- local {0, 3}, global 0 <- local 2
        assert_relative_eq!(k.get(1, 1).unwrap(), ke[(0, 0)] + ke[(0, 3)] + ke[(3, 0)] + ke[(3, 3)]);
        assert_relative_eq!(k.get(0, 0).unwrap(), ke[(2, 2)]);
        assert_relative_eq!(k.get(1, 0).unwrap(), ke[(0, 2)] + ke[(3, 2)]);
    }

    #[test]
    fn test_assemble_block_lower_part_only() {
        let mut k = CompactSymmMatrix::new();
        k.create(&full_profile(3));
        let ke = DMatrix::from_row_slice(2, 1, &[2.0, 5.0]);
        k.assemble_block(&ke, &[Some(2), Some(0)], &[Some(1)]).unwrap();
        assert_eq!(k.get(2, 1).unwrap(), 2.0);
        // (0, 1) lies above the diagonal and is not taken
        assert_eq!(k.get(0, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_identity_tracks_layout() {
        let mut a = CompactSymmMatrix::new();
        a.create(&full_profile(3));
        let mut b = CompactSymmMatrix::new();
        b.create(&SparseMatrixProfile::new(3));
        assert_ne!(a.identity(), b.identity());

        let mut c = CompactSymmMatrix::new();
        c.create(&full_profile(3));
        assert_eq!(a.identity(), c.identity());
        assert_eq!(a.identity(), Some(full_profile(3).identity()));
    }

    #[test]
    fn test_diagonal_is_first_in_column() {
        let mut k = CompactSymmMatrix::new();
        k.create(&full_profile(3));
        for j in 0..3 {
            k.set(j, j, j as f64 + 1.0).unwrap();
        }
        assert_eq!(k.diagonal(), vec![1.0, 2.0, 3.0]);
        assert_eq!(k.row_idx()[k.col_ptr()[1]], 1);
    }
}
