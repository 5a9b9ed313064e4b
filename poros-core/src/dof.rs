//! Degrees of freedom and the equation map.
//!
//! Every node carries the same ordered set of [`DofKind`]s (the layout).
//! The [`EquationMap`] assigns each (node, kind) either a global equation
//! number or `None` for fixed/inactive DOFs. Any change to the active set
//! bumps [`EquationMap::revision`], which is how the driver knows the
//! sparsity profile is stale.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A nodal degree of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DofKind {
    X,
    Y,
    Z,
    /// Fluid pressure.
    Pressure,
    /// Concentration of solute `n`.
    Concentration(u8),
}

impl DofKind {
    /// Displacement components in order.
    pub const DISPLACEMENT: [DofKind; 3] = [DofKind::X, DofKind::Y, DofKind::Z];

    /// Convergence block this DOF is measured in.
    pub fn block(self) -> DofBlock {
        match self {
            DofKind::X | DofKind::Y | DofKind::Z => DofBlock::Displacement,
            DofKind::Pressure => DofBlock::Pressure,
            DofKind::Concentration(n) => DofBlock::Concentration(n),
        }
    }
}

/// Groups of DOFs that get their own convergence norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DofBlock {
    Displacement,
    Pressure,
    Concentration(u8),
}

/// Ordered set of DOF kinds present at every node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofLayout {
    kinds: Vec<DofKind>,
}

impl DofLayout {
    /// Build a layout from the union of declared kinds, sorted canonically.
    pub fn from_kinds<I: IntoIterator<Item = DofKind>>(kinds: I) -> Self {
        let mut kinds: Vec<DofKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self { kinds }
    }

    /// DOFs per node.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Slot of `kind` within a node, if present.
    pub fn slot(&self, kind: DofKind) -> Option<usize> {
        self.kinds.iter().position(|&k| k == kind)
    }

    pub fn kinds(&self) -> &[DofKind] {
        &self.kinds
    }
}

/// Map from (node, DOF kind) to global equation number.
#[derive(Debug, Clone)]
pub struct EquationMap {
    layout: DofLayout,
    n_nodes: usize,
    fixed: Vec<bool>,
    ids: Vec<Option<usize>>,
    blocks: Vec<DofBlock>,
    n_equations: usize,
    revision: u64,
}

impl EquationMap {
    /// All DOFs free; call [`renumber`](Self::renumber) before use.
    pub fn new(n_nodes: usize, layout: DofLayout) -> Self {
        let size = n_nodes * layout.len();
        let mut map = Self {
            layout,
            n_nodes,
            fixed: vec![false; size],
            ids: vec![None; size],
            blocks: Vec::new(),
            n_equations: 0,
            revision: 0,
        };
        map.renumber();
        map
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of active equations.
    pub fn n_equations(&self) -> usize {
        self.n_equations
    }

    /// Incremented on every change to the active set.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Position of (node, kind) in a nodal value array.
    pub fn index(&self, node: usize, kind: DofKind) -> Option<usize> {
        if node >= self.n_nodes {
            return None;
        }
        self.layout.slot(kind).map(|s| node * self.layout.len() + s)
    }

    fn checked_index(&self, node: usize, kind: DofKind) -> Result<usize> {
        self.index(node, kind).ok_or_else(|| {
            Error::Mesh(format!("node {} has no {:?} degree of freedom", node, kind))
        })
    }

    /// Mark (node, kind) fixed. Takes effect at the next
    /// [`renumber`](Self::renumber); returns whether anything changed.
    pub fn fix(&mut self, node: usize, kind: DofKind) -> Result<bool> {
        let k = self.checked_index(node, kind)?;
        let changed = !self.fixed[k];
        self.fixed[k] = true;
        Ok(changed)
    }

    /// Release a previously fixed DOF. Takes effect at the next renumber.
    pub fn release(&mut self, node: usize, kind: DofKind) -> Result<bool> {
        let k = self.checked_index(node, kind)?;
        let changed = self.fixed[k];
        self.fixed[k] = false;
        Ok(changed)
    }

    /// Assign equation numbers node by node and bump the revision.
    pub fn renumber(&mut self) {
        let ndpn = self.layout.len();
        let mut next = 0;
        self.blocks.clear();
        for (k, id) in self.ids.iter_mut().enumerate() {
            if self.fixed[k] {
                *id = None;
            } else {
                *id = Some(next);
                self.blocks.push(self.layout.kinds[k % ndpn].block());
                next += 1;
            }
        }
        self.n_equations = next;
        self.revision += 1;
    }

    /// Equation of (node, kind), `None` if fixed or absent.
    pub fn equation(&self, node: usize, kind: DofKind) -> Option<usize> {
        self.index(node, kind).and_then(|k| self.ids[k])
    }

    /// Location vector: for each node, the listed kinds in order.
    pub fn lm(&self, nodes: &[usize], kinds: &[DofKind]) -> Vec<Option<usize>> {
        nodes
            .iter()
            .flat_map(|&n| kinds.iter().map(move |&k| self.equation(n, k)))
            .collect()
    }

    /// Convergence block of each equation.
    pub fn blocks(&self) -> &[DofBlock] {
        &self.blocks
    }

    /// Gather equation values from a nodal array.
    pub fn gather(&self, nodal: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_equations];
        for (k, id) in self.ids.iter().enumerate() {
            if let Some(eq) = id {
                out[*eq] = nodal[k];
            }
        }
        out
    }

    /// `nodal[dof] += scale * du[eq]` over all active DOFs.
    pub fn scatter_add(&self, du: &[f64], scale: f64, nodal: &mut [f64]) {
        for (k, id) in self.ids.iter().enumerate() {
            if let Some(eq) = id {
                nodal[k] += scale * du[*eq];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout3() -> DofLayout {
        DofLayout::from_kinds(DofKind::DISPLACEMENT)
    }

    #[test]
    fn test_layout_union_is_canonical() {
        let layout = DofLayout::from_kinds([DofKind::Pressure, DofKind::Z, DofKind::X, DofKind::Y, DofKind::X]);
        assert_eq!(layout.kinds(), &[DofKind::X, DofKind::Y, DofKind::Z, DofKind::Pressure]);
        assert_eq!(layout.slot(DofKind::Pressure), Some(3));
        assert_eq!(layout.slot(DofKind::Concentration(0)), None);
    }

    #[test]
    fn test_fixed_dofs_get_sentinel() {
        let mut map = EquationMap::new(2, layout3());
        assert_eq!(map.n_equations(), 6);

        map.fix(0, DofKind::X).unwrap();
        map.fix(0, DofKind::Z).unwrap();
        map.renumber();
        assert_eq!(map.n_equations(), 4);
        assert_eq!(map.equation(0, DofKind::X), None);
        assert_eq!(map.equation(0, DofKind::Y), Some(0));
        assert_eq!(map.equation(1, DofKind::X), Some(1));
        assert_eq!(
            map.lm(&[0, 1], &[DofKind::X, DofKind::Y]),
            vec![None, Some(0), Some(1), Some(2)]
        );
    }

    #[test]
    fn test_revision_changes_with_active_set() {
        let mut map = EquationMap::new(1, layout3());
        let r0 = map.revision();
        assert!(map.fix(0, DofKind::Y).unwrap());
        map.renumber();
        let r1 = map.revision();
        assert!(r1 > r0);
        assert_eq!(map.n_equations(), 2);
        // fixing again is not a change
        assert!(!map.fix(0, DofKind::Y).unwrap());
        assert!(map.release(0, DofKind::Y).unwrap());
        map.renumber();
        assert!(map.revision() > r1);
        assert_eq!(map.n_equations(), 3);
    }

    #[test]
    fn test_unknown_dof_rejected() {
        let mut map = EquationMap::new(1, layout3());
        assert!(map.fix(0, DofKind::Pressure).is_err());
        assert!(map.fix(4, DofKind::X).is_err());
    }

    #[test]
    fn test_gather_scatter() {
        let mut map = EquationMap::new(2, layout3());
        map.fix(1, DofKind::Y).unwrap();
        map.renumber();
        let nodal = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(map.gather(&nodal), vec![1.0, 2.0, 3.0, 4.0, 6.0]);

        let mut target = [0.0; 6];
        map.scatter_add(&[1.0, 1.0, 1.0, 1.0, 1.0], 0.5, &mut target);
        assert_eq!(target, [0.5, 0.5, 0.5, 0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_blocks_follow_layout() {
        let map = EquationMap::new(1, DofLayout::from_kinds([DofKind::X, DofKind::Pressure]));
        assert_eq!(map.blocks(), &[DofBlock::Displacement, DofBlock::Pressure]);
    }
}
