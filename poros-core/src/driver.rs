//! Nonlinear equilibrium driver.
//!
//! One increment runs as
//!
//! ```text
//! prep_step → loop { residual → (reform | BFGS update) → solve → line search → convergence }
//!           → augment → (repeat inner loop while multipliers move) → accept
//! ```
//!
//! The driver owns the mesh, the physics modules, the contact set and the
//! global matrix. Physics modules and contact interfaces only ever see a
//! read-only [`StateView`] of the nodal values.
//!
//! A failed increment restores the nodal values and contact state saved by
//! [`EquilibriumDriver::prep_step`] before the error is returned, so the
//! caller can cut the increment and retry.

use crate::assembly::{apply_essential, apply_loads, build_profile, BoundaryCondition};
use crate::bfgs::{BfgsUpdates, UpdateRejection};
use crate::config::DriverConfig;
use crate::contact::{AugmentOutcome, ContactConstraintSet, InterfaceState};
use crate::dof::{DofBlock, DofKind, DofLayout, EquationMap};
use crate::error::{Error, Result};
use crate::loadcurve::LoadCurve;
use crate::mesh::Mesh;
use crate::physics::{PhysicsModule, StateView};
use crate::solver::{select_solver, Factorization, LinearSolver};
use crate::sparse::{CompactSymmMatrix, ProfileIdentity, SparseMatrixProfile};
use crate::types::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Counters of the current increment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStepState {
    pub time: f64,
    pub dt: f64,
    /// Iterations of the current inner loop.
    pub iteration: usize,
    pub reformations: usize,
    pub augmentations: usize,
    /// Iterations over all accepted increments.
    pub total_iterations: usize,
}

/// Outcome of an accepted increment.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub time: f64,
    /// Iterations summed over all augmentation passes.
    pub iterations: usize,
    pub reformations: usize,
    pub augmentations: usize,
    /// Final squared residual norm.
    pub residual_norm: f64,
}

/// Committed state restored on failure.
#[derive(Debug, Clone)]
struct Snapshot {
    values: Vec<f64>,
    contact: Vec<InterfaceState>,
    state: TimeStepState,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Squared norm of `x` per convergence block.
fn block_norms(blocks: &[DofBlock], x: &[f64]) -> HashMap<DofBlock, f64> {
    let mut norms = HashMap::new();
    for (b, v) in blocks.iter().zip(x) {
        *norms.entry(*b).or_insert(0.0) += v * v;
    }
    norms
}

/// Nonlinear equilibrium solver for one model.
///
/// Owns the mesh, the physics modules, the contact constraints, the
/// equation map and the global tangent. Increments are driven through
/// [`solve_step`](Self::solve_step) or the
/// [`prep_step`](Self::prep_step)/[`quasin`](Self::quasin) pair.
pub struct EquilibriumDriver {
    mesh: Mesh,
    modules: Vec<Box<dyn PhysicsModule>>,
    contact: ContactConstraintSet,
    bcs: Vec<BoundaryCondition>,
    curves: Vec<LoadCurve>,
    config: DriverConfig,
    eqs: EquationMap,
    values: Vec<f64>,
    fext: Vec<f64>,
    k: CompactSymmMatrix,
    profile_key: Option<(u64, u64)>,
    solver: Box<dyn LinearSolver>,
    factor: Option<Box<dyn Factorization>>,
    bfgs: BfgsUpdates,
    state: TimeStepState,
    snapshot: Option<Snapshot>,
}

impl std::fmt::Debug for EquilibriumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquilibriumDriver")
            .field("modules", &self.modules)
            .field("contact", &self.contact)
            .field("equations", &self.eqs.n_equations())
            .field("solver", &self.solver.name())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EquilibriumDriver {
    /// Build the equation system for `modules` and `contact` on `mesh` and
    /// initialise it in the reference configuration.
    pub fn new(
        mesh: Mesh,
        modules: Vec<Box<dyn PhysicsModule>>,
        contact: ContactConstraintSet,
        bcs: Vec<BoundaryCondition>,
        curves: Vec<LoadCurve>,
        config: DriverConfig,
    ) -> Result<Self> {
        config.validate()?;
        if modules.is_empty() {
            return Err(Error::Config("at least one physics module is required".into()));
        }
        let layout = DofLayout::from_kinds(
            modules
                .iter()
                .flat_map(|m| m.dof_kinds())
                .chain(contact.dof_kinds()),
        );
        let mut eqs = EquationMap::new(mesh.n_nodes(), layout);
        if apply_essential(&mut eqs, &bcs)? {
            eqs.renumber();
        }

        let mut driver = Self {
            solver: select_solver(&config.solver),
            bfgs: BfgsUpdates::new(config.max_updates, config.cmax),
            mesh,
            modules,
            contact,
            bcs,
            curves,
            config,
            eqs,
            values: Vec::new(),
            fext: Vec::new(),
            k: CompactSymmMatrix::new(),
            profile_key: None,
            factor: None,
            state: TimeStepState::default(),
            snapshot: None,
        };
        driver.init()?;
        Ok(driver)
    }

    /// Reset to the reference configuration: zero values, fresh contact
    /// state, initial projection and profile.
    pub fn init(&mut self) -> Result<()> {
        self.values = vec![0.0; self.eqs.n_nodes() * self.eqs.layout().len()];
        self.fext = vec![0.0; self.eqs.n_equations()];
        self.state = TimeStepState::default();
        self.snapshot = None;
        self.factor = None;
        self.bfgs.clear();
        self.contact.init(&self.mesh, &self.modules)?;
        self.project_contact(0)?;
        self.refresh_profile();
        info!(
            nodes = self.mesh.n_nodes(),
            dofs_per_node = self.eqs.layout().len(),
            equations = self.eqs.n_equations(),
            nnz = self.k.nnz(),
            interfaces = self.contact.len(),
            solver = self.solver.name(),
            "equilibrium driver initialised"
        );
        Ok(())
    }

    /// Advance loads and prescribed values to `time` and save the committed
    /// state for rollback.
    pub fn prep_step(&mut self, time: f64) -> Result<()> {
        if !time.is_finite() {
            return Err(Error::Config(format!("step time {} is not finite", time)));
        }
        let snapshot = Snapshot {
            values: self.values.clone(),
            contact: self.contact.save_state(),
            state: self.state.clone(),
        };
        match apply_loads(&self.eqs, &self.bcs, &self.curves, time, &mut self.values) {
            Ok(f) => self.fext = f,
            Err(e) => {
                self.values = snapshot.values;
                return Err(e);
            }
        }
        self.snapshot = Some(snapshot);
        self.state.dt = time - self.state.time;
        self.state.time = time;
        self.state.iteration = 0;
        self.state.reformations = 0;
        self.state.augmentations = 0;
        Ok(())
    }

    /// Solve the increment prepared by [`prep_step`](Self::prep_step).
    ///
    /// On any error the state saved by `prep_step` is restored before the
    /// error is returned.
    pub fn quasin(&mut self, time: f64) -> Result<StepReport> {
        if self.snapshot.is_none() || self.state.time != time {
            return Err(Error::Config(format!("prep_step({}) must precede quasin", time)));
        }
        match self.solve_increment() {
            Ok(report) => {
                self.snapshot = None;
                self.state.total_iterations += report.iterations;
                info!(
                    time = report.time,
                    iterations = report.iterations,
                    reformations = report.reformations,
                    augmentations = report.augmentations,
                    residual = report.residual_norm,
                    "increment converged"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(time, error = %e, "increment failed, restoring last converged state");
                if let Err(re) = self.rollback() {
                    error!(error = %re, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// [`prep_step`](Self::prep_step) followed by [`quasin`](Self::quasin).
    pub fn solve_step(&mut self, time: f64) -> Result<StepReport> {
        self.prep_step(time)?;
        self.quasin(time)
    }

    fn rollback(&mut self) -> Result<()> {
        self.factor = None;
        self.bfgs.clear();
        let Some(snapshot) = self.snapshot.take() else {
            return Ok(());
        };
        self.values = snapshot.values;
        self.state = snapshot.state;
        self.contact.load_state(&snapshot.contact)?;
        self.fext = apply_loads(&self.eqs, &self.bcs, &self.curves, self.state.time, &mut self.values)?;
        Ok(())
    }

    fn solve_increment(&mut self) -> Result<StepReport> {
        let neq = self.eqs.n_equations();
        let mut r0 = vec![0.0; neq];
        let mut step_total = vec![0.0; neq];
        let mut iterations = 0;

        self.project_contact(0)?;
        self.residual(&mut r0)?;
        if self.config.reform_each_step || self.factor.is_none() || self.profile_is_stale() {
            self.reform()?;
        }

        let mut naug = 0;
        loop {
            let norm = self.inner_loop(&mut r0, &mut step_total, &mut iterations)?;
            let outcome = if self.config.augmentation {
                self.contact.augment(naug)
            } else {
                AugmentOutcome::Converged
            };
            match outcome {
                AugmentOutcome::Converged => {
                    return Ok(StepReport {
                        time: self.state.time,
                        iterations,
                        reformations: self.state.reformations,
                        augmentations: naug,
                        residual_norm: norm,
                    })
                }
                AugmentOutcome::Exhausted => return Err(Error::AugmentationDivergence(naug)),
                AugmentOutcome::Pending => {
                    naug += 1;
                    self.state.augmentations = naug;
                    debug!(augmentation = naug, "multipliers updated, restarting inner loop");
                    self.project_contact(0)?;
                    self.residual(&mut r0)?;
                    self.reform()?;
                }
            }
        }
    }

    /// Iterate until the tolerances hold. `r0` enters as the residual of the
    /// current state and leaves as the converged residual.
    fn inner_loop(&mut self, r0: &mut Vec<f64>, step_total: &mut [f64], iterations: &mut usize) -> Result<f64> {
        let tol = self.config.tolerances.clone();
        let blocks = self.eqs.blocks().to_vec();
        let norm_ri = dot(&r0[..], &r0[..]);
        let mut norm_ei = 0.0;
        let mut norm_em = 0.0;
        let mut r1 = vec![0.0; r0.len()];
        self.state.iteration = 0;

        loop {
            let factor = self
                .factor
                .as_deref()
                .ok_or_else(|| Error::Solver("no factored stiffness available".into()))?;
            let ui = self.bfgs.solve(factor, r0)?;
            if ui.iter().any(|v| !v.is_finite()) {
                return Err(Error::NumericalFault("non-finite solution increment".into()));
            }

            let base = self.values.clone();
            let (s, search_ok) = if self.config.line_search.is_enabled() {
                self.line_search(&base, &ui, r0, &mut r1)?
            } else {
                self.apply_step(&base, &ui, 1.0)?;
                self.residual(&mut r1)?;
                (1.0, true)
            };
            self.state.iteration += 1;
            *iterations += 1;
            step_total.iter_mut().zip(&ui).for_each(|(u, d)| *u += s * d);

            let norm_r1 = dot(&r1, &r1);
            let norm_e1 = s * dot(&ui, &r1).abs();
            if self.state.iteration == 1 {
                norm_ei = dot(&ui, r0).abs();
                norm_em = norm_ei;
            }

            let mut converged = search_ok;
            if tol.rtol > 0.0 && norm_r1 > tol.rtol * norm_ri {
                converged = false;
            }
            if tol.etol > 0.0 && norm_e1 > tol.etol * norm_ei {
                converged = false;
            }
            let increment = block_norms(&blocks, &ui);
            let total = block_norms(&blocks, step_total);
            for (block, norm_u) in &increment {
                let t = match block {
                    DofBlock::Displacement => tol.dtol,
                    DofBlock::Pressure => tol.ptol,
                    DofBlock::Concentration(_) => tol.ctol,
                };
                let norm_big = total.get(block).copied().unwrap_or(0.0);
                if t > 0.0 && s * s * norm_u > t * t * norm_big {
                    converged = false;
                }
            }
            if norm_r1 < tol.rmin {
                converged = true;
            }
            debug!(
                iteration = self.state.iteration,
                step = s,
                residual = norm_r1,
                energy = norm_e1,
                updates = self.bfgs.len(),
                converged,
                "equilibrium iteration"
            );

            if converged {
                std::mem::swap(r0, &mut r1);
                return Ok(norm_r1);
            }
            if self.state.iteration >= self.config.max_iterations {
                return Err(Error::ConvergenceFailure {
                    time: self.state.time,
                    iterations: *iterations,
                    reformations: self.state.reformations,
                });
            }

            let mut reform = !search_ok;
            if !reform && norm_e1 > norm_em {
                debug!(energy = norm_e1, reference = norm_em, "energy diverging");
                norm_em = norm_e1;
                reform = true;
            }
            if !reform {
                match self.bfgs.update(s, &ui, r0, &r1) {
                    Ok(_) => {}
                    Err(UpdateRejection::Full) => reform = true,
                    Err(rejection) => {
                        warn!(?rejection, iteration = self.state.iteration, "BFGS update rejected");
                        reform = true;
                    }
                }
            }
            std::mem::swap(r0, &mut r1);
            if reform {
                self.reform()?;
            }
        }
    }

    /// Secant search on `ui·R(s)`. Leaves the state at the chosen step with
    /// its residual in `r1`; the flag is false when the step fell below the
    /// minimum.
    fn line_search(&mut self, base: &[f64], ui: &[f64], r0: &[f64], r1: &mut [f64]) -> Result<(f64, bool)> {
        let ls = self.config.line_search.clone();
        let e0 = dot(ui, r0);
        let mut s = 1.0;
        self.apply_step(base, ui, s)?;
        self.residual(r1)?;
        let mut e1 = dot(ui, r1);
        let mut best = (s, e1.abs());

        for _ in 0..ls.max_iterations {
            if e1.abs() <= ls.tolerance * e0.abs() || e1.abs() < 1e-20 {
                break;
            }
            let a = e0 / (e0 - e1);
            let next = if a.is_finite() && a > 0.0 { s * a } else { 0.5 * s };
            if next >= 1.0 && s >= 1.0 {
                break;
            }
            let next = next.min(1.0);
            if next < ls.min_step {
                debug!(step = next, min_step = ls.min_step, "line search failed");
                if best.0 != s {
                    s = best.0;
                    self.apply_step(base, ui, s)?;
                    self.residual(r1)?;
                }
                return Ok((s, false));
            }
            s = next;
            self.apply_step(base, ui, s)?;
            self.residual(r1)?;
            e1 = dot(ui, r1);
            if e1.abs() < best.1 {
                best = (s, e1.abs());
            }
        }
        Ok((s, true))
    }

    fn apply_step(&mut self, base: &[f64], ui: &[f64], s: f64) -> Result<()> {
        self.values.copy_from_slice(base);
        self.eqs.scatter_add(ui, s, &mut self.values);
        self.project_contact(self.state.iteration + 1)
    }

    fn project_contact(&mut self, iteration: usize) -> Result<()> {
        let view = StateView {
            mesh: &self.mesh,
            eqs: &self.eqs,
            values: &self.values,
            time: self.state.time,
        };
        self.contact.update(&view, iteration)
    }

    fn view(&self) -> StateView<'_> {
        StateView {
            mesh: &self.mesh,
            eqs: &self.eqs,
            values: &self.values,
            time: self.state.time,
        }
    }

    /// `R = F_ext − F_int + F_contact` for the current state.
    pub fn residual(&self, r: &mut [f64]) -> Result<()> {
        if r.len() != self.eqs.n_equations() {
            return Err(Error::Solver(format!(
                "residual has {} entries, system has {} equations",
                r.len(),
                self.eqs.n_equations()
            )));
        }
        r.copy_from_slice(&self.fext);
        let view = self.view();
        for m in &self.modules {
            m.residual(&view, r)?;
        }
        self.contact.contact_forces(&view, r)?;
        if let Some(eq) = r.iter().position(|v| !v.is_finite()) {
            return Err(Error::NumericalFault(format!("non-finite residual at equation {}", eq)));
        }
        if self.config.reject_negative_concentration {
            self.check_concentrations()?;
        }
        Ok(())
    }

    fn check_concentrations(&self) -> Result<()> {
        let ndpn = self.eqs.layout().len();
        for (slot, kind) in self.eqs.layout().kinds().iter().enumerate() {
            if let DofKind::Concentration(_) = kind {
                let negative = self.values.iter().skip(slot).step_by(ndpn).position(|c| *c < 0.0);
                if let Some(node) = negative {
                    return Err(Error::NumericalFault(format!(
                        "negative {:?} at node {}",
                        kind, node
                    )));
                }
            }
        }
        Ok(())
    }

    /// Zero and reassemble the tangent, rebuilding the profile first when
    /// the equation map or the contact pairings changed.
    pub fn stiffness_matrix(&mut self) -> Result<()> {
        self.refresh_profile();
        self.k.zero();
        let view = StateView {
            mesh: &self.mesh,
            eqs: &self.eqs,
            values: &self.values,
            time: self.state.time,
        };
        for m in &self.modules {
            m.stiffness(&view, &mut self.k)?;
        }
        self.contact.contact_stiffness(&view, &mut self.k)?;
        if !self.k.is_finite() {
            return Err(Error::NumericalFault("non-finite stiffness matrix".into()));
        }
        Ok(())
    }

    fn profile_is_stale(&self) -> bool {
        !self.k.is_created() || self.profile_key != Some((self.eqs.revision(), self.contact.pairing_revision()))
    }

    /// Profile of the current equation map and contact pairings.
    fn assemble_profile(&self) -> SparseMatrixProfile {
        let mut profile = SparseMatrixProfile::new(self.eqs.n_equations());
        for m in &self.modules {
            build_profile(&mut profile, &m.location_vectors(&self.mesh, &self.eqs));
        }
        build_profile(&mut profile, &self.contact.build_profile(&self.mesh, &self.eqs));
        profile
    }

    /// Layout fingerprint of the committed state. Pairings may have moved
    /// since the last reformation, in which case the matrix is not rebuilt
    /// and the fingerprint comes from a fresh profile.
    pub fn profile_identity(&self) -> ProfileIdentity {
        match self.k.identity() {
            Some(identity) if !self.profile_is_stale() => identity,
            _ => self.assemble_profile().identity(),
        }
    }

    fn refresh_profile(&mut self) {
        if !self.profile_is_stale() {
            return;
        }
        let profile = self.assemble_profile();
        self.k.create(&profile);
        self.profile_key = Some((self.eqs.revision(), self.contact.pairing_revision()));
        debug!(equations = self.k.rows(), nnz = self.k.nnz(), "matrix profile rebuilt");
    }

    fn reform(&mut self) -> Result<()> {
        if self.state.reformations >= self.config.max_reformations {
            return Err(Error::ConvergenceFailure {
                time: self.state.time,
                iterations: self.state.iteration,
                reformations: self.state.reformations,
            });
        }
        self.stiffness_matrix()?;
        self.factor = Some(self.solver.factor(&self.k)?);
        self.bfgs.clear();
        self.state.reformations += 1;
        debug!(reformation = self.state.reformations, "stiffness reformed");
        Ok(())
    }

    /// Recompute automatic contact penalties from the physics modules.
    pub fn recalibrate_penalty(&mut self) -> Result<()> {
        self.contact.recalibrate_penalty(&self.mesh, &self.modules)
    }

    /// Replace the committed state, e.g. from a checkpoint.
    pub(crate) fn restore(&mut self, state: TimeStepState, values: Vec<f64>, contact: &[InterfaceState]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(Error::Checkpoint(format!(
                "{} nodal values expected, checkpoint holds {}",
                self.values.len(),
                values.len()
            )));
        }
        self.contact.load_state(contact)?;
        self.values = values;
        self.state = state;
        self.snapshot = None;
        self.factor = None;
        self.bfgs.clear();
        self.profile_key = None;
        self.refresh_profile();
        self.fext = apply_loads(&self.eqs, &self.bcs, &self.curves, self.state.time, &mut self.values)?;
        Ok(())
    }

    /// Model geometry and topology.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Settings the driver was built with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Equation map of the active DOFs.
    pub fn equations(&self) -> &EquationMap {
        &self.eqs
    }

    /// Nodal values, prescribed values included.
    pub fn nodal_values(&self) -> &[f64] {
        &self.values
    }

    /// Equation-indexed solution.
    pub fn solution(&self) -> Vec<f64> {
        self.eqs.gather(&self.values)
    }

    /// Nodal value of `kind` at `node`; zero when the layout lacks it.
    pub fn value(&self, node: usize, kind: DofKind) -> f64 {
        self.view().value(node, kind)
    }

    /// Displacement of `node`.
    pub fn displacement(&self, node: usize) -> Vec3 {
        self.view().displacement(node)
    }

    /// Counters of the last prepared or accepted increment.
    pub fn state(&self) -> &TimeStepState {
        &self.state
    }

    /// Contact constraints in their committed state.
    pub fn contact(&self) -> &ContactConstraintSet {
        &self.contact
    }

    /// Global tangent as assembled at the last reformation.
    pub fn stiffness(&self) -> &CompactSymmMatrix {
        &self.k
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::config::{SlidingConfig, Tolerances};
    use crate::contact::SlidingInterface;
    use crate::element::hex8::tests::brick;
    use crate::material::{IsotropicPermeability, Material, UniaxialMaterial};
    use crate::mesh::ElementType;
    use crate::physics::{DiffusionDomain, SolidDomain, TrussDomain, TrussKinematics};
    use crate::types::Point3;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// σ = E(ε + cε³).
    #[derive(Debug)]
    struct Hardening {
        e: f64,
        c: f64,
    }

    impl UniaxialMaterial for Hardening {
        fn evaluate(&self, strain: f64) -> (f64, f64) {
            (
                self.e * (strain + self.c * strain.powi(3)),
                self.e * (1.0 + 3.0 * self.c * strain * strain),
            )
        }
    }

    /// Bar along x from the origin, fixed at node 0, pulled by `force` at node 1.
    fn bar(length: f64, material: Arc<dyn UniaxialMaterial>, force: f64, config: DriverConfig) -> Result<EquilibriumDriver> {
        let mut mesh = Mesh::new();
        mesh.add_node(Point3::new(0.0, 0.0, 0.0));
        mesh.add_node(Point3::new(length, 0.0, 0.0));
        mesh.add_element(ElementType::Truss2, vec![0, 1])?;
        let truss = TrussDomain::new(&mesh, vec![0], 1.0, material, TrussKinematics::Linear)?;
        let mut bcs: Vec<BoundaryCondition> = DofKind::DISPLACEMENT
            .iter()
            .map(|&dof| BoundaryCondition::Fixed { node: 0, dof })
            .collect();
        bcs.push(BoundaryCondition::Fixed { node: 1, dof: DofKind::Y });
        bcs.push(BoundaryCondition::Fixed { node: 1, dof: DofKind::Z });
        bcs.push(BoundaryCondition::Force { node: 1, dof: DofKind::X, value: force, curve: None });
        EquilibriumDriver::new(mesh, vec![Box::new(truss)], ContactConstraintSet::new(), bcs, vec![], config)
    }

    /// Two unit cubes stacked along z with the upper one sunk `overlap`
    /// into the lower one. Lateral motion is suppressed everywhere, the
    /// lower face is clamped and the top face carries a total load `-load`.
    pub(crate) fn stacked_blocks(overlap: f64, load: f64, sliding: SlidingConfig) -> Result<EquilibriumDriver> {
        let mut mesh = Mesh::new();
        mesh.add_nodes(brick(1.0, 1.0, 1.0));
        mesh.add_nodes(
            brick(1.0, 1.0, 1.0)
                .into_iter()
                .map(|p| p + Vec3::new(0.0, 0.0, 1.0 - overlap)),
        );
        mesh.add_element(ElementType::Hex8, (0..8).collect())?;
        mesh.add_element(ElementType::Hex8, (8..16).collect())?;
        let master = mesh.add_face_surface("lower top", &[(0, 1)])?;
        let slave = mesh.add_face_surface("upper bottom", &[(1, 0)])?;

        let solid = SolidDomain::new(&mesh, vec![0, 1], Arc::new(Material::new(1000.0, 0.3)?))?;
        let mut contact = ContactConstraintSet::new();
        contact.add(Box::new(SlidingInterface::new(&mesh, slave, master, sliding)?));

        let mut bcs = Vec::new();
        for node in 0..16 {
            bcs.push(BoundaryCondition::Fixed { node, dof: DofKind::X });
            bcs.push(BoundaryCondition::Fixed { node, dof: DofKind::Y });
        }
        for node in 0..4 {
            bcs.push(BoundaryCondition::Fixed { node, dof: DofKind::Z });
        }
        for node in 12..16 {
            bcs.push(BoundaryCondition::Force { node, dof: DofKind::Z, value: -load / 4.0, curve: None });
        }
        EquilibriumDriver::new(mesh, vec![Box::new(solid)], contact, bcs, vec![], DriverConfig::default())
    }

    /// Unit-square column of height 2. `field` is held at `base` on the
    /// bottom face and drained by a total flux of 3 through the top, so the
    /// top settles at `base - 2`.
    fn drained_column(field: DofKind, base: f64, config: DriverConfig) -> Result<EquilibriumDriver> {
        let mut mesh = Mesh::new();
        mesh.add_nodes(brick(1.0, 1.0, 2.0));
        mesh.add_element(ElementType::Hex8, (0..8).collect())?;
        let perm = Arc::new(IsotropicPermeability::new(3.0)?);
        let domain = DiffusionDomain::new(&mesh, vec![0], field, perm)?;
        let mut bcs: Vec<BoundaryCondition> = (0..4)
            .map(|node| BoundaryCondition::Prescribed { node, dof: field, value: base, curve: None })
            .collect();
        bcs.extend((4..8).map(|node| BoundaryCondition::Force { node, dof: field, value: -0.75, curve: None }));
        EquilibriumDriver::new(mesh, vec![Box::new(domain)], ContactConstraintSet::new(), bcs, vec![], config)
    }

    fn flat_contact() -> SlidingConfig {
        SlidingConfig {
            penalty: 1000.0,
            augmented_lagrangian: true,
            atol: 1e-3,
            ..SlidingConfig::default()
        }
    }

    #[test]
    fn test_linear_truss_converges_in_one_iteration() {
        let material = Arc::new(Material::new(100.0, 0.0).unwrap());
        let mut driver = bar(2.0, material, 5.0, DriverConfig::default()).unwrap();
        assert_eq!(driver.equations().n_equations(), 1);

        let report = driver.solve_step(1.0).unwrap();
        assert_eq!(report.iterations, 1);
        // F·L/(A·E)
        assert_relative_eq!(driver.displacement(1).x, 0.1, max_relative = 1e-9);
        assert_eq!(driver.state().total_iterations, 1);
    }

    #[test]
    fn test_bfgs_needs_fewer_reformations_than_newton() {
        let material = Arc::new(Hardening { e: 100.0, c: 100.0 });
        let mut newton = bar(1.0, material.clone(), 5.0, DriverConfig::full_newton()).unwrap();
        let mut bfgs = bar(1.0, material, 5.0, DriverConfig::default()).unwrap();

        let rn = newton.solve_step(1.0).unwrap();
        let rb = bfgs.solve_step(1.0).unwrap();
        assert!(rb.reformations < rn.reformations, "{:?} vs {:?}", rb, rn);
        assert!(rb.iterations <= rn.iterations + 4, "{:?} vs {:?}", rb, rn);
        assert_relative_eq!(bfgs.displacement(1).x, newton.displacement(1).x, max_relative = 1e-4);

        // equilibrium of the converged bar
        let u = bfgs.displacement(1).x;
        assert_relative_eq!(100.0 * (u + 100.0 * u.powi(3)), 5.0, max_relative = 1e-3);
    }

    #[test]
    fn test_failed_increment_restores_committed_state() {
        let material = Arc::new(Hardening { e: 100.0, c: 100.0 });
        let config = DriverConfig { max_iterations: 1, ..DriverConfig::default() };
        let mut driver = bar(1.0, material, 5.0, config).unwrap();

        let err = driver.solve_step(1.0).unwrap_err();
        assert!(matches!(err, Error::ConvergenceFailure { .. }));
        assert!(err.is_recoverable());
        assert!(driver.nodal_values().iter().all(|v| *v == 0.0));
        assert_eq!(driver.state().time, 0.0);
    }

    #[test]
    fn test_quasin_requires_prep_step() {
        let material = Arc::new(Material::new(100.0, 0.0).unwrap());
        let mut driver = bar(2.0, material, 5.0, DriverConfig::default()).unwrap();
        assert!(matches!(driver.quasin(1.0), Err(Error::Config(_))));
    }

    #[test]
    fn test_residual_rejects_wrong_length() {
        let material = Arc::new(Material::new(100.0, 0.0).unwrap());
        let driver = bar(2.0, material, 5.0, DriverConfig::default()).unwrap();
        let mut r = vec![0.0; 3];
        assert!(driver.residual(&mut r).is_err());
    }

    #[test]
    fn test_flat_contact_pressure_matches_applied_load() {
        let mut driver = stacked_blocks(0.01, 10.0, flat_contact()).unwrap();
        let report = driver.solve_step(1.0).unwrap();
        assert!(report.augmentations >= 1);

        let summary = &driver.contact().summaries()[0];
        assert_eq!(summary.active, summary.total);
        assert_relative_eq!(summary.mean_pressure, 10.0, max_relative = 1e-2);
    }

    #[test]
    fn test_scalar_block_tolerances_control_convergence() {
        for field in [DofKind::Pressure, DofKind::Concentration(0)] {
            let tolerances = Tolerances { rmin: 0.0, ptol: 1e-6, ctol: 1e-6, ..Tolerances::default() };
            let config = DriverConfig { tolerances: tolerances.clone(), ..DriverConfig::default() };
            let mut driver = drained_column(field, 2.0, config).unwrap();
            let report = driver.solve_step(1.0).unwrap();
            // the first update is the whole increment, so the block norm needs a second pass
            assert_eq!(report.iterations, 2, "{:?}", field);
            for node in 4..8 {
                assert_relative_eq!(driver.value(node, field), 0.0, epsilon = 1e-9);
            }

            let loose = Tolerances { ptol: 0.0, ctol: 0.0, ..tolerances };
            let config = DriverConfig { tolerances: loose, ..DriverConfig::default() };
            let mut driver = drained_column(field, 2.0, config).unwrap();
            assert_eq!(driver.solve_step(1.0).unwrap().iterations, 1, "{:?}", field);
        }
    }

    #[test]
    fn test_negative_concentration_rejected_only_on_request() {
        let field = DofKind::Concentration(0);
        let mut driver = drained_column(field, -0.5, DriverConfig::default()).unwrap();
        driver.solve_step(1.0).unwrap();
        assert_relative_eq!(driver.value(4, field), -2.5, epsilon = 1e-9);

        let config = DriverConfig { reject_negative_concentration: true, ..DriverConfig::default() };
        let mut driver = drained_column(field, -0.5, config).unwrap();
        driver.prep_step(1.0).unwrap();
        let mut r = vec![0.0; driver.equations().n_equations()];
        assert!(matches!(driver.residual(&mut r), Err(Error::NumericalFault(_))));
        assert!(matches!(driver.quasin(1.0), Err(Error::NumericalFault(_))));
        assert_eq!(driver.state().time, 0.0);
    }

    #[test]
    fn test_auto_penalty_scales_with_underlying_element() {
        let sliding = SlidingConfig { penalty: 2.0, auto_penalty: true, ..SlidingConfig::default() };
        let driver = stacked_blocks(0.01, 10.0, sliding).unwrap();
        // bulk modulus of E = 1000, ν = 0.3 over a unit face of a unit cube
        let expected = 2.0 * 1000.0 / (3.0 * (1.0 - 2.0 * 0.3));
        let states = driver.contact().save_state();
        let InterfaceState::Sliding(surfaces) = &states[0] else {
            panic!("expected sliding state, found {:?}", states[0].kind());
        };
        assert_eq!(surfaces[0].len(), 4);
        for p in &surfaces[0] {
            assert_relative_eq!(p.epsn, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_checkpoint_after_pairing_change_without_reformation() {
        let mut driver = stacked_blocks(0.01, 10.0, flat_contact()).unwrap();
        driver.solve_step(1.0).unwrap();
        let assembled = driver.stiffness().identity();

        // every slave point loses its facet after the last reformation
        let mut states = driver.contact.save_state();
        for state in &mut states {
            if let InterfaceState::Sliding(surfaces) = state {
                surfaces.iter_mut().flatten().for_each(|p| p.master = None);
            }
        }
        driver.contact.load_state(&states).unwrap();
        assert_ne!(Some(driver.profile_identity()), assembled);

        let checkpoint = Checkpoint::capture(&driver);
        let mut fresh = stacked_blocks(0.01, 10.0, flat_contact()).unwrap();
        checkpoint.restore(&mut fresh).unwrap();
        assert_eq!(fresh.stiffness().identity(), Some(driver.profile_identity()));

        let n = driver.equations().n_equations();
        let (mut r1, mut r2) = (vec![0.0; n], vec![0.0; n]);
        driver.residual(&mut r1).unwrap();
        fresh.residual(&mut r2).unwrap();
        for (a, b) in r1.iter().zip(&r2) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }
}
