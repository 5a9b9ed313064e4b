//! Frictionless facet-to-facet sliding contact.
//!
//! Slave integration points are projected onto the closest master facet.
//! With the master outward normal `n` and the projection `x_m`, the gap
//! `g = (x_m - x_s)·n` is positive when the slave point penetrates. The
//! regularized pressure `Ln = Lmd + eps·g` pushes the surfaces apart while
//! positive and does nothing otherwise.
//!
//! In biphasic mode the interface also transfers fluid between the two
//! sides through a penalized pressure gap on the points in contact.

use super::search::FacetGrid;
use super::surface::ContactSurface;
use super::{multiplier_change, AugmentOutcome, ContactInterface, ContactKind, ContactSummary, InterfaceState};
use crate::assembly::{evaluate_parallel, scatter_matrices, scatter_vectors, ElementMatrix, ElementVector};
use crate::config::SlidingConfig;
use crate::dof::{DofBlock, DofKind, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::physics::{PhysicsModule, StateView};
use crate::sparse::CompactSymmMatrix;
use crate::types::{Natural2, Point3, Vec3};
use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Successful projection of a slave point.
struct Hit {
    facet: usize,
    rs: Natural2,
    gap: f64,
    normal: Vec3,
    pg: f64,
}

#[derive(Debug, Clone)]
pub struct SlidingInterface {
    name: String,
    config: SlidingConfig,
    /// `[primary slave, primary master]`.
    surfaces: [ContactSurface; 2],
    revision: u64,
}

impl SlidingInterface {
    pub fn new(mesh: &Mesh, slave: usize, master: usize, config: SlidingConfig) -> Result<Self> {
        config.validate()?;
        if slave == master {
            return Err(Error::Config("sliding contact needs two distinct surfaces".into()));
        }
        let slave = ContactSurface::from_mesh(mesh, slave)?;
        let master = ContactSurface::from_mesh(mesh, master)?;
        Ok(Self {
            name: format!("sliding {}/{}", slave.name(), master.name()),
            config,
            surfaces: [slave, master],
            revision: 0,
        })
    }

    pub fn config(&self) -> &SlidingConfig {
        &self.config
    }

    /// Surface 0 is the primary slave, surface 1 the primary master.
    pub fn surface(&self, k: usize) -> &ContactSurface {
        &self.surfaces[k]
    }

    /// (slave, master) per pass.
    fn passes(&self) -> &'static [(usize, usize)] {
        if self.config.two_pass {
            &[(0, 1), (1, 0)]
        } else {
            &[(0, 1)]
        }
    }

    fn kinds(&self) -> Vec<DofKind> {
        let mut kinds = DofKind::DISPLACEMENT.to_vec();
        if self.config.biphasic {
            kinds.push(DofKind::Pressure);
        }
        kinds
    }

    /// Penalties of every slave point: user values, or scaled by the
    /// stiffness of the element under each facet.
    fn calibrate(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        let cfg = self.config.clone();
        for &(s, _) in self.passes() {
            let surface = &self.surfaces[s];
            let per_facet = (0..surface.facets().len())
                .map(|f| {
                    if !cfg.auto_penalty {
                        return Ok((cfg.penalty, cfg.pressure_penalty));
                    }
                    let element = surface.facets()[f].element.ok_or_else(|| {
                        Error::Config(format!(
                            "automatic penalty needs facet {} of '{}' attached to an element",
                            f,
                            surface.name()
                        ))
                    })?;
                    let area = surface.facet_area(mesh, f);
                    let stiffness_of = |block| {
                        modules
                            .iter()
                            .find_map(|m| m.surface_stiffness(mesh, element, area, block))
                            .ok_or_else(|| {
                                Error::Config(format!(
                                    "no physics module provides {:?} stiffness for element {}",
                                    block, element
                                ))
                            })
                    };
                    let epsn = cfg.penalty * stiffness_of(DofBlock::Displacement)?;
                    let epsp = if cfg.biphasic {
                        cfg.pressure_penalty * stiffness_of(DofBlock::Pressure)?
                    } else {
                        cfg.pressure_penalty
                    };
                    Ok((epsn, epsp))
                })
                .collect::<Result<Vec<_>>>()?;

            let facets: Vec<usize> = surface.stations().iter().map(|st| st.facet).collect();
            for (p, f) in self.surfaces[s].points_mut().iter_mut().zip(facets) {
                (p.epsn, p.epsp) = per_facet[f];
            }
            debug!(
                interface = %self.name,
                surface = %self.surfaces[s].name(),
                min = per_facet.iter().map(|e| e.0).fold(f64::INFINITY, f64::min),
                max = per_facet.iter().map(|e| e.0).fold(0.0, f64::max),
                "contact penalty"
            );
        }
        Ok(())
    }

    /// Closest master facet to `x` among `candidates`, within `limit`.
    fn closest(
        &self,
        master: &ContactSurface,
        positions: &[Vec<Point3>],
        x: &Point3,
        candidates: &[usize],
        limit: f64,
    ) -> Option<(usize, Natural2, Point3)> {
        candidates
            .iter()
            .filter_map(|&f| {
                let ft = master.facet_type(f);
                let rs = ft.project(&positions[f], x, self.config.search_tolerance)?;
                let q = ft.position(&positions[f], &rs);
                let dist = (q - x).norm();
                (dist <= limit).then_some((f, rs, q, dist))
            })
            .min_by(|a, b| a.3.total_cmp(&b.3))
            .map(|(f, rs, q, _)| (f, rs, q))
    }

    /// Contact forces of slave point `i`.
    fn point_force(
        &self,
        view: &StateView,
        slave: &ContactSurface,
        master: &ContactSurface,
        i: usize,
    ) -> Option<ElementVector> {
        let p = &slave.points()[i];
        let mf = p.master?;
        let tn = p.pressure();
        if tn <= 0.0 {
            return None;
        }
        let st = &slave.stations()[i];
        let kinds = self.kinds();
        let nd = kinds.len();
        let s_nodes = &slave.facets()[st.facet].nodes;
        let m_nodes = &master.facets()[mf].nodes;
        let ns = s_nodes.len();
        let n_s = slave.facet_type(st.facet).shape(&st.rs);
        let n_m = master.facet_type(mf).shape(&p.rs);
        let w = st.weight;
        let flux = p.flux();

        let mut fe = DVector::zeros(nd * (ns + m_nodes.len()));
        for (a, &na) in n_s.iter().take(ns).enumerate() {
            for c in 0..3 {
                fe[a * nd + c] = tn * p.normal[c] * na * w;
            }
            if self.config.biphasic {
                fe[a * nd + 3] = -flux * na * w;
            }
        }
        for (b, &nb) in n_m.iter().take(m_nodes.len()).enumerate() {
            let row = (ns + b) * nd;
            for c in 0..3 {
                fe[row + c] = -tn * p.normal[c] * nb * w;
            }
            if self.config.biphasic {
                fe[row + 3] = flux * nb * w;
            }
        }

        let nodes: Vec<usize> = s_nodes.iter().chain(m_nodes).copied().collect();
        Some(ElementVector {
            lm: view.eqs.lm(&nodes, &kinds),
            fe,
        })
    }

    /// Tangent of slave point `i`, curvature terms included.
    fn point_stiffness(
        &self,
        view: &StateView,
        slave: &ContactSurface,
        master: &ContactSurface,
        i: usize,
    ) -> Option<ElementMatrix> {
        let p = &slave.points()[i];
        let mf = p.master?;
        let tn = p.pressure();
        if tn <= 0.0 {
            return None;
        }
        let st = &slave.stations()[i];
        let kinds = self.kinds();
        let nd = kinds.len();
        let s_nodes = &slave.facets()[st.facet].nodes;
        let m_nodes = &master.facets()[mf].nodes;
        let (ns, nm) = (s_nodes.len(), m_nodes.len());
        let ndof = nd * (ns + nm);
        let n = p.normal;
        let w = st.weight;

        let ftm = master.facet_type(mf);
        let xm = master.facet_positions(view, mf);
        let (t1, t2) = ftm.tangents(&xm, &p.rs);
        let metric_inv = Matrix2::new(t1.dot(&t1), t1.dot(&t2), t1.dot(&t2), t2.dot(&t2)).try_inverse()?;
        let h12 = n.dot(&ftm.twist(&xm));
        let curvature = Matrix2::new(0.0, h12, h12, 0.0);
        let n_s = slave.facet_type(st.facet).shape(&st.rs);
        let n_m = ftm.shape(&p.rs);
        let dn_m = ftm.shape_derivatives(&p.rs);

        // per DOF: gap variation, tangential slip T and normal slope P
        let mut g = DVector::zeros(ndof);
        let mut q = DVector::zeros(ndof);
        let mut slip = vec![Vector2::zeros(); ndof];
        let mut slope = vec![Vector2::zeros(); ndof];
        for a in 0..ns {
            for c in 0..3 {
                let i = a * nd + c;
                g[i] = -n_s[a] * n[c];
                slip[i] = metric_inv * Vector2::new(t1[c], t2[c]) * -n_s[a];
            }
            if self.config.biphasic {
                q[a * nd + 3] = n_s[a];
            }
        }
        for b in 0..nm {
            for c in 0..3 {
                let i = (ns + b) * nd + c;
                g[i] = n_m[b] * n[c];
                slip[i] = metric_inv * Vector2::new(t1[c], t2[c]) * n_m[b];
                slope[i] = dn_m[b] * n[c];
            }
            if self.config.biphasic {
                q[(ns + b) * nd + 3] = -n_m[b];
            }
        }

        let mut ke: DMatrix<f64> = &g * g.transpose() * (p.epsn * w);
        let ho = self.config.higher_order * tn * w;
        if ho != 0.0 {
            for i in 0..ndof {
                for j in 0..ndof {
                    ke[(i, j)] += ho
                        * (slip[i].dot(&(curvature * slip[j])) - slope[j].dot(&slip[i]) - slope[i].dot(&slip[j]));
                }
            }
        }
        // pressure rows keep only the pressure block; their coupling to displacement is left out
        if self.config.biphasic {
            ke += &q * q.transpose() * (p.epsp * w);
        }

        let nodes: Vec<usize> = s_nodes.iter().chain(m_nodes).copied().collect();
        Some(ElementMatrix {
            lm: view.eqs.lm(&nodes, &kinds),
            ke,
        })
    }
}

impl ContactInterface for SlidingInterface {
    fn kind(&self) -> ContactKind {
        ContactKind::Sliding
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dof_kinds(&self) -> Vec<DofKind> {
        self.kinds()
    }

    fn init(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        for surface in &mut self.surfaces {
            surface.points_mut().iter_mut().for_each(|p| *p = Default::default());
        }
        self.calibrate(mesh, modules)?;
        self.revision += 1;
        Ok(())
    }

    fn recalibrate_penalty(&mut self, mesh: &Mesh, modules: &[Box<dyn PhysicsModule>]) -> Result<()> {
        self.calibrate(mesh, modules)
    }

    fn updates_search(&self, iteration: usize) -> bool {
        self.config.segment_updates == 0 || iteration < self.config.segment_updates
    }

    fn project_surface(&mut self, view: &StateView, update_search: bool) -> Result<()> {
        let mut changed = 0usize;
        let mut lost = 0usize;
        for &(s, m) in self.passes() {
            let slave = &self.surfaces[s];
            let master = &self.surfaces[m];
            let positions: Vec<Vec<Point3>> = (0..master.facets().len())
                .map(|f| master.facet_positions(view, f))
                .collect();
            let radius = self.config.search_radius * master.mean_facet_size(view);
            let grid = update_search.then(|| FacetGrid::build(master, view, radius));
            let biphasic = self.config.biphasic;

            let hits: Vec<Option<Hit>> = (0..slave.n_points())
                .into_par_iter()
                .map(|i| {
                    let x = slave.station_position(view, i);
                    let previous = &slave.points()[i].master;
                    let (candidates, limit) = match (&grid, previous) {
                        (Some(grid), _) => (grid.candidates(&x), radius),
                        (None, Some(f)) => (std::slice::from_ref(f), f64::INFINITY),
                        (None, None) => (&[][..], 0.0),
                    };
                    let (facet, rs, q) = self.closest(master, &positions, &x, candidates, limit)?;
                    let normal = master.facet_type(facet).normal(&positions[facet], &rs).0;
                    let pg = if biphasic {
                        let st = &slave.stations()[i];
                        slave.interpolate(view, st.facet, &st.rs, DofKind::Pressure)
                            - master.interpolate(view, facet, &rs, DofKind::Pressure)
                    } else {
                        0.0
                    };
                    Some(Hit {
                        facet,
                        rs,
                        gap: (q - x).dot(&normal),
                        normal,
                        pg,
                    })
                })
                .collect();

            for (p, hit) in self.surfaces[s].points_mut().iter_mut().zip(hits) {
                let previous = p.master;
                match hit {
                    Some(hit) => {
                        p.master = Some(hit.facet);
                        p.rs = hit.rs;
                        p.gap = hit.gap;
                        p.normal = hit.normal;
                        p.pg = hit.pg;
                        p.ln = p.pressure().max(0.0);
                    }
                    None => {
                        p.master = None;
                        p.gap = 0.0;
                        p.pg = 0.0;
                        p.ln = 0.0;
                        if previous.is_some() {
                            lost += 1;
                        }
                    }
                }
                if p.master != previous {
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            self.revision += 1;
            debug!(interface = %self.name, changed, "contact pairing changed");
        }
        if lost > 0 && !update_search {
            warn!(interface = %self.name, lost, "slave points slid off their master facets");
        }
        Ok(())
    }

    fn build_profile(&self, _mesh: &Mesh, eqs: &EquationMap) -> Vec<Vec<Option<usize>>> {
        let kinds = self.kinds();
        let mut pairs = HashSet::new();
        let mut lms = Vec::new();
        for &(s, m) in self.passes() {
            let slave = &self.surfaces[s];
            let master = &self.surfaces[m];
            for (p, st) in slave.points().iter().zip(slave.stations()) {
                let Some(mf) = p.master else { continue };
                if pairs.insert((s, st.facet, mf)) {
                    let nodes: Vec<usize> = slave.facets()[st.facet]
                        .nodes
                        .iter()
                        .chain(&master.facets()[mf].nodes)
                        .copied()
                        .collect();
                    lms.push(eqs.lm(&nodes, &kinds));
                }
            }
        }
        lms
    }

    fn contact_forces(&self, view: &StateView, r: &mut [f64]) -> Result<()> {
        for &(s, m) in self.passes() {
            let (slave, master) = (&self.surfaces[s], &self.surfaces[m]);
            let blocks = evaluate_parallel(slave.n_points(), |i| Ok(self.point_force(view, slave, master, i)))?;
            let blocks: Vec<ElementVector> = blocks.into_iter().flatten().collect();
            scatter_vectors(r, &blocks, &self.name)?;
        }
        Ok(())
    }

    fn contact_stiffness(&self, view: &StateView, k: &mut CompactSymmMatrix) -> Result<()> {
        for &(s, m) in self.passes() {
            let (slave, master) = (&self.surfaces[s], &self.surfaces[m]);
            let blocks = evaluate_parallel(slave.n_points(), |i| Ok(self.point_stiffness(view, slave, master, i)))?;
            let blocks: Vec<ElementMatrix> = blocks.into_iter().flatten().collect();
            scatter_matrices(k, &blocks, &self.name)?;
        }
        Ok(())
    }

    fn augment(&mut self, naug: usize) -> AugmentOutcome {
        if !self.config.augmented_lagrangian {
            return AugmentOutcome::Converged;
        }
        let biphasic = self.config.biphasic;
        let (mut norm0, mut norm1, mut gap2, mut pg2, mut active) = (0.0, 0.0, 0.0, 0.0, 0usize);
        for &(s, _) in self.passes() {
            for p in self.surfaces[s].points() {
                norm0 += p.lmd * p.lmd;
                if p.master.is_some() {
                    let ln = p.pressure().max(0.0);
                    norm1 += ln * ln;
                    if ln > 0.0 {
                        gap2 += p.gap * p.gap;
                        pg2 += p.pg * p.pg;
                        active += 1;
                    }
                }
            }
        }
        let lnorm = multiplier_change(norm0, norm1);
        let rms = |sum: f64| if active > 0 { (sum / active as f64).sqrt() } else { 0.0 };
        let (gnorm, pnorm) = (rms(gap2), rms(pg2));

        let cfg = &self.config;
        let converged = lnorm <= cfg.atol
            && (cfg.gtol == 0.0 || gnorm <= cfg.gtol)
            && (!biphasic || cfg.ptol == 0.0 || pnorm <= cfg.ptol);
        let outcome = AugmentOutcome::decide(converged, naug, cfg.augmentations.min, cfg.augmentations.max);
        info!(
            interface = %self.name,
            naug,
            multiplier_change = lnorm,
            gap = gnorm,
            pressure_gap = pnorm,
            ?outcome,
            "augmentation"
        );

        if outcome == AugmentOutcome::Pending {
            for &(s, _) in self.passes() {
                for p in self.surfaces[s].points_mut() {
                    if p.master.is_some() {
                        p.lmd = p.pressure().max(0.0);
                        if biphasic && p.lmd > 0.0 {
                            p.lmp = p.flux();
                        }
                    } else {
                        p.lmd = 0.0;
                        p.lmp = 0.0;
                    }
                    p.ln = p.pressure().max(0.0);
                }
            }
        }
        outcome
    }

    fn pairing_revision(&self) -> u64 {
        self.revision
    }

    fn save_state(&self) -> InterfaceState {
        InterfaceState::Sliding(self.surfaces.iter().map(|s| s.points().to_vec()).collect())
    }

    fn load_state(&mut self, state: &InterfaceState) -> Result<()> {
        let InterfaceState::Sliding(points) = state else {
            return Err(super::kind_mismatch(ContactKind::Sliding, state.kind()));
        };
        if points.len() != self.surfaces.len() {
            return Err(Error::Checkpoint(format!(
                "sliding state holds {} surfaces, expected {}",
                points.len(),
                self.surfaces.len()
            )));
        }
        for (surface, p) in self.surfaces.iter_mut().zip(points) {
            surface.load_points(p)?;
        }
        self.revision += 1;
        Ok(())
    }

    fn summary(&self) -> ContactSummary {
        let (mut force, mut area, mut active, mut total, mut max_gap) = (0.0, 0.0, 0, 0, 0.0f64);
        for &(s, _) in self.passes() {
            let surface = &self.surfaces[s];
            let (f, a) = surface.pressure_resultant();
            force += f;
            area += a;
            total += surface.n_points();
            for p in surface.points().iter().filter(|p| p.is_active()) {
                active += 1;
                max_gap = max_gap.max(p.gap);
            }
        }
        ContactSummary {
            name: self.name.clone(),
            kind: ContactKind::Sliding,
            active,
            total,
            mean_pressure: if area > 0.0 { force / area } else { 0.0 },
            max_gap,
        }
    }
}
