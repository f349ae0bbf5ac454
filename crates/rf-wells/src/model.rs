//! Standard well model.
//!
//! Each well carries `num_eq` primary variables: a bhp-or-rate surrogate
//! (`XVAR`) followed by the water, gas and optionally solvent surface
//! volume fractions. Polymer, when enabled, adds a trivial well equation.
//!
//! Per Newton iteration the model:
//! 1. switches controls whose constraints are broken
//! 2. seeds the well variables from the well state
//! 3. assembles perforation fluxes into the reservoir Jacobian and the
//!    dense well block system, then inverts the per-well `D` blocks
//!
//! The reservoir side only sees the Schur complement through
//! [`StandardWells::apply`] and friends.

use crate::blocks::WellSystem;
use crate::density::{self, PerforationProperties};
use crate::error::{WellError, WellResult};
use crate::flux::{PerforationFlux, compute_well_flux};
use crate::group::WellCollection;
use crate::potentials::PotentialParameters;
use crate::state::{GFRAC, SFRAC, WFRAC, WellState, XVAR};
use crate::topology::{WellControl, Wells};
use crate::vfp::VfpProperties;
use crate::voidage::RateConverter;
use nalgebra::DVector;
use rf_core::constants::{G0_MPS2, well_storage_volume_m3};
use rf_core::{
    BlockMatrix, Communicator, Eval, Phase, PhaseUsage, Real, SimulatorReport, WELL_OFFSET,
    chopped,
};
use rf_fluids::{CellFluidState, FluidSystem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const WATER: usize = 0;
const OIL: usize = 1;
const GAS: usize = 2;
const SOLVENT: usize = 3;

/// Weights of the phase fractions outside reservoir-rate control, indexed
/// water, oil, gas, solvent.
pub(crate) const FRACTION_SCALING: [Real; 4] = [1.0, 1.0, 0.01, 0.01];

/// Lower bound of bhp under rate control (Pa).
const MIN_RATE_CONTROLLED_BHP: Real = 1.0e5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WellModelParameters {
    /// Relative bhp change allowed per update under rate control.
    pub dbhp_max_rel: Real,
    /// Absolute change of a well volume fraction allowed per update.
    pub dwell_fraction_max: Real,
    /// Well flux residuals above this abort the step.
    pub max_residual_allowed: Real,
    pub tolerance_wells: Real,
    /// Solve the well equations alone before the first Newton iteration.
    pub solve_welleq_initially: bool,
    /// Iteration cap of the wells-only solve.
    pub max_welleq_iter: usize,
    pub potentials: PotentialParameters,
    /// Log the well convergence table.
    pub verbose: bool,
}

impl Default for WellModelParameters {
    fn default() -> Self {
        Self {
            dbhp_max_rel: 1.0,
            dwell_fraction_max: 0.2,
            max_residual_allowed: 1.0e7,
            tolerance_wells: 1.0e-4,
            solve_welleq_initially: true,
            max_welleq_iter: 15,
            potentials: PotentialParameters::default(),
            verbose: false,
        }
    }
}

/// Read-only view of the evaluated reservoir.
#[derive(Clone, Copy)]
pub struct ReservoirView<'a> {
    /// Fluid state of every local cell.
    pub cells: &'a [CellFluidState],
    pub fluid: &'a dyn FluidSystem,
    pub comm: &'a dyn Communicator,
    pub pore_volume: &'a [Real],
    /// Cell count over all partitions.
    pub global_num_cells: usize,
}

impl<'a> ReservoirView<'a> {
    pub(crate) fn cell(&self, idx: usize) -> WellResult<&'a CellFluidState> {
        self.cells.get(idx).ok_or_else(|| WellError::InvalidConfig {
            what: format!("perforated cell {idx} is outside the reservoir"),
        })
    }
}

/// Reservoir Jacobian and residual the well fluxes are added to.
///
/// The Jacobian has `num_eq × num_eq` blocks; the residual holds `num_eq`
/// entries per cell.
pub struct ReservoirLinearization<'a> {
    pub jacobian: &'a mut BlockMatrix,
    pub residual: &'a mut DVector<Real>,
}

pub struct StandardWells {
    pub(crate) wells: Wells,
    pub(crate) collection: WellCollection,
    pub(crate) params: WellModelParameters,
    pub(crate) phase_usage: PhaseUsage,
    pub(crate) vfp: Arc<dyn VfpProperties>,
    pub(crate) gravity: Real,
    pub(crate) system: WellSystem,
    pub(crate) well_variables: Vec<Eval>,
    /// Surface volume fractions at the start of the step.
    pub(crate) f0: Vec<Real>,
    pub(crate) perf_densities: Vec<Real>,
    pub(crate) perf_pressure_diffs: Vec<Real>,
    pub(crate) perf_efficiency: Vec<Real>,
    pub(crate) rate_converter: RateConverter,
}

impl StandardWells {
    pub fn new(
        wells: Wells,
        collection: WellCollection,
        params: WellModelParameters,
        phase_usage: PhaseUsage,
        vfp: Arc<dyn VfpProperties>,
        num_cells: usize,
    ) -> WellResult<Self> {
        for well in wells.iter() {
            if let Some(p) = well.perforations.iter().find(|p| p.cell >= num_cells) {
                return Err(WellError::InvalidConfig {
                    what: format!(
                        "well {} perforates cell {} of a {num_cells}-cell reservoir",
                        well.name, p.cell
                    ),
                });
            }
        }
        let n_weq = phase_usage.num_eq();
        let n_comp = 3 + phase_usage.has_solvent as usize;
        let nperf = wells.num_perforations();
        let system = WellSystem::new(&wells, num_cells, n_weq)?;
        let mut model = Self {
            well_variables: vec![Eval::constant(0.0); wells.len() * n_weq],
            f0: vec![0.0; wells.len() * n_comp],
            perf_densities: vec![0.0; nperf],
            perf_pressure_diffs: vec![0.0; nperf],
            perf_efficiency: vec![1.0; nperf],
            wells,
            collection,
            params,
            phase_usage,
            vfp,
            gravity: G0_MPS2,
            system,
            rate_converter: RateConverter::default(),
        };
        model.calculate_efficiency_factors();
        Ok(model)
    }

    pub fn with_gravity(mut self, gravity: Real) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn wells(&self) -> &Wells {
        &self.wells
    }

    pub fn collection(&self) -> &WellCollection {
        &self.collection
    }

    pub fn params(&self) -> &WellModelParameters {
        &self.params
    }

    pub fn phase_usage(&self) -> PhaseUsage {
        self.phase_usage
    }

    pub fn wells_active(&self) -> bool {
        !self.wells.is_empty()
    }

    pub fn num_well_eq(&self) -> usize {
        self.phase_usage.num_eq()
    }

    /// Components carried by perforation fluxes (phases plus solvent).
    pub fn num_components(&self) -> usize {
        3 + self.phase_usage.has_solvent as usize
    }

    pub fn system(&self) -> &WellSystem {
        &self.system
    }

    /// Well equation residuals, `num_eq` per well.
    pub fn residual(&self) -> &DVector<Real> {
        &self.system.res_well
    }

    pub fn perf_densities(&self) -> &[Real] {
        &self.perf_densities
    }

    pub fn perf_pressure_diffs(&self) -> &[Real] {
        &self.perf_pressure_diffs
    }

    pub fn perf_efficiency(&self) -> &[Real] {
        &self.perf_efficiency
    }

    pub fn well_variable(&self, w: usize, var: usize) -> Eval {
        self.well_variables[w * self.num_well_eq() + var]
    }

    pub(crate) fn current_control(&self, w: usize, ws: &WellState) -> &WellControl {
        self.wells.control(w, ws.current_controls[w])
    }

    /// Solvent share of the injected gas.
    pub fn wsolvent(&self, w: usize) -> Real {
        if self.phase_usage.has_solvent {
            self.wells.get(w).solvent_fraction
        } else {
            0.0
        }
    }

    /// Polymer concentration of the injected water.
    pub fn wpolymer(&self, w: usize) -> Real {
        if self.phase_usage.has_polymer {
            self.wells.get(w).polymer_concentration
        } else {
            0.0
        }
    }

    pub fn calculate_efficiency_factors(&mut self) {
        for w in 0..self.wells.len() {
            let factor = self.collection.accumulative_efficiency_factor(&self.wells, w);
            for perf in self.wells.perf_range(w) {
                self.perf_efficiency[perf] = factor;
            }
        }
    }

    // Schur complement action

    pub fn apply_residual(&self, r: &mut DVector<Real>) {
        if self.wells_active() {
            self.system.apply_residual(r);
        }
    }

    pub fn apply(&self, x: &DVector<Real>, ax: &mut DVector<Real>) {
        if self.wells_active() {
            self.system.apply(x, ax);
        }
    }

    pub fn apply_scale_add(&self, alpha: Real, x: &DVector<Real>, ax: &mut DVector<Real>) {
        if self.wells_active() {
            self.system.apply_scale_add(alpha, x, ax);
        }
    }

    pub fn recover_variable(&self, x: &DVector<Real>) -> DVector<Real> {
        self.system.recover_variable(x)
    }

    // Assembly

    /// Assemble the well contributions for Newton iteration `iteration`.
    ///
    /// Iteration 0 also prepares the time step, recomputes connection
    /// pressures and the start-of-step fractions, and optionally solves the
    /// well equations alone first.
    pub fn assemble(
        &mut self,
        view: &ReservoirView<'_>,
        lin: Option<&mut ReservoirLinearization<'_>>,
        iteration: usize,
        dt: Real,
        ws: &mut WellState,
    ) -> WellResult<SimulatorReport> {
        if iteration == 0 {
            self.prepare_time_step(view, ws)?;
        }
        let mut report = SimulatorReport::default();
        if !self.wells_active() {
            return Ok(report);
        }

        self.update_well_controls(ws)?;
        self.set_well_variables(ws);

        if iteration == 0 {
            self.compute_well_connection_pressures(view, ws)?;
            self.compute_accum_wells(ws);
        }
        if self.params.solve_welleq_initially && iteration == 0 {
            report = self.solve_well_eq(view, dt, ws)?;
        }
        self.assemble_well_eq(view, lin, dt, ws)?;

        report.converged = true;
        Ok(report)
    }

    /// Build `B`, `C`, `D` and the well residual, then invert `D`.
    ///
    /// With `lin == None` only the well equations are assembled.
    pub fn assemble_well_eq(
        &mut self,
        view: &ReservoirView<'_>,
        mut lin: Option<&mut ReservoirLinearization<'_>>,
        dt: Real,
        ws: &mut WellState,
    ) -> WellResult<()> {
        let pu = self.phase_usage;
        let n_weq = self.num_well_eq();
        let n_eq = n_weq;
        let n_comp = self.num_components();
        let volume = well_storage_volume_m3();

        self.system.clear();

        for w in 0..self.wells.len() {
            let allow_cf = self.allow_cross_flow(w, view, ws)?;
            let bhp = self.get_bhp(w, ws)?;
            let fractions: Vec<Eval> = (0..n_comp)
                .map(|c| self.well_surface_volume_fraction(w, c, ws))
                .collect();
            let well_type = self.wells.get(w).well_type;
            let perfs: Vec<(usize, usize, Real)> = self
                .wells
                .perforations(w)
                .map(|(perf, p)| (perf, p.cell, p.transmissibility))
                .collect();

            for (perf, cell_idx, transmissibility) in perfs {
                let cell = view.cell(cell_idx)?;
                let mobility = self.perforation_mobility(w, cell);
                let cq = compute_well_flux(
                    &PerforationFlux {
                        well_name: &self.wells.get(w).name,
                        well_type,
                        transmissibility,
                        cell,
                        mobility: &mobility,
                        bhp,
                        pressure_diff: self.perf_pressure_diffs[perf],
                        allow_cross_flow: allow_cf,
                        surface_fractions: &fractions,
                    },
                    pu,
                )?;
                let eff = self.perf_efficiency[perf];

                for (comp, q) in cq.iter().enumerate() {
                    let q_eff = *q * eff;
                    if let Some(lin) = lin.as_deref_mut() {
                        lin.residual[cell_idx * n_eq + comp] -= q_eff.value();
                        if let Some(jac) = lin.jacobian.block_mut(cell_idx, cell_idx) {
                            for pv in 0..n_eq {
                                jac[(comp, pv)] -= q_eff.derivative(pv);
                            }
                        }
                        if let Some(b) = self.system.b.block_mut(w, cell_idx) {
                            for pv in 0..n_weq {
                                b[(pv, comp)] -= q_eff.well_derivative(pv);
                            }
                        }
                        // Well rows see the well's own flux, unscaled.
                        if let Some(c) = self.system.c.block_mut(w, cell_idx) {
                            for pv in 0..n_eq {
                                c[(comp, pv)] -= q.derivative(pv);
                            }
                        }
                    }
                    if let Some(d) = self.system.d.block_mut(w, w) {
                        for pv in 0..n_weq {
                            d[(comp, pv)] -= q.well_derivative(pv);
                        }
                    }
                    self.system.res_well[w * n_weq + comp] -= q.value();

                    if comp == SOLVENT {
                        ws.perf_rate_solvent[perf] = q.value();
                    } else {
                        ws.perf_phase_rates[3 * perf + comp] = q.value();
                    }
                }

                if let Some(pi) = pu.polymer_index() {
                    let concentration = if well_type.is_injector() {
                        Eval::constant(self.wpolymer(w))
                    } else {
                        cell.polymer_concentration
                    };
                    let q_poly = cq[WATER] * concentration * eff;
                    if let Some(lin) = lin.as_deref_mut() {
                        lin.residual[cell_idx * n_eq + pi] -= q_poly.value();
                        if let Some(jac) = lin.jacobian.block_mut(cell_idx, cell_idx) {
                            for pv in 0..n_eq {
                                jac[(pi, pv)] -= q_poly.derivative(pv);
                            }
                        }
                        if let Some(b) = self.system.b.block_mut(w, cell_idx) {
                            for pv in 0..n_weq {
                                b[(pv, pi)] -= q_poly.well_derivative(pv);
                            }
                        }
                    }
                }

                ws.perf_press[perf] = ws.bhp[w] + self.perf_pressure_diffs[perf];
            }

            // Well-bore storage plus the controlled rates.
            for comp in 0..n_comp {
                let loc = (self.well_surface_volume_fraction(w, comp, ws)
                    - self.f0[w * n_comp + comp])
                    * (volume / dt)
                    + self.get_qs(w, comp, ws);
                if let Some(d) = self.system.d.block_mut(w, w) {
                    for pv in 0..n_weq {
                        d[(comp, pv)] += loc.well_derivative(pv);
                    }
                }
                self.system.res_well[w * n_weq + comp] += loc.value();
            }

            if let Some(pi) = pu.polymer_index() {
                if let Some(d) = self.system.d.block_mut(w, w) {
                    d[(pi, pi)] = 1.0;
                }
            }
        }

        self.system.invert(&self.wells)
    }

    /// Iterate the well equations with frozen reservoir unknowns.
    ///
    /// On failure the well state, including current controls, is restored
    /// to its value on entry.
    pub fn solve_well_eq(
        &mut self,
        view: &ReservoirView<'_>,
        dt: Real,
        ws: &mut WellState,
    ) -> WellResult<SimulatorReport> {
        let ws0 = ws.clone();
        let mut it = 0;
        let mut converged;
        loop {
            self.assemble_well_eq(view, None, dt, ws)?;
            converged = self.get_well_convergence(view, it)?;
            if self.collection.group_control_active() {
                converged = converged && self.collection.group_target_converged(&ws.well_rates);
            }
            if converged {
                break;
            }

            it += 1;
            let dx = self.system.well_only_update();
            self.update_well_state(&dx, ws)?;
            self.update_well_controls(ws)?;
            self.set_well_variables(ws);
            if it >= self.params.max_welleq_iter {
                break;
            }
        }

        if !converged {
            debug!(iterations = it, "well equations did not converge, restoring well state");
            *ws = ws0;
        }
        Ok(SimulatorReport {
            converged,
            total_well_iterations: it,
            ..Default::default()
        })
    }

    /// Average-B scaled maximum well residual per component.
    ///
    /// NaN or oversized residuals of a flowing phase are numerical problems.
    pub fn well_flux_residuals(&self, view: &ReservoirView<'_>) -> WellResult<Vec<Real>> {
        let n_comp = self.num_components();
        let n_weq = self.num_well_eq();

        let mut b_avg = vec![0.0; n_comp];
        for cell in view.cells {
            for (p, b) in b_avg.iter_mut().take(3).enumerate() {
                *b += 1.0 / cell.inv_b[p].value();
            }
            if self.phase_usage.has_solvent {
                b_avg[SOLVENT] += 1.0 / cell.solvent_inv_b.value();
            }
        }
        view.comm.sum(&mut b_avg);
        let global_cells = view.global_num_cells.max(1) as Real;
        b_avg.iter_mut().for_each(|b| *b /= global_cells);

        let mut max_norm = vec![0.0_f64; n_comp];
        for w in 0..self.wells.len() {
            for (comp, m) in max_norm.iter_mut().enumerate() {
                *m = m.max(self.system.res_well[w * n_weq + comp].abs());
            }
        }
        view.comm.max(&mut max_norm);

        let residuals: Vec<Real> = b_avg.iter().zip(&max_norm).map(|(b, m)| b * m).collect();
        for phase in Phase::ALL {
            let r = residuals[phase.index()];
            if r.is_nan() {
                return Err(WellError::NumericalProblem {
                    what: format!("NaN residual for phase {phase}"),
                });
            }
            if r > self.params.max_residual_allowed {
                return Err(WellError::NumericalProblem {
                    what: format!("Too large residual for phase {phase}"),
                });
            }
        }
        Ok(residuals)
    }

    pub fn get_well_convergence(
        &self,
        view: &ReservoirView<'_>,
        iteration: usize,
    ) -> WellResult<bool> {
        let residuals = self.well_flux_residuals(view)?;
        let converged = residuals.iter().all(|r| *r < self.params.tolerance_wells);

        if self.params.verbose && view.comm.is_io_rank() {
            if iteration == 0 {
                let mut header = String::from("Iter");
                for phase in Phase::ALL {
                    header.push_str(&format!("  W-FLUX({phase})"));
                }
                info!("{header}");
            }
            let mut row = format!("{iteration:>4}");
            for r in &residuals {
                row.push_str(&format!("{r:>11.3e}"));
            }
            info!("{row}");
        }
        Ok(converged)
    }

    // Primary well variables

    pub fn set_well_variables(&mut self, ws: &WellState) {
        let n_weq = self.num_well_eq();
        for w in 0..self.wells.len() {
            for var in 0..n_weq {
                self.well_variables[w * n_weq + var] =
                    Eval::variable(ws.solution(w, var), WELL_OFFSET + var);
            }
        }
    }

    pub fn compute_accum_wells(&mut self, ws: &WellState) {
        let n_comp = self.num_components();
        let f0: Vec<Real> = (0..self.wells.len())
            .flat_map(|w| (0..n_comp).map(move |c| (w, c)))
            .map(|(w, c)| self.well_surface_volume_fraction(w, c, ws).value())
            .collect();
        self.f0 = f0;
    }

    /// Apply a Newton update `dx` (subtracted) to the well variables and
    /// derive rates, bhp and thp from them.
    pub fn update_well_state(&self, dx: &DVector<Real>, ws: &mut WellState) -> WellResult<()> {
        if !self.wells_active() {
            return Ok(());
        }
        let n_weq = self.num_well_eq();
        let has_solvent = self.phase_usage.has_solvent;
        let df_limit = self.params.dwell_fraction_max;
        let dbhp_limit = self.params.dbhp_max_rel;
        let old = ws.well_solutions.clone();

        for w in 0..self.wells.len() {
            let idx = |var: usize| w * n_weq + var;
            let mut vars = vec![WFRAC, GFRAC];
            if has_solvent {
                vars.push(SFRAC);
            }
            for var in vars {
                ws.set_solution(w, var, chopped(old[idx(var)], dx[idx(var)], df_limit));
            }

            let fw = ws.solution(w, WFRAC);
            let fg = ws.solution(w, GFRAC);
            let fs = if has_solvent { ws.solution(w, SFRAC) } else { 0.0 };
            let mut f = [fw, 1.0 - fw - fg - fs, fg, fs];
            renormalize_fractions(&mut f);
            ws.set_solution(w, WFRAC, f[WATER]);
            ws.set_solution(w, GFRAC, f[GAS]);
            if has_solvent {
                ws.set_solution(w, SFRAC, f[SOLVENT]);
            }

            // Gas rates include solvent.
            let mut fr = [f[WATER], f[OIL], f[GAS] + f[SOLVENT]];
            let control = self.current_control(w, ws).clone();
            match &control {
                WellControl::ReservoirRate { distr, .. } => {
                    for p in 0..3 {
                        fr[p] = if distr[p] > 0.0 { fr[p] / distr[p] } else { 0.0 };
                    }
                }
                _ => {
                    for p in 0..3 {
                        fr[p] /= FRACTION_SCALING[p];
                    }
                }
            }

            let well = self.wells.get(w);
            match &control {
                WellControl::Bhp { .. } | WellControl::Thp { .. } => {
                    let xvar = old[idx(XVAR)] - dx[idx(XVAR)];
                    ws.set_solution(w, XVAR, xvar);
                    for p in 0..3 {
                        ws.well_rates[3 * w + p] = if well.well_type.is_injector() {
                            well.comp_frac[p] * xvar
                        } else {
                            xvar * fr[p]
                        };
                    }
                    if let WellControl::Thp {
                        target,
                        vfp_table,
                        alq,
                    } = &control
                    {
                        let bhp =
                            self.vfp
                                .bhp_value(*vfp_table, ws.well_rates_of(w), *target, *alq)?;
                        ws.bhp[w] = bhp - self.vfp_correction(w, *vfp_table)?;
                    }
                }
                WellControl::SurfaceRate { target, distr }
                | WellControl::ReservoirRate { target, distr } => {
                    let x_old = old[idx(XVAR)];
                    let xvar = chopped(x_old, dx[idx(XVAR)], x_old.abs() * dbhp_limit)
                        .max(MIN_RATE_CONTROLLED_BHP);
                    ws.set_solution(w, XVAR, xvar);
                    ws.bhp[w] = xvar;

                    if matches!(control, WellControl::SurfaceRate { .. }) {
                        if well.well_type.is_producer() {
                            let f_target: Real = distr.iter().zip(&fr).map(|(d, f)| d * f).sum();
                            if f_target != 0.0 {
                                for p in 0..3 {
                                    ws.well_rates[3 * w + p] = fr[p] * target / f_target;
                                }
                            }
                        } else {
                            for p in 0..3 {
                                ws.well_rates[3 * w + p] = well.comp_frac[p] * target;
                            }
                        }
                    } else {
                        for p in 0..3 {
                            ws.well_rates[3 * w + p] = fr[p] * target;
                        }
                    }
                }
            }
        }

        self.update_thp(ws)
    }

    /// Thp of every well with a thp constraint: the target when under thp
    /// control, the value implied by bhp and rates otherwise.
    pub(crate) fn update_thp(&self, ws: &mut WellState) -> WellResult<()> {
        for (w, well) in self.wells.iter().enumerate() {
            let thp_control = well
                .controls
                .iter()
                .enumerate()
                .find(|(_, c)| matches!(c, WellControl::Thp { .. }));
            ws.thp[w] = match thp_control {
                Some((ctrl, WellControl::Thp { target, .. })) if ctrl == ws.current_controls[w] => {
                    *target
                }
                Some((_, WellControl::Thp { vfp_table, alq, .. })) => {
                    let [water, oil, gas] = ws.well_rates_of(w);
                    let dp = self.vfp_correction(w, *vfp_table)?;
                    self.vfp
                        .thp(*vfp_table, water, oil, gas, ws.bhp[w] + dp, *alq)?
                }
                _ => 0.0,
            };
        }
        Ok(())
    }

    /// Hydrostatic correction between a VFP table datum and the bhp
    /// reference depth, using the density at the first perforation.
    pub(crate) fn vfp_correction(&self, w: usize, table: usize) -> WellResult<Real> {
        let well = self.wells.get(w);
        let first = self.wells.perf_range(w).start;
        let rho = self.perf_densities.get(first).copied().unwrap_or(0.0);
        Ok(density::hydrostatic_correction(
            well.reference_depth,
            self.vfp.datum_depth(table)?,
            rho,
            self.gravity,
        ))
    }

    // Bhp, rates and fractions as functions of the well variables

    pub fn get_bhp(&self, w: usize, ws: &WellState) -> WellResult<Eval> {
        match self.current_control(w, ws) {
            WellControl::Bhp { target } => Ok(Eval::constant(*target)),
            WellControl::Thp {
                target,
                vfp_table,
                alq,
            } => {
                let water = self.get_qs(w, WATER, ws);
                let oil = self.get_qs(w, OIL, ws);
                let gas = self.get_qs(w, GAS, ws);
                let bhp = self.vfp.bhp(*vfp_table, water, oil, gas, *target, *alq)?;
                Ok(bhp - self.vfp_correction(w, *vfp_table)?)
            }
            WellControl::SurfaceRate { .. } | WellControl::ReservoirRate { .. } => {
                Ok(self.well_variable(w, XVAR))
            }
        }
    }

    /// Surface rate of component `comp` as a function of the well variables.
    pub fn get_qs(&self, w: usize, comp: usize, ws: &WellState) -> Eval {
        let well = self.wells.get(w);
        let control = self.current_control(w, ws);
        let has_solvent = self.phase_usage.has_solvent;

        if well.well_type.is_injector() {
            let wsolvent = self.wsolvent(w);
            let comp_frac = match comp {
                GAS if has_solvent => well.comp_frac[GAS] * (1.0 - wsolvent),
                SOLVENT => well.comp_frac[GAS] * wsolvent,
                _ => well.comp_frac[comp],
            };
            if comp_frac == 0.0 {
                return Eval::constant(0.0);
            }
            return if control.is_pressure() {
                self.well_variable(w, XVAR) * comp_frac
            } else {
                Eval::constant(comp_frac * control.target())
            };
        }

        match control {
            WellControl::Bhp { .. } | WellControl::Thp { .. } => {
                self.well_variable(w, XVAR) * self.well_volume_fraction_scaled(w, comp, ws)
            }
            WellControl::SurfaceRate { target, distr } => {
                let controlled: Vec<usize> = (0..3).filter(|p| distr[*p] > 0.0).collect();
                match controlled.as_slice() {
                    [phase] => {
                        let phase = *phase;
                        let mut under_control = self.well_volume_fraction_scaled(w, phase, ws);
                        let solvent_in_target = has_solvent && phase == GAS;
                        if solvent_in_target {
                            under_control += self.well_volume_fraction_scaled(w, SOLVENT, ws);
                        }
                        if comp == phase {
                            if solvent_in_target {
                                let gas = self.well_volume_fraction_scaled(w, GAS, ws);
                                return Eval::constant(
                                    target * gas.value() / under_control.value(),
                                );
                            }
                            return Eval::constant(*target);
                        }
                        if under_control.value() < 1.0e-6 {
                            return Eval::constant(0.0);
                        }
                        self.well_volume_fraction_scaled(w, comp, ws) * *target / under_control
                    }
                    [_, _] => {
                        let combined: Eval = controlled
                            .iter()
                            .map(|p| self.well_volume_fraction_scaled(w, *p, ws))
                            .sum();
                        self.well_volume_fraction_scaled(w, comp, ws) * *target / combined
                    }
                    _ => self.well_surface_volume_fraction(w, comp, ws) * *target,
                }
            }
            WellControl::ReservoirRate { target, .. } => {
                self.well_volume_fraction_scaled(w, comp, ws) * *target
            }
        }
    }

    pub fn well_volume_fraction(&self, w: usize, comp: usize) -> Eval {
        let has_solvent = self.phase_usage.has_solvent;
        match comp {
            WATER => self.well_variable(w, WFRAC),
            GAS => self.well_variable(w, GFRAC),
            SOLVENT if has_solvent => self.well_variable(w, SFRAC),
            _ => {
                let mut oil =
                    1.0 - self.well_variable(w, WFRAC) - self.well_variable(w, GFRAC);
                if has_solvent {
                    oil -= self.well_variable(w, SFRAC);
                }
                oil
            }
        }
    }

    pub fn well_volume_fraction_scaled(&self, w: usize, comp: usize, ws: &WellState) -> Eval {
        let fraction = self.well_volume_fraction(w, comp);
        match self.current_control(w, ws) {
            WellControl::ReservoirRate { distr, .. } => {
                if comp == SOLVENT {
                    fraction
                } else if distr[comp] > 0.0 {
                    fraction / distr[comp]
                } else {
                    Eval::constant(0.0)
                }
            }
            _ => fraction / FRACTION_SCALING[comp],
        }
    }

    pub fn well_surface_volume_fraction(&self, w: usize, comp: usize, ws: &WellState) -> Eval {
        let total: Eval = (0..self.num_components())
            .map(|c| self.well_volume_fraction_scaled(w, c, ws))
            .sum();
        self.well_volume_fraction_scaled(w, comp, ws) / total
    }

    // Perforation quantities

    /// Cross flow is allowed when the well permits it, or when no
    /// perforation flows in the well's own direction.
    pub fn allow_cross_flow(
        &self,
        w: usize,
        view: &ReservoirView<'_>,
        ws: &WellState,
    ) -> WellResult<bool> {
        let well = self.wells.get(w);
        if well.allow_cross_flow {
            return Ok(true);
        }
        let bhp = self.get_bhp(w, ws)?.value();
        for (perf, perforation) in self.wells.perforations(w) {
            let pressure = view.cell(perforation.cell)?.pressure.value();
            let drawdown = pressure - (bhp + self.perf_pressure_diffs[perf]);
            if drawdown < 0.0 && well.well_type.is_injector() {
                return Ok(false);
            }
            if drawdown > 0.0 && well.well_type.is_producer() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Mobilities of the flux components in the perforated cell.
    pub fn perforation_mobility(&self, w: usize, cell: &CellFluidState) -> Vec<Eval> {
        let mut mob: Vec<Eval> = cell.mobility.to_vec();
        if self.phase_usage.has_solvent {
            mob.push(cell.solvent_mobility);
        }
        if self.phase_usage.has_polymer && self.wells.get(w).well_type.is_injector() {
            mob[WATER] = mob[WATER] / cell.polymer_viscosity_multiplier;
        }
        mob
    }

    /// Recompute perforation densities and pressure differences from the
    /// current well state.
    pub fn compute_well_connection_pressures(
        &mut self,
        view: &ReservoirView<'_>,
        ws: &WellState,
    ) -> WellResult<()> {
        let nc = self.num_components();
        let nperf = self.wells.num_perforations();
        let pvt = view.fluid.pvt();
        let mut props = PerforationProperties {
            n_comp: nc,
            b: vec![0.0; nperf * nc],
            rs_max: vec![0.0; nperf],
            rv_max: vec![0.0; nperf],
            surface_density: vec![0.0; nperf * nc],
        };

        for w in 0..self.wells.len() {
            let rates = ws.well_rates_of(w);
            let solvent_rate = ws.solvent_well_rate(w);
            let oil_rate = rates[OIL].abs();
            let gas_rate = rates[GAS].abs() - solvent_rate;
            let first = self.wells.perf_range(w).start;

            for (perf, perforation) in self.wells.perforations(w) {
                let p_above = if perf == first {
                    ws.bhp[w]
                } else {
                    ws.perf_press[perf - 1]
                };
                let p_avg = (ws.perf_press[perf] + p_above) / 2.0;
                let b = &mut props.b[perf * nc..(perf + 1) * nc];

                b[WATER] = pvt.b_water(p_avg);

                let rv_max = pvt.rv_sat(p_avg);
                props.rv_max[perf] = rv_max;
                b[GAS] = if oil_rate > 0.0 {
                    let rv = if gas_rate > 0.0 { oil_rate / gas_rate } else { 0.0 };
                    pvt.b_gas(p_avg, rv.min(rv_max))
                } else {
                    pvt.b_gas_saturated(p_avg)
                };

                let rs_max = pvt.rs_sat(p_avg);
                props.rs_max[perf] = rs_max;
                b[OIL] = if gas_rate > 0.0 {
                    let rs = if oil_rate > 0.0 { gas_rate / oil_rate } else { 0.0 };
                    pvt.b_oil(p_avg, rs.min(rs_max))
                } else {
                    pvt.b_oil_saturated(p_avg)
                };

                let surf = &mut props.surface_density[perf * nc..(perf + 1) * nc];
                for phase in Phase::ALL {
                    surf[phase.index()] = view.fluid.surface_density(phase);
                }
                if self.phase_usage.has_solvent {
                    let cell = view.cell(perforation.cell)?;
                    props.b[perf * nc + SOLVENT] = cell.solvent_inv_b.value();
                    props.surface_density[perf * nc + SOLVENT] =
                        view.fluid.solvent_surface_density();
                }
            }
        }

        let mut perf_rates = vec![0.0; nperf * nc];
        for perf in 0..nperf {
            perf_rates[perf * nc..perf * nc + 3]
                .copy_from_slice(&ws.perf_phase_rates[3 * perf..3 * perf + 3]);
            if self.phase_usage.has_solvent {
                perf_rates[perf * nc + SOLVENT] = ws.perf_rate_solvent[perf];
            }
        }

        self.perf_densities = density::connection_densities(&self.wells, &perf_rates, &props);
        self.perf_pressure_diffs =
            density::connection_pressure_delta(&self.wells, &self.perf_densities, self.gravity);
        Ok(())
    }

    // Time step preparation

    /// Synchronize group control with the well state, distribute group
    /// targets, and reset every well's state to its current target.
    pub fn prepare_time_step(
        &mut self,
        view: &ReservoirView<'_>,
        ws: &mut WellState,
    ) -> WellResult<()> {
        self.rate_converter.define_state(view);

        if self.collection.group_control_active() {
            for w in 0..self.wells.len() {
                let under_group = self.wells.get(w).group_control_index
                    == Some(ws.current_controls[w]);
                self.collection.set_individual_control(w, !under_group);
            }

            if self.collection.require_well_potentials() {
                self.set_well_variables(ws);
                self.compute_well_connection_pressures(view, ws)?;
                let potentials = self.compute_well_potentials(view, ws)?;
                self.collection
                    .set_guide_rates_with_potentials(&self.wells, &potentials);
            }

            self.apply_vrep_group_control(ws)?;

            if !self.collection.group_control_applied() {
                self.collection.apply_group_controls(&mut self.wells);
            } else {
                self.collection
                    .update_well_targets(&mut self.wells, &ws.well_rates);
            }
        }

        for w in 0..self.wells.len() {
            let current = ws.current_controls[w];
            self.update_well_state_with_target(w, current, ws)?;
            ws.set_new_well(w, false);
        }
        Ok(())
    }
}

/// Clip negative well volume fractions, ordered water, oil, gas, solvent.
///
/// Water, then gas, then oil: a negative fraction is set to zero and the
/// others are divided by one minus it.
pub fn renormalize_fractions(f: &mut [Real; 4]) {
    for idx in [WATER, GAS, OIL] {
        if f[idx] < 0.0 {
            let scale = 1.0 - f[idx];
            for (j, v) in f.iter_mut().enumerate() {
                if j != idx {
                    *v /= scale;
                }
            }
            f[idx] = 0.0;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn renormalization_is_idempotent(
            fw in -0.5_f64..1.0,
            fg in -0.5_f64..1.0,
            fs in 0.0_f64..0.5,
        ) {
            let mut f = [fw, 1.0 - fw - fg - fs, fg, fs];
            renormalize_fractions(&mut f);
            let once = f;
            renormalize_fractions(&mut f);
            prop_assert_eq!(f, once);
            prop_assert!(f.iter().take(3).all(|v| *v >= 0.0));
        }
    }
}
