//! Fully implicit black-oil model with standard wells.
//!
//! One [`BlackoilModel::nonlinear_iteration`] call assembles the mass
//! balance equations and the well equations, checks convergence, and when
//! not converged solves the well-reduced linear system and applies the
//! chopped update to the reservoir and well states.

use crate::convergence::{ConvergenceReport, ResidualSnapshot, evaluate_convergence};
use crate::discretization::Discretization;
use crate::error::{SolverError, SolverResult};
use crate::linear::{LinearSolveReport, LinearSolver, WellModelOperator};
use crate::nonlinear::{detect_oscillations, stabilize_nonlinear_update};
use crate::params::{ModelParameters, NonlinearSolverParameters};
use crate::reservoir::ReservoirState;
use crate::timer::SimulatorTimerInterface;
use crate::update::update_reservoir_state;
use nalgebra::DVector;
use rayon::prelude::*;
use rf_core::timing::Timer;
use rf_core::{
    BlockMatrix, Communicator, Eval, Phase, PhaseUsage, Real, RfError, SerialCommunicator,
    SimulatorReport,
};
use rf_fluids::{CellFluidState, FluidSystem};
use rf_wells::{
    ReservoirLinearization, ReservoirView, ScheduleLimits, ShutList, StandardWells,
    VfpProperties, WellCollection, WellState, Wells,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fluid in place of one region.
///
/// Volumes are surface volumes; `weighted_pressure` is the hydrocarbon pore
/// volume weighted average pressure, or the pore volume weighted one when
/// the region holds no hydrocarbons.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FluidInPlace {
    pub water: Real,
    pub oil: Real,
    pub gas: Real,
    pub dissolved_gas: Real,
    pub vaporized_oil: Real,
    pub pore_volume: Real,
    pub hydrocarbon_pore_volume: Real,
    pub weighted_pressure: Real,
}

/// Hydrocarbon pore volume below which a region counts as empty.
const MIN_HCPV: Real = 1.0e-10;

pub struct BlackoilModel {
    params: ModelParameters,
    fluid: Arc<dyn FluidSystem>,
    grid: Arc<dyn Discretization>,
    comm: Arc<dyn Communicator>,
    wells: StandardWells,
    linear_solver: Box<dyn LinearSolver>,
    econ_limits: Option<Box<dyn ScheduleLimits>>,
    phase_usage: PhaseUsage,

    jacobian: BlockMatrix,
    residual: DVector<Real>,
    cells: Vec<CellFluidState>,
    /// Accumulation terms at the start of the step, `num_eq` per cell.
    accumulation0: Vec<Real>,

    residual_norms_history: Vec<Vec<Real>>,
    current_relaxation: Real,
    dx_old: DVector<Real>,
    failure_report: SimulatorReport,
    shut_list: ShutList,
}

impl BlackoilModel {
    pub fn new(
        params: ModelParameters,
        fluid: Arc<dyn FluidSystem>,
        grid: Arc<dyn Discretization>,
        wells: Wells,
        collection: WellCollection,
        vfp: Arc<dyn VfpProperties>,
        linear_solver: Box<dyn LinearSolver>,
    ) -> SolverResult<Self> {
        let pu = fluid.phase_usage();
        let n_eq = pu.num_eq();
        let nc = grid.num_cells();
        let jacobian = BlockMatrix::from_pattern(nc, n_eq, n_eq, &grid.stencil())?;
        let wells = StandardWells::new(wells, collection, params.well_parameters(), pu, vfp, nc)?;
        Ok(Self {
            params,
            fluid,
            grid,
            comm: Arc::new(SerialCommunicator),
            wells,
            linear_solver,
            econ_limits: None,
            phase_usage: pu,
            jacobian,
            residual: DVector::zeros(nc * n_eq),
            cells: Vec::new(),
            accumulation0: vec![0.0; nc * n_eq],
            residual_norms_history: Vec::new(),
            current_relaxation: 1.0,
            dx_old: DVector::zeros(nc * n_eq),
            failure_report: SimulatorReport::default(),
            shut_list: ShutList::default(),
        })
    }

    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = comm;
        self
    }

    /// Evaluate economic limits from `limits` after every converged step.
    pub fn with_econ_limits(mut self, limits: Box<dyn ScheduleLimits>) -> Self {
        self.econ_limits = Some(limits);
        self
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    pub fn phase_usage(&self) -> PhaseUsage {
        self.phase_usage
    }

    pub fn fluid(&self) -> &dyn FluidSystem {
        self.fluid.as_ref()
    }

    pub fn well_model(&self) -> &StandardWells {
        &self.wells
    }

    pub fn terminal_output_enabled(&self) -> bool {
        self.params.terminal_output && self.comm.is_io_rank()
    }

    /// Reservoir residual after the well elimination of the last assembly.
    pub fn residual(&self) -> &DVector<Real> {
        &self.residual
    }

    pub fn jacobian(&self) -> &BlockMatrix {
        &self.jacobian
    }

    /// Statistics of the iterations of a failed nonlinear iteration.
    pub fn failure_report(&self) -> &SimulatorReport {
        &self.failure_report
    }

    /// Wells and connections closed by economic limits after the last step.
    pub fn shut_list(&self) -> &ShutList {
        &self.shut_list
    }

    pub fn initial_well_state(&self, state: &ReservoirState) -> WellState {
        WellState::new(self.wells.wells(), self.phase_usage, &state.pressure)
    }

    fn evaluate_cells(&self, state: &ReservoirState) -> SolverResult<Vec<CellFluidState>> {
        if state.num_cells() != self.grid.num_cells() {
            return Err(SolverError::InvalidConfig {
                what: format!(
                    "reservoir state of {} cells on a {}-cell grid",
                    state.num_cells(),
                    self.grid.num_cells()
                ),
            });
        }
        let fluid = self.fluid.as_ref();
        (0..state.num_cells())
            .into_par_iter()
            .map(|c| fluid.evaluate(c, &state.primary(c)).map_err(SolverError::from))
            .collect()
    }

    /// Store the accumulation terms of the start of the step.
    pub fn prepare_step(&mut self, state: &ReservoirState) -> SolverResult<()> {
        let cells = self.evaluate_cells(state)?;
        let pu = self.phase_usage;
        self.accumulation0 = cells
            .iter()
            .flat_map(|cell| accumulation(cell, pu))
            .map(|a| a.value())
            .collect();
        self.cells = cells;
        Ok(())
    }

    /// Linearize mass balance and well equations at the current state.
    ///
    /// The well contributions are eliminated from the residual; the
    /// Jacobian keeps only the reservoir part, the Schur complement is
    /// applied by [`WellModelOperator`].
    pub fn assemble(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        iteration: usize,
        state: &ReservoirState,
        ws: &mut WellState,
    ) -> SolverResult<SimulatorReport> {
        let dt = timer.current_step_length();
        let pu = self.phase_usage;
        let n_eq = pu.num_eq();

        self.cells = self.evaluate_cells(state)?;
        self.jacobian.zero_entries();
        self.residual.fill(0.0);

        // Accumulation
        let pore_volume = self.grid.pore_volume();
        for (c, cell) in self.cells.iter().enumerate() {
            let scale = pore_volume[c] / dt;
            let acc = accumulation(cell, pu);
            let block = self
                .jacobian
                .block_mut(c, c)
                .ok_or_else(|| {
                    SolverError::Core(RfError::IndexOob {
                        what: "diagonal Jacobian block",
                        index: c,
                        len: pore_volume.len(),
                    })
                })?;
            for (comp, a) in acc.iter().enumerate() {
                self.residual[c * n_eq + comp] +=
                    scale * (a.value() - self.accumulation0[c * n_eq + comp]);
                for pv in 0..n_eq {
                    block[(comp, pv)] += scale * a.derivative(pv);
                }
            }
        }

        // Flux
        self.grid
            .add_flux_terms(&self.cells, pu, &mut self.jacobian, &mut self.residual)?;

        // Wells
        let view = ReservoirView {
            cells: &self.cells,
            fluid: self.fluid.as_ref(),
            comm: self.comm.as_ref(),
            pore_volume,
            global_num_cells: self.grid.global_num_cells(),
        };
        if self.wells.collection().having_vrep_groups() {
            self.wells.update_rate_converter(&view);
        }
        let mut lin = ReservoirLinearization {
            jacobian: &mut self.jacobian,
            residual: &mut self.residual,
        };
        let report = self.wells.assemble(&view, Some(&mut lin), iteration, dt, ws)?;
        self.wells.apply_residual(&mut self.residual);
        Ok(report)
    }

    /// Convergence measures of the last assembly.
    pub fn get_convergence(
        &self,
        timer: &dyn SimulatorTimerInterface,
        iteration: usize,
    ) -> SolverResult<ConvergenceReport> {
        let snapshot = ResidualSnapshot {
            cells: &self.cells,
            residual: &self.residual,
            well_residual: self.wells.residual(),
            pore_volume: self.grid.pore_volume(),
            global_num_cells: self.grid.global_num_cells(),
            comm: self.comm.as_ref(),
            phase_usage: self.phase_usage,
        };
        let params = ModelParameters {
            terminal_output: self.terminal_output_enabled(),
            ..self.params.clone()
        };
        evaluate_convergence(&snapshot, timer.current_step_length(), iteration, &params)
    }

    /// Solve the reduced system for the reservoir increment and recover
    /// the well increment from it.
    pub fn solve_jacobian_system(
        &self,
    ) -> SolverResult<(DVector<Real>, DVector<Real>, LinearSolveReport)> {
        let op = WellModelOperator {
            matrix: &self.jacobian,
            wells: &self.wells,
        };
        let mut x = DVector::zeros(self.residual.len());
        let report = self.linear_solver.solve(&op, &mut x, &self.residual)?;
        if !report.converged {
            return Err(SolverError::LinearSolverProblem {
                what: format!(
                    "{} did not converge in {} iterations",
                    self.linear_solver.name(),
                    report.iterations
                ),
            });
        }
        let xw = if self.wells.wells_active() {
            self.wells.recover_variable(&x)
        } else {
            DVector::zeros(0)
        };
        Ok((x, xw, report))
    }

    /// One Newton iteration; `iteration` is 0 for the first call of a step.
    pub fn nonlinear_iteration(
        &mut self,
        iteration: usize,
        timer: &dyn SimulatorTimerInterface,
        solver: &NonlinearSolverParameters,
        state: &mut ReservoirState,
        ws: &mut WellState,
    ) -> SolverResult<SimulatorReport> {
        let mut report = SimulatorReport::default();
        self.failure_report = SimulatorReport::default();

        if iteration == 0 {
            self.residual_norms_history.clear();
            self.current_relaxation = 1.0;
            self.dx_old.fill(0.0);
        }

        report.total_linearizations = 1;

        let perf_timer = Timer::start();
        match self.assemble(timer, iteration, state, ws) {
            Ok(r) => {
                report += r;
                report.assemble_time += perf_timer.stop();
            }
            Err(e) => {
                report.assemble_time += perf_timer.stop();
                self.failure_report += &report;
                return Err(e);
            }
        }

        let perf_timer = Timer::start();
        let convergence = match self.get_convergence(timer, iteration) {
            Ok(c) => c,
            Err(e) => {
                report.update_time += perf_timer.stop();
                self.failure_report += &report;
                return Err(e);
            }
        };
        // Not converged before min_iter iterations are done.
        report.converged = convergence.converged && iteration > solver.min_iter;
        if self.wells.collection().group_control_active() {
            report.converged =
                report.converged && self.wells.collection().group_target_converged(&ws.well_rates);
        }
        report.update_time += perf_timer.stop();
        self.residual_norms_history.push(convergence.cnv);

        if report.converged {
            return Ok(report);
        }

        report.total_newton_iterations = 1;
        let perf_timer = Timer::start();
        let (mut dx, dxw) = match self.solve_jacobian_system() {
            Ok((dx, dxw, lin)) => {
                report.linear_solve_time += perf_timer.stop();
                report.total_linear_iterations += lin.iterations;
                debug!(iterations = lin.iterations, "linear solve");
                (dx, dxw)
            }
            Err(e) => {
                report.linear_solve_time += perf_timer.stop();
                self.failure_report += &report;
                return Err(e);
            }
        };

        let perf_timer = Timer::start();
        let (oscillate, _stagnate) =
            detect_oscillations(&self.residual_norms_history, iteration, solver.relax_rel_tol);
        if oscillate {
            self.current_relaxation =
                (self.current_relaxation - solver.relax_increment).max(solver.relax_max);
            if self.terminal_output_enabled() {
                info!(
                    "    Oscillating behavior detected: Relaxation set to {}",
                    self.current_relaxation
                );
            }
        }
        stabilize_nonlinear_update(
            &mut dx,
            &mut self.dx_old,
            self.current_relaxation,
            solver.relax_type,
        );

        update_reservoir_state(&dx, state, self.phase_usage, self.fluid.pvt(), &self.params);
        if let Err(e) = self.wells.update_well_state(&dxw, ws) {
            report.update_time += perf_timer.stop();
            self.failure_report += &report;
            return Err(e.into());
        }
        report.update_time += perf_timer.stop();

        Ok(report)
    }

    /// Evaluate economic limits after a converged step.
    pub fn after_step(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        _state: &ReservoirState,
        ws: &WellState,
    ) {
        let Some(limits) = self.econ_limits.as_deref() else {
            return;
        };
        let mut list = ShutList::default();
        self.wells
            .update_list_econ_limited(limits, timer.report_step_num(), ws, &mut list);
        for well in &list.shut_wells {
            warn!("well {well} will be shut due to economic limits");
        }
        for well in &list.stopped_wells {
            warn!("well {well} will be stopped due to economic limits");
        }
        for (well, cell) in &list.closed_connections {
            warn!("connection to cell {cell} of well {well} will be closed due to economic limits");
        }
        self.shut_list = list;
    }

    /// Squared-norm ratio `‖u_prev − u‖² / ‖u‖²` over pressures and
    /// saturations, 0 for a zero state.
    pub fn relative_change(&self, previous: &ReservoirState, current: &ReservoirState) -> Real {
        let diff = |a: &[Real], b: &[Real]| -> Real {
            a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
        };
        let norm = |a: &[Real]| -> Real { a.iter().map(|x| x * x).sum() };

        let mut sums = [
            diff(&previous.pressure, &current.pressure) + diff(&previous.saturation, &current.saturation),
            norm(&current.pressure) + norm(&current.saturation),
        ];
        self.comm.sum(&mut sums);
        let [state_old, state_new] = sums;
        if state_new > 0.0 {
            state_old / state_new
        } else {
            0.0
        }
    }

    /// Fluid in place per region of `fipnum` (1-based; cells with a region
    /// below 1 are skipped).
    pub fn compute_fluid_in_place(
        &self,
        state: &ReservoirState,
        fipnum: &[i32],
    ) -> SolverResult<Vec<FluidInPlace>> {
        if fipnum.len() != state.num_cells() {
            return Err(SolverError::InvalidConfig {
                what: format!(
                    "{} region indices for {} cells",
                    fipnum.len(),
                    state.num_cells()
                ),
            });
        }
        let cells = self.evaluate_cells(state)?;
        let pore_volume = self.grid.pore_volume();
        let local_max = fipnum.iter().copied().max().unwrap_or(0).max(0);
        let num_regions = self.comm.max_scalar(local_max as Real) as usize;

        let region_of = |c: usize| usize::try_from(fipnum[c] - 1).ok();
        let hydrocarbon =
            |cell: &CellFluidState| (cell.saturation_of(Phase::Oil) + cell.saturation_of(Phase::Gas)).value();

        let mut tpv = vec![0.0; num_regions];
        let mut hcpv = vec![0.0; num_regions];
        for (c, cell) in cells.iter().enumerate() {
            if let Some(r) = region_of(c) {
                tpv[r] += pore_volume[c];
                hcpv[r] += pore_volume[c] * hydrocarbon(cell);
            }
        }
        self.comm.sum(&mut tpv);
        self.comm.sum(&mut hcpv);

        let mut values = vec![[0.0; 7]; num_regions];
        for (c, cell) in cells.iter().enumerate() {
            let Some(r) = region_of(c) else {
                continue;
            };
            let pv = pore_volume[c];
            let phase_volume =
                |p: Phase| cell.inv_b_of(p).value() * cell.saturation_of(p).value() * pv;
            let water = phase_volume(Phase::Water);
            let oil = phase_volume(Phase::Oil);
            let gas = phase_volume(Phase::Gas);
            let pressure = cell.pressure.value();
            let weighted_pressure = if hcpv[r] > MIN_HCPV {
                pv * pressure * hydrocarbon(cell) / hcpv[r]
            } else {
                pv * pressure / tpv[r]
            };
            let v = &mut values[r];
            v[0] += water;
            v[1] += oil;
            v[2] += gas;
            v[3] += cell.rs.value() * oil;
            v[4] += cell.rv.value() * gas;
            v[5] += pv;
            v[6] += weighted_pressure;
        }
        for v in &mut values {
            self.comm.sum(v);
        }

        Ok(values
            .iter()
            .zip(&hcpv)
            .map(|(v, &hc)| FluidInPlace {
                water: v[0],
                oil: v[1],
                gas: v[2],
                dissolved_gas: v[3],
                vaporized_oil: v[4],
                pore_volume: v[5],
                hydrocarbon_pore_volume: hc,
                weighted_pressure: v[6],
            })
            .collect())
    }

    /// Well potentials at the current state, three phases per well.
    pub fn compute_well_potentials(
        &self,
        state: &ReservoirState,
        ws: &WellState,
    ) -> SolverResult<Vec<Real>> {
        let cells = self.evaluate_cells(state)?;
        let view = ReservoirView {
            cells: &cells,
            fluid: self.fluid.as_ref(),
            comm: self.comm.as_ref(),
            pore_volume: self.grid.pore_volume(),
            global_num_cells: self.grid.global_num_cells(),
        };
        self.wells
            .compute_well_potentials(&view, ws)
            .map_err(SolverError::from)
    }
}

/// Surface volume of each component per unit pore volume.
fn accumulation(cell: &CellFluidState, pu: PhaseUsage) -> Vec<Eval> {
    let w = Phase::Water.index();
    let o = Phase::Oil.index();
    let g = Phase::Gas.index();
    let water = cell.inv_b[w] * cell.saturation[w];
    let oil = cell.inv_b[o] * cell.saturation[o];
    let gas = cell.inv_b[g] * cell.saturation[g];

    let mut acc = vec![Eval::constant(0.0); pu.num_eq()];
    acc[w] = water;
    acc[o] = oil + cell.rv * gas;
    acc[g] = gas + cell.rs * oil;
    if let Some(si) = pu.solvent_index() {
        acc[si] = cell.solvent_inv_b * cell.solvent_saturation;
    }
    if let Some(pi) = pu.polymer_index() {
        acc[pi] = cell.polymer_concentration * water;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::TwoPointFlux;
    use crate::linear::DenseLu;
    use crate::timer::FixedStep;
    use rf_fluids::SimpleBlackOil;
    use rf_wells::VfpTables;

    fn closed_model(nc: usize) -> (BlackoilModel, ReservoirState) {
        let fluid = Arc::new(SimpleBlackOil::default());
        let grid = Arc::new(TwoPointFlux::line(nc, 1000.0, 1.0e-12).unwrap());
        let wells = Wells::new(Vec::new()).unwrap();
        let collection = WellCollection::ungrouped(&wells);
        let state = ReservoirState::uniform(nc, 2.0e7, 0.3, 0.1, fluid.as_ref());
        let params = ModelParameters {
            terminal_output: false,
            ..Default::default()
        };
        let model = BlackoilModel::new(
            params,
            fluid,
            grid,
            wells,
            collection,
            Arc::new(VfpTables::new()),
            Box::new(DenseLu),
        )
        .unwrap();
        (model, state)
    }

    #[test]
    fn equilibrium_state_has_zero_residual() {
        let (mut model, state) = closed_model(3);
        let mut ws = model.initial_well_state(&state);
        model.prepare_step(&state).unwrap();
        let timer = FixedStep::new(86_400.0);
        model.assemble(&timer, 0, &state, &mut ws).unwrap();
        assert!(model.residual().amax() < 1e-12);
        let conv = model.get_convergence(&timer, 0).unwrap();
        assert!(conv.converged);
    }

    #[test]
    fn accumulation_jacobian_matches_finite_difference() {
        let (mut model, state) = closed_model(1);
        let mut ws = model.initial_well_state(&state);
        model.prepare_step(&state).unwrap();
        let timer = FixedStep::new(86_400.0);

        let h = 1.0e-6;
        let mut perturbed = state.clone();
        perturbed.set_saturation(0, Phase::Water, 0.3 + h);
        perturbed.set_saturation(0, Phase::Oil, 0.6 - h);
        model.assemble(&timer, 0, &perturbed, &mut ws).unwrap();
        let r1 = model.residual().clone();
        model.assemble(&timer, 0, &state, &mut ws).unwrap();
        let r0 = model.residual().clone();
        let block = model.jacobian().block(0, 0).unwrap().clone();

        for comp in 0..3 {
            let fd = (r1[comp] - r0[comp]) / h;
            let ad = block[(comp, 1)];
            assert!((fd - ad).abs() <= 1e-5 * ad.abs().max(1e-12), "{comp}: {fd} vs {ad}");
        }
    }

    #[test]
    fn relative_change_of_identical_states_is_zero() {
        let (model, state) = closed_model(2);
        assert_eq!(model.relative_change(&state, &state), 0.0);
        let mut moved = state.clone();
        moved.pressure[0] *= 1.1;
        assert!(model.relative_change(&state, &moved) > 0.0);
    }

    #[test]
    fn fluid_in_place_per_region() {
        let (model, state) = closed_model(3);
        let fip = model.compute_fluid_in_place(&state, &[1, 2, 0]).unwrap();
        assert_eq!(fip.len(), 2);
        assert_eq!(fip[0].pore_volume, 1000.0);
        assert_eq!(fip[1].pore_volume, 1000.0);
        assert!((fip[0].hydrocarbon_pore_volume - 700.0).abs() < 1e-9);
        assert!((fip[0].weighted_pressure - 2.0e7).abs() < 1e-3);

        let cell = &model.evaluate_cells(&state).unwrap()[0];
        let oil = cell.inv_b[1].value() * 0.6 * 1000.0;
        assert!((fip[0].oil - oil).abs() < 1e-9);
        assert!((fip[0].dissolved_gas - cell.rs.value() * oil).abs() < 1e-6);
    }

    #[test]
    fn fluid_in_place_rejects_mismatched_regions() {
        let (model, state) = closed_model(3);
        let err = model.compute_fluid_in_place(&state, &[1, 1]).unwrap_err();
        assert!(matches!(err, SolverError::InvalidConfig { .. }));
    }
}
