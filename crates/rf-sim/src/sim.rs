//! Schedule runner and per-report-step records.

use crate::adaptive::{AdaptiveTimeStepping, SubstepSolver};
use crate::error::SimResult;
use crate::output::OutputWriter;
use crate::timer::SimulatorTimer;
use rf_core::{Real, SimulatorReport, timing::Timer};
use rf_solver::{ReservoirState, SimulatorTimerInterface};
use rf_wells::WellState;
use tracing::info;

/// Options for a schedule run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Report steps flagged with a schedule event (0-based).
    pub events: Vec<usize>,
    /// Region map handed to the output writer.
    pub fipnum: Option<Vec<i32>>,
}

/// Record of a schedule run.
#[derive(Clone, Debug, Default)]
pub struct RunRecord {
    /// Simulation time at the end of each report step (s).
    pub t: Vec<Real>,
    /// Statistics of each report step.
    pub reports: Vec<SimulatorReport>,
    /// Substep restarts of each report step.
    pub restarts: Vec<usize>,
    pub total: SimulatorReport,
}

/// Advance through every remaining report step of `timer`.
///
/// The output writer, when given, sees intermediate substeps and the end
/// of every report step.
pub fn run_schedule<S, W>(
    stepping: &mut AdaptiveTimeStepping,
    timer: &mut SimulatorTimer,
    solver: &mut S,
    state: &mut ReservoirState,
    well_state: &mut WellState,
    opts: &RunOptions,
    mut output: Option<&mut W>,
) -> SimResult<RunRecord>
where
    S: SubstepSolver,
    W: OutputWriter + ?Sized,
{
    let mut record = RunRecord::default();
    let fipnum = opts.fipnum.as_deref();

    while !timer.done() {
        let step = timer.report_step_num();
        let event = opts.events.contains(&step);
        let wall = Timer::start();
        let mut report = stepping.step(
            &*timer,
            solver,
            state,
            well_state,
            event,
            output.as_deref_mut(),
            fipnum,
        )?;
        report.total_time += wall.stop();
        timer.advance();

        if let Some(out) = output.as_deref_mut() {
            let fip = fipnum
                .map(|f| solver.compute_fluid_in_place(state, f))
                .transpose()?;
            let t = Timer::start();
            out.write_timestep(&*timer, state, well_state, false, fip.as_deref())?;
            report.output_write_time += t.stop();
        }

        info!(
            report_step = step,
            newton = report.total_newton_iterations,
            restarts = stepping.restarts(),
            "report step done"
        );
        record.total += &report;
        record.t.push(timer.simulation_time_elapsed());
        record.restarts.push(stepping.restarts());
        record.reports.push(report);
    }
    record.total.converged = true;
    Ok(record)
}
