//! Substep loop over one report step, with restarts on solver failure.

use crate::error::{SimError, SimResult};
use crate::output::OutputWriter;
use crate::params::{AdaptiveTimeSteppingParams, Tuning};
use crate::step_control::TimeStepControl;
use crate::timer::AdaptiveSimulatorTimer;
use rf_core::{Real, SimulatorReport, days_to_seconds, timing::Timer, to_days};
use rf_solver::{
    FluidInPlace, NonlinearSolver, ReservoirState, SimulatorTimerInterface, SolverError,
    SolverResult,
};
use rf_wells::WellState;
use tracing::{debug, error, info, warn};

/// What the controller needs from the nonlinear solver.
pub trait SubstepSolver {
    /// Solve one substep of length `timer.current_step_length()`.
    fn step(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        state: &mut ReservoirState,
        well_state: &mut WellState,
    ) -> SolverResult<SimulatorReport>;

    /// Statistics of the last failed step.
    fn failure_report(&self) -> &SimulatorReport;

    fn relative_change(&self, previous: &ReservoirState, current: &ReservoirState) -> Real;

    fn compute_fluid_in_place(
        &self,
        state: &ReservoirState,
        fipnum: &[i32],
    ) -> SolverResult<Vec<FluidInPlace>>;
}

impl SubstepSolver for NonlinearSolver {
    fn step(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        state: &mut ReservoirState,
        well_state: &mut WellState,
    ) -> SolverResult<SimulatorReport> {
        NonlinearSolver::step(self, timer, state, well_state)
    }

    fn failure_report(&self) -> &SimulatorReport {
        NonlinearSolver::failure_report(self)
    }

    fn relative_change(&self, previous: &ReservoirState, current: &ReservoirState) -> Real {
        self.model().relative_change(previous, current)
    }

    fn compute_fluid_in_place(
        &self,
        state: &ReservoirState,
        fipnum: &[i32],
    ) -> SolverResult<Vec<FluidInPlace>> {
        self.model().compute_fluid_in_place(state, fipnum)
    }
}

fn cause_of_failure(e: &SolverError) -> &'static str {
    match e {
        SolverError::TooManyIterations { .. } => {
            "Solver convergence failure - Iteration limit reached"
        }
        SolverError::LinearSolverProblem { .. } => "Linear solver convergence failure",
        SolverError::NumericalProblem { .. } => {
            "Solver convergence failure - Numerical problem encountered"
        }
        _ => "Solver convergence failure",
    }
}

/// Adaptive substepping of report steps.
///
/// Each report step is split into substeps whose length follows the
/// step-size policy. A failed substep is retried from the last converged
/// state with a shorter step, at most `solver_restart_max` times in a row.
#[derive(Clone, Debug)]
pub struct AdaptiveTimeStepping {
    control: TimeStepControl,
    restart_factor: Real,
    growth_factor: Real,
    max_growth: Real,
    max_time_step: Real,
    min_time_step: Real,
    solver_restart_max: usize,
    solver_verbose: bool,
    timestep_verbose: bool,
    suggested_next_timestep: Real,
    full_timestep_initially: bool,
    timestep_after_event: Real,
    use_newton_iteration: bool,
    failure_report: SimulatorReport,
    restarts: usize,
}

impl AdaptiveTimeStepping {
    pub fn new(params: &AdaptiveTimeSteppingParams, terminal_output: bool) -> SimResult<Self> {
        if !(params.restart_factor > 0.0 && params.restart_factor < 1.0) {
            return Err(SimError::InvalidConfig {
                what: format!("restart factor must lie in (0, 1), got {}", params.restart_factor),
            });
        }
        if !(params.growth_factor >= 1.0) {
            return Err(SimError::InvalidConfig {
                what: format!("growth factor must be at least 1, got {}", params.growth_factor),
            });
        }
        if !(params.max_growth >= 1.0) {
            return Err(SimError::InvalidConfig {
                what: format!("max growth must be at least 1, got {}", params.max_growth),
            });
        }
        if !(params.max_time_step_days > 0.0 && params.min_time_step_days >= 0.0) {
            return Err(SimError::InvalidConfig {
                what: "time step bounds must be positive".into(),
            });
        }
        let (control, use_newton_iteration) = params.time_step_control()?;
        let seconds = |d: Real| if d > 0.0 { days_to_seconds(d) } else { d };

        Ok(Self {
            control,
            restart_factor: params.restart_factor,
            growth_factor: params.growth_factor,
            max_growth: params.max_growth,
            max_time_step: days_to_seconds(params.max_time_step_days),
            min_time_step: days_to_seconds(params.min_time_step_days),
            solver_restart_max: params.solver_restart_max,
            solver_verbose: params.solver_verbose && terminal_output,
            timestep_verbose: params.timestep_verbose && terminal_output,
            suggested_next_timestep: seconds(params.initial_timestep_days),
            full_timestep_initially: params.full_timestep_initially,
            timestep_after_event: seconds(params.timestep_after_event_days),
            use_newton_iteration,
            failure_report: SimulatorReport::default(),
            restarts: 0,
        })
    }

    /// Controller for a report step with schedule overrides.
    pub fn from_tuning(
        tuning: &Tuning,
        params: &AdaptiveTimeSteppingParams,
        terminal_output: bool,
    ) -> SimResult<Self> {
        Self::new(&tuning.apply(params), terminal_output)
    }

    /// Advance `state` and `well_state` over the current report step of
    /// `timer`.
    ///
    /// `event` selects the after-event initial step length. When `output`
    /// is given it receives every converged substep except the last one,
    /// together with the fluid in place per `fipnum` region if supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn step<S, W>(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        solver: &mut S,
        state: &mut ReservoirState,
        well_state: &mut WellState,
        event: bool,
        mut output: Option<&mut W>,
        fipnum: Option<&[i32]>,
    ) -> SimResult<SimulatorReport>
    where
        S: SubstepSolver,
        W: OutputWriter + ?Sized,
    {
        let mut report = SimulatorReport::default();
        let timestep = timer.current_step_length();

        if self.suggested_next_timestep < 0.0 {
            self.suggested_next_timestep = self.restart_factor * timestep;
        }
        if self.full_timestep_initially {
            self.suggested_next_timestep = timestep;
        }
        if event && self.timestep_after_event > 0.0 {
            self.suggested_next_timestep = self.timestep_after_event;
        }

        let mut substep_timer =
            AdaptiveSimulatorTimer::new(timer, self.suggested_next_timestep, self.max_time_step);

        let mut last_state = state.clone();
        let mut last_well_state = well_state.clone();

        self.failure_report = SimulatorReport::default();
        self.restarts = 0;
        let mut restarts = 0;

        while !substep_timer.done() {
            let dt = substep_timer.current_step_length();
            if self.timestep_verbose {
                info!(
                    "  Substep {}, stepsize {} days.",
                    substep_timer.current_step_num(),
                    to_days(dt)
                );
            }

            let mut cause = "";
            let substep_report = match solver.step(&substep_timer, state, well_state) {
                Ok(r) => {
                    report += &r;
                    if self.solver_verbose {
                        info!("Overall linear iterations used: {}", r.total_linear_iterations);
                    }
                    r
                }
                Err(e) if e.is_recoverable() => {
                    if self.solver_verbose {
                        debug!("Caught Exception: {e}");
                    }
                    cause = cause_of_failure(&e);
                    let mut r = SimulatorReport::default();
                    r += solver.failure_report();
                    r
                }
                Err(e) => return Err(e.into()),
            };

            if substep_report.converged {
                substep_timer.advance();

                let iterations = if self.use_newton_iteration {
                    substep_report.total_newton_iterations
                } else {
                    substep_report.total_linear_iterations
                };
                let current: &ReservoirState = state;
                let relative_change = || solver.relative_change(&last_state, current);
                let mut dt_estimate = self.control.compute_next_step_size(
                    dt,
                    iterations,
                    &relative_change,
                    substep_timer.simulation_time_elapsed(),
                );

                // Real::min maps a NaN estimate to the bound.
                let max_dt = self.max_growth * dt;
                dt_estimate = dt_estimate.min(max_dt).max(self.min_time_step.min(max_dt));
                if restarts > 0 {
                    dt_estimate = dt_estimate.min(self.growth_factor * dt);
                    restarts = 0;
                }

                if self.timestep_verbose {
                    let well_its = if substep_report.total_well_iterations != 0 {
                        format!("well its = {:2}, ", substep_report.total_well_iterations)
                    } else {
                        String::new()
                    };
                    info!(
                        "    Substep summary: {well_its}newton its = {:2}, linearizations = {:2} ({:6.3} sec), linear its = {:3} ({:6.3} sec)",
                        substep_report.total_newton_iterations,
                        substep_report.total_linearizations,
                        substep_report.assemble_time,
                        substep_report.total_linear_iterations,
                        substep_report.linear_solve_time
                    );
                }

                if let Some(out) = output.as_deref_mut()
                    && !substep_timer.done()
                {
                    let fip = fipnum
                        .map(|f| solver.compute_fluid_in_place(state, f))
                        .transpose()?;
                    let t = Timer::start();
                    out.write_timestep(&substep_timer, state, well_state, true, fip.as_deref())?;
                    report.output_write_time += t.stop();
                }

                substep_timer.provide_time_step_estimate(dt_estimate);

                last_state.clone_from(state);
                last_well_state.clone_from(well_state);

                report.converged = substep_timer.done();
                substep_timer.set_last_step_failed(false);
            } else {
                substep_timer.set_last_step_failed(true);
                self.failure_report += &substep_report;

                if restarts >= self.solver_restart_max {
                    let e = SimError::RestartsExhausted { restarts };
                    if self.solver_verbose {
                        error!("{e}");
                    }
                    return Err(e);
                }

                substep_timer.provide_time_step_estimate(self.restart_factor * dt);
                if self.solver_verbose {
                    warn!(
                        "{cause}\nTimestep chopped to {} days",
                        to_days(substep_timer.current_step_length())
                    );
                }

                state.clone_from(&last_state);
                well_state.clone_from(&last_well_state);

                restarts += 1;
                self.restarts += 1;
            }
        }

        self.suggested_next_timestep = substep_timer.current_step_length();
        if self.timestep_verbose {
            info!(
                "{}Suggested next step size = {} (days)",
                substep_timer.report(),
                to_days(self.suggested_next_timestep)
            );
        }
        if !self.suggested_next_timestep.is_finite() {
            self.suggested_next_timestep = timestep;
        }
        Ok(report)
    }

    /// Seed of the first substep of the next report step (s).
    pub fn suggested_next_timestep(&self) -> Real {
        self.suggested_next_timestep
    }

    pub fn set_suggested_next_timestep(&mut self, dt: Real) {
        self.suggested_next_timestep = dt;
    }

    /// Statistics of the failed substeps of the last report step.
    pub fn failure_report(&self) -> &SimulatorReport {
        &self.failure_report
    }

    /// Failed substeps in the last report step.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn time_step_control(&self) -> &TimeStepControl {
        &self.control
    }

    pub fn max_time_step(&self) -> Real {
        self.max_time_step
    }
}
