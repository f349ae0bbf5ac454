//! What the nonlinear driver needs to know about simulated time.

use rf_core::Real;

pub trait SimulatorTimerInterface {
    /// Index of the current (sub)step, counted from 0.
    fn current_step_num(&self) -> usize;

    /// Index of the report step the current step belongs to.
    fn report_step_num(&self) -> usize;

    /// Length of the current step (s).
    fn current_step_length(&self) -> Real;

    /// Time elapsed since the start of the simulation (s).
    fn simulation_time_elapsed(&self) -> Real;

    /// Whether the previous attempt at this step failed.
    fn last_step_failed(&self) -> bool {
        false
    }
}

/// A single step of fixed length, for driving the solver directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedStep {
    pub step_length: Real,
    pub elapsed: Real,
    pub report_step: usize,
}

impl FixedStep {
    pub fn new(step_length: Real) -> Self {
        Self {
            step_length,
            elapsed: 0.0,
            report_step: 0,
        }
    }
}

impl SimulatorTimerInterface for FixedStep {
    fn current_step_num(&self) -> usize {
        self.report_step
    }

    fn report_step_num(&self) -> usize {
        self.report_step
    }

    fn current_step_length(&self) -> Real {
        self.step_length
    }

    fn simulation_time_elapsed(&self) -> Real {
        self.elapsed
    }
}
