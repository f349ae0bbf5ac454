//! Report-step schedule and the substep timer used inside one report step.

use crate::error::{SimError, SimResult};
use rf_core::{Real, units::to_days};
use rf_solver::SimulatorTimerInterface;
use std::fmt::Write as _;

/// Remaining time within this fraction of a step is taken in one go.
const SNAP_FRACTION: Real = 1.05;
/// Remaining time within this fraction of a step is split in two halves.
const HALVE_FRACTION: Real = 1.5;

/// Sequence of report steps.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatorTimer {
    steps: Vec<Real>,
    current_step: usize,
    current_time: Real,
    start_time: Real,
}

impl SimulatorTimer {
    /// Schedule of report step lengths (s), starting at `start_time`.
    pub fn new(steps: Vec<Real>, start_time: Real) -> SimResult<Self> {
        if let Some(bad) = steps.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(SimError::InvalidConfig {
                what: format!("report step length must be positive, got {bad}"),
            });
        }
        Ok(Self {
            steps,
            current_step: 0,
            current_time: start_time,
            start_time,
        })
    }

    /// Schedule of `n` report steps of equal length.
    pub fn uniform(n: usize, step_length: Real) -> SimResult<Self> {
        Self::new(vec![step_length; n], 0.0)
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn total_time(&self) -> Real {
        self.start_time + self.steps.iter().sum::<Real>()
    }

    /// Move on to the next report step.
    pub fn advance(&mut self) {
        if let Some(dt) = self.steps.get(self.current_step) {
            self.current_time += dt;
            self.current_step += 1;
        }
    }

    pub fn done(&self) -> bool {
        self.current_step >= self.steps.len()
    }
}

impl SimulatorTimerInterface for SimulatorTimer {
    fn current_step_num(&self) -> usize {
        self.current_step
    }

    fn report_step_num(&self) -> usize {
        self.current_step
    }

    fn current_step_length(&self) -> Real {
        self.steps.get(self.current_step).copied().unwrap_or(0.0)
    }

    fn simulation_time_elapsed(&self) -> Real {
        self.current_time
    }
}

/// Substep timer covering one report step.
///
/// The step length is proposed from outside through
/// [`provide_time_step_estimate`](Self::provide_time_step_estimate) and
/// adjusted so that the report step is never overshot and never ends with
/// a tiny remainder.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveSimulatorTimer {
    start_time: Real,
    total_time: Real,
    report_step: usize,
    max_time_step: Real,
    current_time: Real,
    dt: Real,
    current_step: usize,
    steps: Vec<Real>,
    last_step_failed: bool,
}

impl AdaptiveSimulatorTimer {
    /// Substep timer for the current step of `timer`, seeded with the last
    /// step length taken.
    pub fn new(
        timer: &dyn SimulatorTimerInterface,
        last_step_taken: Real,
        max_time_step: Real,
    ) -> Self {
        let start_time = timer.simulation_time_elapsed();
        let mut t = Self {
            start_time,
            total_time: start_time + timer.current_step_length(),
            report_step: timer.report_step_num(),
            max_time_step,
            current_time: start_time,
            dt: 0.0,
            current_step: 0,
            steps: Vec::with_capacity(10),
            last_step_failed: false,
        };
        t.provide_time_step_estimate(last_step_taken);
        t
    }

    /// Set the next step length from `dt_estimate`, bounded by the max step
    /// and the remaining time.
    pub fn provide_time_step_estimate(&mut self, dt_estimate: Real) {
        let remaining = self.total_time - self.current_time;
        self.dt = dt_estimate.min(self.max_time_step);

        if remaining > 0.0 {
            if SNAP_FRACTION * self.dt > remaining {
                self.dt = remaining;
                if self.dt > self.max_time_step {
                    self.dt = 0.5 * remaining;
                }
                return;
            }
            if HALVE_FRACTION * self.dt > remaining {
                self.dt = 0.5 * remaining;
            }
        }
    }

    /// Accept the current step.
    pub fn advance(&mut self) {
        self.current_step += 1;
        self.steps.push(self.dt);
        if self.dt >= self.total_time - self.current_time {
            self.current_time = self.total_time;
        } else {
            self.current_time += self.dt;
        }
    }

    pub fn done(&self) -> bool {
        self.current_time >= self.total_time
    }

    pub fn total_time(&self) -> Real {
        self.total_time
    }

    pub fn max_time_step(&self) -> Real {
        self.max_time_step
    }

    pub fn set_last_step_failed(&mut self, failed: bool) {
        self.last_step_failed = failed;
    }

    /// Lengths of the accepted substeps.
    pub fn steps(&self) -> &[Real] {
        &self.steps
    }

    pub fn average_step_length(&self) -> Real {
        if self.steps.is_empty() {
            0.0
        } else {
            self.steps.iter().sum::<Real>() / self.steps.len() as Real
        }
    }

    pub fn max_step_length(&self) -> Real {
        self.steps.iter().copied().fold(0.0, Real::max)
    }

    pub fn min_step_length(&self) -> Real {
        self.steps.iter().copied().reduce(Real::min).unwrap_or(0.0)
    }

    /// Summary of the accepted substeps, in days.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Sub steps started at time = {} (days)",
            to_days(self.start_time)
        );
        for (i, dt) in self.steps.iter().enumerate() {
            let _ = writeln!(out, " step[ {i} ] = {} (days)", to_days(*dt));
        }
        let _ = writeln!(
            out,
            "sub steps end time = {} (days)",
            to_days(self.current_time)
        );
        out
    }
}

impl SimulatorTimerInterface for AdaptiveSimulatorTimer {
    fn current_step_num(&self) -> usize {
        self.current_step
    }

    fn report_step_num(&self) -> usize {
        self.report_step
    }

    fn current_step_length(&self) -> Real {
        self.dt
    }

    fn simulation_time_elapsed(&self) -> Real {
        self.current_time
    }

    fn last_step_failed(&self) -> bool {
        self.last_step_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_step(length: Real) -> SimulatorTimer {
        SimulatorTimer::uniform(1, length).unwrap()
    }

    #[test]
    fn schedule_advances_through_report_steps() {
        let mut t = SimulatorTimer::new(vec![10.0, 20.0], 5.0).unwrap();
        assert_eq!(t.current_step_length(), 10.0);
        t.advance();
        assert_eq!(t.report_step_num(), 1);
        assert_eq!(t.simulation_time_elapsed(), 15.0);
        assert_eq!(t.current_step_length(), 20.0);
        t.advance();
        assert!(t.done());
        assert_eq!(t.total_time(), 35.0);
    }

    #[test]
    fn non_positive_report_step_is_rejected() {
        assert!(SimulatorTimer::new(vec![1.0, 0.0], 0.0).is_err());
        assert!(SimulatorTimer::new(vec![Real::NAN], 0.0).is_err());
    }

    #[test]
    fn estimate_is_capped_by_max_step() {
        let t = AdaptiveSimulatorTimer::new(&report_step(100.0), 50.0, 10.0);
        assert_eq!(t.current_step_length(), 10.0);
    }

    #[test]
    fn nearly_remaining_step_snaps_to_remaining() {
        let t = AdaptiveSimulatorTimer::new(&report_step(100.0), 97.0, 1000.0);
        assert_eq!(t.current_step_length(), 100.0);
    }

    #[test]
    fn large_fraction_of_remaining_is_halved() {
        let t = AdaptiveSimulatorTimer::new(&report_step(100.0), 70.0, 1000.0);
        assert_eq!(t.current_step_length(), 50.0);
    }

    #[test]
    fn advancing_reaches_end_exactly() {
        let mut t = AdaptiveSimulatorTimer::new(&report_step(1.0), 0.3, 1.0);
        let mut n = 0;
        while !t.done() {
            t.advance();
            let dt = t.current_step_length();
            t.provide_time_step_estimate(dt);
            n += 1;
            assert!(n < 10);
        }
        assert_eq!(t.simulation_time_elapsed(), 1.0);
        assert!((t.steps().iter().sum::<Real>() - 1.0).abs() < 1e-15);
        assert_eq!(t.current_step_num(), t.steps().len());
    }

    #[test]
    fn report_lists_every_substep() {
        let mut t = AdaptiveSimulatorTimer::new(&report_step(86_400.0), 86_400.0, 1.0e9);
        t.advance();
        let report = t.report();
        assert!(report.starts_with("Sub steps started at time = 0 (days)"));
        assert!(report.contains(" step[ 0 ] = "));
        assert!(!report.contains(" step[ 1 ] = "));
        assert!(report.contains("sub steps end time = "));
    }
}
