//! Step-size policies proposing the next substep length.

use crate::error::{SimError, SimResult};
use rf_core::{Real, days_to_seconds};
use std::path::Path;

/// Floor on the stored relative change; keeps the PID ratios finite.
const MIN_ERROR: Real = 1.0e-30;

// PID gains on the relative solution change.
const K_P: Real = 0.075;
const K_I: Real = 0.175;
const K_D: Real = 0.01;

/// PID control on the relative solution change.
#[derive(Clone, Debug, PartialEq)]
pub struct PidControl {
    tol: Real,
    errors: [Real; 3],
}

impl PidControl {
    pub fn new(tol: Real) -> Self {
        Self {
            tol,
            errors: [tol; 3],
        }
    }

    pub fn tolerance(&self) -> Real {
        self.tol
    }

    fn compute(&mut self, dt: Real, relative_change: &dyn Fn() -> Real) -> Real {
        self.errors.rotate_left(1);
        let error = relative_change().max(MIN_ERROR);
        self.errors[2] = error;

        if error > self.tol {
            dt * self.tol / error
        } else {
            let [e0, e1, e2] = self.errors;
            dt * (e1 / e2).powf(K_P) * (self.tol / e2).powf(K_I) * (e0 * e0 / e1 / e2).powf(K_D)
        }
    }
}

/// Cumulative substep times (s) replayed regardless of solver feedback.
#[derive(Clone, Debug, PartialEq)]
pub struct HardcodedTimeSteps {
    times: Vec<Real>,
}

impl HardcodedTimeSteps {
    /// Cumulative times in days, strictly increasing.
    pub fn from_days(days: &[Real]) -> SimResult<Self> {
        let times: Vec<Real> = days.iter().map(|d| days_to_seconds(*d)).collect();
        if times.is_empty() {
            return Err(SimError::InvalidConfig {
                what: "hardcoded time step sequence is empty".into(),
            });
        }
        if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimError::InvalidConfig {
                what: "hardcoded time steps must be finite and strictly increasing".into(),
            });
        }
        Ok(Self { times })
    }

    /// One cumulative time in days per line, read from the first number of
    /// the line. Blank lines and lines starting with `-` or `#` are skipped.
    pub fn parse(text: &str) -> SimResult<Self> {
        let mut days = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('-') || line.starts_with('#') {
                continue;
            }
            let first = line.split_whitespace().next().unwrap_or(line);
            let value: Real = first.parse().map_err(|_| SimError::InvalidConfig {
                what: format!("time steps line {}: cannot parse '{first}'", lineno + 1),
            })?;
            days.push(value);
        }
        Self::from_days(&days)
    }

    pub fn from_file(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SimError::InvalidConfig {
            what: format!("time steps file {}: {e}", path.display()),
        })?;
        Self::parse(&text)
    }

    pub fn times(&self) -> &[Real] {
        &self.times
    }

    /// Distance to the first listed time after `elapsed`, or `None` past
    /// the end of the sequence.
    pub fn next_step(&self, elapsed: Real) -> Option<Real> {
        let idx = self.times.partition_point(|t| *t <= elapsed);
        self.times.get(idx).map(|t| t - elapsed)
    }
}

/// The step-size policy of the controller.
#[derive(Clone, Debug, PartialEq)]
pub enum TimeStepControl {
    /// PID on the relative solution change.
    Pid(PidControl),
    /// PID, further reduced when more iterations than the target were used.
    PidAndIterationCount {
        pid: PidControl,
        target_iterations: usize,
    },
    /// Fixed decay above the target iteration count, fixed growth below.
    SimpleIterationCount {
        target_iterations: usize,
        decay_rate: Real,
        growth_rate: Real,
    },
    /// Replay of a fixed sequence of cumulative times.
    Hardcoded(HardcodedTimeSteps),
}

impl TimeStepControl {
    pub fn pid(tol: Real) -> Self {
        TimeStepControl::Pid(PidControl::new(tol))
    }

    pub fn pid_and_iteration_count(target_iterations: usize, tol: Real) -> Self {
        TimeStepControl::PidAndIterationCount {
            pid: PidControl::new(tol),
            target_iterations,
        }
    }

    pub fn simple_iteration_count(
        target_iterations: usize,
        decay_rate: Real,
        growth_rate: Real,
    ) -> SimResult<Self> {
        if decay_rate > 1.0 {
            return Err(SimError::InvalidConfig {
                what: format!("decay rate must be at most 1, got {decay_rate}"),
            });
        }
        if growth_rate < 1.0 {
            return Err(SimError::InvalidConfig {
                what: format!("growth rate must be at least 1, got {growth_rate}"),
            });
        }
        Ok(TimeStepControl::SimpleIterationCount {
            target_iterations,
            decay_rate,
            growth_rate,
        })
    }

    /// Propose the next step length after a converged step of length `dt`.
    ///
    /// `iterations` is the linear or Newton iteration count of that step,
    /// `relative_change` is evaluated only by the PID variants and
    /// `elapsed` is the simulation time after the step.
    pub fn compute_next_step_size(
        &mut self,
        dt: Real,
        iterations: usize,
        relative_change: &dyn Fn() -> Real,
        elapsed: Real,
    ) -> Real {
        match self {
            TimeStepControl::Pid(pid) => pid.compute(dt, relative_change),
            TimeStepControl::PidAndIterationCount {
                pid,
                target_iterations,
            } => {
                let estimate = pid.compute(dt, relative_change);
                let target = *target_iterations;
                if iterations > target && target > 0 {
                    let off_target = (iterations - target) as Real / target as Real;
                    estimate.min(dt / (1.0 + off_target))
                } else {
                    estimate
                }
            }
            TimeStepControl::SimpleIterationCount {
                target_iterations,
                decay_rate,
                growth_rate,
            } => {
                if iterations > *target_iterations {
                    dt * *decay_rate
                } else if iterations < *target_iterations {
                    dt * *growth_rate
                } else {
                    dt
                }
            }
            TimeStepControl::Hardcoded(steps) => steps.next_step(elapsed).unwrap_or(Real::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Real = 86_400.0;

    #[test]
    fn pid_cuts_step_when_change_exceeds_tolerance() {
        let mut c = TimeStepControl::pid(0.1);
        let dt = c.compute_next_step_size(10.0, 5, &|| 0.4, 10.0);
        assert!((dt - 2.5).abs() < 1e-12);
    }

    #[test]
    fn pid_on_target_keeps_step() {
        let mut c = TimeStepControl::pid(0.1);
        let dt = c.compute_next_step_size(10.0, 5, &|| 0.1, 10.0);
        assert!((dt - 10.0).abs() < 1e-12);
    }

    #[test]
    fn pid_grows_step_for_small_change() {
        let mut c = TimeStepControl::pid(0.1);
        let dt = c.compute_next_step_size(10.0, 5, &|| 0.01, 10.0);
        assert!(dt > 10.0);
        assert!(dt.is_finite());
    }

    #[test]
    fn pid_survives_zero_change() {
        let mut c = TimeStepControl::pid(0.1);
        for _ in 0..4 {
            let dt = c.compute_next_step_size(10.0, 5, &|| 0.0, 10.0);
            assert!(!dt.is_nan());
            assert!(dt > 10.0);
        }
    }

    #[test]
    fn iteration_count_overshoot_reduces_pid_estimate() {
        let mut c = TimeStepControl::pid_and_iteration_count(8, 0.1);
        // 12 iterations for a target of 8: at most dt / 1.5.
        let dt = c.compute_next_step_size(15.0, 12, &|| 0.1, 0.0);
        assert!((dt - 10.0).abs() < 1e-12);
    }

    #[test]
    fn simple_iteration_count_decays_and_grows() {
        let mut c = TimeStepControl::simple_iteration_count(30, 0.75, 1.25).unwrap();
        assert_eq!(c.compute_next_step_size(8.0, 31, &|| 0.0, 0.0), 6.0);
        assert_eq!(c.compute_next_step_size(8.0, 29, &|| 0.0, 0.0), 10.0);
        assert_eq!(c.compute_next_step_size(8.0, 30, &|| 0.0, 0.0), 8.0);
    }

    #[test]
    fn simple_iteration_count_rejects_bad_rates() {
        assert!(TimeStepControl::simple_iteration_count(30, 1.5, 1.25).is_err());
        assert!(TimeStepControl::simple_iteration_count(30, 0.5, 0.9).is_err());
    }

    #[test]
    fn relative_change_is_not_evaluated_by_iteration_policy() {
        let mut c = TimeStepControl::simple_iteration_count(30, 0.75, 1.25).unwrap();
        let dt = c.compute_next_step_size(1.0, 30, &|| panic!("evaluated"), 0.0);
        assert_eq!(dt, 1.0);
    }

    #[test]
    fn hardcoded_parse_skips_comments() {
        let steps = HardcodedTimeSteps::parse("-- times\n1.0 first\n\n2.5\n# done\n4\n").unwrap();
        assert_eq!(steps.times(), &[DAY, 2.5 * DAY, 4.0 * DAY]);
    }

    #[test]
    fn hardcoded_parse_rejects_garbage() {
        assert!(HardcodedTimeSteps::parse("1.0\nabc\n").is_err());
        assert!(HardcodedTimeSteps::parse("2.0\n1.0\n").is_err());
        assert!(HardcodedTimeSteps::parse("-- nothing\n").is_err());
    }

    #[test]
    fn hardcoded_proposes_distance_to_next_time() {
        let mut c = TimeStepControl::Hardcoded(HardcodedTimeSteps::from_days(&[1.0, 3.0]).unwrap());
        assert_eq!(c.compute_next_step_size(DAY, 1, &|| 0.0, DAY), 2.0 * DAY);
        assert_eq!(c.compute_next_step_size(DAY, 1, &|| 0.0, 0.5 * DAY), 0.5 * DAY);
        assert_eq!(c.compute_next_step_size(DAY, 1, &|| 0.0, 3.0 * DAY), Real::INFINITY);
    }
}
