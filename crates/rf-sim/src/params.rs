//! Parameters of the adaptive time-step controller.

use crate::error::{SimError, SimResult};
use crate::step_control::{HardcodedTimeSteps, TimeStepControl};
use rf_core::Real;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default linear iteration target of the iteration-count policies.
pub const DEFAULT_TARGET_ITERATIONS: usize = 30;
/// Default Newton iteration target of `pid+newtoniteration`.
pub const DEFAULT_TARGET_NEWTON_ITERATIONS: usize = 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTimeSteppingParams {
    /// Factor applied to the step length after a failed substep.
    pub restart_factor: Real,
    /// Max growth of the step length right after a restart.
    pub growth_factor: Real,
    /// Max growth of the step length between two substeps.
    pub max_growth: Real,
    pub max_time_step_days: Real,
    pub min_time_step_days: Real,
    /// Failed substeps tolerated within one report step.
    pub solver_restart_max: usize,
    pub solver_verbose: bool,
    pub timestep_verbose: bool,
    /// First substep length; negative means a restart-factor fraction of
    /// the report step.
    pub initial_timestep_days: Real,
    pub full_timestep_initially: bool,
    /// Substep length after an event; negative disables.
    pub timestep_after_event_days: Real,
    /// One of `pid`, `pid+iteration`, `pid+newtoniteration`,
    /// `iterationcount`, `hardcoded`.
    pub control: String,
    /// Relative change tolerance of the PID policies.
    pub tol: Real,
    /// Iteration target; the policy's default when unset.
    pub target_iterations: Option<usize>,
    pub decay_rate: Real,
    pub growth_rate: Real,
    /// Cumulative substep times in days for `hardcoded`.
    pub hardcoded_sequence: Vec<Real>,
    /// File to read the `hardcoded` times from when no sequence is given.
    pub hardcoded_file: Option<PathBuf>,
}

impl Default for AdaptiveTimeSteppingParams {
    fn default() -> Self {
        Self {
            restart_factor: 0.33,
            growth_factor: 2.0,
            max_growth: 3.0,
            max_time_step_days: 365.0,
            min_time_step_days: 1.0e-6,
            solver_restart_max: 10,
            solver_verbose: true,
            timestep_verbose: true,
            initial_timestep_days: -1.0,
            full_timestep_initially: false,
            timestep_after_event_days: -1.0,
            control: "pid+newtoniteration".into(),
            tol: 0.1,
            target_iterations: None,
            decay_rate: 0.75,
            growth_rate: 1.25,
            hardcoded_sequence: Vec::new(),
            hardcoded_file: None,
        }
    }
}

impl AdaptiveTimeSteppingParams {
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SimError::InvalidConfig {
            what: format!("time stepping parameters: {e}"),
        })
    }

    /// The configured step-size policy, and whether it counts Newton
    /// rather than linear iterations.
    pub fn time_step_control(&self) -> SimResult<(TimeStepControl, bool)> {
        let target = |default| self.target_iterations.unwrap_or(default);
        match self.control.as_str() {
            "pid" => Ok((TimeStepControl::pid(self.tol), false)),
            "pid+iteration" => Ok((
                TimeStepControl::pid_and_iteration_count(target(DEFAULT_TARGET_ITERATIONS), self.tol),
                false,
            )),
            "pid+newtoniteration" => Ok((
                TimeStepControl::pid_and_iteration_count(
                    target(DEFAULT_TARGET_NEWTON_ITERATIONS),
                    self.tol,
                ),
                true,
            )),
            "iterationcount" => Ok((
                TimeStepControl::simple_iteration_count(
                    target(DEFAULT_TARGET_ITERATIONS),
                    self.decay_rate,
                    self.growth_rate,
                )?,
                false,
            )),
            "hardcoded" => {
                let steps = match &self.hardcoded_file {
                    Some(path) if self.hardcoded_sequence.is_empty() => {
                        HardcodedTimeSteps::from_file(path)?
                    }
                    _ => HardcodedTimeSteps::from_days(&self.hardcoded_sequence)?,
                };
                Ok((TimeStepControl::Hardcoded(steps), false))
            }
            other => Err(SimError::UnknownTimeStepControl {
                name: other.to_string(),
            }),
        }
    }
}

/// Per-report-step overrides from the schedule. Lengths are in days.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub restart_factor: Option<Real>,
    pub growth_factor: Option<Real>,
    pub max_growth: Option<Real>,
    pub max_time_step: Option<Real>,
    pub initial_time_step: Option<Real>,
    pub timestep_after_event: Option<Real>,
}

impl Tuning {
    pub fn from_yaml_str(yaml: &str) -> SimResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SimError::InvalidConfig {
            what: format!("tuning: {e}"),
        })
    }

    /// `params` with every set field of this record replacing its value.
    pub fn apply(&self, params: &AdaptiveTimeSteppingParams) -> AdaptiveTimeSteppingParams {
        let mut p = params.clone();
        if let Some(v) = self.restart_factor {
            p.restart_factor = v;
        }
        if let Some(v) = self.growth_factor {
            p.growth_factor = v;
        }
        if let Some(v) = self.max_growth {
            p.max_growth = v;
        }
        if let Some(v) = self.max_time_step {
            p.max_time_step_days = v;
        }
        if let Some(v) = self.initial_time_step {
            p.initial_timestep_days = v;
        }
        if let Some(v) = self.timestep_after_event {
            p.timestep_after_event_days = v;
        }
        p
    }
}
