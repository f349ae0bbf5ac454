//! rf-sim: adaptive time stepping over report steps.
//!
//! Contains:
//! - timer (report-step schedule, substep timer)
//! - step_control (PID, iteration count and hardcoded step-size policies)
//! - adaptive (AdaptiveTimeStepping: substep loop with rollback and restarts)
//! - sim (schedule runner)
//! - output (substep output hook)
//! - params (YAML-loadable parameters and per-step tuning)
//! - error (controller error taxonomy)

pub mod adaptive;
pub mod error;
pub mod output;
pub mod params;
pub mod sim;
pub mod step_control;
pub mod timer;

// Re-exports
pub use adaptive::{AdaptiveTimeStepping, SubstepSolver};
pub use error::{SimError, SimResult};
pub use output::{NoOutput, OutputWriter};
pub use params::{AdaptiveTimeSteppingParams, Tuning};
pub use sim::{RunOptions, RunRecord, run_schedule};
pub use step_control::{HardcodedTimeSteps, PidControl, TimeStepControl};
pub use timer::{AdaptiveSimulatorTimer, SimulatorTimer};
