//! Error types for the time-step controller.

use rf_solver::SolverError;
use thiserror::Error;

/// Failures of a report step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Solver failed to converge after cutting timestep {restarts} times.")]
    RestartsExhausted { restarts: usize },

    #[error("Unsupported time step control selected {name}")]
    UnknownTimeStepControl { name: String },

    #[error("Invalid configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Output error: {what}")]
    Output { what: String },

    #[error(transparent)]
    Solver(#[from] SolverError),
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restarts_exhausted_message() {
        let e = SimError::RestartsExhausted { restarts: 10 };
        assert_eq!(
            e.to_string(),
            "Solver failed to converge after cutting timestep 10 times."
        );
    }

    #[test]
    fn solver_errors_pass_through() {
        let e: SimError = SolverError::InvalidConfig {
            what: "max_iter".into(),
        }
        .into();
        assert_eq!(e.to_string(), "Invalid configuration: max_iter");
    }
}
