//! Error types for the nonlinear driver.

use rf_core::RfError;
use rf_fluids::FluidError;
use rf_wells::WellError;
use thiserror::Error;

pub type SolverResult<T> = Result<T, SolverError>;

/// Failures of a nonlinear solve.
///
/// Everything except configuration problems can be retried with a shorter
/// time step; see [`SolverError::is_recoverable`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Too many iterations: {what}")]
    TooManyIterations { what: String },

    #[error("Linear solver problem: {what}")]
    LinearSolverProblem { what: String },

    #[error("Numerical problem: {what}")]
    NumericalProblem { what: String },

    #[error("Runtime error: {what}")]
    Runtime { what: String },

    #[error("Invalid configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Well error: {0}")]
    Well(#[from] WellError),

    #[error("Fluid error: {0}")]
    Fluid(#[from] FluidError),

    #[error(transparent)]
    Core(#[from] RfError),
}

impl SolverError {
    /// Whether a time step that failed with this error may be retried with
    /// a shorter step length.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SolverError::TooManyIterations { .. }
            | SolverError::LinearSolverProblem { .. }
            | SolverError::NumericalProblem { .. }
            | SolverError::Runtime { .. } => true,
            SolverError::InvalidConfig { .. } => false,
            SolverError::Well(e) => !matches!(
                e,
                WellError::InvalidConfig { .. } | WellError::UnknownVfpTable { .. }
            ),
            SolverError::Fluid(e) => matches!(e, FluidError::NonPhysical { .. }),
            SolverError::Core(e) => matches!(
                e,
                RfError::NonFinite { .. } | RfError::SingularBlock { .. }
            ),
        }
    }
}
