//! Well model errors.

use rf_core::RfError;
use rf_fluids::FluidError;
use thiserror::Error;

pub type WellResult<T> = Result<T, WellError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WellError {
    /// Zero denominators, NaN or oversized residuals, singular well blocks.
    #[error("Numerical problem: {what}")]
    NumericalProblem { what: String },

    /// Iterative well computations that did not settle.
    #[error("Well computation failed: {what}")]
    Runtime { what: String },

    #[error("Unknown VFP table {table}")]
    UnknownVfpTable { table: usize },

    #[error("Invalid well configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Fluid error: {0}")]
    Fluid(#[from] FluidError),

    #[error(transparent)]
    Core(#[from] RfError),
}
