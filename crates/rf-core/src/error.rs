use thiserror::Error;

pub type RfResult<T> = Result<T, RfError>;

/// Failures of the shared numerics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Singular block at ({row}, {col})")]
    SingularBlock { row: usize, col: usize },
}
