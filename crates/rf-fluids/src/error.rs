//! Fluid property errors.

use rf_core::RfError;
use thiserror::Error;

/// Result type for fluid operations.
pub type FluidResult<T> = Result<T, FluidError>;

/// Errors that can occur during fluid property evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FluidError {
    /// Non-physical values (negative pressure, NaN saturation, etc.).
    #[error("Non-physical value for {what} in cell {cell}")]
    NonPhysical { what: &'static str, cell: usize },

    /// Invalid argument.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Operation not supported by this fluid model.
    #[error("Not supported: {what}")]
    NotSupported { what: &'static str },

    #[error(transparent)]
    Core(#[from] RfError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = FluidError::NonPhysical {
            what: "pressure",
            cell: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("pressure"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn core_error_converts() {
        let err: FluidError = RfError::InvalidArg { what: "x" }.into();
        assert!(matches!(err, FluidError::Core(_)));
    }
}
