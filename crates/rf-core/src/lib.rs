//! rf-core: stable foundation for the reservoir flow core.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - eval (value + partial derivatives for reservoir and well unknowns)
//! - phases (phase/component/primary-variable layout)
//! - sparse (block-sparse matrix of small dense blocks)
//! - comm (global reduction primitives)
//! - units (uom SI types + field-unit constructors)
//! - report (iteration/timing accumulator)
//! - timing (wall-clock stopwatch)
//! - error (shared error types)

pub mod comm;
pub mod error;
pub mod eval;
pub mod numeric;
pub mod phases;
pub mod report;
pub mod sparse;
pub mod timing;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use comm::{Communicator, SerialCommunicator};
pub use error::{RfError, RfResult};
pub use eval::{Eval, MAX_EQ, NUM_DERIVATIVES, WELL_OFFSET};
pub use numeric::*;
pub use phases::{Component, HydroCarbonState, Phase, PhaseUsage, PrimaryVar};
pub use report::SimulatorReport;
pub use sparse::BlockMatrix;
pub use units::*;
