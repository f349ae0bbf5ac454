//! rf-fluids: fluid property oracle for the reservoir flow core.
//!
//! Provides:
//! - `FluidSystem` trait mapping a cell's primary variables to a
//!   `CellFluidState` whose quantities carry partial derivatives
//! - `BlackOilPvt` trait for scalar PVT queries used by well computations
//! - `SimpleBlackOil`, an analytic black-oil model
//!
//! # Architecture
//!
//! The nonlinear driver and the well model only ever see the traits. Table
//! based PVT and saturation-function engines plug in behind the same API.

pub mod error;
pub mod model;
pub mod simple;
pub mod state;

// Re-exports for ergonomics
pub use error::{FluidError, FluidResult};
pub use model::{BlackOilPvt, FluidSystem};
pub use simple::SimpleBlackOil;
pub use state::{CellFluidState, CellPrimary};
