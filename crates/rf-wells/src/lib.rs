//! rf-wells: well model for the reservoir flow core.
//!
//! Contains:
//! - topology (wells, perforations, typed control lists)
//! - state (per-well control index, bhp/thp, rates, primary well variables)
//! - flux (perforation fluxes at standard conditions)
//! - density (segmented well-bore densities and connection pressure deltas)
//! - blocks (dense per-well block system and its Schur complement action)
//! - model (StandardWells: assembly, well-only solve, Newton update)
//! - controls (constraint checks and control switching)
//! - group (group-control arena with guide rates and VREP)
//! - voidage (surface to reservoir rate conversion)
//! - potentials (well potentials under bhp/thp limits)
//! - econ (economic production limits)
//! - vfp (vertical flow performance oracle)
//! - error (well error types)

pub mod blocks;
pub mod controls;
pub mod density;
pub mod econ;
pub mod error;
pub mod flux;
pub mod group;
pub mod model;
pub mod potentials;
pub mod state;
pub mod topology;
pub mod vfp;
pub mod voidage;

// Re-exports
pub use blocks::WellSystem;
pub use controls::{ControlSwitch, constraint_broken};
pub use econ::{EconomicLimits, QuantityLimit, ScheduleLimits, ShutList, StaticEconLimits};
pub use error::{WellError, WellResult};
pub use flux::{PerforationFlux, compute_well_flux};
pub use group::{GroupNode, GroupTarget, WellCollection, WellNode};
pub use model::{
    ReservoirLinearization, ReservoirView, StandardWells, WellModelParameters,
    renormalize_fractions,
};
pub use potentials::PotentialParameters;
pub use state::{GFRAC, SFRAC, WFRAC, WellState, XVAR};
pub use topology::{ControlMode, Perforation, Well, WellControl, WellType, Wells};
pub use vfp::{VfpFlowType, VfpProperties, VfpTable, VfpTables};
pub use voidage::RateConverter;
