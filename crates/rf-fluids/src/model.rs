//! Fluid property oracle traits.

use crate::error::FluidResult;
use crate::state::{CellFluidState, CellPrimary};
use rf_core::{Phase, PhaseUsage, Real};

/// Scalar black-oil PVT relations.
///
/// Used where well computations need values at a pressure that is not a
/// cell pressure (perforation pressures, potential calculations).
pub trait BlackOilPvt: Send + Sync {
    /// Inverse water formation-volume factor.
    fn b_water(&self, p: Real) -> Real;

    /// Inverse oil formation-volume factor at dissolved-gas ratio `rs`.
    fn b_oil(&self, p: Real, rs: Real) -> Real;

    fn b_oil_saturated(&self, p: Real) -> Real {
        self.b_oil(p, self.rs_sat(p))
    }

    /// Inverse gas formation-volume factor at vaporized-oil ratio `rv`.
    fn b_gas(&self, p: Real, rv: Real) -> Real;

    fn b_gas_saturated(&self, p: Real) -> Real {
        self.b_gas(p, self.rv_sat(p))
    }

    fn b_solvent(&self, p: Real) -> Real;

    /// Saturated dissolved-gas ratio.
    fn rs_sat(&self, p: Real) -> Real;

    /// Saturated vaporized-oil ratio.
    fn rv_sat(&self, p: Real) -> Real;
}

/// Trait for fluid property oracles.
///
/// Implementations must be thread-safe (Send + Sync) so cell evaluation can
/// run in parallel.
pub trait FluidSystem: Send + Sync {
    /// Get the model name (for debugging/logging).
    fn name(&self) -> &str;

    fn phase_usage(&self) -> PhaseUsage;

    /// Density at standard conditions.
    fn surface_density(&self, phase: Phase) -> Real;

    fn solvent_surface_density(&self) -> Real {
        self.surface_density(Phase::Gas)
    }

    fn pvt(&self) -> &dyn BlackOilPvt;

    /// Evaluate all fluid quantities of `cell` at the given primary variables.
    fn evaluate(&self, cell: usize, primary: &CellPrimary) -> FluidResult<CellFluidState>;
}
