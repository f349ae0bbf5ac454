//! Per-cell fluid snapshots.

use rf_core::{Eval, HydroCarbonState, Phase, Real};

/// Primary variables of one cell, as stored in the reservoir state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellPrimary {
    pub pressure: Real,
    pub water_saturation: Real,
    /// Sg, Rs or Rv depending on `hydrocarbon_state`.
    pub composition_switch: Real,
    pub hydrocarbon_state: HydroCarbonState,
    pub solvent_saturation: Real,
    pub polymer_concentration: Real,
}

/// Fluid quantities of one cell with derivatives with respect to the cell's
/// own primary variables.
///
/// Phase-indexed arrays follow [`Phase::index`].
#[derive(Clone, Debug, PartialEq)]
pub struct CellFluidState {
    /// Oil-phase pressure.
    pub pressure: Eval,
    pub saturation: [Eval; 3],
    /// Inverse formation-volume factors.
    pub inv_b: [Eval; 3],
    pub mobility: [Eval; 3],
    /// Reservoir-condition densities.
    pub density: [Eval; 3],
    pub rs: Eval,
    pub rv: Eval,
    pub solvent_saturation: Eval,
    pub solvent_inv_b: Eval,
    pub solvent_mobility: Eval,
    pub polymer_concentration: Eval,
    /// Water viscosity multiplier due to polymer.
    pub polymer_viscosity_multiplier: Eval,
}

impl CellFluidState {
    pub fn saturation_of(&self, phase: Phase) -> Eval {
        self.saturation[phase.index()]
    }

    pub fn inv_b_of(&self, phase: Phase) -> Eval {
        self.inv_b[phase.index()]
    }

    pub fn mobility_of(&self, phase: Phase) -> Eval {
        self.mobility[phase.index()]
    }

    /// Total mobility over the three phases (solvent excluded).
    pub fn total_mobility(&self) -> Eval {
        self.mobility.iter().copied().sum()
    }
}
