//! Reservoir solution state.

use rf_core::{HydroCarbonState, Phase, Real};
use rf_fluids::{BlackOilPvt, CellPrimary};

/// Per-cell unknowns of the black-oil model.
///
/// Saturations are stored three per cell (water, oil, gas). Which of Sg, Rs
/// or Rv is the active unknown of a cell is selected by its
/// [`HydroCarbonState`]; the inactive ones are kept consistent by the state
/// update. Snapshots for rollback are plain clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReservoirState {
    pub pressure: Vec<Real>,
    pub saturation: Vec<Real>,
    pub rs: Vec<Real>,
    pub rv: Vec<Real>,
    pub hydrocarbon_state: Vec<HydroCarbonState>,
    pub solvent_saturation: Vec<Real>,
    pub polymer_concentration: Vec<Real>,
}

impl ReservoirState {
    /// Uniform initial state with free gas everywhere and saturated Rs/Rv.
    pub fn uniform(
        num_cells: usize,
        pressure: Real,
        water_saturation: Real,
        gas_saturation: Real,
        pvt: &dyn BlackOilPvt,
    ) -> Self {
        let so = 1.0 - water_saturation - gas_saturation;
        Self {
            pressure: vec![pressure; num_cells],
            saturation: [water_saturation, so, gas_saturation].repeat(num_cells),
            rs: vec![pvt.rs_sat(pressure); num_cells],
            rv: vec![pvt.rv_sat(pressure); num_cells],
            hydrocarbon_state: vec![HydroCarbonState::GasAndOil; num_cells],
            solvent_saturation: vec![0.0; num_cells],
            polymer_concentration: vec![0.0; num_cells],
        }
    }

    pub fn num_cells(&self) -> usize {
        self.pressure.len()
    }

    pub fn saturation(&self, cell: usize, phase: Phase) -> Real {
        self.saturation[3 * cell + phase.index()]
    }

    pub fn set_saturation(&mut self, cell: usize, phase: Phase, value: Real) {
        self.saturation[3 * cell + phase.index()] = value;
    }

    /// Primary variables of `cell` as seen by the fluid oracle.
    pub fn primary(&self, cell: usize) -> CellPrimary {
        let hydrocarbon_state = self.hydrocarbon_state[cell];
        let composition_switch = match hydrocarbon_state {
            HydroCarbonState::GasAndOil => self.saturation(cell, Phase::Gas),
            HydroCarbonState::OilOnly => self.rs[cell],
            HydroCarbonState::GasOnly => self.rv[cell],
        };
        CellPrimary {
            pressure: self.pressure[cell],
            water_saturation: self.saturation(cell, Phase::Water),
            composition_switch,
            hydrocarbon_state,
            solvent_saturation: self.solvent_saturation[cell],
            polymer_concentration: self.polymer_concentration[cell],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_fluids::SimpleBlackOil;

    #[test]
    fn uniform_state_closes_saturations() {
        let fluid = SimpleBlackOil::default();
        let s = ReservoirState::uniform(4, 2.0e7, 0.3, 0.1, &fluid);
        assert_eq!(s.num_cells(), 4);
        assert!((s.saturation(2, Phase::Oil) - 0.6).abs() < 1e-15);
        assert!((s.rs[3] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn composition_switch_follows_hydrocarbon_state() {
        let fluid = SimpleBlackOil::default();
        let mut s = ReservoirState::uniform(2, 2.0e7, 0.3, 0.1, &fluid);
        assert_eq!(s.primary(0).composition_switch, 0.1);
        s.hydrocarbon_state[1] = HydroCarbonState::OilOnly;
        s.rs[1] = 42.0;
        assert_eq!(s.primary(1).composition_switch, 42.0);
    }
}
