//! Chopped Newton update of the reservoir state with hydrocarbon phase
//! transitions.

use crate::params::ModelParameters;
use crate::reservoir::ReservoirState;
use nalgebra::DVector;
use rf_core::{HydroCarbonState, Phase, PhaseUsage, Real, chopped};
use rf_fluids::BlackOilPvt;

/// Saturation nudge applied on a phase transition.
const TRANSITION_EPSILON: Real = 1.0e-4;

/// Subtract the Newton increment `dx` (`num_eq` entries per cell) from the
/// reservoir state.
///
/// Pressure changes are limited to `dp_max_rel` of the current pressure.
/// Saturation-like changes of a cell share one scaling factor so that none
/// exceeds `ds_max`. Rs and Rv are never negative.
pub fn update_reservoir_state(
    dx: &DVector<Real>,
    state: &mut ReservoirState,
    pu: PhaseUsage,
    pvt: &dyn BlackOilPvt,
    params: &ModelParameters,
) {
    let n_eq = pu.num_eq();
    for cell in 0..state.num_cells() {
        let d = |i: usize| dx[cell * n_eq + i];

        let p = &mut state.pressure[cell];
        *p = chopped(*p, d(0), p.abs() * params.dp_max_rel).max(0.0);

        let dsw = d(1);
        let dxvar = d(2);
        let mut dsg = 0.0;
        let mut drs = 0.0;
        let mut drv = 0.0;
        match state.hydrocarbon_state[cell] {
            HydroCarbonState::GasAndOil => dsg = dxvar,
            HydroCarbonState::OilOnly => drs = dxvar,
            HydroCarbonState::GasOnly => {
                dsg = -dsw;
                drv = dxvar;
            }
        }
        let dss = pu.solvent_index().map_or(0.0, d);
        let dc = pu.polymer_index().map_or(0.0, d);
        let dso = -dsw - dsg - dss;

        let max_val = dsw.abs().max(dsg.abs()).max(dss.abs());
        let step = (params.ds_max / max_val).min(1.0);

        let sw = state.saturation(cell, Phase::Water) - step * dsw;
        let mut sg = state.saturation(cell, Phase::Gas) - step * dsg;
        let mut so = state.saturation(cell, Phase::Oil) - step * dso;
        if pu.has_solvent {
            state.solvent_saturation[cell] -= step * dss;
        }
        if pu.has_polymer {
            let c = &mut state.polymer_concentration[cell];
            *c = (*c - step * dc).max(0.0);
        }

        let mut rs = state.rs[cell];
        let mut rv = state.rv[cell];
        if pu.has_disgas {
            rs = (rs - drs).max(0.0);
        }
        if pu.has_vapoil {
            rv = (rv - drv).max(0.0);
        }

        let pressure = state.pressure[cell];
        let ss = state.solvent_saturation[cell];
        let eps = TRANSITION_EPSILON;
        let hc = &mut state.hydrocarbon_state[cell];
        match *hc {
            HydroCarbonState::GasAndOil => {
                rs = pvt.rs_sat(pressure);
                rv = pvt.rv_sat(pressure);
                if sw <= 1.0 - eps {
                    if sg <= 0.0 && pu.has_disgas {
                        *hc = HydroCarbonState::OilOnly;
                        sg = 0.0;
                        so = 1.0 - sw - ss;
                        rs *= 1.0 - eps;
                    } else if so <= 0.0 && pu.has_vapoil {
                        *hc = HydroCarbonState::GasOnly;
                        so = 0.0;
                        sg = 1.0 - sw - ss;
                        rv *= 1.0 - eps;
                    }
                }
            }
            HydroCarbonState::OilOnly => {
                if sw > 1.0 - eps {
                    rs = 0.0;
                    rv = 0.0;
                    *hc = HydroCarbonState::GasAndOil;
                } else {
                    let rs_sat = pvt.rs_sat(pressure);
                    if rs > rs_sat * (1.0 + eps) {
                        *hc = HydroCarbonState::GasAndOil;
                        sg = eps;
                        so -= eps;
                        rs = rs_sat;
                    }
                }
            }
            HydroCarbonState::GasOnly => {
                if sw > 1.0 - eps {
                    rs = 0.0;
                    rv = 0.0;
                    *hc = HydroCarbonState::GasAndOil;
                } else {
                    let rv_sat = pvt.rv_sat(pressure);
                    if rv > rv_sat * (1.0 + eps) {
                        *hc = HydroCarbonState::GasAndOil;
                        so = eps;
                        sg -= eps;
                        rv = rv_sat;
                    }
                }
            }
        }

        state.rs[cell] = rs;
        state.rv[cell] = rv;
        state.set_saturation(cell, Phase::Water, sw);
        state.set_saturation(cell, Phase::Oil, so);
        state.set_saturation(cell, Phase::Gas, sg);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use rf_fluids::SimpleBlackOil;

    proptest! {
        #[test]
        fn update_keeps_saturations_closed_and_pressure_bounded(
            sw in 0.1_f64..0.5,
            sg in 0.05_f64..0.4,
            dp in -1.0e8_f64..1.0e8,
            dsw in -1.0_f64..1.0,
            dsg in -1.0_f64..1.0,
        ) {
            let fluid = SimpleBlackOil::default();
            let mut state = ReservoirState::uniform(1, 2.0e7, sw, sg, &fluid);
            let params = ModelParameters::default();
            let dx = DVector::from_vec(vec![dp, dsw, dsg]);

            update_reservoir_state(&dx, &mut state, PhaseUsage::black_oil(), &fluid, &params);

            prop_assert!((state.pressure[0] - 2.0e7).abs() <= 0.3 * 2.0e7 * (1.0 + 1e-12));
            let sum: Real = Phase::ALL.iter().map(|&p| state.saturation(0, p)).sum();
            prop_assert!((sum - 1.0).abs() < 1e-12);
            prop_assert!((state.saturation(0, Phase::Water) - sw).abs() <= params.ds_max + 1e-12);
            prop_assert!(state.rs[0] >= 0.0 && state.rv[0] >= 0.0);
        }
    }
}
