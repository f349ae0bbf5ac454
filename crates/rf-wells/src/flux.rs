//! Perforation fluxes at standard conditions.

use crate::error::{WellError, WellResult};
use crate::topology::WellType;
use rf_core::{Eval, PhaseUsage, Real};
use rf_fluids::CellFluidState;

const WATER: usize = 0;
const OIL: usize = 1;
const GAS: usize = 2;

/// Inputs for one perforation of one well.
///
/// `mobility` and `surface_fractions` are indexed by flux component
/// (water, oil, gas, then solvent when enabled).
#[derive(Clone, Copy, Debug)]
pub struct PerforationFlux<'a> {
    pub well_name: &'a str,
    pub well_type: WellType,
    pub transmissibility: Real,
    pub cell: &'a CellFluidState,
    pub mobility: &'a [Eval],
    pub bhp: Eval,
    /// Pressure difference between the perforation and the bhp datum.
    pub pressure_diff: Real,
    pub allow_cross_flow: bool,
    pub surface_fractions: &'a [Eval],
}

/// Component surface rates through one perforation; negative means flow
/// from the reservoir into the well bore.
///
/// When cross flow is not allowed, a perforation whose drawdown opposes the
/// well type contributes nothing.
pub fn compute_well_flux(input: &PerforationFlux<'_>, pu: PhaseUsage) -> WellResult<Vec<Eval>> {
    let n_comp = 3 + pu.has_solvent as usize;
    let mut cq_s = vec![Eval::constant(0.0); n_comp];
    let cell = input.cell;

    let mut b = [Eval::constant(0.0); 4];
    b[..3].copy_from_slice(&cell.inv_b);
    if pu.has_solvent {
        b[3] = cell.solvent_inv_b;
    }
    let rs = cell.rs;
    let rv = cell.rv;

    let well_pressure = input.bhp + input.pressure_diff;
    let drawdown = cell.pressure - well_pressure;

    if drawdown.value() > 0.0 {
        if !input.allow_cross_flow && input.well_type.is_injector() {
            return Ok(cq_s);
        }
        for (c, q) in cq_s.iter_mut().enumerate() {
            let cq_p = -(input.mobility[c] * drawdown) * input.transmissibility;
            *q = b[c] * cq_p;
        }
        let cq_oil = cq_s[OIL];
        let cq_gas = cq_s[GAS];
        cq_s[GAS] += rs * cq_oil;
        cq_s[OIL] += rv * cq_gas;
    } else {
        if !input.allow_cross_flow && input.well_type.is_producer() {
            return Ok(cq_s);
        }
        let total_mob: Eval = input.mobility[..n_comp].iter().copied().sum();
        let cqt_i = -(total_mob * drawdown) * input.transmissibility;

        let cmix = input.surface_fractions;
        let mut volume_ratio = cmix[WATER] / b[WATER];
        if pu.has_solvent {
            volume_ratio += cmix[3] / b[3];
        }
        let d = 1.0 - rv * rs;
        if d.value() == 0.0 {
            return Err(WellError::NumericalProblem {
                what: format!(
                    "Zero d value obtained for well {} during flux calculation with rs {} and rv {}",
                    input.well_name,
                    rs.value(),
                    rv.value()
                ),
            });
        }
        let tmp_oil = (cmix[OIL] - rv * cmix[GAS]) / d;
        volume_ratio += tmp_oil / b[OIL];
        let tmp_gas = (cmix[GAS] - rs * cmix[OIL]) / d;
        volume_ratio += tmp_gas / b[GAS];

        let cqt_is = cqt_i / volume_ratio;
        for (c, q) in cq_s.iter_mut().enumerate() {
            *q = cmix[c] * cqt_is;
        }
    }
    Ok(cq_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::{HydroCarbonState, WELL_OFFSET};
    use rf_fluids::{CellPrimary, FluidSystem, SimpleBlackOil};

    fn cell(p: Real) -> CellFluidState {
        SimpleBlackOil::default()
            .evaluate(
                0,
                &CellPrimary {
                    pressure: p,
                    water_saturation: 0.3,
                    composition_switch: 0.1,
                    hydrocarbon_state: HydroCarbonState::GasAndOil,
                    solvent_saturation: 0.0,
                    polymer_concentration: 0.0,
                },
            )
            .unwrap()
    }

    fn input<'a>(
        cell: &'a CellFluidState,
        bhp: Real,
        fractions: &'a [Eval],
        well_type: WellType,
        allow_cf: bool,
    ) -> PerforationFlux<'a> {
        PerforationFlux {
            well_name: "W",
            well_type,
            transmissibility: 1e-12,
            cell,
            mobility: &cell.mobility,
            bhp: Eval::variable(bhp, WELL_OFFSET),
            pressure_diff: 0.0,
            allow_cross_flow: allow_cf,
            surface_fractions: fractions,
        }
    }

    #[test]
    fn producing_perforation_has_negative_rates() {
        let c = cell(2.0e7);
        let fr = [Eval::constant(1.0 / 3.0); 3];
        let q = compute_well_flux(
            &input(&c, 1.5e7, &fr, WellType::Producer, true),
            PhaseUsage::black_oil(),
        )
        .unwrap();
        assert!(q.iter().all(|x| x.value() < 0.0));
        // Larger bhp means less production.
        assert!(q[1].well_derivative(0) > 0.0);
    }

    #[test]
    fn injecting_perforation_follows_surface_mix() {
        let c = cell(2.0e7);
        let fr = [
            Eval::constant(1.0),
            Eval::constant(0.0),
            Eval::constant(0.0),
        ];
        let q = compute_well_flux(
            &input(&c, 2.5e7, &fr, WellType::Injector, true),
            PhaseUsage::black_oil(),
        )
        .unwrap();
        assert!(q[0].value() > 0.0);
        assert_eq!(q[1].value(), 0.0);
        assert_eq!(q[2].value(), 0.0);
    }

    #[test]
    fn zero_d_is_a_numerical_problem() {
        let mut c = cell(2.0e7);
        c.rs = Eval::constant(2.0);
        c.rv = Eval::constant(0.5);
        let fr = [Eval::constant(1.0 / 3.0); 3];
        let r = compute_well_flux(
            &input(&c, 2.5e7, &fr, WellType::Injector, true),
            PhaseUsage::black_oil(),
        );
        assert!(matches!(r, Err(WellError::NumericalProblem { .. })));
    }
}
