//! Surface to reservoir volume conversion for voidage replacement.

use crate::error::WellResult;
use crate::model::{ReservoirView, StandardWells};
use crate::state::WellState;
use rf_core::Real;

const WATER: usize = 0;
const OIL: usize = 1;
const GAS: usize = 2;

/// Converts surface rates to reservoir rates at field-average conditions.
///
/// The average state is pore-volume weighted over all cells, with Rs and Rv
/// capped at their saturated values.
#[derive(Clone, Debug, PartialEq)]
pub struct RateConverter {
    pressure: Real,
    rs: Real,
    rv: Real,
    inv_b: [Real; 3],
}

impl Default for RateConverter {
    fn default() -> Self {
        Self {
            pressure: 0.0,
            rs: 0.0,
            rv: 0.0,
            inv_b: [1.0; 3],
        }
    }
}

impl RateConverter {
    pub fn define_state(&mut self, view: &ReservoirView<'_>) {
        let mut sums = [0.0; 4];
        for (cell, pv) in view.cells.iter().zip(view.pore_volume) {
            sums[0] += pv * cell.pressure.value();
            sums[1] += pv * cell.rs.value();
            sums[2] += pv * cell.rv.value();
            sums[3] += pv;
        }
        view.comm.sum(&mut sums);
        if sums[3] <= 0.0 {
            return;
        }
        let pvt = view.fluid.pvt();
        let p = sums[0] / sums[3];
        self.pressure = p;
        self.rs = (sums[1] / sums[3]).min(pvt.rs_sat(p));
        self.rv = (sums[2] / sums[3]).min(pvt.rv_sat(p));
        self.inv_b = [
            pvt.b_water(p),
            pvt.b_oil(p, self.rs),
            pvt.b_gas(p, self.rv),
        ];
    }

    pub fn average_pressure(&self) -> Real {
        self.pressure
    }

    /// Reservoir volume per unit surface rate of each phase.
    pub fn coefficients(&self) -> [Real; 3] {
        let [bw, bo, bg] = self.inv_b;
        let det = 1.0 - self.rs * self.rv;
        let mut coeff = [0.0; 3];
        coeff[WATER] = 1.0 / bw;
        coeff[OIL] += 1.0 / (bo * det);
        coeff[GAS] -= self.rv / (bo * det);
        coeff[GAS] += 1.0 / (bg * det);
        coeff[OIL] -= self.rs / (bg * det);
        coeff
    }
}

impl StandardWells {
    /// Refresh the field-average state behind the VREP conversions.
    pub fn update_rate_converter(&mut self, view: &ReservoirView<'_>) {
        self.rate_converter.define_state(view);
    }

    /// Reservoir voidage of each producer (zero for injectors), and the
    /// conversion coefficients stored for each injector (one for producers).
    pub fn compute_well_voidage_rates(&self, ws: &WellState) -> (Vec<Real>, Vec<Real>) {
        let nw = self.wells.len();
        let mut voidage = vec![0.0; nw];
        let mut coeffs = vec![1.0; 3 * nw];
        let convert = self.rate_converter.coefficients();
        for (w, well) in self.wells.iter().enumerate() {
            if well.well_type.is_producer() {
                voidage[w] = ws
                    .well_rates_of(w)
                    .iter()
                    .zip(&convert)
                    .map(|(q, c)| -q * c)
                    .sum();
            } else {
                coeffs[3 * w..3 * w + 3].copy_from_slice(&convert);
            }
        }
        (voidage, coeffs)
    }

    /// Retarget VREP injectors and put group-controlled injectors on their
    /// group control entry.
    pub fn apply_vrep_group_control(&mut self, ws: &mut WellState) -> WellResult<()> {
        if !self.collection.having_vrep_groups() {
            return Ok(());
        }
        let (voidage, coeffs) = self.compute_well_voidage_rates(ws);
        self.collection
            .apply_vrep_group_controls(&mut self.wells, &voidage, &coeffs)?;
        for node in self.collection.nodes() {
            if node.well_type.is_injector() && !node.individual_control {
                if let Some(ctrl) = node.group_control_index {
                    ws.current_controls[node.well] = ctrl;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immiscible_coefficients_are_inverse_b() {
        let rc = RateConverter {
            pressure: 2.0e7,
            rs: 0.0,
            rv: 0.0,
            inv_b: [1.0, 0.8, 200.0],
        };
        let c = rc.coefficients();
        assert!((c[WATER] - 1.0).abs() < 1e-15);
        assert!((c[OIL] - 1.25).abs() < 1e-15);
        assert!((c[GAS] - 0.005).abs() < 1e-15);
    }

    #[test]
    fn dissolved_gas_reduces_free_gas_volume() {
        let rc = RateConverter {
            pressure: 2.0e7,
            rs: 100.0,
            rv: 0.0,
            inv_b: [1.0, 0.8, 200.0],
        };
        let c = rc.coefficients();
        // One unit of surface oil carries Rs of gas out of the free phase.
        assert!((c[OIL] - (1.25 - 100.0 / 200.0)).abs() < 1e-12);
    }
}
