//! Control switching and state reset to a control target.

use crate::error::WellResult;
use crate::model::{FRACTION_SCALING, StandardWells};
use crate::state::{GFRAC, SFRAC, WFRAC, WellState, XVAR};
use crate::topology::{ControlMode, WellControl, WellType};
use rf_core::Real;
use tracing::info;

const WATER: usize = 0;
const GAS: usize = 2;

/// A well that moved to another entry of its control list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSwitch {
    pub well: String,
    pub from: ControlMode,
    pub to: ControlMode,
}

/// Whether `control`, used as an inequality constraint, is violated.
///
/// Injectors must stay at or below their limits, producers at or above
/// (production rates are negative).
pub fn constraint_broken(
    well_type: WellType,
    control: &WellControl,
    bhp: Real,
    thp: Real,
    rates: [Real; 3],
) -> bool {
    let value = match control {
        WellControl::Bhp { .. } => bhp,
        WellControl::Thp { .. } => thp,
        WellControl::SurfaceRate { distr, .. } | WellControl::ReservoirRate { distr, .. } => {
            distr.iter().zip(&rates).map(|(d, q)| d * q).sum()
        }
    };
    match well_type {
        WellType::Injector => value > control.target(),
        WellType::Producer => value < control.target(),
    }
}

impl StandardWells {
    /// Switch each well to the first broken constraint of its control list
    /// and reset the state of switched wells to their new target.
    ///
    /// Under group control every well is retargeted and group targets are
    /// redistributed from the current rates.
    pub fn update_well_controls(&mut self, ws: &mut WellState) -> WellResult<Vec<ControlSwitch>> {
        if !self.wells_active() {
            return Ok(Vec::new());
        }
        let nw = self.wells.len();
        let old_controls = ws.current_controls.clone();
        let group_active = self.collection.group_control_active();

        for w in 0..nw {
            let well = self.wells.get(w);
            let current = ws.current_controls[w];
            let rates = ws.well_rates_of(w);
            let broken = well.controls.iter().enumerate().find(|(ctrl, control)| {
                *ctrl != current
                    && constraint_broken(well.well_type, control, ws.bhp[w], ws.thp[w], rates)
            });
            if let Some((ctrl, _)) = broken {
                ws.current_controls[w] = ctrl;
            }

            if group_active {
                let under_group = well.group_control_index == Some(ws.current_controls[w]);
                self.collection.set_individual_control(w, !under_group);
            }
        }

        let mut switches = Vec::new();
        for w in 0..nw {
            let current = ws.current_controls[w];
            if current != old_controls[w] {
                let switch = ControlSwitch {
                    well: self.wells.get(w).name.clone(),
                    from: self.wells.control(w, old_controls[w]).mode(),
                    to: self.wells.control(w, current).mode(),
                };
                info!(
                    "Switching control mode for well {} from {} to {}",
                    switch.well, switch.from, switch.to
                );
                switches.push(switch);
            }
            if current != old_controls[w] || group_active {
                self.update_well_state_with_target(w, current, ws)?;
            }
        }

        if group_active {
            self.apply_vrep_group_control(ws)?;
            self.collection
                .update_well_targets(&mut self.wells, &ws.well_rates);
            for w in 0..nw {
                let current = ws.current_controls[w];
                self.update_well_state_with_target(w, current, ws)?;
            }
        }
        Ok(switches)
    }

    /// Reset bhp, thp, rates and primary variables of well `w` so that
    /// control `ctrl` is satisfied.
    pub fn update_well_state_with_target(
        &self,
        w: usize,
        ctrl: usize,
        ws: &mut WellState,
    ) -> WellResult<()> {
        let well = self.wells.get(w);
        let control = self.wells.control(w, ctrl);

        match control {
            WellControl::Bhp { target } => ws.bhp[w] = *target,
            WellControl::Thp {
                target,
                vfp_table,
                alq,
            } => {
                ws.thp[w] = *target;
                let bhp = self
                    .vfp
                    .bhp_value(*vfp_table, ws.well_rates_of(w), *target, *alq)?;
                ws.bhp[w] = bhp - self.vfp_correction(w, *vfp_table)?;
            }
            WellControl::SurfaceRate { target, distr }
            | WellControl::ReservoirRate { target, distr } => {
                let rates = &mut ws.well_rates[3 * w..3 * w + 3];
                let n_controlled = distr.iter().filter(|d| **d > 0.0).count() as Real;
                match well.well_type {
                    WellType::Injector => {
                        for (q, d) in rates.iter_mut().zip(distr) {
                            *q = if *d > 0.0 { target / d } else { 0.0 };
                        }
                    }
                    WellType::Producer => {
                        let original: Real = rates
                            .iter()
                            .zip(distr)
                            .filter(|(_, d)| **d > 0.0)
                            .map(|(q, d)| q * d)
                            .sum();
                        if original != 0.0 {
                            let scale = target / original;
                            rates.iter_mut().for_each(|q| *q *= scale);
                        } else {
                            // Split the target equally over the controlled phases.
                            let divided = target / n_controlled;
                            for (q, d) in rates.iter_mut().zip(distr) {
                                *q = if *d > 0.0 { divided / d } else { divided };
                            }
                        }
                    }
                }
            }
        }

        let g: [Real; 3] = match control {
            WellControl::ReservoirRate { distr, .. } => *distr,
            _ => [FRACTION_SCALING[0], FRACTION_SCALING[1], FRACTION_SCALING[2]],
        };
        let rates = ws.well_rates_of(w);

        let xvar: Real = if control.is_pressure() {
            match well.well_type {
                WellType::Injector => rates.iter().zip(&well.comp_frac).map(|(q, c)| q * c).sum(),
                WellType::Producer => rates.iter().zip(&g).map(|(q, g)| q * g).sum(),
            }
        } else {
            ws.bhp[w]
        };
        ws.set_solution(w, XVAR, xvar);

        let has_solvent = self.phase_usage.has_solvent;
        let total: Real = rates.iter().zip(&g).map(|(q, g)| q * g).sum();
        if total.abs() > 0.0 {
            let solvent = ws.solvent_well_rate(w);
            ws.set_solution(w, WFRAC, g[WATER] * rates[WATER] / total);
            ws.set_solution(w, GFRAC, g[GAS] * (rates[GAS] - solvent) / total);
            if has_solvent {
                ws.set_solution(w, SFRAC, g[GAS] * solvent / total);
            }
        } else if well.well_type.is_injector() {
            // Single-phase injection only.
            let distr = control.distr().copied().unwrap_or(well.comp_frac);
            ws.set_solution(w, WFRAC, if distr[WATER] > 0.0 { 1.0 } else { 0.0 });
            if distr[GAS] > 0.0 {
                let wsolvent = self.wsolvent(w);
                ws.set_solution(w, GFRAC, 1.0 - wsolvent);
                if has_solvent {
                    ws.set_solution(w, SFRAC, wsolvent);
                }
            } else {
                ws.set_solution(w, GFRAC, 0.0);
            }
        } else {
            ws.set_solution(w, WFRAC, 1.0 / 3.0);
            ws.set_solution(w, GFRAC, 1.0 / 3.0);
        }
        Ok(())
    }
}
