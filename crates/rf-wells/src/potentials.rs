//! Well potentials: rates a well would flow at its most restrictive
//! pressure limit. Group control uses them as guide rates.

use crate::error::{WellError, WellResult};
use crate::flux::{PerforationFlux, compute_well_flux};
use crate::model::{ReservoirView, StandardWells};
use crate::state::WellState;
use crate::topology::{WellControl, WellType};
use rf_core::{Eval, Real};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialParameters {
    /// Iteration cap of the thp-limited potential loop.
    pub max_iter: usize,
    /// Bhp change (Pa) below which the thp loop has converged.
    pub bhp_tolerance: Real,
    /// Weight of the newest rates in the damped thp update.
    pub damping: Real,
    /// Scaling of the initial rates of new wells under thp limits.
    pub rate_safety_scaling: Real,
}

impl Default for PotentialParameters {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            bhp_tolerance: 1000.0,
            damping: 0.001,
            rate_safety_scaling: 1.0e-5,
        }
    }
}

impl StandardWells {
    /// Absolute potentials, three phases per well.
    pub fn compute_well_potentials(
        &self,
        view: &ReservoirView<'_>,
        ws: &WellState,
    ) -> WellResult<Vec<Real>> {
        let mut well_potentials = vec![0.0; 3 * self.wells.len()];

        for (w, well) in self.wells.iter().enumerate() {
            let bhp = self.most_strict_bhp_from_bhp_limits(w);

            let potentials = if !well.has_thp_constraint() {
                if bhp.abs() == Real::MAX {
                    return Err(WellError::Runtime {
                        what: format!("well {} has neither a bhp nor a thp limit", well.name),
                    });
                }
                self.compute_well_rates_with_bhp(view, w, bhp, ws)?
            } else {
                let initial = if !ws.is_new_well[w] {
                    ws.well_rates_of(w)
                } else {
                    let mut rates = self.compute_well_rates_with_bhp(view, w, bhp, ws)?;
                    rates
                        .iter_mut()
                        .for_each(|q| *q *= self.params.potentials.rate_safety_scaling);
                    rates
                };
                self.compute_well_potential_with_thp(view, w, bhp, initial, ws)?
            };

            for (p, q) in potentials.iter().enumerate() {
                well_potentials[3 * w + p] = q.abs();
            }
        }
        Ok(well_potentials)
    }

    /// Phase surface rates summed over the well's perforations at a fixed
    /// bhp.
    pub fn compute_well_rates_with_bhp(
        &self,
        view: &ReservoirView<'_>,
        w: usize,
        bhp: Real,
        ws: &WellState,
    ) -> WellResult<[Real; 3]> {
        let well = self.wells.get(w);
        let allow_cf = self.allow_cross_flow(w, view, ws)?;
        let fractions: Vec<Eval> = (0..self.num_components())
            .map(|c| self.well_surface_volume_fraction(w, c, ws))
            .collect();

        let mut rates = [0.0; 3];
        for (perf, perforation) in self.wells.perforations(w) {
            let cell = view.cell(perforation.cell)?;
            let mobility = self.perforation_mobility(w, cell);
            let cq = compute_well_flux(
                &PerforationFlux {
                    well_name: &well.name,
                    well_type: well.well_type,
                    transmissibility: perforation.transmissibility,
                    cell,
                    mobility: &mobility,
                    bhp: Eval::constant(bhp),
                    pressure_diff: self.perf_pressure_diffs[perf],
                    allow_cross_flow: allow_cf,
                    surface_fractions: &fractions,
                },
                self.phase_usage,
            )?;
            for (rate, q) in rates.iter_mut().zip(&cq) {
                *rate += q.value();
            }
        }
        Ok(rates)
    }

    /// Lowest bhp limit of an injector, highest of a producer, or
    /// `±Real::MAX` without a bhp limit.
    pub fn most_strict_bhp_from_bhp_limits(&self, w: usize) -> Real {
        let well = self.wells.get(w);
        let limits = well.controls.iter().filter_map(|c| match c {
            WellControl::Bhp { target } => Some(*target),
            _ => None,
        });
        match well.well_type {
            WellType::Injector => limits.fold(Real::MAX, Real::min),
            WellType::Producer => limits.fold(-Real::MAX, Real::max),
        }
    }

    /// Fixed-point iteration between the bhp implied by the thp limits and
    /// the rates flowing at that bhp.
    pub fn compute_well_potential_with_thp(
        &self,
        view: &ReservoirView<'_>,
        w: usize,
        initial_bhp: Real,
        initial_potential: [Real; 3],
        ws: &WellState,
    ) -> WellResult<[Real; 3]> {
        let well = self.wells.get(w);
        let params = &self.params.potentials;
        let mut potentials = initial_potential;
        let mut old_potentials = potentials;
        let mut old_bhp = initial_bhp;
        let mut converged = false;
        let mut iteration = 0;

        while !converged && iteration < params.max_iter {
            let mut bhp = initial_bhp;
            for control in &well.controls {
                if let WellControl::Thp {
                    target,
                    vfp_table,
                    alq,
                } = control
                {
                    let dp = self.vfp_correction(w, *vfp_table)?;
                    let bhp_calculated =
                        self.vfp.bhp_value(*vfp_table, potentials, *target, *alq)? - dp;
                    bhp = match well.well_type {
                        WellType::Injector => bhp.min(bhp_calculated),
                        WellType::Producer => bhp.max(bhp_calculated),
                    };
                }
            }

            if !bhp.is_finite() {
                return Err(WellError::Runtime {
                    what: format!(
                        "Unvalid bhp value obtained during the potential calculation for well {}",
                        well.name
                    ),
                });
            }

            converged = (old_bhp - bhp).abs() < params.bhp_tolerance;

            potentials = self.compute_well_rates_with_bhp(view, w, bhp, ws)?;
            if potentials.iter().any(|q| !q.is_finite()) {
                return Err(WellError::Runtime {
                    what: format!(
                        "Unvalid potential value obtained during the potential calculation for well {}",
                        well.name
                    ),
                });
            }

            if !converged {
                old_bhp = bhp;
                for (q, old) in potentials.iter_mut().zip(old_potentials.iter_mut()) {
                    *q = params.damping * *q + (1.0 - params.damping) * *old;
                    *old = *q;
                }
            }
            iteration += 1;
        }

        if !converged {
            return Err(WellError::Runtime {
                what: format!(
                    "Failed in getting converged for the potential calculation for well {}",
                    well.name
                ),
            });
        }
        debug!(well = %well.name, iterations = iteration, "thp-limited potential converged");
        Ok(potentials)
    }
}
