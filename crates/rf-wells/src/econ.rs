//! Economic production limits.
//!
//! Evaluated at the end of a report step on producers only. Rate limits shut
//! or stop the whole well; a water-cut violation closes the connection with
//! the highest water cut.

use crate::model::StandardWells;
use crate::state::WellState;
use rf_core::Real;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

const WATER: usize = 0;
const OIL: usize = 1;
const GAS: usize = 2;

/// Quantity the limits are evaluated on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityLimit {
    #[default]
    Rate,
    /// Not supported; evaluated as [`QuantityLimit::Rate`].
    Potential,
}

/// Limits of one producer. `None` disables a limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicLimits {
    pub min_oil_rate: Option<Real>,
    pub min_gas_rate: Option<Real>,
    pub min_liquid_rate: Option<Real>,
    pub min_reservoir_fluid_rate: Option<Real>,
    pub max_water_cut: Option<Real>,
    pub max_gas_oil_ratio: Option<Real>,
    pub max_water_gas_ratio: Option<Real>,
    pub max_gas_liquid_ratio: Option<Real>,
    pub quantity_limit: QuantityLimit,
    pub end_run: bool,
    pub followon_well: Option<String>,
    /// Shut the well instead of stopping it.
    pub automatic_shut_in: bool,
}

impl Default for EconomicLimits {
    fn default() -> Self {
        Self {
            min_oil_rate: None,
            min_gas_rate: None,
            min_liquid_rate: None,
            min_reservoir_fluid_rate: None,
            max_water_cut: None,
            max_gas_oil_ratio: None,
            max_water_gas_ratio: None,
            max_gas_liquid_ratio: None,
            quantity_limit: QuantityLimit::Rate,
            end_run: false,
            followon_well: None,
            automatic_shut_in: true,
        }
    }
}

impl EconomicLimits {
    pub fn on_any_rate_limit(&self) -> bool {
        self.min_oil_rate.is_some()
            || self.min_gas_rate.is_some()
            || self.min_liquid_rate.is_some()
            || self.min_reservoir_fluid_rate.is_some()
    }

    pub fn on_any_ratio_limit(&self) -> bool {
        self.max_water_cut.is_some()
            || self.max_gas_oil_ratio.is_some()
            || self.max_water_gas_ratio.is_some()
            || self.max_gas_liquid_ratio.is_some()
    }

    pub fn on_any_effective_limit(&self) -> bool {
        self.on_any_rate_limit() || self.on_any_ratio_limit()
    }
}

/// Source of economic limits per well and report step.
pub trait ScheduleLimits {
    fn econ_limits(&self, well: &str, report_step: usize) -> Option<&EconomicLimits>;
}

/// Limits that do not change over the schedule.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticEconLimits {
    limits: BTreeMap<String, EconomicLimits>,
}

impl StaticEconLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_well(mut self, well: impl Into<String>, limits: EconomicLimits) -> Self {
        self.limits.insert(well.into(), limits);
        self
    }
}

impl ScheduleLimits for StaticEconLimits {
    fn econ_limits(&self, well: &str, _report_step: usize) -> Option<&EconomicLimits> {
        self.limits.get(well)
    }
}

/// Wells and connections closed by economic limits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutList {
    pub shut_wells: Vec<String>,
    pub stopped_wells: Vec<String>,
    /// Well name and the cell of the closed connection.
    pub closed_connections: Vec<(String, usize)>,
}

impl ShutList {
    pub fn is_empty(&self) -> bool {
        self.shut_wells.is_empty() && self.stopped_wells.is_empty() && self.closed_connections.is_empty()
    }

    pub fn is_shut(&self, well: &str) -> bool {
        self.shut_wells.iter().any(|w| w == well)
    }

    pub fn is_stopped(&self, well: &str) -> bool {
        self.stopped_wells.iter().any(|w| w == well)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct RatioViolation {
    last_connection: bool,
    /// Offset of the connection within the well.
    worst_connection: usize,
    extent: Real,
}

impl StandardWells {
    pub fn update_list_econ_limited(
        &self,
        schedule: &dyn ScheduleLimits,
        report_step: usize,
        ws: &WellState,
        list: &mut ShutList,
    ) {
        for (w, well) in self.wells.iter().enumerate() {
            if !well.well_type.is_producer() {
                continue;
            }
            let Some(limits) = schedule.econ_limits(&well.name, report_step) else {
                continue;
            };
            if !limits.on_any_effective_limit() {
                continue;
            }
            if limits.quantity_limit == QuantityLimit::Potential {
                warn!(
                    "POTN limit for well {} is not supported for the moment. All the limits will be evaluated based on RATE.",
                    well.name
                );
            }

            if limits.on_any_rate_limit() && rate_limit_violated(limits, ws.well_rates_of(w)) {
                if limits.end_run {
                    warn!(
                        "ending run after well closed due to economic limits is not supported, the run continues after {} is closed",
                        well.name
                    );
                }
                if limits.followon_well.is_some() {
                    warn!("opening a follow-on well after well {} is closed is not supported", well.name);
                }
                if limits.automatic_shut_in {
                    list.shut_wells.push(well.name.clone());
                    info!("well {} will be shut in due to economic limit", well.name);
                } else {
                    list.stopped_wells.push(well.name.clone());
                    info!("well {} will be stopped due to economic limit", well.name);
                }
                continue;
            }

            if !limits.on_any_ratio_limit() {
                continue;
            }
            if let Some(violation) = self.ratio_limit_violation(limits, w, ws) {
                let cell = well.perforations[violation.worst_connection].cell;
                list.closed_connections.push((well.name.clone(), cell));
                info!(
                    extent = violation.extent,
                    "Connection {} for well {} will be closed due to economic limit",
                    violation.worst_connection,
                    well.name
                );
                if violation.last_connection {
                    list.shut_wells.push(well.name.clone());
                    info!("{} will be shut due to the last connection closed", well.name);
                }
            }
        }
    }

    fn ratio_limit_violation(
        &self,
        limits: &EconomicLimits,
        w: usize,
        ws: &WellState,
    ) -> Option<RatioViolation> {
        let mut worst: Option<RatioViolation> = None;

        if let Some(max_water_cut) = limits.max_water_cut {
            if let Some(v) = self.water_cut_violation(max_water_cut, w, ws) {
                if worst.is_none_or(|cur| v.extent > cur.extent) {
                    worst = Some(v);
                }
            }
        }
        if limits.max_gas_oil_ratio.is_some() {
            warn!("the support for max Gas-Oil ratio is not implemented yet!");
        }
        if limits.max_water_gas_ratio.is_some() {
            warn!("the support for max Water-Gas ratio is not implemented yet!");
        }
        if limits.max_gas_liquid_ratio.is_some() {
            warn!("the support for max Gas-Liquid ratio is not implemented yet!");
        }
        worst
    }

    fn water_cut_violation(
        &self,
        max_water_cut: Real,
        w: usize,
        ws: &WellState,
    ) -> Option<RatioViolation> {
        let rates = ws.well_rates_of(w);
        if water_cut(rates[WATER], rates[OIL]) <= max_water_cut {
            return None;
        }

        let cuts: Vec<Real> = self
            .wells
            .perf_range(w)
            .map(|perf| {
                water_cut(
                    ws.perf_phase_rates[3 * perf + WATER],
                    ws.perf_phase_rates[3 * perf + OIL],
                )
            })
            .collect();

        if cuts.len() == 1 {
            return Some(RatioViolation {
                last_connection: true,
                worst_connection: 0,
                extent: cuts[0] / max_water_cut,
            });
        }

        let mut worst_connection = 0;
        let mut max_cut = 0.0;
        for (i, cut) in cuts.iter().enumerate() {
            if *cut > max_cut {
                worst_connection = i;
                max_cut = *cut;
            }
        }
        Some(RatioViolation {
            last_connection: false,
            worst_connection,
            extent: max_cut / max_water_cut,
        })
    }
}

fn rate_limit_violated(limits: &EconomicLimits, rates: [Real; 3]) -> bool {
    if limits.min_oil_rate.is_some_and(|min| rates[OIL].abs() < min) {
        return true;
    }
    if limits.min_gas_rate.is_some_and(|min| rates[GAS].abs() < min) {
        return true;
    }
    if limits
        .min_liquid_rate
        .is_some_and(|min| (rates[OIL] + rates[WATER]).abs() < min)
    {
        return true;
    }
    if limits.min_reservoir_fluid_rate.is_some() {
        warn!("Minimum reservoir fluid production rate limit is not supported yet");
    }
    false
}

fn water_cut(water: Real, oil: Real) -> Real {
    let liquid = oil + water;
    if liquid != 0.0 { water / liquid } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::WellCollection;
    use crate::model::WellModelParameters;
    use crate::topology::{Well, WellControl, Wells};
    use crate::vfp::VfpTables;
    use rf_core::PhaseUsage;
    use std::sync::Arc;

    fn model(nperf: usize) -> (StandardWells, WellState) {
        let mut prod = Well::producer("PROD").with_control(WellControl::Bhp { target: 1.0e7 });
        for i in 0..nperf {
            prod = prod.with_perforation(i + 2, 1e-12, 1000.0 + i as Real);
        }
        let inj = Well::injector("INJ", [1.0, 0.0, 0.0])
            .with_perforation(0, 1e-12, 1000.0)
            .with_control(WellControl::Bhp { target: 3.0e7 });
        let wells = Wells::new(vec![inj, prod]).unwrap();
        let ws = WellState::new(&wells, PhaseUsage::black_oil(), &[2.0e7; 8]);
        let collection = WellCollection::ungrouped(&wells);
        let model = StandardWells::new(
            wells,
            collection,
            WellModelParameters::default(),
            PhaseUsage::black_oil(),
            Arc::new(VfpTables::new()),
            8,
        )
        .unwrap();
        (model, ws)
    }

    #[test]
    fn low_oil_rate_shuts_producer() {
        let (model, mut ws) = model(1);
        ws.well_rates[3..6].copy_from_slice(&[-0.01, -1.0e-4, -0.1]);
        let limits = StaticEconLimits::new().with_well(
            "PROD",
            EconomicLimits {
                min_oil_rate: Some(1.0e-3),
                ..Default::default()
            },
        );
        let mut list = ShutList::default();
        model.update_list_econ_limited(&limits, 0, &ws, &mut list);
        assert!(list.is_shut("PROD"));
        assert!(list.closed_connections.is_empty());
    }

    #[test]
    fn without_automatic_shut_in_the_well_is_stopped() {
        let (model, mut ws) = model(1);
        ws.well_rates[3..6].copy_from_slice(&[-0.01, -1.0e-4, -0.1]);
        let limits = StaticEconLimits::new().with_well(
            "PROD",
            EconomicLimits {
                min_liquid_rate: Some(1.0),
                automatic_shut_in: false,
                ..Default::default()
            },
        );
        let mut list = ShutList::default();
        model.update_list_econ_limited(&limits, 0, &ws, &mut list);
        assert!(list.is_stopped("PROD"));
        assert!(!list.is_shut("PROD"));
    }

    #[test]
    fn water_cut_closes_the_wettest_connection() {
        let (model, mut ws) = model(3);
        ws.well_rates[3..6].copy_from_slice(&[-0.9, -0.1, 0.0]);
        // Perforations 1..4 belong to the producer, cells 2..5.
        ws.perf_phase_rates[3..12].copy_from_slice(&[
            -0.2, -0.05, 0.0, //
            -0.6, -0.01, 0.0, //
            -0.1, -0.04, 0.0,
        ]);
        let limits = StaticEconLimits::new().with_well(
            "PROD",
            EconomicLimits {
                max_water_cut: Some(0.8),
                ..Default::default()
            },
        );
        let mut list = ShutList::default();
        model.update_list_econ_limited(&limits, 0, &ws, &mut list);
        assert_eq!(list.closed_connections, vec![("PROD".to_string(), 3)]);
        assert!(list.shut_wells.is_empty());
    }

    #[test]
    fn closing_the_last_connection_shuts_the_well() {
        let (model, mut ws) = model(1);
        ws.well_rates[3..6].copy_from_slice(&[-0.9, -0.1, 0.0]);
        ws.perf_phase_rates[3..6].copy_from_slice(&[-0.9, -0.1, 0.0]);
        let limits = StaticEconLimits::new().with_well(
            "PROD",
            EconomicLimits {
                max_water_cut: Some(0.5),
                ..Default::default()
            },
        );
        let mut list = ShutList::default();
        model.update_list_econ_limited(&limits, 0, &ws, &mut list);
        assert_eq!(list.closed_connections, vec![("PROD".to_string(), 2)]);
        assert!(list.is_shut("PROD"));
    }

    #[test]
    fn injectors_are_never_limited() {
        let (model, ws) = model(1);
        let limits = StaticEconLimits::new().with_well(
            "INJ",
            EconomicLimits {
                min_oil_rate: Some(1.0),
                ..Default::default()
            },
        );
        let mut list = ShutList::default();
        model.update_list_econ_limited(&limits, 0, &ws, &mut list);
        assert!(list.is_empty());
    }
}
