//! Mutable per-well solution state.

use crate::topology::{WellControl, Wells};
use rf_core::{PhaseUsage, Real};

/// Bhp under rate control, total rate under bhp/thp control.
pub const XVAR: usize = 0;
pub const WFRAC: usize = 1;
pub const GFRAC: usize = 2;
/// Present only with solvent.
pub const SFRAC: usize = 3;

/// Solution state of all wells.
///
/// Phase-indexed vectors hold three entries per well or perforation
/// (water, oil, gas). `well_solutions` holds `num_well_eq` primary
/// variables per well, contiguous per well. Snapshots are plain clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WellState {
    pub bhp: Vec<Real>,
    pub thp: Vec<Real>,
    pub well_rates: Vec<Real>,
    pub perf_phase_rates: Vec<Real>,
    pub perf_press: Vec<Real>,
    pub perf_rate_solvent: Vec<Real>,
    /// Index into each well's control list.
    pub current_controls: Vec<usize>,
    pub well_solutions: Vec<Real>,
    pub is_new_well: Vec<bool>,
    num_well_eq: usize,
    perf_offsets: Vec<usize>,
}

impl WellState {
    /// Initial state from the cell pressures at the perforations.
    ///
    /// Wells start on their first control, or their group control entry
    /// when they belong to a controlled group. Bhp starts at its target
    /// under bhp control and slightly off the first perforation's cell
    /// pressure otherwise.
    pub fn new(wells: &Wells, phase_usage: PhaseUsage, cell_pressure: &[Real]) -> Self {
        let nw = wells.len();
        let nperf = wells.num_perforations();
        let n_weq = phase_usage.num_eq();
        let mut state = Self {
            bhp: vec![0.0; nw],
            thp: vec![0.0; nw],
            well_rates: vec![0.0; 3 * nw],
            perf_phase_rates: vec![0.0; 3 * nperf],
            perf_press: vec![0.0; nperf],
            perf_rate_solvent: vec![0.0; nperf],
            current_controls: vec![0; nw],
            well_solutions: vec![0.0; n_weq * nw],
            is_new_well: vec![true; nw],
            num_well_eq: n_weq,
            perf_offsets: (0..nw)
                .map(|w| wells.perf_range(w).start)
                .chain(std::iter::once(nperf))
                .collect(),
        };

        for (w, well) in wells.iter().enumerate() {
            let current = well.group_control_index.unwrap_or(0);
            state.current_controls[w] = current;

            let first_cell = well.perforations.first().map(|p| p.cell).unwrap_or(0);
            let p_cell = cell_pressure.get(first_cell).copied().unwrap_or(0.0);
            let control = &well.controls[current];
            state.bhp[w] = match control {
                WellControl::Bhp { target } => *target,
                _ if well.well_type.is_injector() => 1.01 * p_cell,
                _ => 0.99 * p_cell,
            };
            if let WellControl::Thp { target, .. } = control {
                state.thp[w] = *target;
            }
            if let Some(distr) = control.distr() {
                let target = control.target();
                for p in 0..3 {
                    state.well_rates[3 * w + p] = if well.well_type.is_injector() {
                        target * well.comp_frac[p]
                    } else if distr[p] > 0.0 {
                        target * distr[p]
                    } else {
                        0.0
                    };
                }
            }

            let nperf_w = well.perforations.len() as Real;
            for (perf, perforation) in wells.perforations(w) {
                state.perf_press[perf] = cell_pressure
                    .get(perforation.cell)
                    .copied()
                    .unwrap_or(state.bhp[w]);
                for p in 0..3 {
                    state.perf_phase_rates[3 * perf + p] = state.well_rates[3 * w + p] / nperf_w;
                }
            }
        }
        state
    }

    pub fn num_wells(&self) -> usize {
        self.bhp.len()
    }

    pub fn num_well_eq(&self) -> usize {
        self.num_well_eq
    }

    /// Primary well variable `var` of well `w`.
    pub fn solution(&self, w: usize, var: usize) -> Real {
        self.well_solutions[w * self.num_well_eq + var]
    }

    pub fn set_solution(&mut self, w: usize, var: usize, value: Real) {
        self.well_solutions[w * self.num_well_eq + var] = value;
    }

    pub fn well_rate(&self, w: usize, phase: usize) -> Real {
        self.well_rates[3 * w + phase]
    }

    pub fn well_rates_of(&self, w: usize) -> [Real; 3] {
        [
            self.well_rates[3 * w],
            self.well_rates[3 * w + 1],
            self.well_rates[3 * w + 2],
        ]
    }

    /// Solvent surface rate of well `w`, summed over its perforations.
    pub fn solvent_well_rate(&self, w: usize) -> Real {
        match (self.perf_offsets.get(w), self.perf_offsets.get(w + 1)) {
            (Some(&start), Some(&end)) => self.perf_rate_solvent[start..end].iter().sum(),
            _ => 0.0,
        }
    }

    pub fn set_new_well(&mut self, w: usize, is_new: bool) {
        if let Some(flag) = self.is_new_well.get_mut(w) {
            *flag = is_new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Well;

    fn wells() -> Wells {
        let inj = Well::injector("INJ", [1.0, 0.0, 0.0])
            .with_perforation(0, 1e-12, 1000.0)
            .with_control(WellControl::Bhp { target: 3.0e7 });
        let prod = Well::producer("PROD")
            .with_perforation(1, 1e-12, 1000.0)
            .with_perforation(2, 1e-12, 1005.0)
            .with_control(WellControl::SurfaceRate {
                target: -0.01,
                distr: [0.0, 1.0, 0.0],
            });
        Wells::new(vec![inj, prod]).unwrap()
    }

    #[test]
    fn init_follows_first_control() {
        let ws = WellState::new(&wells(), PhaseUsage::black_oil(), &[2.0e7, 2.0e7, 2.1e7]);
        assert_eq!(ws.bhp[0], 3.0e7);
        assert!((ws.bhp[1] - 0.99 * 2.0e7).abs() < 1e-6);
        assert_eq!(ws.well_rate(1, 1), -0.01);
        assert!((ws.perf_phase_rates[3 * 2 + 1] + 0.005).abs() < 1e-15);
        assert_eq!(ws.perf_press[2], 2.1e7);
        assert!(ws.is_new_well.iter().all(|n| *n));
    }

    #[test]
    fn solutions_are_contiguous_per_well() {
        let mut ws = WellState::new(&wells(), PhaseUsage::black_oil(), &[2.0e7; 3]);
        ws.set_solution(1, GFRAC, 0.25);
        assert_eq!(ws.well_solutions[3 + GFRAC], 0.25);
        assert_eq!(ws.solution(1, GFRAC), 0.25);
    }

    #[test]
    fn solvent_rate_sums_perforations() {
        let mut ws = WellState::new(&wells(), PhaseUsage::black_oil().with_solvent(), &[2.0e7; 3]);
        ws.perf_rate_solvent = vec![0.5, 1.0, 2.0];
        assert_eq!(ws.solvent_well_rate(0), 0.5);
        assert_eq!(ws.solvent_well_rate(1), 3.0);
        assert_eq!(ws.num_well_eq(), 4);
    }
}
