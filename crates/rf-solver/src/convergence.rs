//! Mass balance, CNV and well flux convergence measures.

use crate::error::{SolverError, SolverResult};
use crate::params::ModelParameters;
use nalgebra::DVector;
use rf_core::{Communicator, PhaseUsage, Real};
use rf_fluids::CellFluidState;
use tracing::info;

/// Residuals of one Newton iterate together with what is needed to scale
/// them.
pub struct ResidualSnapshot<'a> {
    pub cells: &'a [CellFluidState],
    /// Reservoir residual, `num_eq` entries per cell.
    pub residual: &'a DVector<Real>,
    /// Well residual, `num_eq` entries per well.
    pub well_residual: &'a DVector<Real>,
    pub pore_volume: &'a [Real],
    pub global_num_cells: usize,
    pub comm: &'a dyn Communicator,
    pub phase_usage: PhaseUsage,
}

/// Scaled residual norms per component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceReport {
    pub mass_balance: Vec<Real>,
    pub cnv: Vec<Real>,
    pub well_flux: Vec<Real>,
    pub converged: bool,
}

impl ConvergenceReport {
    /// Log the table row of this iteration, preceded by the header at
    /// iteration 0.
    pub fn log_table(&self, iteration: usize, pu: PhaseUsage) {
        let n = self.cnv.len();
        let key = |c: usize| &pu.component_name(c)[..1];
        if iteration == 0 {
            let mut header = String::from("Iter");
            for c in 0..n {
                header.push_str(&format!("    MB({})  ", key(c)));
            }
            for c in 0..n {
                header.push_str(&format!("    CNV({}) ", key(c)));
            }
            for c in 0..n {
                header.push_str(&format!("  W-FLUX({})", key(c)));
            }
            info!("{header}");
        }
        let mut row = format!("{iteration:>4}");
        for v in self.mass_balance.iter().chain(&self.cnv).chain(&self.well_flux) {
            row.push_str(&format!("{v:>11.3e}"));
        }
        info!("{row}");
    }
}

/// Evaluate all convergence measures of an iterate.
///
/// The CNV criterion only applies while `iteration < max_strict_iter`.
/// NaN or residuals above `max_residual_allowed` for a flowing phase are
/// numerical problems.
pub fn evaluate_convergence(
    snapshot: &ResidualSnapshot<'_>,
    dt: Real,
    iteration: usize,
    params: &ModelParameters,
) -> SolverResult<ConvergenceReport> {
    let pu = snapshot.phase_usage;
    let n_comp = pu.num_eq();

    let mut r_sum = vec![0.0; n_comp];
    let mut b_avg = vec![0.0; n_comp];
    let mut max_coeff = vec![Real::MIN; n_comp];
    let mut max_norm_well = vec![0.0_f64; n_comp];
    let mut pv_sum = 0.0;

    for (cell_idx, (fs, &pv)) in snapshot.cells.iter().zip(snapshot.pore_volume).enumerate() {
        pv_sum += pv;
        for comp in 0..n_comp {
            let inv_b = if comp < 3 {
                fs.inv_b[comp].value()
            } else if Some(comp) == pu.solvent_index() {
                fs.solvent_inv_b.value()
            } else {
                fs.inv_b[0].value()
            };
            b_avg[comp] += 1.0 / inv_b;
            let r = snapshot.residual[cell_idx * n_comp + comp];
            r_sum[comp] += r;
            max_coeff[comp] = max_coeff[comp].max(r.abs() / pv);
        }
    }

    let global_cells = snapshot.global_num_cells.max(1) as Real;
    b_avg.iter_mut().for_each(|b| *b /= global_cells);

    for (idx, r) in snapshot.well_residual.iter().enumerate() {
        let comp = idx % n_comp;
        max_norm_well[comp] = max_norm_well[comp].max(r.abs());
    }

    let comm = snapshot.comm;
    let pv_sum = comm.sum_scalar(pv_sum);
    comm.sum(&mut r_sum);
    comm.sum(&mut b_avg);
    comm.max(&mut max_coeff);
    comm.max(&mut max_norm_well);

    let mut report = ConvergenceReport {
        mass_balance: Vec::with_capacity(n_comp),
        cnv: Vec::with_capacity(n_comp),
        well_flux: Vec::with_capacity(n_comp),
        converged: false,
    };
    let mut converged_mb = true;
    let mut converged_cnv = true;
    let mut converged_well = true;
    for comp in 0..n_comp {
        let cnv = b_avg[comp] * dt * max_coeff[comp];
        let mb = (b_avg[comp] * r_sum[comp]).abs() * dt / pv_sum;
        let well = b_avg[comp] * max_norm_well[comp];
        converged_mb &= mb < params.tolerance_mb;
        converged_cnv &= cnv < params.tolerance_cnv;
        converged_well &= well < params.tolerance_wells;
        report.cnv.push(cnv);
        report.mass_balance.push(mb);
        report.well_flux.push(well);
    }

    report.converged = converged_mb && converged_well;
    if iteration < params.max_strict_iter {
        report.converged &= converged_cnv;
    }

    if params.terminal_output && comm.is_io_rank() {
        report.log_table(iteration, pu);
    }

    for phase in 0..pu.num_phases() {
        let name = pu.component_name(phase);
        let values = [
            report.mass_balance[phase],
            report.cnv[phase],
            report.well_flux[phase],
        ];
        if values.iter().any(|v| v.is_nan()) {
            return Err(SolverError::NumericalProblem {
                what: format!("NaN residual for phase {name}"),
            });
        }
        if values.iter().any(|v| *v > params.max_residual_allowed) {
            return Err(SolverError::NumericalProblem {
                what: format!("Too large residual for phase {name}"),
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::{HydroCarbonState, SerialCommunicator};
    use rf_fluids::{CellPrimary, FluidSystem, SimpleBlackOil};

    fn cells(n: usize) -> Vec<CellFluidState> {
        let fluid = SimpleBlackOil::default();
        (0..n)
            .map(|c| {
                fluid
                    .evaluate(
                        c,
                        &CellPrimary {
                            pressure: 2.0e7,
                            water_saturation: 0.3,
                            composition_switch: 0.1,
                            hydrocarbon_state: HydroCarbonState::GasAndOil,
                            solvent_saturation: 0.0,
                            polymer_concentration: 0.0,
                        },
                    )
                    .unwrap()
            })
            .collect()
    }

    fn params() -> ModelParameters {
        ModelParameters {
            terminal_output: false,
            ..Default::default()
        }
    }

    #[test]
    fn zero_residual_converges() {
        let cells = cells(3);
        let residual = DVector::zeros(9);
        let well_residual = DVector::zeros(6);
        let snapshot = ResidualSnapshot {
            cells: &cells,
            residual: &residual,
            well_residual: &well_residual,
            pore_volume: &[10.0; 3],
            global_num_cells: 3,
            comm: &SerialCommunicator,
            phase_usage: PhaseUsage::black_oil(),
        };
        let report = evaluate_convergence(&snapshot, 86_400.0, 0, &params()).unwrap();
        assert!(report.converged);
        assert_eq!(report.cnv, vec![0.0; 3]);
    }

    #[test]
    fn cnv_is_relaxed_after_strict_iterations() {
        let cells = cells(2);
        let mut residual = DVector::zeros(6);
        // Balanced over the domain, large locally.
        residual[0] = 1.0e-3;
        residual[3] = -1.0e-3;
        let well_residual = DVector::zeros(0);
        let snapshot = ResidualSnapshot {
            cells: &cells,
            residual: &residual,
            well_residual: &well_residual,
            pore_volume: &[1.0; 2],
            global_num_cells: 2,
            comm: &SerialCommunicator,
            phase_usage: PhaseUsage::black_oil(),
        };
        let p = params();
        let strict = evaluate_convergence(&snapshot, 86_400.0, 0, &p).unwrap();
        assert!(strict.cnv[0] > p.tolerance_cnv);
        assert!(strict.mass_balance[0] < 1e-15);
        assert!(!strict.converged);

        let relaxed = evaluate_convergence(&snapshot, 86_400.0, p.max_strict_iter, &p).unwrap();
        assert!(relaxed.converged);
    }

    #[test]
    fn well_residual_is_scaled_by_average_b() {
        let cells = cells(1);
        let residual = DVector::zeros(3);
        let mut well_residual = DVector::zeros(6);
        well_residual[4] = -2.0e-3;
        let snapshot = ResidualSnapshot {
            cells: &cells,
            residual: &residual,
            well_residual: &well_residual,
            pore_volume: &[1.0],
            global_num_cells: 1,
            comm: &SerialCommunicator,
            phase_usage: PhaseUsage::black_oil(),
        };
        let report = evaluate_convergence(&snapshot, 1.0, 0, &params()).unwrap();
        let b_oil = 1.0 / cells[0].inv_b[1].value();
        assert!((report.well_flux[1] - 2.0e-3 * b_oil).abs() < 1e-15);
        assert!(!report.converged);
    }

    #[test]
    fn nan_residual_is_a_numerical_problem() {
        let cells = cells(1);
        let mut residual = DVector::zeros(3);
        residual[2] = Real::NAN;
        let well_residual = DVector::zeros(0);
        let snapshot = ResidualSnapshot {
            cells: &cells,
            residual: &residual,
            well_residual: &well_residual,
            pore_volume: &[1.0],
            global_num_cells: 1,
            comm: &SerialCommunicator,
            phase_usage: PhaseUsage::black_oil(),
        };
        let err = evaluate_convergence(&snapshot, 1.0, 0, &params()).unwrap_err();
        assert_eq!(
            err,
            SolverError::NumericalProblem {
                what: "NaN residual for phase GAS".into()
            }
        );
    }

    #[test]
    fn oversized_residual_is_a_numerical_problem() {
        let cells = cells(1);
        let mut residual = DVector::zeros(3);
        residual[0] = 1.0e3;
        let well_residual = DVector::zeros(0);
        let snapshot = ResidualSnapshot {
            cells: &cells,
            residual: &residual,
            well_residual: &well_residual,
            pore_volume: &[1.0e-3],
            global_num_cells: 1,
            comm: &SerialCommunicator,
            phase_usage: PhaseUsage::black_oil(),
        };
        let err = evaluate_convergence(&snapshot, 86_400.0, 0, &params()).unwrap_err();
        assert!(err.to_string().contains("Too large residual for phase WATER"));
    }
}
