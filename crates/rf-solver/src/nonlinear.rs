//! Newton loop over one time step, with oscillation damping.

use crate::error::{SolverError, SolverResult};
use crate::model::BlackoilModel;
use crate::params::{NonlinearSolverParameters, RelaxType};
use crate::reservoir::ReservoirState;
use crate::timer::SimulatorTimerInterface;
use nalgebra::DVector;
use rf_core::{Real, SimulatorReport};
use rf_wells::WellState;
use tracing::debug;

/// Residual change below which a component is considered stagnant.
const STAGNATION_TOL: Real = 1.0e-3;

pub struct NonlinearSolver {
    params: NonlinearSolverParameters,
    model: BlackoilModel,
    failure_report: SimulatorReport,
    linearizations: usize,
    nonlinear_iterations: usize,
    linear_iterations: usize,
    well_iterations: usize,
    nonlinear_iterations_last: usize,
    linear_iterations_last: usize,
    well_iterations_last: usize,
}

impl NonlinearSolver {
    pub fn new(params: NonlinearSolverParameters, model: BlackoilModel) -> Self {
        Self {
            params,
            model,
            failure_report: SimulatorReport::default(),
            linearizations: 0,
            nonlinear_iterations: 0,
            linear_iterations: 0,
            well_iterations: 0,
            nonlinear_iterations_last: 0,
            linear_iterations_last: 0,
            well_iterations_last: 0,
        }
    }

    /// Solve one time step of length `timer.current_step_length()`.
    ///
    /// Iterates until converged, but at least past `min_iter` and at most
    /// `max_iter + 1` linearizations. On error the state is left at the
    /// last iterate; restoring it is up to the caller.
    pub fn step(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        state: &mut ReservoirState,
        ws: &mut WellState,
    ) -> SolverResult<SimulatorReport> {
        let mut report = SimulatorReport::default();
        self.failure_report = SimulatorReport::default();

        self.model.prepare_step(state)?;

        let mut iteration = 0;
        let converged = loop {
            let iter_report =
                match self
                    .model
                    .nonlinear_iteration(iteration, timer, &self.params, state, ws)
                {
                    Ok(r) => r,
                    Err(e) => {
                        self.failure_report += self.model.failure_report();
                        return Err(e);
                    }
                };
            report += &iter_report;
            iteration += 1;
            let converged = iter_report.converged;
            let keep_going = (!converged && iteration <= self.params.max_iter)
                || iteration <= self.params.min_iter;
            if !keep_going {
                break converged;
            }
        };

        if !converged {
            self.failure_report = report;
            return Err(SolverError::TooManyIterations {
                what: format!(
                    "Failed to complete a time step within {} iterations.",
                    self.params.max_iter
                ),
            });
        }

        self.linearizations += report.total_linearizations;
        self.nonlinear_iterations += report.total_newton_iterations;
        self.linear_iterations += report.total_linear_iterations;
        self.well_iterations += report.total_well_iterations;
        self.nonlinear_iterations_last = report.total_newton_iterations;
        self.linear_iterations_last = report.total_linear_iterations;
        self.well_iterations_last = report.total_well_iterations;
        debug!(
            newton = report.total_newton_iterations,
            linear = report.total_linear_iterations,
            "time step converged"
        );

        self.model.after_step(timer, state, ws);
        report.converged = true;
        Ok(report)
    }

    pub fn params(&self) -> &NonlinearSolverParameters {
        &self.params
    }

    pub fn model(&self) -> &BlackoilModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut BlackoilModel {
        &mut self.model
    }

    /// Statistics of the last failed step.
    pub fn failure_report(&self) -> &SimulatorReport {
        &self.failure_report
    }

    pub fn linearizations(&self) -> usize {
        self.linearizations
    }

    pub fn nonlinear_iterations(&self) -> usize {
        self.nonlinear_iterations
    }

    pub fn linear_iterations(&self) -> usize {
        self.linear_iterations
    }

    pub fn well_iterations(&self) -> usize {
        self.well_iterations
    }

    pub fn nonlinear_iterations_last_step(&self) -> usize {
        self.nonlinear_iterations_last
    }

    pub fn linear_iterations_last_step(&self) -> usize {
        self.linear_iterations_last
    }

    pub fn well_iterations_last_step(&self) -> usize {
        self.well_iterations_last
    }

    /// `(oscillating, stagnating)`; see [`detect_oscillations`].
    pub fn detect_oscillations(&self, history: &[Vec<Real>], iteration: usize) -> (bool, bool) {
        detect_oscillations(history, iteration, self.params.relax_rel_tol)
    }
}

/// Inspect the last three residual norm vectors.
///
/// A component oscillates when its newest norm is close to the one two
/// iterations back but far from the previous one. The iterate oscillates
/// when more than one component does, and stagnates when no component
/// changed significantly between the two older iterations.
pub fn detect_oscillations(history: &[Vec<Real>], iteration: usize, rel_tol: Real) -> (bool, bool) {
    let n = history.len();
    if iteration < 2 || n < 3 {
        return (false, false);
    }
    let f0 = &history[n - 1];
    let f1 = &history[n - 2];
    let f2 = &history[n - 3];

    let mut oscillating = 0;
    let mut stagnate = true;
    for ((a, b), c) in f0.iter().zip(f1).zip(f2) {
        let d1 = ((a - c) / a).abs();
        let d2 = ((a - b) / a).abs();
        if d1 < rel_tol && rel_tol < d2 {
            oscillating += 1;
        }
        stagnate = stagnate && ((b - c) / c).abs() <= STAGNATION_TOL;
    }
    (oscillating > 1, stagnate)
}

/// Apply relaxation `omega` to the update `dx`.
///
/// `dx_old` receives the unrelaxed update. A factor of one leaves both
/// untouched.
pub fn stabilize_nonlinear_update(
    dx: &mut DVector<Real>,
    dx_old: &mut DVector<Real>,
    omega: Real,
    relax_type: RelaxType,
) {
    if omega == 1.0 {
        return;
    }
    let previous = std::mem::replace(dx_old, dx.clone());
    match relax_type {
        RelaxType::Dampen => *dx *= omega,
        RelaxType::Sor => {
            *dx *= omega;
            dx.axpy(1.0 - omega, &previous, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_history_never_oscillates() {
        let history = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        assert_eq!(detect_oscillations(&history, 1, 0.2), (false, false));
    }

    #[test]
    fn two_components_flipping_back_oscillate() {
        let history = vec![vec![1.0, 1.0, 1.0], vec![3.0, 3.0, 1.0], vec![1.05, 1.05, 1.0]];
        let (oscillate, stagnate) = detect_oscillations(&history, 2, 0.2);
        assert!(oscillate);
        assert!(!stagnate);
    }

    #[test]
    fn one_oscillating_component_is_not_enough() {
        let history = vec![vec![1.0, 1.0], vec![3.0, 0.5], vec![1.05, 0.25]];
        assert!(!detect_oscillations(&history, 2, 0.2).0);
    }

    #[test]
    fn unchanged_norms_stagnate() {
        let history = vec![vec![1.0, 2.0], vec![1.0, 2.0], vec![0.5, 1.0]];
        let (_, stagnate) = detect_oscillations(&history, 2, 0.2);
        assert!(stagnate);
    }

    #[test]
    fn dampen_scales_update() {
        let mut dx = DVector::from_vec(vec![2.0, -4.0]);
        let mut dx_old = DVector::zeros(2);
        stabilize_nonlinear_update(&mut dx, &mut dx_old, 0.5, RelaxType::Dampen);
        assert_eq!(dx, DVector::from_vec(vec![1.0, -2.0]));
        assert_eq!(dx_old, DVector::from_vec(vec![2.0, -4.0]));
    }

    #[test]
    fn sor_blends_with_previous_update() {
        let mut dx = DVector::from_vec(vec![2.0]);
        let mut dx_old = DVector::from_vec(vec![4.0]);
        stabilize_nonlinear_update(&mut dx, &mut dx_old, 0.75, RelaxType::Sor);
        assert!((dx[0] - 2.5).abs() < 1e-15);
        assert_eq!(dx_old[0], 2.0);
    }

    #[test]
    fn unit_relaxation_is_identity() {
        let mut dx = DVector::from_vec(vec![2.0]);
        let mut dx_old = DVector::from_vec(vec![4.0]);
        stabilize_nonlinear_update(&mut dx, &mut dx_old, 1.0, RelaxType::Sor);
        assert_eq!(dx[0], 2.0);
        assert_eq!(dx_old[0], 4.0);
    }
}
