//! Tuning parameters of the reservoir model and the Newton loop.

use crate::error::{SolverError, SolverResult};
use rf_core::Real;
use rf_wells::{PotentialParameters, WellModelParameters};
use serde::{Deserialize, Serialize};

/// Parameters of the reservoir model, including the well model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Max relative change in pressure in a single iteration.
    pub dp_max_rel: Real,
    /// Max absolute change in saturation in a single iteration.
    pub ds_max: Real,
    /// Max relative change in bhp under rate control in a single iteration.
    pub dbhp_max_rel: Real,
    /// Max absolute change in a well volume fraction in a single iteration.
    pub dwell_fraction_max: Real,
    /// Absolute ceiling on any scaled residual.
    pub max_residual_allowed: Real,
    /// Relative mass balance tolerance (total mass balance error).
    pub tolerance_mb: Real,
    /// Local convergence tolerance (maximum of local saturation errors).
    pub tolerance_cnv: Real,
    /// Well convergence tolerance.
    pub tolerance_wells: Real,
    /// Iterations before the CNV criterion is relaxed.
    pub max_strict_iter: usize,
    /// Solve the well equations before each Newton step's first iteration.
    pub solve_welleq_initially: bool,
    pub max_welleq_iter: usize,
    pub thp_potential: PotentialParameters,
    /// Log the convergence table and relaxation notices.
    pub terminal_output: bool,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            dp_max_rel: 0.3,
            ds_max: 0.2,
            dbhp_max_rel: 1.0,
            dwell_fraction_max: 0.2,
            max_residual_allowed: 1.0e7,
            tolerance_mb: 1.0e-5,
            tolerance_cnv: 1.0e-2,
            tolerance_wells: 1.0e-4,
            max_strict_iter: 8,
            solve_welleq_initially: true,
            max_welleq_iter: 15,
            thp_potential: PotentialParameters::default(),
            terminal_output: true,
        }
    }
}

impl ModelParameters {
    pub fn from_yaml_str(yaml: &str) -> SolverResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SolverError::InvalidConfig {
            what: format!("model parameters: {e}"),
        })
    }

    /// The subset seen by the well model.
    pub fn well_parameters(&self) -> WellModelParameters {
        WellModelParameters {
            dbhp_max_rel: self.dbhp_max_rel,
            dwell_fraction_max: self.dwell_fraction_max,
            max_residual_allowed: self.max_residual_allowed,
            tolerance_wells: self.tolerance_wells,
            solve_welleq_initially: self.solve_welleq_initially,
            max_welleq_iter: self.max_welleq_iter,
            potentials: self.thp_potential.clone(),
            verbose: false,
        }
    }
}

/// How oscillating updates are damped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelaxType {
    /// Scale the update by the relaxation factor.
    #[default]
    Dampen,
    /// Blend the update with the previous one.
    Sor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearSolverParameters {
    pub max_iter: usize,
    pub min_iter: usize,
    pub relax_type: RelaxType,
    /// Lower bound of the relaxation factor.
    pub relax_max: Real,
    /// Relaxation decrement applied per detected oscillation.
    pub relax_increment: Real,
    /// Relative residual change that counts as oscillation.
    pub relax_rel_tol: Real,
}

impl Default for NonlinearSolverParameters {
    fn default() -> Self {
        Self {
            max_iter: 10,
            min_iter: 1,
            relax_type: RelaxType::Dampen,
            relax_max: 0.5,
            relax_increment: 0.1,
            relax_rel_tol: 0.2,
        }
    }
}

impl NonlinearSolverParameters {
    pub fn from_yaml_str(yaml: &str) -> SolverResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SolverError::InvalidConfig {
            what: format!("nonlinear solver parameters: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let p = ModelParameters::from_yaml_str("tolerance_cnv: 0.001\nmax_strict_iter: 4\n").unwrap();
        assert_eq!(p.tolerance_cnv, 0.001);
        assert_eq!(p.max_strict_iter, 4);
        assert_eq!(p.ds_max, 0.2);
        assert_eq!(p.thp_potential.max_iter, 1000);
    }

    #[test]
    fn relax_type_parses_lowercase() {
        let p = NonlinearSolverParameters::from_yaml_str("relax_type: sor\nmax_iter: 20\n").unwrap();
        assert_eq!(p.relax_type, RelaxType::Sor);
        assert_eq!(p.max_iter, 20);
        assert_eq!(p.min_iter, 1);
    }

    #[test]
    fn unknown_relax_type_is_a_config_error() {
        let err = NonlinearSolverParameters::from_yaml_str("relax_type: wobble\n").unwrap_err();
        assert!(matches!(err, SolverError::InvalidConfig { .. }));
    }

    #[test]
    fn well_parameters_follow_model_parameters() {
        let p = ModelParameters {
            tolerance_wells: 1.0e-6,
            max_welleq_iter: 3,
            ..Default::default()
        };
        let w = p.well_parameters();
        assert_eq!(w.tolerance_wells, 1.0e-6);
        assert_eq!(w.max_welleq_iter, 3);
        assert_eq!(w.dbhp_max_rel, 1.0);
    }
}
