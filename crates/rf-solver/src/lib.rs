//! rf-solver: nonlinear iteration driver for the reservoir flow core.
//!
//! Contains:
//! - reservoir (per-cell unknowns and hydrocarbon state)
//! - discretization (flux oracle trait + two-point flux reference)
//! - linear (linear solve oracle, well-reduced operator, dense LU, BiCGStab)
//! - convergence (mass balance, CNV and well flux measures)
//! - update (chopped Newton update with phase transitions)
//! - model (BlackoilModel: assembly, one Newton iteration, fluid in place)
//! - nonlinear (NonlinearSolver: Newton loop, oscillation damping)
//! - timer (what the driver needs from a simulation timer)
//! - params (YAML-loadable tuning)
//! - error (solver error taxonomy)

pub mod convergence;
pub mod discretization;
pub mod error;
pub mod linear;
pub mod model;
pub mod nonlinear;
pub mod params;
pub mod reservoir;
pub mod timer;
pub mod update;

// Re-exports
pub use convergence::{ConvergenceReport, ResidualSnapshot, evaluate_convergence};
pub use discretization::{Connection, Discretization, TwoPointFlux};
pub use error::{SolverError, SolverResult};
pub use linear::{
    BiCgStab, DenseLu, LinearOperator, LinearSolveReport, LinearSolver, WellModelOperator,
};
pub use model::{BlackoilModel, FluidInPlace};
pub use nonlinear::{NonlinearSolver, detect_oscillations, stabilize_nonlinear_update};
pub use params::{ModelParameters, NonlinearSolverParameters, RelaxType};
pub use reservoir::ReservoirState;
pub use timer::{FixedStep, SimulatorTimerInterface};
pub use update::update_reservoir_state;
