use rf_core::{Phase, Real};
use rf_fluids::SimpleBlackOil;
use rf_solver::{
    BlackoilModel, DenseLu, FixedStep, ModelParameters, NonlinearSolver,
    NonlinearSolverParameters, ReservoirState, SolverError, TwoPointFlux,
};
use rf_wells::{VfpTables, Well, WellCollection, WellControl, WellState, Wells};
use std::sync::Arc;

const DAY: Real = 86_400.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn solver(wells: Vec<Well>, nonlinear: NonlinearSolverParameters) -> NonlinearSolver {
    let fluid = Arc::new(SimpleBlackOil::default());
    let grid = Arc::new(TwoPointFlux::line(3, 1000.0, 1.0e-12).unwrap());
    let wells = Wells::new(wells).unwrap();
    let collection = WellCollection::ungrouped(&wells);
    let model = BlackoilModel::new(
        ModelParameters::default(),
        fluid,
        grid,
        wells,
        collection,
        Arc::new(VfpTables::new()),
        Box::new(DenseLu),
    )
    .unwrap();
    NonlinearSolver::new(nonlinear, model)
}

fn initial_state(solver: &NonlinearSolver) -> (ReservoirState, WellState) {
    let state = ReservoirState::uniform(3, 2.0e7, 0.3, 0.1, solver.model().fluid().pvt());
    let ws = solver.model().initial_well_state(&state);
    (state, ws)
}

fn water_in_place(solver: &NonlinearSolver, state: &ReservoirState) -> Real {
    solver
        .model()
        .compute_fluid_in_place(state, &[1, 1, 1])
        .unwrap()[0]
        .water
}

#[test]
fn injector_producer_pair_converges() {
    init_tracing();
    let injector = Well::injector("INJ", [1.0, 0.0, 0.0])
        .with_reference_depth(0.0)
        .with_perforation(0, 1.0e-13, 0.0)
        .with_control(WellControl::Bhp { target: 2.1e7 });
    let producer = Well::producer("PROD")
        .with_reference_depth(0.0)
        .with_perforation(2, 1.0e-13, 0.0)
        .with_control(WellControl::Bhp { target: 1.9e7 });
    let mut solver = solver(vec![injector, producer], NonlinearSolverParameters::default());
    let (mut state, mut ws) = initial_state(&solver);
    let timer = FixedStep::new(0.5 * DAY);

    let report = solver.step(&timer, &mut state, &mut ws).unwrap();

    assert!(report.converged);
    assert!(report.total_newton_iterations >= 2);
    assert_eq!(report.total_linearizations, report.total_newton_iterations + 1);
    assert_eq!(solver.nonlinear_iterations(), report.total_newton_iterations);

    // Bhp wells stay on bhp.
    assert_eq!(ws.current_controls, vec![0, 0]);
    assert_eq!(ws.bhp, vec![2.1e7, 1.9e7]);
    assert!(ws.well_rates[0] > 0.0);
    assert!(ws.well_rates[3 + Phase::Oil.index()] < 0.0);

    assert!(state.pressure[0] > state.pressure[1]);
    assert!(state.pressure[1] > state.pressure[2]);
    assert!(state.saturation(0, Phase::Water) > 0.3);
    for cell in 0..3 {
        let total: Real = Phase::ALL.iter().map(|&p| state.saturation(cell, p)).sum();
        assert!((total - 1.0).abs() < 1e-12, "cell {cell}: {total}");
    }
}

#[test]
fn closed_reservoir_conserves_water() {
    let mut solver = solver(Vec::new(), NonlinearSolverParameters::default());
    let (mut state, mut ws) = initial_state(&solver);
    state.pressure[0] = 2.1e7;
    let before = water_in_place(&solver, &state);
    let timer = FixedStep::new(DAY);

    solver.step(&timer, &mut state, &mut ws).unwrap();

    assert!(state.pressure[0] < 2.1e7);
    assert!(state.pressure[1] > 2.0e7);
    let after = water_in_place(&solver, &state);
    assert!(((after - before) / before).abs() < 1e-4, "{before} -> {after}");
}

#[test]
fn iteration_cap_is_too_many_iterations() {
    let params = NonlinearSolverParameters {
        max_iter: 0,
        min_iter: 0,
        ..Default::default()
    };
    let mut solver = solver(Vec::new(), params);
    let (mut state, mut ws) = initial_state(&solver);
    state.pressure[0] = 2.1e7;

    let err = solver
        .step(&FixedStep::new(DAY), &mut state, &mut ws)
        .unwrap_err();

    assert_eq!(
        err,
        SolverError::TooManyIterations {
            what: "Failed to complete a time step within 0 iterations.".into()
        }
    );
    assert!(err.is_recoverable());
    assert_eq!(solver.failure_report().total_linearizations, 1);
    assert_eq!(solver.linearizations(), 0);
}
