use nalgebra::DVector;
use rf_core::{BlockMatrix, HydroCarbonState, PhaseUsage, Real, SerialCommunicator};
use rf_fluids::{CellFluidState, CellPrimary, FluidSystem, SimpleBlackOil};
use rf_wells::{
    GFRAC, ReservoirLinearization, ReservoirView, StandardWells, VfpTables, WFRAC, Well,
    WellCollection, WellControl, WellModelParameters, WellState, Wells, XVAR,
};
use std::sync::Arc;

const DT: Real = 86_400.0;
const CELL_PRESSURE: Real = 2.0e7;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn reservoir(fluid: &SimpleBlackOil) -> Vec<CellFluidState> {
    vec![
        fluid
            .evaluate(
                0,
                &CellPrimary {
                    pressure: CELL_PRESSURE,
                    water_saturation: 0.3,
                    composition_switch: 0.1,
                    hydrocarbon_state: HydroCarbonState::GasAndOil,
                    solvent_saturation: 0.0,
                    polymer_concentration: 0.0,
                },
            )
            .unwrap(),
    ]
}

fn model(well: Well, params: WellModelParameters) -> (StandardWells, WellState) {
    let wells = Wells::new(vec![well]).unwrap();
    let ws = WellState::new(&wells, PhaseUsage::black_oil(), &[CELL_PRESSURE]);
    let collection = WellCollection::ungrouped(&wells);
    let model = StandardWells::new(
        wells,
        collection,
        params,
        PhaseUsage::black_oil(),
        Arc::new(VfpTables::new()),
        1,
    )
    .unwrap();
    (model, ws)
}

fn water_injector() -> Well {
    Well::injector("INJ", [1.0, 0.0, 0.0])
        .with_reference_depth(1000.0)
        .with_perforation(0, 1.0e-10, 1000.0)
        .with_control(WellControl::Bhp { target: 3.0e7 })
}

#[test]
fn bhp_injector_assembles_into_reservoir() {
    init_tracing();
    let fluid = SimpleBlackOil::default();
    let cells = reservoir(&fluid);
    let comm = SerialCommunicator;
    let view = ReservoirView {
        cells: &cells,
        fluid: &fluid,
        comm: &comm,
        pore_volume: &[1000.0],
        global_num_cells: 1,
    };
    let params = WellModelParameters {
        verbose: true,
        ..Default::default()
    };
    let (mut wells, mut ws) = model(water_injector(), params);

    let mut jacobian = BlockMatrix::block_diagonal(1, 3);
    let mut residual = DVector::zeros(3);
    let mut lin = ReservoirLinearization {
        jacobian: &mut jacobian,
        residual: &mut residual,
    };
    let report = wells
        .assemble(&view, Some(&mut lin), 0, DT, &mut ws)
        .unwrap();

    assert!(report.converged);
    assert!(report.total_well_iterations >= 1);
    let q_perf = ws.perf_phase_rates[0];
    assert!(q_perf > 0.0);
    assert!((ws.well_rates[0] - q_perf).abs() < 1e-8 * q_perf);
    assert_eq!(ws.bhp[0], 3.0e7);

    // Injected water leaves the cell's water balance only.
    assert!((residual[0] + q_perf).abs() < 1e-10 * q_perf);
    assert_eq!(residual[1], 0.0);
    assert_eq!(residual[2], 0.0);
    // More cell pressure, less injection.
    assert!(jacobian.block(0, 0).unwrap()[(0, 0)] > 0.0);
    assert!(wells.residual().amax() < 1e-10);
}

#[test]
fn injector_switches_to_broken_rate_limit() {
    let fluid = SimpleBlackOil::default();
    let cells = reservoir(&fluid);
    let comm = SerialCommunicator;
    let view = ReservoirView {
        cells: &cells,
        fluid: &fluid,
        comm: &comm,
        pore_volume: &[1000.0],
        global_num_cells: 1,
    };
    let well = water_injector().with_control(WellControl::SurfaceRate {
        target: 1.0e-3,
        distr: [1.0, 0.0, 0.0],
    });
    let (mut wells, mut ws) = model(well, WellModelParameters::default());

    let report = wells.assemble(&view, None, 0, DT, &mut ws).unwrap();

    assert!(report.converged);
    assert_eq!(ws.current_controls[0], 1);
    assert!(ws.bhp[0] > CELL_PRESSURE && ws.bhp[0] < 3.0e7);
    assert!((ws.well_rates[0] - 1.0e-3).abs() < 1e-9);
    assert!((ws.perf_phase_rates[0] - 1.0e-3).abs() < 1e-8);
}

#[test]
fn failed_well_solve_restores_state() {
    let fluid = SimpleBlackOil::default();
    let cells = reservoir(&fluid);
    let comm = SerialCommunicator;
    let view = ReservoirView {
        cells: &cells,
        fluid: &fluid,
        comm: &comm,
        pore_volume: &[1000.0],
        global_num_cells: 1,
    };
    let params = WellModelParameters {
        max_welleq_iter: 1,
        ..Default::default()
    };
    let (mut wells, mut ws) = model(water_injector(), params);
    wells.prepare_time_step(&view, &mut ws).unwrap();
    wells.set_well_variables(&ws);
    wells.compute_well_connection_pressures(&view, &ws).unwrap();
    wells.compute_accum_wells(&ws);

    let before = ws.clone();
    let report = wells.solve_well_eq(&view, DT, &mut ws).unwrap();

    assert!(!report.converged);
    assert_eq!(report.total_well_iterations, 1);
    assert_eq!(ws, before);
}

#[test]
fn surface_rate_retarget_preserves_ratios() {
    let well = Well::producer("PROD")
        .with_perforation(0, 1.0e-12, 1000.0)
        .with_control(WellControl::SurfaceRate {
            target: -0.01,
            distr: [0.0, 1.0, 0.0],
        })
        .with_control(WellControl::Bhp { target: 1.0e7 });
    let (mut wells, mut ws) = model(well, WellModelParameters::default());
    ws.well_rates[..3].copy_from_slice(&[-0.002, -0.004, -0.04]);
    ws.bhp[0] = 1.8e7;

    wells.update_well_state_with_target(0, 0, &mut ws).unwrap();

    assert!((ws.well_rates[1] + 0.01).abs() < 1e-15);
    assert!((ws.well_rates[0] / ws.well_rates[1] - 0.5).abs() < 1e-12);
    assert!((ws.well_rates[2] / ws.well_rates[1] - 10.0).abs() < 1e-12);
    assert_eq!(ws.solution(0, XVAR), 1.8e7);
    assert!((ws.solution(0, WFRAC) - 0.3125).abs() < 1e-12);
    assert!((ws.solution(0, GFRAC) - 0.0625).abs() < 1e-12);

    // Rates implied by the well variables reproduce the state.
    wells.set_well_variables(&ws);
    for p in 0..3 {
        let q = wells.get_qs(0, p, &ws).value();
        assert!((q - ws.well_rates[p]).abs() < 1e-12, "phase {p}: {q}");
    }
    let bhp = wells.get_bhp(0, &ws).unwrap();
    assert_eq!(bhp.value(), 1.8e7);
}

#[test]
fn no_wells_is_a_no_op() {
    let fluid = SimpleBlackOil::default();
    let cells = reservoir(&fluid);
    let comm = SerialCommunicator;
    let view = ReservoirView {
        cells: &cells,
        fluid: &fluid,
        comm: &comm,
        pore_volume: &[1000.0],
        global_num_cells: 1,
    };
    let wells = Wells::new(Vec::new()).unwrap();
    let mut ws = WellState::new(&wells, PhaseUsage::black_oil(), &[CELL_PRESSURE]);
    let collection = WellCollection::ungrouped(&wells);
    let mut model = StandardWells::new(
        wells,
        collection,
        WellModelParameters::default(),
        PhaseUsage::black_oil(),
        Arc::new(VfpTables::new()),
        1,
    )
    .unwrap();

    let mut residual = DVector::from_element(3, 1.0);
    let report = model.assemble(&view, None, 0, DT, &mut ws).unwrap();
    model.apply_residual(&mut residual);

    assert!(!report.converged);
    assert_eq!(residual, DVector::from_element(3, 1.0));
}
