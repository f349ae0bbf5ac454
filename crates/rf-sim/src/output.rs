//! Hook for writing intermediate substep results.

use crate::error::SimResult;
use rf_solver::{FluidInPlace, ReservoirState, SimulatorTimerInterface};
use rf_wells::WellState;

/// Receives the state after converged substeps.
pub trait OutputWriter {
    /// `substep` is true for substeps inside a report step. `fip` holds
    /// the fluid in place per region when a region map was supplied.
    fn write_timestep(
        &mut self,
        timer: &dyn SimulatorTimerInterface,
        state: &ReservoirState,
        well_state: &WellState,
        substep: bool,
        fip: Option<&[FluidInPlace]>,
    ) -> SimResult<()>;
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOutput;

impl OutputWriter for NoOutput {
    fn write_timestep(
        &mut self,
        _timer: &dyn SimulatorTimerInterface,
        _state: &ReservoirState,
        _well_state: &WellState,
        _substep: bool,
        _fip: Option<&[FluidInPlace]>,
    ) -> SimResult<()> {
        Ok(())
    }
}
