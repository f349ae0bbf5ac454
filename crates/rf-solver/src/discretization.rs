//! Spatial discretization oracle.
//!
//! The model owns accumulation terms and well sources; a discretization
//! contributes the inter-cell flux terms of the current iterate and tells
//! the model which cells couple.

use crate::error::{SolverError, SolverResult};
use nalgebra::DVector;
use rayon::prelude::*;
use rf_core::constants::G0_MPS2;
use rf_core::{BlockMatrix, Eval, Phase, PhaseUsage, Real, RfError};
use rf_fluids::CellFluidState;

pub trait Discretization: Send + Sync {
    fn num_cells(&self) -> usize;

    /// Cell count over all partitions.
    fn global_num_cells(&self) -> usize {
        self.num_cells()
    }

    fn pore_volume(&self) -> &[Real];

    /// Block columns of each cell's Jacobian row, the cell itself included.
    fn stencil(&self) -> Vec<Vec<usize>>;

    /// Add the flux terms of all cells to `residual` and `jacobian`.
    ///
    /// `cells` holds the fluid state of every cell at the current iterate,
    /// with derivatives relative to the cell's own primary variables.
    fn add_flux_terms(
        &self,
        cells: &[CellFluidState],
        pu: PhaseUsage,
        jacobian: &mut BlockMatrix,
        residual: &mut DVector<Real>,
    ) -> SolverResult<()>;
}

/// A face between two cells.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Connection {
    pub cells: (usize, usize),
    /// Geometric transmissibility (m³).
    pub transmissibility: Real,
}

/// Two-point flux approximation with phase upwinding over an explicit
/// connection list.
#[derive(Clone, Debug)]
pub struct TwoPointFlux {
    pore_volume: Vec<Real>,
    depth: Vec<Real>,
    connections: Vec<Connection>,
    gravity: Real,
}

impl TwoPointFlux {
    pub fn new(
        pore_volume: Vec<Real>,
        depth: Vec<Real>,
        connections: Vec<Connection>,
    ) -> SolverResult<Self> {
        let n = pore_volume.len();
        if depth.len() != n {
            return Err(SolverError::InvalidConfig {
                what: format!("{} cell depths for {n} cells", depth.len()),
            });
        }
        if let Some(pv) = pore_volume.iter().find(|pv| !pv.is_finite() || **pv <= 0.0) {
            return Err(SolverError::InvalidConfig {
                what: format!("non-positive pore volume {pv}"),
            });
        }
        for c in &connections {
            let (i, j) = c.cells;
            if i >= n || j >= n || i == j {
                return Err(SolverError::InvalidConfig {
                    what: format!("connection ({i}, {j}) in a {n}-cell grid"),
                });
            }
        }
        Ok(Self {
            pore_volume,
            depth,
            connections,
            gravity: G0_MPS2,
        })
    }

    /// Horizontal row of identical cells.
    pub fn line(num_cells: usize, pore_volume: Real, transmissibility: Real) -> SolverResult<Self> {
        let connections = (1..num_cells)
            .map(|i| Connection {
                cells: (i - 1, i),
                transmissibility,
            })
            .collect();
        Self::new(
            vec![pore_volume; num_cells],
            vec![0.0; num_cells],
            connections,
        )
    }

    pub fn with_gravity(mut self, gravity: Real) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Component fluxes from `ci` to `cj` in surface volumes per second.
    fn connection_flux(
        &self,
        conn: &Connection,
        ci: &CellFluidState,
        cj: &CellFluidState,
        pu: PhaseUsage,
    ) -> Vec<Eval> {
        let (i, j) = conn.cells;
        let dz = self.depth[i] - self.depth[j];
        let t = conn.transmissibility;

        let mut potential = [Eval::constant(0.0); 3];
        let mut upwind_i = [true; 3];
        for phase in Phase::ALL {
            let p = phase.index();
            let rho = (ci.density[p] + cj.density[p]) * 0.5;
            potential[p] = ci.pressure - cj.pressure - rho * (self.gravity * dz);
            upwind_i[p] = potential[p].value() > 0.0;
        }
        let up = |p: usize| if upwind_i[p] { ci } else { cj };

        let mut phase_flux = [Eval::constant(0.0); 3];
        for phase in Phase::ALL {
            let p = phase.index();
            let cell = up(p);
            let mut mobility = cell.mobility[p];
            if phase == Phase::Water && pu.has_polymer {
                mobility = mobility / cell.polymer_viscosity_multiplier;
            }
            phase_flux[p] = mobility * cell.inv_b[p] * potential[p] * t;
        }

        let water = Phase::Water.index();
        let oil = Phase::Oil.index();
        let gas = Phase::Gas.index();

        let mut flux = vec![Eval::constant(0.0); pu.num_eq()];
        flux[water] = phase_flux[water];
        flux[oil] = phase_flux[oil] + up(gas).rv * phase_flux[gas];
        flux[gas] = phase_flux[gas] + up(oil).rs * phase_flux[oil];
        if let Some(si) = pu.solvent_index() {
            let cell = up(gas);
            flux[si] = cell.solvent_mobility * cell.solvent_inv_b * potential[gas] * t;
        }
        if let Some(pi) = pu.polymer_index() {
            flux[pi] = up(water).polymer_concentration * phase_flux[water];
        }
        flux
    }
}

/// Same quantities with all derivatives dropped.
fn detached(cell: &CellFluidState) -> CellFluidState {
    let d = |arr: &[Eval; 3]| arr.map(|e| e.detached());
    CellFluidState {
        pressure: cell.pressure.detached(),
        saturation: d(&cell.saturation),
        inv_b: d(&cell.inv_b),
        mobility: d(&cell.mobility),
        density: d(&cell.density),
        rs: cell.rs.detached(),
        rv: cell.rv.detached(),
        solvent_saturation: cell.solvent_saturation.detached(),
        solvent_inv_b: cell.solvent_inv_b.detached(),
        solvent_mobility: cell.solvent_mobility.detached(),
        polymer_concentration: cell.polymer_concentration.detached(),
        polymer_viscosity_multiplier: cell.polymer_viscosity_multiplier.detached(),
    }
}

fn block_error(row: usize, col: usize) -> SolverError {
    SolverError::Core(RfError::IndexOob {
        what: "Jacobian block outside the stencil",
        index: col,
        len: row,
    })
}

impl Discretization for TwoPointFlux {
    fn num_cells(&self) -> usize {
        self.pore_volume.len()
    }

    fn pore_volume(&self) -> &[Real] {
        &self.pore_volume
    }

    fn stencil(&self) -> Vec<Vec<usize>> {
        let mut stencil: Vec<Vec<usize>> = (0..self.num_cells()).map(|c| vec![c]).collect();
        for c in &self.connections {
            let (i, j) = c.cells;
            stencil[i].push(j);
            stencil[j].push(i);
        }
        stencil
    }

    fn add_flux_terms(
        &self,
        cells: &[CellFluidState],
        pu: PhaseUsage,
        jacobian: &mut BlockMatrix,
        residual: &mut DVector<Real>,
    ) -> SolverResult<()> {
        let n_eq = pu.num_eq();
        if cells.len() != self.num_cells() {
            return Err(SolverError::InvalidConfig {
                what: format!(
                    "{} cell states for a {}-cell grid",
                    cells.len(),
                    self.num_cells()
                ),
            });
        }

        // Fluxes differentiated once per side of each face.
        let fluxes: Vec<(Vec<Eval>, Vec<Eval>)> = self
            .connections
            .par_iter()
            .map(|conn| {
                let (i, j) = conn.cells;
                let wrt_i = self.connection_flux(conn, &cells[i], &detached(&cells[j]), pu);
                let wrt_j = self.connection_flux(conn, &detached(&cells[i]), &cells[j], pu);
                (wrt_i, wrt_j)
            })
            .collect();

        for (conn, (wrt_i, wrt_j)) in self.connections.iter().zip(&fluxes) {
            let (i, j) = conn.cells;
            for comp in 0..n_eq {
                let f = wrt_i[comp].value();
                residual[i * n_eq + comp] += f;
                residual[j * n_eq + comp] -= f;
            }
            for (row, col, sign, flux) in [
                (i, i, 1.0, wrt_i),
                (i, j, 1.0, wrt_j),
                (j, i, -1.0, wrt_i),
                (j, j, -1.0, wrt_j),
            ] {
                let block = jacobian
                    .block_mut(row, col)
                    .ok_or_else(|| block_error(row, col))?;
                for comp in 0..n_eq {
                    for pv in 0..n_eq {
                        block[(comp, pv)] += sign * flux[comp].derivative(pv);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::HydroCarbonState;
    use rf_fluids::{CellPrimary, FluidSystem, SimpleBlackOil};

    fn cell(fluid: &SimpleBlackOil, p: Real) -> CellFluidState {
        fluid
            .evaluate(
                0,
                &CellPrimary {
                    pressure: p,
                    water_saturation: 0.3,
                    composition_switch: 0.1,
                    hydrocarbon_state: HydroCarbonState::GasAndOil,
                    solvent_saturation: 0.0,
                    polymer_concentration: 0.0,
                },
            )
            .unwrap()
    }

    #[test]
    fn rejects_self_connections() {
        let err = TwoPointFlux::new(
            vec![1.0; 2],
            vec![0.0; 2],
            vec![Connection {
                cells: (1, 1),
                transmissibility: 1.0,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SolverError::InvalidConfig { .. }));
    }

    #[test]
    fn flux_leaves_high_pressure_cell() {
        let fluid = SimpleBlackOil::default();
        let grid = TwoPointFlux::line(2, 100.0, 1.0e-12).unwrap();
        let cells = vec![cell(&fluid, 2.1e7), cell(&fluid, 2.0e7)];
        let mut jac = BlockMatrix::from_pattern(2, 3, 3, &grid.stencil()).unwrap();
        let mut res = DVector::zeros(6);

        grid.add_flux_terms(&cells, fluid.phase_usage(), &mut jac, &mut res)
            .unwrap();

        for comp in 0..3 {
            assert!(res[comp] > 0.0, "component {comp}");
            assert!((res[comp] + res[3 + comp]).abs() < 1e-12 * res[comp].abs());
        }
        // More upstream pressure, more outflow; more downstream pressure, less.
        assert!(jac.block(0, 0).unwrap()[(0, 0)] > 0.0);
        assert!(jac.block(0, 1).unwrap()[(0, 0)] < 0.0);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let fluid = SimpleBlackOil::default();
        let grid = TwoPointFlux::line(2, 100.0, 1.0e-12).unwrap();
        let pu = fluid.phase_usage();
        let residual_at = |p1: Real| {
            let cells = vec![cell(&fluid, 2.1e7), cell(&fluid, p1)];
            let mut jac = BlockMatrix::from_pattern(2, 3, 3, &grid.stencil()).unwrap();
            let mut res = DVector::zeros(6);
            grid.add_flux_terms(&cells, pu, &mut jac, &mut res).unwrap();
            (res, jac)
        };
        let h = 10.0;
        let (r0, jac) = residual_at(2.0e7);
        let (r1, _) = residual_at(2.0e7 + h);
        for comp in 0..3 {
            let fd = (r1[comp] - r0[comp]) / h;
            let ad = jac.block(0, 1).unwrap()[(comp, 0)];
            assert!((fd - ad).abs() <= 1e-4 * ad.abs(), "{comp}: {fd} vs {ad}");
        }
    }
}
