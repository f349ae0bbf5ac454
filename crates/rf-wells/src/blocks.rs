//! Dense per-well block system coupled to the reservoir unknowns.
//!
//! The full linearized system is
//!
//! ```text
//! [ A  Bᵀ ] [ x  ]   [ r  ]
//! [ C  D  ] [ xw ] = [ rw ]
//! ```
//!
//! with `A` the reservoir Jacobian. `B` is stored as (well × cell) blocks of
//! shape (well unknowns × reservoir equations) so that `Bᵀ` maps well
//! vectors onto reservoir vectors; `C` is (well × cell) with shape
//! (well equations × reservoir unknowns); `D` is block diagonal. Eliminating
//! `xw` gives the reservoir operator `A − Bᵀ D⁻¹ C`.

use crate::error::{WellError, WellResult};
use crate::topology::Wells;
use nalgebra::DVector;
use rf_core::{BlockMatrix, Real, RfError};

#[derive(Clone, Debug, PartialEq)]
pub struct WellSystem {
    pub b: BlockMatrix,
    pub c: BlockMatrix,
    /// Assembled well self-coupling, kept for inspection after inversion.
    pub d: BlockMatrix,
    pub inv_d: BlockMatrix,
    pub res_well: DVector<Real>,
}

impl WellSystem {
    /// Blocks at every (well, perforated cell) pair.
    pub fn new(wells: &Wells, num_cells: usize, num_eq: usize) -> WellResult<Self> {
        let pattern: Vec<Vec<usize>> = (0..wells.len())
            .map(|w| wells.get(w).perforations.iter().map(|p| p.cell).collect())
            .collect();
        let n_weq = num_eq;
        let b = BlockMatrix::from_pattern(num_cells, n_weq, num_eq, &pattern)?;
        let c = BlockMatrix::from_pattern(num_cells, n_weq, num_eq, &pattern)?;
        let d = BlockMatrix::block_diagonal(wells.len(), n_weq);
        Ok(Self {
            b,
            c,
            inv_d: d.clone(),
            d,
            res_well: DVector::zeros(wells.len() * n_weq),
        })
    }

    pub fn num_wells(&self) -> usize {
        self.d.n_rows()
    }

    pub fn clear(&mut self) {
        self.b.zero_entries();
        self.c.zero_entries();
        self.d.zero_entries();
        self.inv_d.zero_entries();
        self.res_well.fill(0.0);
    }

    /// Replace `inv_d` by the block inverse of `d`.
    pub fn invert(&mut self, wells: &Wells) -> WellResult<()> {
        self.inv_d = self.d.clone();
        self.inv_d.invert_blocks().map_err(|e| match e {
            RfError::SingularBlock { row, .. } => WellError::NumericalProblem {
                what: format!(
                    "Singular well block for well {}",
                    wells.iter().nth(row).map(|w| w.name.as_str()).unwrap_or("?")
                ),
            },
            other => WellError::Core(other),
        })
    }

    /// `r -= Bᵀ D⁻¹ rw`.
    pub fn apply_residual(&self, r: &mut DVector<Real>) {
        if self.num_wells() == 0 {
            return;
        }
        let mut inv_drw = DVector::zeros(self.res_well.len());
        self.inv_d.mv(&self.res_well, &mut inv_drw);
        self.b.mmtv(&inv_drw, r);
    }

    /// `ax -= Bᵀ D⁻¹ C x`.
    pub fn apply(&self, x: &DVector<Real>, ax: &mut DVector<Real>) {
        if self.num_wells() == 0 {
            return;
        }
        let mut cx = DVector::zeros(self.res_well.len());
        self.c.mv(x, &mut cx);
        let mut inv_dcx = DVector::zeros(self.res_well.len());
        self.inv_d.mv(&cx, &mut inv_dcx);
        self.b.mmtv(&inv_dcx, ax);
    }

    /// `ax += alpha · (−Bᵀ D⁻¹ C x)`.
    pub fn apply_scale_add(&self, alpha: Real, x: &DVector<Real>, ax: &mut DVector<Real>) {
        if self.num_wells() == 0 {
            return;
        }
        let mut tmp = DVector::zeros(ax.len());
        self.apply(x, &mut tmp);
        ax.axpy(alpha, &tmp, 1.0);
    }

    /// Well update for a reservoir update: `D⁻¹ (rw − C x)`.
    pub fn recover_variable(&self, x: &DVector<Real>) -> DVector<Real> {
        let mut res = self.res_well.clone();
        if self.num_wells() > 0 {
            self.c.mmv(x, &mut res);
        }
        let mut xw = DVector::zeros(res.len());
        self.inv_d.mv(&res, &mut xw);
        xw
    }

    /// Well-only Newton update `D⁻¹ rw`.
    pub fn well_only_update(&self) -> DVector<Real> {
        let mut dx = DVector::zeros(self.res_well.len());
        self.inv_d.mv(&self.res_well, &mut dx);
        dx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Well, WellControl};
    use nalgebra::DMatrix;

    fn system() -> (Wells, WellSystem) {
        let w = Well::producer("P")
            .with_perforation(1, 1.0, 0.0)
            .with_control(WellControl::Bhp { target: 1.0e7 });
        let wells = Wells::new(vec![w]).unwrap();
        let mut s = WellSystem::new(&wells, 3, 3).unwrap();
        *s.d.block_mut(0, 0).unwrap() =
            DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0, 2.0]);
        *s.b.block_mut(0, 1).unwrap() = DMatrix::from_element(3, 3, 0.5);
        *s.c.block_mut(0, 1).unwrap() = DMatrix::identity(3, 3);
        s.res_well = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        s.invert(&wells).unwrap();
        (wells, s)
    }

    #[test]
    fn recover_satisfies_well_rows() {
        let (_, s) = system();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.1, 0.2, 0.3, 0.0, 0.0, 0.0]);
        let xw = s.recover_variable(&x);
        // C x + D xw = rw
        let mut lhs = DVector::zeros(3);
        s.c.mv(&x, &mut lhs);
        s.d.usmv(1.0, &xw, &mut lhs);
        assert!((lhs - &s.res_well).norm() < 1e-12);
    }

    #[test]
    fn schur_action_only_touches_perforated_cell() {
        let (_, s) = system();
        let x = DVector::from_element(9, 1.0);
        let mut ax = DVector::zeros(9);
        s.apply(&x, &mut ax);
        assert_eq!(ax[0], 0.0);
        assert_eq!(ax[8], 0.0);
        assert!(ax[3] != 0.0);
    }

    #[test]
    fn scale_add_matches_apply() {
        let (_, s) = system();
        let x = DVector::from_element(9, 1.0);
        let mut a = DVector::zeros(9);
        s.apply(&x, &mut a);
        let mut b = DVector::from_element(9, 1.0);
        s.apply_scale_add(2.0, &x, &mut b);
        for i in 0..9 {
            assert!((b[i] - (1.0 + 2.0 * a[i])).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_block_names_the_well() {
        let w = Well::producer("P1")
            .with_perforation(0, 1.0, 0.0)
            .with_control(WellControl::Bhp { target: 1.0e7 });
        let wells = Wells::new(vec![w]).unwrap();
        let mut s = WellSystem::new(&wells, 1, 3).unwrap();
        match s.invert(&wells) {
            Err(WellError::NumericalProblem { what }) => assert!(what.contains("P1")),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::topology::{Well, WellControl};
    use nalgebra::DMatrix;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn inverse_times_block_is_identity(
            entries in proptest::collection::vec(-1.0_f64..1.0, 9),
            shift in 4.0_f64..10.0,
        ) {
            let w = Well::producer("P")
                .with_perforation(0, 1.0, 0.0)
                .with_control(WellControl::Bhp { target: 1.0e7 });
            let wells = Wells::new(vec![w]).unwrap();
            let mut s = WellSystem::new(&wells, 1, 3).unwrap();
            // Diagonally dominant, hence nonsingular.
            let d = DMatrix::from_row_slice(3, 3, &entries) + DMatrix::identity(3, 3) * shift;
            *s.d.block_mut(0, 0).unwrap() = d.clone();
            s.invert(&wells).unwrap();
            let prod = s.inv_d.block(0, 0).unwrap() * &d;
            prop_assert!((prod - DMatrix::identity(3, 3)).abs().max() < 1e-10);
        }

        #[test]
        fn zero_perturbation_leaves_output_unchanged(
            y0 in proptest::collection::vec(-1.0e3_f64..1.0e3, 6),
        ) {
            let w = Well::injector("I", [1.0, 0.0, 0.0])
                .with_perforation(1, 1.0, 0.0)
                .with_control(WellControl::Bhp { target: 3.0e7 });
            let wells = Wells::new(vec![w]).unwrap();
            let mut s = WellSystem::new(&wells, 2, 3).unwrap();
            *s.d.block_mut(0, 0).unwrap() = DMatrix::identity(3, 3) * 2.0;
            *s.b.block_mut(0, 1).unwrap() = DMatrix::from_element(3, 3, 0.3);
            *s.c.block_mut(0, 1).unwrap() = DMatrix::from_element(3, 3, -0.7);
            s.invert(&wells).unwrap();
            let x = DVector::zeros(6);
            let mut y = DVector::from_vec(y0.clone());
            s.apply(&x, &mut y);
            prop_assert_eq!(y.as_slice(), y0.as_slice());
            s.apply_scale_add(3.0, &x, &mut y);
            prop_assert_eq!(y.as_slice(), y0.as_slice());
        }
    }
}
