//! Linear solve oracle and reference solvers.

use crate::error::{SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};
use rf_core::{BlockMatrix, Real};
use rf_wells::StandardWells;

/// A square operator known only through its action.
pub trait LinearOperator {
    fn size(&self) -> usize;

    /// `y = A x`
    fn apply(&self, x: &DVector<Real>, y: &mut DVector<Real>);

    /// `y += alpha A x`
    fn apply_scale_add(&self, alpha: Real, x: &DVector<Real>, y: &mut DVector<Real>) {
        let mut ax = DVector::zeros(y.len());
        self.apply(x, &mut ax);
        y.axpy(alpha, &ax, 1.0);
    }

    /// Column-by-column assembly for direct solvers on small systems.
    fn to_dense(&self) -> DMatrix<Real> {
        let n = self.size();
        let mut dense = DMatrix::zeros(n, n);
        let mut e = DVector::zeros(n);
        let mut col = DVector::zeros(n);
        for j in 0..n {
            e[j] = 1.0;
            self.apply(&e, &mut col);
            dense.set_column(j, &col);
            e[j] = 0.0;
        }
        dense
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearSolveReport {
    pub iterations: usize,
    pub converged: bool,
    /// Final relative residual.
    pub residual_reduction: Real,
}

pub trait LinearSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Solve `A x = rhs`, starting from the given `x`.
    fn solve(
        &self,
        op: &dyn LinearOperator,
        x: &mut DVector<Real>,
        rhs: &DVector<Real>,
    ) -> SolverResult<LinearSolveReport>;
}

/// Reservoir Jacobian with the well Schur complement folded in:
/// `A − Bᵀ D⁻¹ C`.
pub struct WellModelOperator<'a> {
    pub matrix: &'a BlockMatrix,
    pub wells: &'a StandardWells,
}

impl LinearOperator for WellModelOperator<'_> {
    fn size(&self) -> usize {
        self.matrix.n_rows() * self.matrix.block_dims().0
    }

    fn apply(&self, x: &DVector<Real>, y: &mut DVector<Real>) {
        self.matrix.mv(x, y);
        self.wells.apply(x, y);
    }

    fn apply_scale_add(&self, alpha: Real, x: &DVector<Real>, y: &mut DVector<Real>) {
        self.matrix.usmv(alpha, x, y);
        self.wells.apply_scale_add(alpha, x, y);
    }
}

/// Dense LU with partial pivoting on the assembled operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn name(&self) -> &str {
        "dense-lu"
    }

    fn solve(
        &self,
        op: &dyn LinearOperator,
        x: &mut DVector<Real>,
        rhs: &DVector<Real>,
    ) -> SolverResult<LinearSolveReport> {
        let lu = op.to_dense().lu();
        let solution = lu
            .solve(rhs)
            .ok_or_else(|| SolverError::LinearSolverProblem {
                what: "singular matrix in dense LU".to_string(),
            })?;
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::LinearSolverProblem {
                what: "non-finite solution from dense LU".to_string(),
            });
        }
        *x = solution;
        Ok(LinearSolveReport {
            iterations: 1,
            converged: true,
            residual_reduction: 0.0,
        })
    }
}

/// Unpreconditioned BiCGStab.
#[derive(Clone, Copy, Debug)]
pub struct BiCgStab {
    /// Target reduction of the residual norm.
    pub tolerance: Real,
    pub max_iter: usize,
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self {
            tolerance: 1.0e-8,
            max_iter: 500,
        }
    }
}

impl LinearSolver for BiCgStab {
    fn name(&self) -> &str {
        "bicgstab"
    }

    fn solve(
        &self,
        op: &dyn LinearOperator,
        x: &mut DVector<Real>,
        rhs: &DVector<Real>,
    ) -> SolverResult<LinearSolveReport> {
        let n = op.size();
        if x.len() != n || rhs.len() != n {
            return Err(SolverError::LinearSolverProblem {
                what: format!("operator of size {n}, vectors of {} and {}", x.len(), rhs.len()),
            });
        }

        let mut r = rhs.clone();
        op.apply_scale_add(-1.0, x, &mut r);
        let r0_norm = rhs.norm();
        if r0_norm == 0.0 {
            x.fill(0.0);
            return Ok(LinearSolveReport {
                iterations: 0,
                converged: true,
                residual_reduction: 0.0,
            });
        }
        let target = self.tolerance * r0_norm;
        if r.norm() <= target {
            return Ok(LinearSolveReport {
                iterations: 0,
                converged: true,
                residual_reduction: r.norm() / r0_norm,
            });
        }

        let r_hat = r.clone();
        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = DVector::zeros(n);
        let mut p = DVector::zeros(n);
        let mut s = DVector::zeros(n);
        let mut t = DVector::zeros(n);

        for it in 1..=self.max_iter {
            let rho_new = r_hat.dot(&r);
            if rho_new == 0.0 || omega == 0.0 {
                return Err(SolverError::LinearSolverProblem {
                    what: format!("BiCGStab breakdown at iteration {it}"),
                });
            }
            let beta = (rho_new / rho) * (alpha / omega);
            rho = rho_new;
            // p = r + beta (p - omega v)
            p.axpy(-omega, &v, 1.0);
            p.axpy(1.0, &r, beta);

            op.apply(&p, &mut v);
            let denom = r_hat.dot(&v);
            if denom == 0.0 {
                return Err(SolverError::LinearSolverProblem {
                    what: format!("BiCGStab breakdown at iteration {it}"),
                });
            }
            alpha = rho / denom;

            s.copy_from(&r);
            s.axpy(-alpha, &v, 1.0);
            if s.norm() <= target {
                x.axpy(alpha, &p, 1.0);
                return Ok(LinearSolveReport {
                    iterations: it,
                    converged: true,
                    residual_reduction: s.norm() / r0_norm,
                });
            }

            op.apply(&s, &mut t);
            let tt = t.dot(&t);
            omega = if tt > 0.0 { t.dot(&s) / tt } else { 0.0 };
            x.axpy(alpha, &p, 1.0);
            x.axpy(omega, &s, 1.0);

            r.copy_from(&s);
            r.axpy(-omega, &t, 1.0);
            let reduction = r.norm() / r0_norm;
            if !reduction.is_finite() {
                return Err(SolverError::LinearSolverProblem {
                    what: "non-finite residual in BiCGStab".to_string(),
                });
            }
            if r.norm() <= target {
                return Ok(LinearSolveReport {
                    iterations: it,
                    converged: true,
                    residual_reduction: reduction,
                });
            }
        }

        Ok(LinearSolveReport {
            iterations: self.max_iter,
            converged: false,
            residual_reduction: r.norm() / r0_norm,
        })
    }
}
