//! Block-sparse matrix with small dense blocks.
//!
//! Storage is compressed-row over blocks. The sparsity pattern is fixed at
//! construction; assembly only writes into existing blocks. Vectors are flat
//! `DVector`s where block row `r` occupies entries `r*br .. (r+1)*br`.

use crate::error::{RfError, RfResult};
use crate::numeric::Real;
use nalgebra::{DMatrix, DVector};

#[derive(Clone, Debug, PartialEq)]
pub struct BlockMatrix {
    n_rows: usize,
    n_cols: usize,
    block_rows: usize,
    block_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    blocks: Vec<DMatrix<Real>>,
}

impl BlockMatrix {
    /// Build from a per-row list of block columns. Duplicates are merged.
    pub fn from_pattern(
        n_cols: usize,
        block_rows: usize,
        block_cols: usize,
        pattern: &[Vec<usize>],
    ) -> RfResult<Self> {
        let mut row_ptr = Vec::with_capacity(pattern.len() + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for row in pattern {
            let mut cols = row.clone();
            cols.sort_unstable();
            cols.dedup();
            if let Some(&c) = cols.last() {
                if c >= n_cols {
                    return Err(RfError::IndexOob {
                        what: "block column",
                        index: c,
                        len: n_cols,
                    });
                }
            }
            col_idx.extend(cols);
            row_ptr.push(col_idx.len());
        }
        let blocks = vec![DMatrix::zeros(block_rows, block_cols); col_idx.len()];
        Ok(Self {
            n_rows: pattern.len(),
            n_cols,
            block_rows,
            block_cols,
            row_ptr,
            col_idx,
            blocks,
        })
    }

    /// Square matrix with only diagonal blocks.
    pub fn block_diagonal(n: usize, block_size: usize) -> Self {
        let pattern: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        Self {
            n_rows: n,
            n_cols: n,
            block_rows: block_size,
            block_cols: block_size,
            row_ptr: (0..=n).collect(),
            col_idx: pattern.into_iter().flatten().collect(),
            blocks: vec![DMatrix::zeros(block_size, block_size); n],
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn block_dims(&self) -> (usize, usize) {
        (self.block_rows, self.block_cols)
    }

    pub fn nnz_blocks(&self) -> usize {
        self.col_idx.len()
    }

    fn find(&self, row: usize, col: usize) -> Option<usize> {
        let start = *self.row_ptr.get(row)?;
        let end = *self.row_ptr.get(row + 1)?;
        self.col_idx[start..end]
            .binary_search(&col)
            .ok()
            .map(|k| start + k)
    }

    pub fn exists(&self, row: usize, col: usize) -> bool {
        self.find(row, col).is_some()
    }

    pub fn block(&self, row: usize, col: usize) -> Option<&DMatrix<Real>> {
        self.find(row, col).map(|k| &self.blocks[k])
    }

    pub fn block_mut(&mut self, row: usize, col: usize) -> Option<&mut DMatrix<Real>> {
        self.find(row, col).map(|k| &mut self.blocks[k])
    }

    /// Block columns and blocks of one block row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, &DMatrix<Real>)> {
        let (start, end) = match (self.row_ptr.get(row), self.row_ptr.get(row + 1)) {
            (Some(&s), Some(&e)) => (s, e),
            _ => (0, 0),
        };
        self.col_idx[start..end]
            .iter()
            .copied()
            .zip(self.blocks[start..end].iter())
    }

    pub fn zero_entries(&mut self) {
        for b in &mut self.blocks {
            b.fill(0.0);
        }
    }

    /// y += alpha * A * x
    pub fn usmv(&self, alpha: Real, x: &DVector<Real>, y: &mut DVector<Real>) {
        let (br, bc) = (self.block_rows, self.block_cols);
        for r in 0..self.n_rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let c = self.col_idx[k];
                let b = &self.blocks[k];
                for i in 0..br {
                    let mut acc = 0.0;
                    for j in 0..bc {
                        acc += b[(i, j)] * x[c * bc + j];
                    }
                    y[r * br + i] += alpha * acc;
                }
            }
        }
    }

    /// y = A * x
    pub fn mv(&self, x: &DVector<Real>, y: &mut DVector<Real>) {
        y.fill(0.0);
        self.usmv(1.0, x, y);
    }

    /// y -= A * x
    pub fn mmv(&self, x: &DVector<Real>, y: &mut DVector<Real>) {
        self.usmv(-1.0, x, y);
    }

    /// y -= Aᵀ * x
    pub fn mmtv(&self, x: &DVector<Real>, y: &mut DVector<Real>) {
        let (br, bc) = (self.block_rows, self.block_cols);
        for r in 0..self.n_rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let c = self.col_idx[k];
                let b = &self.blocks[k];
                for j in 0..bc {
                    let mut acc = 0.0;
                    for i in 0..br {
                        acc += b[(i, j)] * x[r * br + i];
                    }
                    y[c * bc + j] -= acc;
                }
            }
        }
    }

    /// Replace every stored block by its inverse.
    pub fn invert_blocks(&mut self) -> RfResult<()> {
        for r in 0..self.n_rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let inv = self.blocks[k]
                    .clone()
                    .try_inverse()
                    .ok_or(RfError::SingularBlock {
                        row: r,
                        col: self.col_idx[k],
                    })?;
                if let Some(v) = inv.iter().find(|v| !v.is_finite()) {
                    return Err(RfError::NonFinite {
                        what: "inverted block",
                        value: *v,
                    });
                }
                self.blocks[k] = inv;
            }
        }
        Ok(())
    }

    /// Scalar dense copy, for small direct solves and tests.
    pub fn to_dense(&self) -> DMatrix<Real> {
        let (br, bc) = (self.block_rows, self.block_cols);
        let mut m = DMatrix::zeros(self.n_rows * br, self.n_cols * bc);
        for r in 0..self.n_rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let c = self.col_idx[k];
                m.view_mut((r * br, c * bc), (br, bc))
                    .copy_from(&self.blocks[k]);
            }
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockMatrix {
        let mut m = BlockMatrix::from_pattern(3, 2, 2, &[vec![0, 2], vec![1]]).unwrap();
        *m.block_mut(0, 0).unwrap() = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        *m.block_mut(0, 2).unwrap() = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 0.5]);
        *m.block_mut(1, 1).unwrap() = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 1.0, 1.0]);
        m
    }

    #[test]
    fn products_match_dense() {
        let m = sample();
        let dense = m.to_dense();
        let x = DVector::from_vec(vec![1.0, -1.0, 2.0, 0.5, 3.0, 4.0]);

        let mut y = DVector::zeros(4);
        m.mv(&x, &mut y);
        assert!((y - &dense * &x).norm() < 1e-14);

        let z = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let mut w = DVector::from_element(6, 1.0);
        m.mmtv(&z, &mut w);
        let expected = DVector::from_element(6, 1.0) - dense.transpose() * &z;
        assert!((w - expected).norm() < 1e-14);
    }

    #[test]
    fn missing_blocks_are_not_created() {
        let mut m = sample();
        assert!(m.block_mut(1, 0).is_none());
        assert!(!m.exists(1, 2));
        assert_eq!(m.nnz_blocks(), 3);
    }

    #[test]
    fn invert_blocks_reports_singular() {
        let mut m = BlockMatrix::block_diagonal(1, 2);
        assert!(matches!(
            m.invert_blocks(),
            Err(RfError::SingularBlock { row: 0, col: 0 })
        ));
    }
}
