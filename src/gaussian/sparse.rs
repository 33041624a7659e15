//! Batch sparse solve for Gaussian factor graphs
//!
//! Assembles the stacked whitened Jacobian of the whole graph as a faer
//! sparse matrix and solves the normal equations with a sparse Cholesky
//! factorization. Independent of the elimination machinery, which makes it
//! a useful cross-check: both paths must agree on the minimizer.

use std::collections::BTreeMap;
use std::ops::Mul;

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers;
use faer::sparse::{SparseColMat, Triplet};
use faer_ext::IntoNalgebra;

use crate::error::{InferError, InferResult};
use crate::gaussian::{GaussianFactor, GaussianFactorGraph, VectorValues};
use crate::graph::{Factor, FactorGraph, Key};

/// Column layout of the stacked system: (key, column offset, dimension)
pub struct ColumnLayout {
    entries: Vec<(Key, usize, usize)>,
    total_dim: usize,
}

impl ColumnLayout {
    /// Keys in ascending order with contiguous column blocks
    fn build(graph: &GaussianFactorGraph) -> InferResult<Self> {
        let mut dim_of: BTreeMap<Key, usize> = BTreeMap::new();
        for (_, factor) in graph.iter() {
            for (&key, &dim) in factor.keys().iter().zip(factor.dims()) {
                let entry = dim_of.entry(key).or_insert(0);
                if dim > 0 {
                    if *entry > 0 && *entry != dim {
                        return Err(InferError::InvalidInput(format!(
                            "conflicting dimensions for variable {key}"
                        )));
                    }
                    *entry = dim;
                }
            }
        }

        let mut entries = Vec::with_capacity(dim_of.len());
        let mut offset = 0;
        for (key, dim) in dim_of {
            entries.push((key, offset, dim));
            offset += dim;
        }
        Ok(Self {
            entries,
            total_dim: offset,
        })
    }

    pub fn entries(&self) -> &[(Key, usize, usize)] {
        &self.entries
    }

    pub fn total_dim(&self) -> usize {
        self.total_dim
    }

    fn offset_of(&self, key: Key) -> (usize, usize) {
        let i = self
            .entries
            .binary_search_by_key(&key, |&(k, _, _)| k)
            .expect("key present in layout");
        (self.entries[i].1, self.entries[i].2)
    }
}

impl FactorGraph<GaussianFactor> {
    /// The stacked sparse Jacobian `A` and right-hand side `b` of the
    /// whole graph, with columns laid out per [`ColumnLayout`].
    pub fn sparse_jacobian(
        &self,
    ) -> InferResult<(SparseColMat<usize, f64>, faer::Mat<f64>, ColumnLayout)> {
        let layout = ColumnLayout::build(self)?;
        let rows: usize = self.iter().map(|(_, f)| f.rows()).sum();

        let mut triplets = Vec::new();
        let mut rhs = faer::Mat::<f64>::zeros(rows, 1);
        let mut row = 0;
        for (_, factor) in self.iter() {
            let factor_rows = factor.rows();
            let matrix = factor.matrix();
            let mut col = 0;
            for (&key, &dim) in factor.keys().iter().zip(factor.dims()) {
                if dim == 0 {
                    continue;
                }
                let (offset, _) = layout.offset_of(key);
                for r in 0..factor_rows {
                    for c in 0..dim {
                        let value = matrix[(r, col + c)];
                        if value != 0.0 {
                            triplets.push(Triplet::new(row + r, offset + c, value));
                        }
                    }
                }
                col += dim;
            }
            for r in 0..factor_rows {
                rhs[(row + r, 0)] = matrix[(r, matrix.ncols() - 1)];
            }
            row += factor_rows;
        }

        let jacobian =
            SparseColMat::try_new_from_triplets(rows, layout.total_dim(), &triplets).map_err(
                |e| InferError::LinearAlgebra(format!("failed to create sparse matrix: {e:?}")),
            )?;
        Ok((jacobian, rhs, layout))
    }

    /// Solve `min ‖Ax − b‖²` through the normal equations `AᵀA x = Aᵀb`
    /// with a sparse Cholesky factorization.
    pub fn solve_normal_equations(&self) -> InferResult<VectorValues> {
        let (jacobian, rhs, layout) = self.sparse_jacobian()?;

        let hessian = jacobian
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|e| InferError::LinearAlgebra(format!("transpose failed: {e:?}")))?
            .mul(jacobian.as_ref());
        let gradient = jacobian.as_ref().transpose().mul(rhs.as_ref());

        let symbolic = solvers::SymbolicLlt::try_new(hessian.symbolic(), faer::Side::Lower)
            .map_err(|e| {
                InferError::LinearAlgebra(format!("symbolic factorization failed: {e:?}"))
            })?;
        let cholesky =
            solvers::Llt::try_new_with_symbolic(symbolic, hessian.as_ref(), faer::Side::Lower)
                .map_err(|_| {
                    InferError::LinearAlgebra(
                        "normal equations are not positive definite".to_string(),
                    )
                })?;
        let solution = cholesky.solve(gradient);

        let dense = solution.as_ref().into_nalgebra();
        let mut values = VectorValues::new();
        for &(key, offset, dim) in layout.entries() {
            values.insert(key, dense.view((offset, 0), (dim, 1)).column(0).into_owned());
        }
        Ok(values)
    }
}
