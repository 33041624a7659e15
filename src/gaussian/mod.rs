//! Continuous (Gaussian) factor family
//!
//! Factors are whitened Jacobian blocks `[A | b]` with error
//! `0.5 ‖Ax − b‖²`; the elimination step stacks every factor touching a
//! cluster into one dense system and partially factorizes it with
//! Householder QR, yielding an upper-triangular conditional
//! `P(frontals | separator)` and a residual factor on the separator alone.
//! The conditional's normalization constant is tracked explicitly since
//! the joint log-probability sums it across all cliques.

pub mod sparse;

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::error::InferResult;
use crate::graph::{Factor, FactorGraph, Key, SymbolicFactor};
use crate::inference::{
    eliminate_multifrontal, eliminate_sequential, BayesNet, BayesTree, Conditional,
    EliminationError,
};
use crate::ordering::Ordering;

pub type GaussianFactorGraph = FactorGraph<GaussianFactor>;
pub type GaussianBayesNet = BayesNet<GaussianConditional>;
pub type GaussianBayesTree = BayesTree<GaussianConditional>;

/// Relative threshold on the frontal diagonal of R below which the system
/// is reported as indeterminate.
const RANK_TOLERANCE: f64 = 1e-10;

/// Assignment of a vector value to each continuous variable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> {
        self.values.iter()
    }

    /// Largest absolute difference across all entries of both assignments
    pub fn max_diff(&self, other: &VectorValues) -> f64 {
        let mut diff: f64 = 0.0;
        for (key, value) in &self.values {
            match other.get(*key) {
                Some(other_value) => {
                    diff = diff.max((value - other_value).amax());
                }
                None => return f64::INFINITY,
            }
        }
        diff
    }
}

/// A whitened linear factor `0.5 ‖Ax − b‖²` over one or more variables.
///
/// The matrix stores `[A | b]` with one contiguous column block per key.
#[derive(Debug, Clone)]
pub struct GaussianFactor {
    keys: Vec<Key>,
    dims: Vec<usize>,
    ab: DMatrix<f64>,
}

impl GaussianFactor {
    /// General constructor from per-variable Jacobian blocks.
    ///
    /// All blocks and the right-hand side must agree on the row count.
    pub fn new(blocks: Vec<(Key, DMatrix<f64>)>, b: DVector<f64>) -> Self {
        let rows = b.len();
        let mut keys = Vec::with_capacity(blocks.len());
        let mut dims = Vec::with_capacity(blocks.len());
        let total: usize = blocks.iter().map(|(_, a)| a.ncols()).sum();
        let mut ab = DMatrix::zeros(rows, total + 1);

        let mut offset = 0;
        for (key, a) in blocks {
            assert_eq!(a.nrows(), rows, "jacobian block row count mismatch");
            ab.view_mut((0, offset), (rows, a.ncols())).copy_from(&a);
            keys.push(key);
            dims.push(a.ncols());
            offset += a.ncols();
        }
        ab.column_mut(total).copy_from(&b);

        Self { keys, dims, ab }
    }

    /// Factor on a single variable
    pub fn unary(key: Key, a: DMatrix<f64>, b: DVector<f64>) -> Self {
        Self::new(vec![(key, a)], b)
    }

    /// Factor on a pair of variables
    pub fn binary(
        key1: Key,
        a1: DMatrix<f64>,
        key2: Key,
        a2: DMatrix<f64>,
        b: DVector<f64>,
    ) -> Self {
        Self::new(vec![(key1, a1), (key2, a2)], b)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rows(&self) -> usize {
        self.ab.nrows()
    }

    /// The stacked `[A | b]` matrix
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.ab
    }

    /// Right-hand side vector b
    pub fn rhs(&self) -> DVector<f64> {
        self.ab.column(self.ab.ncols() - 1).into_owned()
    }

    /// `0.5 ‖Ax − b‖²` at the assignment.
    ///
    /// Every involved variable must be assigned.
    pub fn error(&self, values: &VectorValues) -> f64 {
        let mut residual = -self.rhs();
        let mut offset = 0;
        for (&key, &dim) in self.keys.iter().zip(&self.dims) {
            if dim == 0 {
                continue;
            }
            let x = values
                .get(key)
                .unwrap_or_else(|| panic!("variable {key} missing from values"));
            residual += self.ab.view((0, offset), (self.rows(), dim)) * x;
            offset += dim;
        }
        0.5 * residual.norm_squared()
    }
}

impl Factor for GaussianFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }
}

impl SymbolicFactor for GaussianFactor {
    fn symbolic(keys: Vec<Key>) -> Self {
        let dims = vec![0; keys.len()];
        Self {
            keys,
            dims,
            ab: DMatrix::zeros(0, 1),
        }
    }
}

/// `P(frontals | separator)` as an upper-triangular system `[R S d]`.
///
/// `R` is square upper-triangular over the frontal columns; the stored
/// log-normalizer makes `exp(log_normalizer − error)` a proper density.
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    keys: Vec<Key>,
    dims: Vec<usize>,
    nr_frontals: usize,
    rsd: DMatrix<f64>,
    log_normalizer: f64,
}

impl GaussianConditional {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// The stacked `[R S d]` matrix
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.rsd
    }

    /// Right-hand side d
    pub fn rhs(&self) -> DVector<f64> {
        self.rsd.column(self.rsd.ncols() - 1).into_owned()
    }

    /// log of the normalization constant, `Σ log rᵢᵢ − (d/2)·log 2π`
    pub fn log_normalizer(&self) -> f64 {
        self.log_normalizer
    }

    fn frontal_dim(&self) -> usize {
        self.dims[..self.nr_frontals].iter().sum()
    }

    /// `R x_f + S x_s − d` at the assignment
    fn residual(&self, values: &VectorValues) -> DVector<f64> {
        let rows = self.rsd.nrows();
        let mut residual = -self.rhs();
        let mut offset = 0;
        for (&key, &dim) in self.keys.iter().zip(&self.dims) {
            if dim == 0 {
                continue;
            }
            let x = values
                .get(key)
                .unwrap_or_else(|| panic!("variable {key} missing from values"));
            residual += self.rsd.view((0, offset), (rows, dim)) * x;
            offset += dim;
        }
        residual
    }
}

impl Conditional for GaussianConditional {
    type Values = VectorValues;
    type Factor = GaussianFactor;

    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    fn log_probability(&self, values: &VectorValues) -> f64 {
        self.log_normalizer - self.error(values)
    }

    fn error(&self, values: &VectorValues) -> f64 {
        0.5 * self.residual(values).norm_squared()
    }

    fn solve_into(&self, values: &mut VectorValues) -> Result<(), EliminationError> {
        let fd = self.frontal_dim();
        let mut rhs = self.rhs();

        // d − S x_s
        let mut offset = fd;
        for (&key, &dim) in self.keys[self.nr_frontals..]
            .iter()
            .zip(&self.dims[self.nr_frontals..])
        {
            if dim == 0 {
                continue;
            }
            let x = values
                .get(key)
                .ok_or(EliminationError::MissingValue { key })?;
            rhs -= self.rsd.view((0, offset), (fd, dim)) * x;
            offset += dim;
        }

        let r = self.rsd.view((0, 0), (fd, fd));
        let x_f = r
            .solve_upper_triangular(&rhs)
            .ok_or_else(|| EliminationError::IndeterminantSystem {
                keys: self.frontals().to_vec(),
            })?;

        let mut offset = 0;
        for (&key, &dim) in self.keys[..self.nr_frontals]
            .iter()
            .zip(&self.dims[..self.nr_frontals])
        {
            values.insert(key, x_f.rows(offset, dim).into_owned());
            offset += dim;
        }
        Ok(())
    }

    fn as_factor(&self) -> GaussianFactor {
        GaussianFactor {
            keys: self.keys.clone(),
            dims: self.dims.clone(),
            ab: self.rsd.clone(),
        }
    }
}

/// Dense elimination step for Gaussian clusters.
///
/// Combines every factor into one stacked `[A | b]` over
/// frontals ∪ separator (frontal columns first), factorizes it with
/// Householder QR, and splits R into the conditional and the separator
/// factor. Rank deficiency along the frontal diagonal is reported as an
/// indeterminate system, never as NaN conditionals.
pub fn eliminate_gaussian(
    graph: &GaussianFactorGraph,
    frontals: &[Key],
) -> Result<(GaussianConditional, GaussianFactor), EliminationError> {
    if graph.num_factors() == 0 {
        return Err(EliminationError::EmptyCluster {
            keys: frontals.to_vec(),
        });
    }

    // Per-variable dimensions; zero means "scope only" (symbolic factors).
    let mut dim_of: BTreeMap<Key, usize> = BTreeMap::new();
    for (_, factor) in graph.iter() {
        for (&key, &dim) in factor.keys().iter().zip(factor.dims()) {
            let entry = dim_of.entry(key).or_insert(0);
            if dim > 0 {
                if *entry > 0 && *entry != dim {
                    return Err(EliminationError::DimensionMismatch { key });
                }
                *entry = dim;
            }
        }
    }

    for &key in frontals {
        if dim_of.get(&key).copied().unwrap_or(0) == 0 {
            return Err(EliminationError::IndeterminantSystem {
                keys: frontals.to_vec(),
            });
        }
    }

    // Column layout: frontals in the given order, then separator keys
    // ascending, then the right-hand side.
    let mut keys: Vec<Key> = frontals.to_vec();
    let mut dims: Vec<usize> = frontals.iter().map(|key| dim_of[key]).collect();
    for (&key, &dim) in &dim_of {
        if !frontals.contains(&key) {
            keys.push(key);
            dims.push(dim);
        }
    }
    let frontal_dim: usize = dims[..frontals.len()].iter().sum();
    let total_dim: usize = dims.iter().sum();

    let mut offset_of: BTreeMap<Key, usize> = BTreeMap::new();
    let mut offset = 0;
    for (&key, &dim) in keys.iter().zip(&dims) {
        offset_of.insert(key, offset);
        offset += dim;
    }

    let rows: usize = graph.iter().map(|(_, f)| f.rows()).sum();
    if rows < frontal_dim {
        return Err(EliminationError::IndeterminantSystem {
            keys: frontals.to_vec(),
        });
    }

    let mut stacked = DMatrix::zeros(rows, total_dim + 1);
    let mut row = 0;
    for (_, factor) in graph.iter() {
        let factor_rows = factor.rows();
        let mut col = 0;
        for (&key, &dim) in factor.keys().iter().zip(factor.dims()) {
            if dim > 0 {
                stacked
                    .view_mut((row, offset_of[&key]), (factor_rows, dim))
                    .copy_from(&factor.matrix().view((0, col), (factor_rows, dim)));
                col += dim;
            }
        }
        stacked
            .view_mut((row, total_dim), (factor_rows, 1))
            .copy_from(&factor.matrix().view((0, factor.matrix().ncols() - 1), (factor_rows, 1)));
        row += factor_rows;
    }

    let mut r = stacked.qr().unpack_r();
    let r_rows = r.nrows();

    // Householder reflections leave the sign of each diagonal entry
    // arbitrary; flip rows so the diagonal is nonnegative and the
    // log-determinant is well defined.
    for i in 0..r_rows {
        if r[(i, i)] < 0.0 {
            for j in 0..r.ncols() {
                r[(i, j)] = -r[(i, j)];
            }
        }
    }

    let scale = (0..frontal_dim)
        .map(|i| r[(i, i)].abs())
        .fold(1.0_f64, f64::max);
    for i in 0..frontal_dim {
        if r[(i, i)].abs() < RANK_TOLERANCE * scale {
            return Err(EliminationError::IndeterminantSystem {
                keys: frontals.to_vec(),
            });
        }
    }

    let log_normalizer = (0..frontal_dim).map(|i| r[(i, i)].ln()).sum::<f64>()
        - 0.5 * frontal_dim as f64 * (2.0 * std::f64::consts::PI).ln();

    let conditional = GaussianConditional {
        keys: keys.clone(),
        dims: dims.clone(),
        nr_frontals: frontals.len(),
        rsd: r.rows(0, frontal_dim).into_owned(),
        log_normalizer,
    };

    let separator_keys: Vec<Key> = keys[frontals.len()..].to_vec();
    let separator_dims: Vec<usize> = dims[frontals.len()..].to_vec();
    let separator_factor = GaussianFactor {
        keys: separator_keys,
        dims: separator_dims,
        ab: r
            .view((frontal_dim, frontal_dim), (r_rows - frontal_dim, total_dim + 1 - frontal_dim))
            .into_owned(),
    };

    Ok((conditional, separator_factor))
}

impl FactorGraph<GaussianFactor> {
    /// Total error `Σ 0.5 ‖Aᵢx − bᵢ‖²` over all factors
    pub fn total_error(&self, values: &VectorValues) -> f64 {
        self.iter().map(|(_, f)| f.error(values)).sum()
    }

    /// Sequential elimination with the Gaussian capability
    pub fn eliminate_sequential(&self, ordering: &Ordering) -> InferResult<GaussianBayesNet> {
        eliminate_sequential(self, ordering, eliminate_gaussian)
    }

    /// Multifrontal elimination with the Gaussian capability
    pub fn eliminate_multifrontal(&self, ordering: &Ordering) -> InferResult<GaussianBayesTree> {
        eliminate_multifrontal(self, ordering, eliminate_gaussian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    fn prior(key: Key, value: f64) -> GaussianFactor {
        GaussianFactor::unary(key, dmatrix![1.0], dvector![value])
    }

    fn difference(key1: Key, key2: Key) -> GaussianFactor {
        // x2 − x1 = 0 with unit noise
        GaussianFactor::binary(key1, dmatrix![-1.0], key2, dmatrix![1.0], dvector![0.0])
    }

    #[test]
    fn test_factor_error() {
        let factor = prior(0, 1.0);
        let mut values = VectorValues::new();
        values.insert(0, dvector![2.0]);
        assert_relative_eq!(factor.error(&values), 0.5);
    }

    #[test]
    fn test_eliminate_single_prior_matches_standard_normal() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 0.0));

        let (conditional, separator) = eliminate_gaussian(&graph, &[0]).unwrap();
        assert!(separator.keys().is_empty());
        assert_eq!(conditional.matrix().nrows(), 1);

        let mut values = VectorValues::new();
        values.insert(0, dvector![0.0]);
        // ln N(0; 0, 1) = −0.5 ln 2π
        assert_relative_eq!(
            conditional.log_probability(&values),
            -0.5 * (2.0 * std::f64::consts::PI).ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_eliminate_produces_conditional_and_separator() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 0.0));
        graph.add(difference(0, 1));

        let (conditional, separator) = eliminate_gaussian(&graph, &[0]).unwrap();
        assert_eq!(conditional.frontals(), &[0]);
        assert_eq!(conditional.parents(), &[1]);
        assert_eq!(separator.keys(), &[1]);

        // P(x0 | x1) has mean x1/2: with x1 = 4 the solution is x0 = 2.
        let mut values = VectorValues::new();
        values.insert(1, dvector![4.0]);
        conditional.solve_into(&mut values).unwrap();
        assert_relative_eq!(values.get(0).unwrap()[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_elimination_preserves_error() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 1.0));
        graph.add(difference(0, 1));

        let (conditional, separator) = eliminate_gaussian(&graph, &[0]).unwrap();

        let mut values = VectorValues::new();
        values.insert(0, dvector![0.3]);
        values.insert(1, dvector![-0.7]);
        let original = graph.total_error(&values);
        let split = conditional.error(&values) + separator.error(&values);
        assert_relative_eq!(original, split, epsilon = 1e-10);
    }

    #[test]
    fn test_rank_deficient_reports_indeterminate() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(GaussianFactor::unary(0, dmatrix![0.0], dvector![0.0]));

        let err = eliminate_gaussian(&graph, &[0]).unwrap_err();
        assert_eq!(
            err,
            EliminationError::IndeterminantSystem { keys: vec![0] }
        );
    }

    #[test]
    fn test_unconstrained_frontal_reports_indeterminate() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 0.0));

        let err = eliminate_gaussian(&graph, &[7]).unwrap_err();
        assert!(matches!(
            err,
            EliminationError::IndeterminantSystem { .. }
        ));
    }

    #[test]
    fn test_solve_missing_parent_value() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(difference(0, 1));
        graph.add(prior(0, 0.0));

        let (conditional, _) = eliminate_gaussian(&graph, &[0]).unwrap();
        let mut values = VectorValues::new();
        let err = conditional.solve_into(&mut values).unwrap_err();
        assert_eq!(err, EliminationError::MissingValue { key: 1 });
    }

    #[test]
    fn test_conditional_as_factor_preserves_error() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 0.5));
        graph.add(difference(0, 1));

        let (conditional, _) = eliminate_gaussian(&graph, &[0]).unwrap();
        let factor = conditional.as_factor();

        let mut values = VectorValues::new();
        values.insert(0, dvector![0.1]);
        values.insert(1, dvector![0.9]);
        assert_relative_eq!(
            factor.error(&values),
            conditional.error(&values),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_symbolic_factor_is_inert() {
        let mut graph = GaussianFactorGraph::new();
        graph.add(prior(0, 0.0));
        graph.add(difference(0, 1));
        graph.add(GaussianFactor::symbolic(vec![0, 1]));

        let (conditional, _) = eliminate_gaussian(&graph, &[0]).unwrap();
        let mut values = VectorValues::new();
        values.insert(1, dvector![4.0]);
        conditional.solve_into(&mut values).unwrap();
        assert_relative_eq!(values.get(0).unwrap()[0], 2.0, epsilon = 1e-12);
    }
}
