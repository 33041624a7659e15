//! Discrete factor family
//!
//! Factors are dense nonnegative tables over finite-cardinality variables,
//! stored row-major with the last key varying fastest. Elimination is
//! sum-marginalization of the product table (sum-product) or
//! max-marginalization (max-product, for most-probable-explanation
//! queries); both report an all-zero separator slice as a degenerate table
//! instead of producing an undefined conditional.

use std::collections::BTreeMap;

use crate::error::InferResult;
use crate::graph::{Factor, FactorGraph, Key, SymbolicFactor};
use crate::inference::{
    eliminate_sequential, BayesNet, BayesTree, Conditional, EliminationError,
};
use crate::ordering::Ordering;

pub type DiscreteFactorGraph = FactorGraph<DiscreteFactor>;
pub type DiscreteBayesNet = BayesNet<DiscreteConditional>;
pub type DiscreteBayesTree = BayesTree<DiscreteConditional>;

/// Assignment of a category index to each discrete variable
pub type DiscreteValues = BTreeMap<Key, usize>;

/// A discrete variable together with its cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteKey {
    pub key: Key,
    pub cardinality: usize,
}

impl DiscreteKey {
    pub fn new(key: Key, cardinality: usize) -> Self {
        Self { key, cardinality }
    }
}

/// A nonnegative table over a set of discrete variables.
///
/// A factor built by [`SymbolicFactor::symbolic`] has an empty table and
/// zero cardinalities; it contributes scope but no numeric content.
#[derive(Debug, Clone)]
pub struct DiscreteFactor {
    dkeys: Vec<DiscreteKey>,
    keys: Vec<Key>,
    table: Vec<f64>,
}

impl DiscreteFactor {
    /// Table over `dkeys`, row-major with the last key fastest.
    ///
    /// The table length must equal the product of cardinalities.
    pub fn new(dkeys: Vec<DiscreteKey>, table: Vec<f64>) -> Self {
        let expected: usize = dkeys.iter().map(|dk| dk.cardinality).product();
        assert_eq!(
            table.len(),
            expected,
            "table length {} does not match cardinality product {}",
            table.len(),
            expected
        );
        let keys = dkeys.iter().map(|dk| dk.key).collect();
        Self { dkeys, keys, table }
    }

    pub fn discrete_keys(&self) -> &[DiscreteKey] {
        &self.dkeys
    }

    pub fn table(&self) -> &[f64] {
        &self.table
    }

    fn is_symbolic(&self) -> bool {
        self.table.is_empty() && !self.dkeys.is_empty()
    }

    /// Table value at the assignment; symbolic factors evaluate to one.
    ///
    /// Every involved variable must be assigned.
    pub fn value(&self, values: &DiscreteValues) -> f64 {
        if self.is_symbolic() {
            return 1.0;
        }
        let assignment: Vec<usize> = self
            .dkeys
            .iter()
            .map(|dk| {
                *values
                    .get(&dk.key)
                    .unwrap_or_else(|| panic!("variable {} missing from values", dk.key))
            })
            .collect();
        self.table[flat_index(&self.dkeys, &assignment)]
    }

    /// Product of two tables over the union of their scopes
    pub fn multiply(&self, other: &DiscreteFactor) -> Result<DiscreteFactor, EliminationError> {
        let mut cardinality_of: BTreeMap<Key, usize> = BTreeMap::new();
        for dk in self.dkeys.iter().chain(&other.dkeys) {
            let entry = cardinality_of.entry(dk.key).or_insert(0);
            *entry = (*entry).max(dk.cardinality);
        }
        for (&key, &cardinality) in &cardinality_of {
            if cardinality == 0 {
                return Err(EliminationError::UnknownCardinality { key });
            }
        }

        let dkeys: Vec<DiscreteKey> = cardinality_of
            .into_iter()
            .map(|(key, cardinality)| DiscreteKey::new(key, cardinality))
            .collect();
        let size: usize = dkeys.iter().map(|dk| dk.cardinality).product();

        let mut table = Vec::with_capacity(size);
        let mut values = DiscreteValues::new();
        for flat in 0..size {
            assign(&dkeys, flat, &mut values);
            table.push(self.value(&values) * other.value(&values));
        }
        Ok(DiscreteFactor::new(dkeys, table))
    }

    /// Marginalize `out` away by summation
    pub fn sum_out(&self, out: &[Key]) -> DiscreteFactor {
        self.marginalize(out, |acc, v| acc + v)
    }

    /// Marginalize `out` away by maximization
    pub fn max_out(&self, out: &[Key]) -> DiscreteFactor {
        self.marginalize(out, f64::max)
    }

    fn marginalize(&self, out: &[Key], combine: impl Fn(f64, f64) -> f64) -> DiscreteFactor {
        let kept: Vec<DiscreteKey> = self
            .dkeys
            .iter()
            .filter(|dk| !out.contains(&dk.key))
            .copied()
            .collect();
        let size: usize = kept.iter().map(|dk| dk.cardinality).product();
        let mut table = vec![0.0; size];
        let mut seen = vec![false; size];

        let mut values = DiscreteValues::new();
        for flat in 0..self.table.len() {
            assign(&self.dkeys, flat, &mut values);
            let assignment: Vec<usize> = kept.iter().map(|dk| values[&dk.key]).collect();
            let i = flat_index(&kept, &assignment);
            table[i] = if seen[i] {
                combine(table[i], self.table[flat])
            } else {
                self.table[flat]
            };
            seen[i] = true;
        }
        DiscreteFactor::new(kept, table)
    }

    /// The same table with its scope permuted to `order`
    fn reorder(&self, order: &[Key]) -> DiscreteFactor {
        debug_assert_eq!(order.len(), self.dkeys.len());
        let dkeys: Vec<DiscreteKey> = order
            .iter()
            .map(|&key| {
                *self
                    .dkeys
                    .iter()
                    .find(|dk| dk.key == key)
                    .expect("reorder permutes the existing scope")
            })
            .collect();

        let mut table = vec![0.0; self.table.len()];
        let mut values = DiscreteValues::new();
        for flat in 0..self.table.len() {
            assign(&self.dkeys, flat, &mut values);
            let assignment: Vec<usize> = dkeys.iter().map(|dk| values[&dk.key]).collect();
            table[flat_index(&dkeys, &assignment)] = self.table[flat];
        }
        DiscreteFactor::new(dkeys, table)
    }
}

impl Factor for DiscreteFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }
}

impl SymbolicFactor for DiscreteFactor {
    fn symbolic(keys: Vec<Key>) -> Self {
        let dkeys = keys.iter().map(|&key| DiscreteKey::new(key, 0)).collect();
        Self {
            dkeys,
            keys,
            table: Vec::new(),
        }
    }
}

pub(crate) fn flat_index(dkeys: &[DiscreteKey], assignment: &[usize]) -> usize {
    let mut index = 0;
    for (dk, &a) in dkeys.iter().zip(assignment) {
        debug_assert!(a < dk.cardinality, "assignment out of range");
        index = index * dk.cardinality + a;
    }
    index
}

pub(crate) fn assign(dkeys: &[DiscreteKey], mut flat: usize, values: &mut DiscreteValues) {
    for dk in dkeys.iter().rev() {
        values.insert(dk.key, flat % dk.cardinality);
        flat /= dk.cardinality;
    }
}

/// `P(frontals | parents)` as a table normalized per parent assignment.
///
/// A conditional from max-product elimination stores the unnormalized
/// lookup table instead; its per-conditional argmax chains into the exact
/// most-probable explanation.
#[derive(Debug, Clone)]
pub struct DiscreteConditional {
    factor: DiscreteFactor,
    nr_frontals: usize,
}

impl DiscreteConditional {
    pub fn discrete_keys(&self) -> &[DiscreteKey] {
        &self.factor.dkeys
    }
}

impl Conditional for DiscreteConditional {
    type Values = DiscreteValues;
    type Factor = DiscreteFactor;

    fn keys(&self) -> &[Key] {
        &self.factor.keys
    }

    fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    fn log_probability(&self, values: &DiscreteValues) -> f64 {
        self.factor.value(values).ln()
    }

    fn error(&self, values: &DiscreteValues) -> f64 {
        -self.log_probability(values)
    }

    fn solve_into(&self, values: &mut DiscreteValues) -> Result<(), EliminationError> {
        for dk in &self.factor.dkeys[self.nr_frontals..] {
            if !values.contains_key(&dk.key) {
                return Err(EliminationError::MissingValue { key: dk.key });
            }
        }

        let frontal_dkeys = &self.factor.dkeys[..self.nr_frontals];
        let size: usize = frontal_dkeys.iter().map(|dk| dk.cardinality).product();

        // Argmax over frontal assignments; ties go to the first, which is
        // the lexicographically smallest assignment.
        let mut best = (f64::NEG_INFINITY, 0);
        let mut scratch = values.clone();
        for flat in 0..size {
            assign(frontal_dkeys, flat, &mut scratch);
            let p = self.factor.value(&scratch);
            if p > best.0 {
                best = (p, flat);
            }
        }
        if best.0 <= 0.0 {
            return Err(EliminationError::DegenerateTable {
                keys: self.factor.keys.clone(),
            });
        }
        assign(frontal_dkeys, best.1, values);
        Ok(())
    }

    fn as_factor(&self) -> DiscreteFactor {
        self.factor.clone()
    }
}

/// Sum-product elimination step for discrete clusters.
///
/// Multiplies every factor into one table, sums out the frontal variables
/// for the separator factor, and divides to obtain the normalized
/// conditional.
pub fn eliminate_discrete(
    graph: &DiscreteFactorGraph,
    frontals: &[Key],
) -> Result<(DiscreteConditional, DiscreteFactor), EliminationError> {
    eliminate_with(graph, frontals, false)
}

/// Max-product elimination step, for most-probable-explanation queries.
///
/// The separator carries the branch maximum instead of the sum, and the
/// conditional is the unnormalized lookup table scaled by it.
pub fn eliminate_discrete_max_product(
    graph: &DiscreteFactorGraph,
    frontals: &[Key],
) -> Result<(DiscreteConditional, DiscreteFactor), EliminationError> {
    eliminate_with(graph, frontals, true)
}

fn eliminate_with(
    graph: &DiscreteFactorGraph,
    frontals: &[Key],
    max_product: bool,
) -> Result<(DiscreteConditional, DiscreteFactor), EliminationError> {
    let mut product: Option<DiscreteFactor> = None;
    for (_, factor) in graph.iter() {
        product = Some(match product {
            None => (**factor).clone(),
            Some(acc) => acc.multiply(factor)?,
        });
    }
    let product = product.ok_or_else(|| EliminationError::EmptyCluster {
        keys: frontals.to_vec(),
    })?;

    for &key in frontals {
        if !product.keys.contains(&key) {
            return Err(EliminationError::EmptyCluster {
                keys: frontals.to_vec(),
            });
        }
    }

    // Frontal keys first, parents after, for the conditional layout.
    let mut order: Vec<Key> = frontals.to_vec();
    for &key in &product.keys {
        if !frontals.contains(&key) {
            order.push(key);
        }
    }
    let product = product.reorder(&order);
    for dk in product.dkeys.iter() {
        if dk.cardinality == 0 {
            return Err(EliminationError::UnknownCardinality { key: dk.key });
        }
    }

    let separator = if max_product {
        product.max_out(frontals)
    } else {
        product.sum_out(frontals)
    };
    if separator.table.iter().any(|&v| v <= 0.0) {
        return Err(EliminationError::DegenerateTable {
            keys: product.keys.clone(),
        });
    }

    let frontal_size: usize = product.dkeys[..frontals.len()]
        .iter()
        .map(|dk| dk.cardinality)
        .product();
    let mut table = product.table.clone();
    for (i, value) in table.iter_mut().enumerate() {
        // Frontals vary slowest after the reorder, so the parent block
        // index is the flat index modulo the parent block size.
        let parent_index = i % (product.table.len() / frontal_size);
        *value /= separator.table[parent_index];
    }

    let conditional = DiscreteConditional {
        factor: DiscreteFactor::new(product.dkeys.clone(), table),
        nr_frontals: frontals.len(),
    };
    Ok((conditional, separator))
}

impl FactorGraph<DiscreteFactor> {
    /// Product of all factor tables at the assignment (unnormalized)
    pub fn value(&self, values: &DiscreteValues) -> f64 {
        self.iter().map(|(_, f)| f.value(values)).product()
    }

    /// Sum-product elimination: a Bayes net encoding the posterior
    pub fn sum_product(&self, ordering: &Ordering) -> InferResult<DiscreteBayesNet> {
        eliminate_sequential(self, ordering, eliminate_discrete)
    }

    /// Max-product elimination: a Bayes net of lookup tables whose
    /// [`BayesNet::optimize`] is the most probable explanation
    pub fn max_product(&self, ordering: &Ordering) -> InferResult<DiscreteBayesNet> {
        eliminate_sequential(self, ordering, eliminate_discrete_max_product)
    }

    /// Most probable explanation via max-product elimination
    pub fn optimize_mpe(&self, ordering: &Ordering) -> InferResult<DiscreteValues> {
        let net = self.max_product(ordering)?;
        Ok(net.optimize()?)
    }
}
