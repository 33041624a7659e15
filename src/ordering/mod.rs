//! Elimination orderings and the strategies that produce them
//!
//! An [`Ordering`] is a total order over (a subset of) the graph's
//! variables, fixing the sequence in which they are eliminated. Orderings
//! are produced by one of several interchangeable strategies; all of them
//! are deterministic given identical input, which the reproducibility tests
//! rely on.

pub mod min_fill;
pub mod nested_dissection;

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Index;

use thiserror::Error;

use crate::graph::{Key, VariableIndex};

/// Configuration errors from ordering construction or validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    /// A key appears more than once in a custom ordering
    #[error("key {0} appears more than once in the ordering")]
    DuplicateKey(Key),

    /// A custom ordering references a key absent from the variable index
    #[error("key {0} is not present in the variable index")]
    UnknownKey(Key),

    /// A custom ordering does not cover an indexed variable
    #[error("indexed variable {0} is missing from the ordering")]
    MissingKey(Key),
}

/// Strategy selector for [`Ordering::compute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderingType {
    /// Greedy fill-in-minimizing heuristic, ties broken by smallest key
    MinFill,
    /// Recursive graph bisection, partition interiors before separators
    NestedDissection,
    /// The order in which variables first appeared in the graph
    Natural,
    /// Caller-supplied explicit permutation, validated for completeness
    Custom(Vec<Key>),
}

/// A total order over variables specifying the elimination sequence.
///
/// Invariant: no duplicates. An ordering used for full elimination must
/// cover exactly the variables of the index it was built from; partial
/// elimination accepts a prefix covering any subset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ordering {
    keys: Vec<Key>,
}

impl Ordering {
    /// Compute an ordering over all indexed variables with the given strategy
    pub fn compute(index: &VariableIndex, strategy: &OrderingType) -> Result<Self, OrderingError> {
        match strategy {
            OrderingType::MinFill => Ok(min_fill::order(index)),
            OrderingType::NestedDissection => Ok(nested_dissection::order(index)),
            OrderingType::Natural => Ok(Self::natural(index)),
            OrderingType::Custom(keys) => Self::custom(keys.clone(), index),
        }
    }

    /// Greedy fill-in-minimizing ordering (see [`min_fill`])
    pub fn min_fill(index: &VariableIndex) -> Self {
        min_fill::order(index)
    }

    /// Fill-minimizing ordering with a group of keys constrained to the end.
    ///
    /// Variables in `last` become eligible only once every unconstrained
    /// variable has been eliminated. Used for hybrid graphs, where discrete
    /// modes must be eliminated after all continuous variables.
    pub fn min_fill_constrained_last(index: &VariableIndex, last: &BTreeSet<Key>) -> Self {
        min_fill::order_constrained(index, last)
    }

    /// Nested-dissection ordering (see [`nested_dissection`])
    pub fn nested_dissection(index: &VariableIndex) -> Self {
        nested_dissection::order(index)
    }

    /// The order in which variables were first inserted into the index
    pub fn natural(index: &VariableIndex) -> Self {
        Self {
            keys: index.first_appearance_order().to_vec(),
        }
    }

    /// A caller-supplied permutation, validated for uniqueness and coverage.
    ///
    /// Must cover exactly the indexed variables; any violation is a
    /// reportable configuration error.
    pub fn custom(keys: Vec<Key>, index: &VariableIndex) -> Result<Self, OrderingError> {
        let mut seen = BTreeSet::new();
        for &key in &keys {
            if !seen.insert(key) {
                return Err(OrderingError::DuplicateKey(key));
            }
            if !index.contains(key) {
                return Err(OrderingError::UnknownKey(key));
            }
        }
        for key in index.keys() {
            if !seen.contains(&key) {
                return Err(OrderingError::MissingKey(key));
            }
        }
        Ok(Self { keys })
    }

    /// An ordering over an explicit key sequence, without index validation.
    ///
    /// Duplicates are still rejected. Used for partial elimination, where
    /// the sequence deliberately covers a subset of the variables.
    pub fn from_keys(keys: Vec<Key>) -> Result<Self, OrderingError> {
        let mut seen = BTreeSet::new();
        for &key in &keys {
            if !seen.insert(key) {
                return Err(OrderingError::DuplicateKey(key));
            }
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Position of `key` in the elimination sequence
    pub fn position(&self, key: Key) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }
}

impl Index<usize> for Ordering {
    type Output = Key;

    fn index(&self, position: usize) -> &Key {
        &self.keys[position]
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ordering[")?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Factor, FactorGraph};

    struct TestFactor {
        keys: Vec<Key>,
    }

    impl Factor for TestFactor {
        fn keys(&self) -> &[Key] {
            &self.keys
        }
    }

    fn indexed_chain() -> VariableIndex {
        let mut graph = FactorGraph::new();
        graph.add(TestFactor { keys: vec![0] });
        graph.add(TestFactor { keys: vec![0, 1] });
        graph.add(TestFactor { keys: vec![1, 2] });
        VariableIndex::from_graph(&graph)
    }

    #[test]
    fn test_natural_follows_first_appearance() {
        let index = indexed_chain();
        let ordering = Ordering::natural(&index);
        assert_eq!(ordering.keys(), &[0, 1, 2]);
    }

    #[test]
    fn test_custom_valid() {
        let index = indexed_chain();
        let ordering = Ordering::custom(vec![2, 0, 1], &index).unwrap();
        assert_eq!(ordering.position(2), Some(0));
        assert_eq!(ordering.position(1), Some(2));
    }

    #[test]
    fn test_custom_rejects_duplicates() {
        let index = indexed_chain();
        let err = Ordering::custom(vec![0, 1, 1], &index).unwrap_err();
        assert_eq!(err, OrderingError::DuplicateKey(1));
    }

    #[test]
    fn test_custom_rejects_unknown_key() {
        let index = indexed_chain();
        let err = Ordering::custom(vec![0, 1, 2, 7], &index).unwrap_err();
        assert_eq!(err, OrderingError::UnknownKey(7));
    }

    #[test]
    fn test_custom_rejects_incomplete() {
        let index = indexed_chain();
        let err = Ordering::custom(vec![0, 1], &index).unwrap_err();
        assert_eq!(err, OrderingError::MissingKey(2));
    }

    #[test]
    fn test_strategies_are_deterministic() {
        let index = indexed_chain();
        for strategy in [OrderingType::MinFill, OrderingType::NestedDissection] {
            let a = Ordering::compute(&index, &strategy).unwrap();
            let b = Ordering::compute(&index, &strategy).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_strategies_cover_all_variables() {
        let index = indexed_chain();
        for strategy in [
            OrderingType::MinFill,
            OrderingType::NestedDissection,
            OrderingType::Natural,
        ] {
            let ordering = Ordering::compute(&index, &strategy).unwrap();
            let mut keys: Vec<Key> = ordering.keys().to_vec();
            keys.sort_unstable();
            assert_eq!(keys, vec![0, 1, 2]);
        }
    }
}
