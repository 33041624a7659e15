//! Factor graph containers and the symbolic factor abstraction
//!
//! A [`FactorGraph`] is an ordered, possibly-sparse collection of immutable
//! factor handles. Elimination never mutates a graph; it reads handles and
//! produces new factors and conditionals. Erased slots stay in place as
//! `None` so factor positions remain stable, which the incremental machinery
//! relies on.

pub mod variable_index;

pub use variable_index::VariableIndex;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a variable. Ordering-independent identity.
pub type Key = u64;

/// A local constraint or likelihood term over a subset of variables.
///
/// Factors are immutable after construction and shared by `Arc`; numeric
/// evaluation is family-specific and lives on the concrete factor types.
pub trait Factor: Send + Sync {
    /// The variables this factor involves.
    fn keys(&self) -> &[Key];
}

/// Factors that can be constructed with a scope but no numeric content.
///
/// Used by the incremental machinery to force a set of keys to co-occur in
/// one clique during re-elimination without influencing the numerics.
pub trait SymbolicFactor: Factor {
    /// A factor over `keys` contributing nothing numerically.
    fn symbolic(keys: Vec<Key>) -> Self;
}

/// An ordered, possibly-sparse collection of factor handles.
///
/// Mutable only by append and erase. Erasing leaves a `None` slot so that
/// positions of the remaining factors do not shift.
pub struct FactorGraph<F> {
    factors: Vec<Option<Arc<F>>>,
}

impl<F> Default for FactorGraph<F> {
    fn default() -> Self {
        Self { factors: Vec::new() }
    }
}

impl<F> Clone for FactorGraph<F> {
    fn clone(&self) -> Self {
        Self {
            factors: self.factors.clone(),
        }
    }
}

impl<F: Factor> FactorGraph<F> {
    /// Creates a new, empty factor graph
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            factors: Vec::with_capacity(capacity),
        }
    }

    /// Append a factor and return its position
    pub fn add(&mut self, factor: F) -> usize {
        self.add_shared(Arc::new(factor))
    }

    /// Append an already-shared factor handle and return its position
    pub fn add_shared(&mut self, factor: Arc<F>) -> usize {
        self.factors.push(Some(factor));
        self.factors.len() - 1
    }

    /// Erase the factor at `position`, leaving a `None` slot.
    ///
    /// Returns the erased handle, or `None` if the slot was already empty.
    /// A position outside the graph's bounds is a programming error.
    pub fn erase(&mut self, position: usize) -> Option<Arc<F>> {
        assert!(
            position < self.factors.len(),
            "factor position {} out of bounds (graph has {} slots)",
            position,
            self.factors.len()
        );
        self.factors[position].take()
    }

    /// Get the factor at `position`, if the slot is occupied
    pub fn factor(&self, position: usize) -> Option<&Arc<F>> {
        self.factors.get(position).and_then(|slot| slot.as_ref())
    }

    /// Number of slots, including erased ones
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of occupied slots
    pub fn num_factors(&self) -> usize {
        self.factors.iter().filter(|slot| slot.is_some()).count()
    }

    /// Iterate over occupied slots as (position, handle) pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<F>)> {
        self.factors
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|f| (i, f)))
    }

    /// The set of variables involved in any factor (set union)
    pub fn keys(&self) -> BTreeSet<Key> {
        self.iter()
            .flat_map(|(_, f)| f.keys().iter().copied())
            .collect()
    }

    /// Append all occupied slots of `other`, sharing the handles
    pub fn extend_shared(&mut self, other: &FactorGraph<F>) {
        for (_, f) in other.iter() {
            self.add_shared(Arc::clone(f));
        }
    }
}

impl<F: Factor> FromIterator<F> for FactorGraph<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut graph = FactorGraph::new();
        for factor in iter {
            graph.add(factor);
        }
        graph
    }
}

impl<F: Factor> fmt::Debug for FactorGraph<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for slot in &self.factors {
            match slot {
                Some(factor) => list.entry(&factor.keys()),
                None => list.entry(&"<erased>"),
            };
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestFactor {
        keys: Vec<Key>,
    }

    impl TestFactor {
        fn new(keys: Vec<Key>) -> Self {
            Self { keys }
        }
    }

    impl Factor for TestFactor {
        fn keys(&self) -> &[Key] {
            &self.keys
        }
    }

    #[test]
    fn test_add_and_iterate() {
        let mut graph = FactorGraph::new();
        graph.add(TestFactor::new(vec![0, 1]));
        graph.add(TestFactor::new(vec![1, 2]));

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.num_factors(), 2);
        let positions: Vec<usize> = graph.iter().map(|(i, _)| i).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn test_erase_keeps_positions_stable() {
        let mut graph = FactorGraph::new();
        graph.add(TestFactor::new(vec![0]));
        graph.add(TestFactor::new(vec![1]));
        graph.add(TestFactor::new(vec![2]));

        let erased = graph.erase(1);
        assert!(erased.is_some());
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.num_factors(), 2);
        assert!(graph.factor(1).is_none());
        assert_eq!(graph.factor(2).unwrap().keys(), &[2]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_erase_out_of_bounds_panics() {
        let mut graph: FactorGraph<TestFactor> = FactorGraph::new();
        graph.erase(0);
    }

    #[test]
    fn test_keys_union() {
        let mut graph = FactorGraph::new();
        graph.add(TestFactor::new(vec![2, 0]));
        graph.add(TestFactor::new(vec![0, 1]));

        let keys: Vec<Key> = graph.keys().into_iter().collect();
        assert_eq!(keys, vec![0, 1, 2]);
    }
}
