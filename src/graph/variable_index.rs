//! Variable-to-factor incidence index
//!
//! Maps each variable to the positions of the factors that touch it. Built
//! once from a factor graph and updated incrementally as factors are added
//! or removed, so ordering computation and elimination-tree construction
//! never rescan the whole graph.

use std::collections::BTreeMap;

use crate::graph::{Factor, FactorGraph, Key};

/// Mapping from each variable to the ordered factor positions touching it.
///
/// Invariant: every (key, factor) incidence in the graph appears exactly
/// once; rebuilding from scratch is idempotent. The first-appearance order
/// of keys is recorded for the natural ordering strategy.
#[derive(Debug, Clone, Default)]
pub struct VariableIndex {
    index: BTreeMap<Key, Vec<usize>>,
    first_appearance: Vec<Key>,
    num_factors: usize,
}

impl VariableIndex {
    /// Scan every factor of `graph` once and record its incidences
    pub fn from_graph<F: Factor>(graph: &FactorGraph<F>) -> Self {
        let mut this = Self::default();
        this.augment(graph, 0);
        this
    }

    /// Record incidences for factor positions `start..graph.len()`.
    ///
    /// Used after appending new factors to a graph that is already indexed;
    /// positions before `start` are assumed indexed and are not rescanned.
    pub fn augment<F: Factor>(&mut self, graph: &FactorGraph<F>, start: usize) {
        assert!(
            start <= graph.len(),
            "augment start {} past graph length {}",
            start,
            graph.len()
        );
        for (position, factor) in graph.iter().filter(|(i, _)| *i >= start) {
            for &key in factor.keys() {
                let entry = self.index.entry(key).or_insert_with(|| {
                    self.first_appearance.push(key);
                    Vec::new()
                });
                entry.push(position);
            }
        }
        self.num_factors = self.num_factors.max(graph.len());
    }

    /// Remove the incidences of the factors at `positions`.
    ///
    /// Must be called before the factors are erased from the graph, since
    /// their key lists are read from it. A position outside the graph's
    /// bounds or without an occupied slot is a programming error.
    pub fn remove<F: Factor>(&mut self, positions: &[usize], graph: &FactorGraph<F>) {
        for &position in positions {
            let factor = graph
                .factor(position)
                .unwrap_or_else(|| panic!("no factor at position {position}"));
            for &key in factor.keys() {
                let entry = self
                    .index
                    .get_mut(&key)
                    .unwrap_or_else(|| panic!("key {key} not present in variable index"));
                let before = entry.len();
                entry.retain(|&p| p != position);
                assert_eq!(
                    before,
                    entry.len() + 1,
                    "incidence ({key}, {position}) missing from variable index"
                );
                if entry.is_empty() {
                    self.index.remove(&key);
                    self.first_appearance.retain(|&k| k != key);
                }
            }
        }
    }

    /// Factor positions touching `key`, in insertion order
    pub fn factors_of(&self, key: Key) -> Option<&[usize]> {
        self.index.get(&key).map(|v| v.as_slice())
    }

    pub fn contains(&self, key: Key) -> bool {
        self.index.contains_key(&key)
    }

    /// Number of indexed variables
    pub fn num_variables(&self) -> usize {
        self.index.len()
    }

    /// Number of factor positions covered by the index
    pub fn num_factors(&self) -> usize {
        self.num_factors
    }

    /// Total number of (key, factor) incidences
    pub fn num_entries(&self) -> usize {
        self.index.values().map(|v| v.len()).sum()
    }

    /// Indexed keys in ascending key order
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys().copied()
    }

    /// Indexed keys in the order they first appeared in the graph
    pub fn first_appearance_order(&self) -> &[Key] {
        &self.first_appearance
    }

    /// Invert the index: factor position -> involved keys.
    ///
    /// Used by the ordering heuristics, which work on variable adjacency
    /// (two variables are adjacent iff they co-occur in some factor).
    pub fn factor_scopes(&self) -> BTreeMap<usize, Vec<Key>> {
        let mut scopes: BTreeMap<usize, Vec<Key>> = BTreeMap::new();
        for (&key, positions) in &self.index {
            for &position in positions {
                scopes.entry(position).or_default().push(key);
            }
        }
        scopes
    }
}
