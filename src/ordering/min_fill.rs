//! Greedy fill-in-minimizing ordering
//!
//! At each step the heuristic eliminates the remaining variable whose
//! elimination would introduce the fewest new fill-in edges in the
//! elimination graph, breaking ties by smallest key. The elimination graph
//! is maintained lazily from variable adjacency: two variables are adjacent
//! iff they co-occur in some not-yet-eliminated factor or fill-in edge.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{Key, VariableIndex};
use crate::ordering::Ordering;

/// Fill-minimizing ordering over every indexed variable
pub fn order(index: &VariableIndex) -> Ordering {
    order_constrained(index, &BTreeSet::new())
}

/// Fill-minimizing ordering with `last` constrained to the end.
///
/// Constrained variables become eligible for selection only once no
/// unconstrained variable remains.
pub fn order_constrained(index: &VariableIndex, last: &BTreeSet<Key>) -> Ordering {
    let mut adjacency = build_adjacency(index);
    let mut remaining: BTreeSet<Key> = index.keys().collect();
    let mut keys = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let unconstrained_left = remaining.iter().any(|k| !last.contains(k));
        let candidates = remaining
            .iter()
            .copied()
            .filter(|k| !unconstrained_left || !last.contains(k));

        // BTreeSet iteration is ascending, and the strict `<` below keeps
        // the first (smallest) key among equal fill counts.
        let mut best: Option<(usize, Key)> = None;
        for key in candidates {
            let fill = fill_count(&adjacency, key);
            match best {
                Some((best_fill, _)) if fill >= best_fill => {}
                _ => best = Some((fill, key)),
            }
        }

        let (_, key) = best.expect("nonempty remaining set yields a candidate");
        eliminate(&mut adjacency, key);
        remaining.remove(&key);
        keys.push(key);
    }

    Ordering { keys }
}

/// Variable adjacency from factor scopes: a clique per factor
fn build_adjacency(index: &VariableIndex) -> BTreeMap<Key, BTreeSet<Key>> {
    let mut adjacency: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
    for key in index.keys() {
        adjacency.entry(key).or_default();
    }
    for (_, scope) in index.factor_scopes() {
        for &a in &scope {
            for &b in &scope {
                if a != b {
                    adjacency.get_mut(&a).expect("indexed key").insert(b);
                }
            }
        }
    }
    adjacency
}

/// Number of fill-in edges eliminating `key` would create
fn fill_count(adjacency: &BTreeMap<Key, BTreeSet<Key>>, key: Key) -> usize {
    let neighbors = &adjacency[&key];
    let mut fill = 0;
    for a in neighbors {
        for b in neighbors.range((std::ops::Bound::Excluded(a), std::ops::Bound::Unbounded)) {
            if !adjacency[a].contains(b) {
                fill += 1;
            }
        }
    }
    fill
}

/// Remove `key` from the elimination graph, connecting its neighbors
fn eliminate(adjacency: &mut BTreeMap<Key, BTreeSet<Key>>, key: Key) {
    let neighbors = adjacency.remove(&key).expect("key present until eliminated");
    for &a in &neighbors {
        let entry = adjacency.get_mut(&a).expect("neighbor still present");
        entry.remove(&key);
        for &b in &neighbors {
            if a != b {
                entry.insert(b);
            }
        }
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

    fn index_of(scopes: &[&[Key]]) -> VariableIndex {
        let mut graph = FactorGraph::new();
        for scope in scopes {
            graph.add(TestFactor {
                keys: scope.to_vec(),
            });
        }
        VariableIndex::from_graph(&graph)
    }

    #[test]
    fn test_chain_orders_ends_first() {
        // A chain is already chordal, so every step has zero fill and the
        // tie-break picks ascending keys.
        let index = index_of(&[&[0], &[0, 1], &[1, 2]]);
        let ordering = order(&index);
        assert_eq!(ordering.keys(), &[0, 1, 2]);
    }

    #[test]
    fn test_star_eliminates_leaves_before_hub() {
        // Leaves have zero fill; the hub (key 0) would connect all leaves.
        let index = index_of(&[&[0, 1], &[0, 2], &[0, 3]]);
        let ordering = order(&index);
        assert_eq!(ordering.keys()[3], 0);
    }

    #[test]
    fn test_diamond_defers_landmarks() {
        // Poses 0,1,2 each see both landmarks 3,4; landmark elimination
        // would pairwise-connect three poses, so poses go first.
        let index = index_of(&[
            &[0, 1],
            &[0, 3],
            &[0, 4],
            &[1, 3],
            &[1, 4],
            &[2, 3],
            &[2, 4],
        ]);
        let ordering = order(&index);
        assert_eq!(ordering.keys(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_constrained_group_comes_last() {
        let index = index_of(&[&[0, 1], &[1, 2], &[2, 3]]);
        let last: BTreeSet<Key> = [1].into_iter().collect();
        let ordering = order_constrained(&index, &last);
        assert_eq!(*ordering.keys().last().unwrap(), 1);
    }
}
