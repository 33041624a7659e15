//! Elimination tree construction
//!
//! A forest where each node owns one variable (in ordering position) and
//! the factors that first mention it; a node's parent is the next variable
//! to be eliminated among the keys its residual factor still involves.
//! Nodes live in an arena indexed by ordering position, with parent and
//! children stored as indices.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::graph::{Factor, FactorGraph, Key, VariableIndex};
use crate::ordering::{Ordering, OrderingError};

/// One node of the elimination forest
pub struct Node<F> {
    /// The variable eliminated at this node
    pub key: Key,
    /// Factors whose earliest-ordered variable is this node's key
    pub factors: Vec<Arc<F>>,
    /// Index of the parent node, `None` for roots
    pub parent: Option<usize>,
    /// Indices of child nodes (variables eliminated earlier whose residual
    /// factor mentions this node's key)
    pub children: Vec<usize>,
    /// Keys remaining after this node's subtree is eliminated, ascending
    pub separator: Vec<Key>,
}

/// Elimination forest over an ordered (subset of the) variable set.
///
/// Invariant: every node's key precedes its parent's key in the ordering;
/// multiple roots arise for disconnected graphs and partial orderings.
pub struct EliminationTree<F> {
    nodes: Vec<Node<F>>,
    roots: Vec<usize>,
    remaining: FactorGraph<F>,
}

impl<F: Factor> fmt::Debug for Node<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field(
                "factors",
                &self.factors.iter().map(|factor| factor.keys()).collect::<Vec<_>>(),
            )
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("separator", &self.separator)
            .finish()
    }
}

impl<F: Factor> fmt::Debug for EliminationTree<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EliminationTree")
            .field("nodes", &self.nodes)
            .field("roots", &self.roots)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl<F: Factor> EliminationTree<F> {
    /// Build the forest for `ordering` over `graph`.
    ///
    /// Factors touching none of the ordered variables are collected into
    /// [`EliminationTree::remaining_factors`] for partial elimination.
    /// Ordered keys absent from the index are a configuration error.
    pub fn from_graph(
        graph: &FactorGraph<F>,
        index: &VariableIndex,
        ordering: &Ordering,
    ) -> Result<Self, OrderingError> {
        let mut position_of: HashMap<Key, usize> = HashMap::with_capacity(ordering.len());
        for (position, &key) in ordering.keys().iter().enumerate() {
            if !index.contains(key) {
                return Err(OrderingError::UnknownKey(key));
            }
            position_of.insert(key, position);
        }

        let mut nodes: Vec<Node<F>> = ordering
            .keys()
            .iter()
            .map(|&key| Node {
                key,
                factors: Vec::new(),
                parent: None,
                children: Vec::new(),
                separator: Vec::new(),
            })
            .collect();
        let mut remaining = FactorGraph::new();

        // Each factor belongs to the node of its earliest-ordered variable.
        for (_, factor) in graph.iter() {
            let earliest = factor
                .keys()
                .iter()
                .filter_map(|key| position_of.get(key))
                .min()
                .copied();
            match earliest {
                Some(position) => nodes[position].factors.push(Arc::clone(factor)),
                None => {
                    remaining.add_shared(Arc::clone(factor));
                }
            }
        }

        // Bottom-up pass: a node's residual scope is the union of its own
        // factors' keys and its children's separators, minus the node key;
        // its parent is the earliest-ordered key in that scope.
        let mut roots = Vec::new();
        for position in 0..nodes.len() {
            let mut scope: BTreeSet<Key> = BTreeSet::new();
            for factor in &nodes[position].factors {
                scope.extend(factor.keys().iter().copied());
            }
            let children = nodes[position].children.clone();
            for child in children {
                scope.extend(nodes[child].separator.iter().copied());
            }
            scope.remove(&nodes[position].key);

            let parent = scope
                .iter()
                .filter_map(|key| position_of.get(key))
                .min()
                .copied();
            nodes[position].separator = scope.into_iter().collect();

            match parent {
                Some(parent_position) => {
                    debug_assert!(
                        parent_position > position,
                        "elimination tree parent precedes child in the ordering"
                    );
                    nodes[position].parent = Some(parent_position);
                    nodes[parent_position].children.push(position);
                }
                None => roots.push(position),
            }
            trace!(
                key = nodes[position].key,
                separator = ?nodes[position].separator,
                "elimination tree node"
            );
        }

        Ok(Self {
            nodes,
            roots,
            remaining,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at an ordering position. Positions ascend children-to-parent,
    /// so iterating `0..len()` is a valid postorder.
    pub fn node(&self, position: usize) -> &Node<F> {
        &self.nodes[position]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Factors untouched by the ordering (empty for full elimination)
    pub fn remaining_factors(&self) -> &FactorGraph<F> {
        &self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestFactor {
        keys: Vec<Key>,
    }

    impl Factor for TestFactor {
        fn keys(&self) -> &[Key] {
            &self.keys
        }
    }

    fn build(
        scopes: &[&[Key]],
        ordering: &[Key],
    ) -> (FactorGraph<TestFactor>, EliminationTree<TestFactor>) {
        let mut graph = FactorGraph::new();
        for scope in scopes {
            graph.add(TestFactor {
                keys: scope.to_vec(),
            });
        }
        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::from_keys(ordering.to_vec()).unwrap();
        let tree = EliminationTree::from_graph(&graph, &index, &ordering).unwrap();
        (graph, tree)
    }

    #[test]
    fn test_chain_forms_a_path() {
        let (_, tree) = build(&[&[0], &[0, 1], &[1, 2]], &[0, 1, 2]);

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node(0).parent, Some(1));
        assert_eq!(tree.node(1).parent, Some(2));
        assert_eq!(tree.node(2).parent, None);
        assert_eq!(tree.roots(), &[2]);
        assert_eq!(tree.node(0).separator, vec![1]);
        assert_eq!(tree.node(2).separator, Vec::<Key>::new());
    }

    #[test]
    fn test_factors_assigned_to_earliest_key() {
        let (_, tree) = build(&[&[0], &[0, 1], &[1, 2]], &[0, 1, 2]);

        assert_eq!(tree.node(0).factors.len(), 2);
        assert_eq!(tree.node(1).factors.len(), 1);
        assert_eq!(tree.node(2).factors.len(), 0);
    }

    #[test]
    fn test_disconnected_graph_forms_forest() {
        let (_, tree) = build(&[&[0, 1], &[2, 3]], &[0, 1, 2, 3]);
        assert_eq!(tree.roots(), &[1, 3]);
    }

    #[test]
    fn test_parent_skips_to_next_involved_variable() {
        // Factor (0, 3) bypasses variables 1 and 2 entirely.
        let (_, tree) = build(&[&[0, 3], &[1, 2], &[2, 3]], &[0, 1, 2, 3]);
        assert_eq!(tree.node(0).parent, Some(3));
        assert_eq!(tree.node(1).parent, Some(2));
        assert_eq!(tree.node(2).parent, Some(3));
    }

    #[test]
    fn test_partial_ordering_collects_remaining() {
        let (_, tree) = build(&[&[0, 1], &[1, 2], &[2, 3], &[3]], &[0, 1]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.remaining_factors().num_factors(), 2);
        // Node 1's residual involves only the never-eliminated key 2.
        assert_eq!(tree.node(1).separator, vec![2]);
        assert_eq!(tree.node(1).parent, None);
    }

    #[test]
    fn test_unknown_ordering_key_rejected() {
        let mut graph = FactorGraph::new();
        graph.add(TestFactor { keys: vec![0] });
        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::from_keys(vec![0, 9]).unwrap();
        let err = EliminationTree::from_graph(&graph, &index, &ordering).unwrap_err();
        assert_eq!(err, OrderingError::UnknownKey(9));
    }
}
