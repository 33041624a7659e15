//! Junction (cluster) tree construction
//!
//! Derived from the elimination tree by merging nodes into multi-variable
//! clusters wherever a child's separator spans the parent cluster's entire
//! current scope, so that absorbing the child introduces no new structural
//! zeros into the parent's frontal block. Merging trades tree depth for
//! larger, denser elimination steps (multifrontal elimination).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::graph::{Factor, FactorGraph, Key};
use crate::inference::EliminationTree;

/// A multi-frontal cluster: a set of variables eliminated together in one
/// joint factorization
pub struct Cluster<F> {
    /// Frontal keys in elimination order
    pub frontals: Vec<Key>,
    /// Keys shared with the parent cluster, ascending
    pub separator: Vec<Key>,
    /// All factors owned by the merged elimination-tree nodes
    pub factors: Vec<Arc<F>>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Cluster forest produced by the merge pass over an elimination tree
pub struct JunctionTree<F> {
    clusters: Vec<Cluster<F>>,
    roots: Vec<usize>,
}

impl<F: Factor> JunctionTree<F> {
    /// Merge the elimination tree bottom-up into clusters.
    ///
    /// A child cluster is absorbed when its separator covers the parent
    /// cluster's whole frontal ∪ separator scope (checked by size; the
    /// subset direction is structural). The parent's frontal set grows
    /// with each absorption, so later siblings face a stricter check.
    pub fn from_elimination_tree(etree: &EliminationTree<F>) -> Self {
        struct Building<F> {
            frontals: Vec<(usize, Key)>,
            separator: Vec<Key>,
            factors: Vec<Arc<F>>,
            children: Vec<usize>,
        }

        let mut building: Vec<Option<Building<F>>> = Vec::with_capacity(etree.len());
        // Elimination-tree node -> id of the cluster that absorbed it.
        let mut cluster_of: Vec<usize> = vec![0; etree.len()];
        let mut merged = 0usize;

        for position in 0..etree.len() {
            let node = etree.node(position);
            let mut cluster = Building {
                frontals: vec![(position, node.key)],
                separator: node.separator.clone(),
                factors: node.factors.clone(),
                children: Vec::new(),
            };

            for &child_node in &node.children {
                let child_id = cluster_of[child_node];
                let child_scope = building[child_id]
                    .as_ref()
                    .expect("child cluster not yet absorbed")
                    .separator
                    .len();
                if child_scope == cluster.frontals.len() + cluster.separator.len() {
                    let child = building[child_id].take().expect("child cluster present");
                    cluster.frontals.extend(child.frontals);
                    cluster.factors.extend(child.factors);
                    cluster.children.extend(child.children);
                    for &(node_position, _) in &cluster.frontals {
                        cluster_of[node_position] = building.len();
                    }
                    merged += 1;
                } else {
                    cluster.children.push(child_id);
                }
            }

            cluster_of[position] = building.len();
            // Keep absorbed nodes pointing at the new id as well.
            for &(node_position, _) in &cluster.frontals {
                cluster_of[node_position] = building.len();
            }
            building.push(Some(cluster));
        }

        // Compact tombstoned slots and restore frontal elimination order.
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut clusters: Vec<Cluster<F>> = Vec::new();
        for (id, slot) in building.into_iter().enumerate() {
            let Some(mut cluster) = slot else {
                continue;
            };
            cluster.frontals.sort_unstable_by_key(|&(position, _)| position);
            remap.insert(id, clusters.len());
            clusters.push(Cluster {
                frontals: cluster.frontals.into_iter().map(|(_, key)| key).collect(),
                separator: cluster.separator,
                factors: cluster.factors,
                parent: None,
                children: cluster.children,
            });
        }

        let mut roots: Vec<usize> = (0..clusters.len()).collect();
        for id in 0..clusters.len() {
            let children: Vec<usize> = clusters[id]
                .children
                .iter()
                .map(|old| remap[old])
                .collect();
            for &child in &children {
                clusters[child].parent = Some(id);
            }
            clusters[id].children = children;
        }
        roots.retain(|&id| clusters[id].parent.is_none());

        debug!(
            nodes = etree.len(),
            clusters = clusters.len(),
            merged,
            "junction tree"
        );
        Self { clusters, roots }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster(&self, id: usize) -> &Cluster<F> {
        &self.clusters[id]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster<F>> {
        self.clusters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VariableIndex;
    use crate::ordering::Ordering;

    struct TestFactor {
        keys: Vec<Key>,
    }

    impl Factor for TestFactor {
        fn keys(&self) -> &[Key] {
            &self.keys
        }
    }

    fn junction(scopes: &[&[Key]], ordering: &[Key]) -> JunctionTree<TestFactor> {
        let mut graph = FactorGraph::new();
        for scope in scopes {
            graph.add(TestFactor {
                keys: scope.to_vec(),
            });
        }
        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::from_keys(ordering.to_vec()).unwrap();
        let etree = EliminationTree::from_graph(&graph, &index, &ordering).unwrap();
        JunctionTree::from_elimination_tree(&etree)
    }

    #[test]
    fn test_chain_merges_only_at_the_root() {
        // Interior separators are a single later variable, never the whole
        // parent scope, so a chain stays a chain of clusters; only the last
        // variable's cluster (separator {2}, the root's entire scope) is
        // absorbed into the root.
        let jt = junction(&[&[0], &[0, 1], &[1, 2]], &[0, 1, 2]);
        assert_eq!(jt.len(), 2);
        let root = jt.cluster(jt.roots()[0]);
        assert_eq!(root.frontals, vec![1, 2]);
        assert_eq!(jt.cluster(root.children[0]).frontals, vec![0]);
    }

    #[test]
    fn test_saturated_child_is_absorbed() {
        // Node 0's separator {1, 2} spans node 1's whole scope {1} ∪ {2}.
        let jt = junction(&[&[0, 1, 2], &[1, 2], &[2]], &[0, 1, 2]);
        assert_eq!(jt.len(), 1);
        let root = jt.cluster(jt.roots()[0]);
        assert_eq!(root.frontals, vec![0, 1, 2]);
        assert!(root.separator.is_empty());
    }

    #[test]
    fn test_frontals_keep_elimination_order() {
        let jt = junction(&[&[0, 1, 2], &[1, 2], &[2]], &[0, 1, 2]);
        let root = jt.cluster(jt.roots()[0]);
        assert_eq!(root.frontals, vec![0, 1, 2]);
    }

    #[test]
    fn test_factors_follow_their_cluster() {
        let jt = junction(&[&[0, 1, 2], &[1, 2], &[2]], &[0, 1, 2]);
        assert_eq!(jt.cluster(jt.roots()[0]).factors.len(), 3);
    }

    #[test]
    fn test_partially_saturated_sibling_stays() {
        // Children 0 and 1 of node 3 both have separator {3}; absorbing the
        // first grows the root's frontal set, so the second stays separate.
        let jt = junction(&[&[0, 3], &[1, 3], &[2, 3]], &[0, 1, 2, 3]);
        assert_eq!(jt.len(), 3);
        let root = jt.cluster(jt.roots()[0]);
        assert_eq!(root.frontals.len(), 2);
        assert_eq!(root.children.len(), 2);
    }
}
