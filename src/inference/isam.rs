//! Incremental smoothing and mapping driver
//!
//! Owns a Bayes tree and folds new factors into it without re-eliminating
//! the whole graph: the affected top of the tree is removed, its
//! conditionals re-enter elimination as ordinary factors together with the
//! new ones, and the detached orphan subtrees are re-attached under the
//! freshly eliminated cliques.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{InferError, InferResult};
use crate::graph::{FactorGraph, Key, SymbolicFactor, VariableIndex};
use crate::inference::{eliminate_multifrontal, BayesTree, Conditional, Eliminate};
use crate::ordering::{Ordering, OrderingType};

/// Incremental wrapper around a [`BayesTree`].
///
/// Not safe for concurrent callers; `update` mutates the tree in place.
pub struct Isam<C>
where
    C: Conditional,
    C::Factor: SymbolicFactor,
{
    tree: BayesTree<C>,
    eliminate: Eliminate<C::Factor, C>,
    strategy: OrderingType,
}

impl<C> Isam<C>
where
    C: Conditional,
    C::Factor: SymbolicFactor + 'static,
{
    /// A new, empty solver re-eliminating with the fill-minimizing ordering
    pub fn new(eliminate: Eliminate<C::Factor, C>) -> Self {
        Self::with_ordering(eliminate, OrderingType::MinFill)
    }

    /// Choose the ordering strategy used for each re-elimination.
    /// `Custom` is rejected at update time since the affected variable set
    /// changes from call to call.
    pub fn with_ordering(eliminate: Eliminate<C::Factor, C>, strategy: OrderingType) -> Self {
        Self {
            tree: BayesTree::new(),
            eliminate,
            strategy,
        }
    }

    pub fn bayes_tree(&self) -> &BayesTree<C> {
        &self.tree
    }

    /// Fold `new_factors` into the tree.
    ///
    /// Equivalent to eliminating the entire accumulated factor graph from
    /// scratch: only the cliques whose scope intersects the new factors'
    /// keys are re-eliminated.
    pub fn update(&mut self, new_factors: &FactorGraph<C::Factor>) -> InferResult<()> {
        if let OrderingType::Custom(_) = self.strategy {
            return Err(InferError::InvalidInput(
                "incremental updates require a recomputable ordering strategy".to_string(),
            ));
        }

        let affected: Vec<Key> = new_factors.keys().into_iter().collect();
        let (removed, orphans) = self.tree.remove_top(&affected);
        debug!(
            new_factors = new_factors.num_factors(),
            removed = removed.len(),
            orphans = orphans.len(),
            "incremental update"
        );

        let mut graph = removed.as_factor_graph();
        graph.extend_shared(new_factors);

        // A zero-content factor per orphan separator keeps those keys
        // together in one clique of the re-eliminated top, so the orphan
        // can be re-attached without violating the running intersection.
        let orphan_separators: Vec<Vec<Key>> = orphans
            .iter()
            .map(|orphan| {
                let root = orphan.roots()[0];
                orphan.clique(root).separator().to_vec()
            })
            .collect();
        for separator in &orphan_separators {
            if !separator.is_empty() {
                graph.add(C::Factor::symbolic(separator.clone()));
            }
        }

        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::compute(&index, &self.strategy)?;
        let mut top = eliminate_multifrontal(&graph, &ordering, self.eliminate)?;

        for (orphan, separator) in orphans.into_iter().zip(orphan_separators) {
            if separator.is_empty() {
                top.absorb(orphan);
                continue;
            }
            let parent = find_containing_clique(&top, &separator).unwrap_or_else(|| {
                panic!("orphan separator {separator:?} split across cliques; placeholder factor lost")
            });
            top.attach_subtree(orphan, parent);
        }

        // Components of the old tree untouched by the update survive
        // remove_top inside `self.tree`; merge them with the new top.
        let untouched = std::mem::take(&mut self.tree);
        top.absorb(untouched);

        debug_assert!(top.running_intersection_holds());
        self.tree = top;
        Ok(())
    }
}

/// The clique whose frontal ∪ separator scope contains every one of `keys`
fn find_containing_clique<C: Conditional>(tree: &BayesTree<C>, keys: &[Key]) -> Option<usize> {
    for &key in keys {
        let Some(id) = tree.clique_containing(key) else {
            continue;
        };
        let clique = tree.clique(id);
        let scope: BTreeSet<Key> = clique
            .frontals()
            .iter()
            .chain(clique.separator())
            .copied()
            .collect();
        if keys.iter().all(|k| scope.contains(k)) {
            return Some(id);
        }
    }
    None
}
