//! Bayes tree: the clique tree produced by multifrontal elimination
//!
//! Each clique holds a conditional over (frontals | separator); cliques
//! live in an arena indexed by integer id with parent/children links stored
//! as indices, plus a key → clique map for O(1) lookup. Queries compose
//! root-path conditionals instead of re-eliminating the whole tree, and
//! `remove_top` detaches the minimal affected region for incremental
//! re-elimination.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::error::InferResult;
use crate::graph::{FactorGraph, Key};
use crate::inference::{
    eliminate_partial_sequential, BayesNet, Conditional, Eliminate, EliminatedClique,
    EliminationError,
};
use crate::ordering::Ordering;

/// One clique: a conditional plus tree links.
///
/// Child → parent links are non-owning back-references; the arena owns
/// every clique and the conditional is shared only with callers that asked
/// for it.
pub struct Clique<C> {
    conditional: Arc<C>,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl<C: Conditional> Clique<C> {
    pub fn conditional(&self) -> &Arc<C> {
        &self.conditional
    }

    /// Variables eliminated together in this clique
    pub fn frontals(&self) -> &[Key] {
        self.conditional.frontals()
    }

    /// Variables shared with the parent clique
    pub fn separator(&self) -> &[Key] {
        self.conditional.parents()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// Tree of cliques equivalent to the eliminated factor graph.
///
/// Mutated in place for incremental workflows (`remove_top` plus
/// re-insertion); otherwise treated as immutable between solver
/// iterations. Mutation is not safe for concurrent callers; read-only
/// queries are.
pub struct BayesTree<C: Conditional> {
    cliques: Vec<Clique<C>>,
    roots: Vec<usize>,
    index: HashMap<Key, usize>,
}

impl<C: Conditional> Default for BayesTree<C> {
    fn default() -> Self {
        Self {
            cliques: Vec::new(),
            roots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<C: Conditional> BayesTree<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cliques(&self) -> usize {
        self.cliques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cliques.is_empty()
    }

    pub fn clique(&self, id: usize) -> &Clique<C> {
        &self.cliques[id]
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clique<C>> {
        self.cliques.iter()
    }

    /// The clique whose frontal set contains `key`, O(1)
    pub fn clique_containing(&self, key: Key) -> Option<usize> {
        self.index.get(&key).copied()
    }

    /// All frontal keys in the tree
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys().copied()
    }

    /// Insert an eliminated subtree under `parent` (`None` for a new root).
    /// Cliques are assigned arena ids in preorder, so a parent's id is
    /// always smaller than its children's.
    pub(crate) fn push_subtree(&mut self, subtree: EliminatedClique<C>, parent: Option<usize>) {
        let id = self.cliques.len();
        for &key in subtree.conditional.frontals() {
            let previous = self.index.insert(key, id);
            assert!(
                previous.is_none(),
                "key {key} frontal in two cliques; tree construction is broken"
            );
        }
        self.cliques.push(Clique {
            conditional: subtree.conditional,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent_id) => self.cliques[parent_id].children.push(id),
            None => self.roots.push(id),
        }
        for child in subtree.children {
            self.push_subtree(child, Some(id));
        }
    }

    /// Sum of clique-conditional log-probabilities at the assignment
    pub fn log_probability(&self, values: &C::Values) -> f64 {
        self.cliques
            .iter()
            .map(|c| c.conditional.log_probability(values))
            .sum()
    }

    /// Sum of clique-conditional errors
    pub fn error(&self, values: &C::Values) -> f64 {
        self.cliques.iter().map(|c| c.conditional.error(values)).sum()
    }

    /// Point estimate by back-substitution from the roots down
    pub fn optimize(&self) -> Result<C::Values, EliminationError> {
        let mut values = C::Values::default();
        let mut stack: Vec<usize> = self.roots.to_vec();
        while let Some(id) = stack.pop() {
            self.cliques[id].conditional.solve_into(&mut values)?;
            stack.extend_from_slice(&self.cliques[id].children);
        }
        Ok(values)
    }

    /// Check the running-intersection property: every clique's separator is
    /// contained in its parent's frontal ∪ separator set.
    ///
    /// A violation indicates a bug in tree construction, not malformed
    /// input.
    pub fn running_intersection_holds(&self) -> bool {
        self.cliques.iter().all(|clique| match clique.parent {
            None => true,
            Some(parent) => {
                let parent = &self.cliques[parent];
                let scope: BTreeSet<Key> = parent
                    .frontals()
                    .iter()
                    .chain(parent.separator())
                    .copied()
                    .collect();
                clique.separator().iter().all(|key| scope.contains(key))
            }
        })
    }

    /// Clique ids on the path from the clique containing `key` up to its
    /// root, inclusive
    fn root_path(&self, key: Key) -> InferResult<Vec<usize>> {
        let mut id = self.clique_containing(key).ok_or_else(|| {
            crate::error::InferError::InvalidInput(format!("key {key} is not in the tree"))
        })?;
        let mut path = vec![id];
        while let Some(parent) = self.cliques[id].parent {
            path.push(parent);
            id = parent;
        }
        Ok(path)
    }

    /// Partially eliminate the conditionals of `clique_ids` (deepest first)
    /// down to the variables in `kept`, returning the remaining factors.
    fn eliminate_path(
        &self,
        clique_ids: &[usize],
        kept: &[Key],
        eliminate: Eliminate<C::Factor, C>,
    ) -> InferResult<FactorGraph<C::Factor>> {
        let mut graph = FactorGraph::new();
        let mut to_eliminate = Vec::new();
        for &id in clique_ids {
            let clique = &self.cliques[id];
            graph.add(clique.conditional.as_factor());
            for &key in clique.frontals() {
                if !kept.contains(&key) {
                    to_eliminate.push(key);
                }
            }
        }
        let ordering = Ordering::from_keys(to_eliminate)
            .expect("clique frontal sets are disjoint by construction");
        let (_net, remaining) = eliminate_partial_sequential(&graph, &ordering, eliminate)?;
        Ok(remaining)
    }

    /// Marginal factor on a single variable.
    ///
    /// Cliques outside the root path integrate to one, so the marginal is
    /// obtained by composing only the conditionals from the containing
    /// clique up to the root and eliminating everything but `key`.
    pub fn marginal_factor(
        &self,
        key: Key,
        eliminate: Eliminate<C::Factor, C>,
    ) -> InferResult<C::Factor> {
        let path = self.root_path(key)?;
        let remaining = self.eliminate_path(&path, &[key], eliminate)?;
        let (marginal, _) = eliminate(&remaining, &[key])?;
        Ok(marginal.as_factor())
    }

    /// Joint factor graph over a pair of variables.
    ///
    /// Combines the root paths of both cliques (shared ancestors counted
    /// once) and eliminates every other variable.
    pub fn joint_factor_graph(
        &self,
        key_a: Key,
        key_b: Key,
        eliminate: Eliminate<C::Factor, C>,
    ) -> InferResult<FactorGraph<C::Factor>> {
        let path_a = self.root_path(key_a)?;
        let path_b = self.root_path(key_b)?;

        // Union, deepest first. Arena ids are preorder, so descending id
        // order puts children before parents.
        let mut ids: Vec<usize> = path_a;
        for id in path_b {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        self.eliminate_path(&ids, &[key_a, key_b], eliminate)
    }

    /// Detach the minimal top of the tree affected by `keys`.
    ///
    /// Removes every clique whose frontal set contains an affected key,
    /// together with all its ancestors, and detaches the children of
    /// removed cliques as orphan subtrees. Returns the removed
    /// conditionals in elimination order plus the orphans; the cliques
    /// remaining in `self` are the untouched components and still satisfy
    /// the running-intersection property. Keys absent from the tree are
    /// ignored.
    pub fn remove_top(&mut self, keys: &[Key]) -> (BayesNet<C>, Vec<BayesTree<C>>) {
        let mut removed: BTreeSet<usize> = BTreeSet::new();
        for &key in keys {
            let Some(mut id) = self.clique_containing(key) else {
                continue;
            };
            while removed.insert(id) {
                match self.cliques[id].parent {
                    Some(parent) => id = parent,
                    None => break,
                }
            }
        }

        if removed.is_empty() {
            return (BayesNet::new(), Vec::new());
        }

        // Parent ids precede child ids, so descending order yields
        // children before parents: a valid elimination order.
        let mut net = BayesNet::new();
        for &id in removed.iter().rev() {
            net.push_shared(Arc::clone(&self.cliques[id].conditional));
        }

        let mut orphans = Vec::new();
        for &id in &removed {
            for &child in &self.cliques[id].children {
                if !removed.contains(&child) {
                    let mut orphan = BayesTree::new();
                    self.copy_subtree(child, None, &mut orphan);
                    orphans.push(orphan);
                }
            }
        }

        // Untouched components: roots with no removed descendant. Removal
        // is closed under ancestors, so a root is untouched iff it is not
        // itself removed.
        let mut rest = BayesTree::new();
        for &root in &self.roots {
            if !removed.contains(&root) {
                let subtree = Self::clone_into_eliminated(self, root);
                rest.push_subtree(subtree, None);
            }
        }
        debug!(
            removed = removed.len(),
            orphans = orphans.len(),
            remaining = rest.num_cliques(),
            "removed top of Bayes tree"
        );
        *self = rest;

        (net, orphans)
    }

    /// Graft every clique of `other` into `self` as additional roots
    pub fn absorb(&mut self, other: BayesTree<C>) {
        for &root in other.roots() {
            let subtree = Self::clone_into_eliminated(&other, root);
            self.push_subtree(subtree, None);
        }
    }

    /// Attach `subtree` as a child of clique `parent`
    pub fn attach_subtree(&mut self, subtree: BayesTree<C>, parent: usize) {
        for &root in subtree.roots() {
            let clique = Self::clone_into_eliminated(&subtree, root);
            self.push_subtree(clique, Some(parent));
        }
    }

    fn copy_subtree(&self, id: usize, parent: Option<usize>, into: &mut BayesTree<C>) {
        let subtree = Self::clone_into_eliminated(self, id);
        into.push_subtree(subtree, parent);
    }

    fn clone_into_eliminated(tree: &BayesTree<C>, id: usize) -> EliminatedClique<C> {
        let clique = &tree.cliques[id];
        EliminatedClique {
            conditional: Arc::clone(&clique.conditional),
            children: clique
                .children
                .iter()
                .map(|&child| Self::clone_into_eliminated(tree, child))
                .collect(),
        }
    }

    /// Graphviz rendering of the clique structure for diagnostics.
    ///
    /// Each clique is labeled with its frontal keys, a colon, and its
    /// separator keys; edges point from parent to child.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph BayesTree {\n");
        for (id, clique) in self.cliques.iter().enumerate() {
            let frontals: Vec<String> =
                clique.frontals().iter().map(|k| k.to_string()).collect();
            let separator: Vec<String> =
                clique.separator().iter().map(|k| k.to_string()).collect();
            let _ = writeln!(
                out,
                "  c{id} [label=\"{} : {}\"];",
                frontals.join(" "),
                separator.join(" ")
            );
        }
        for (id, clique) in self.cliques.iter().enumerate() {
            for &child in &clique.children {
                let _ = writeln!(out, "  c{id} -> c{child};");
            }
        }
        out.push_str("}\n");
        out
    }
}
