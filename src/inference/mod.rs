//! Elimination machinery shared across factor families
//!
//! The symbolic side (elimination tree, junction tree) is generic over the
//! factor type; the numeric side is a pluggable [`Eliminate`] capability
//! bound once per factor-graph family. Sequential elimination produces a
//! [`BayesNet`], multifrontal elimination a [`BayesTree`]; both are exact
//! reformulations of the input graph's joint distribution.

pub mod bayes_net;
pub mod bayes_tree;
pub mod elimination_tree;
pub mod isam;
pub mod junction_tree;

pub use bayes_net::BayesNet;
pub use bayes_tree::BayesTree;
pub use elimination_tree::EliminationTree;
pub use isam::Isam;
pub use junction_tree::JunctionTree;

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::error::InferResult;
use crate::graph::{Factor, FactorGraph, Key, VariableIndex};
use crate::ordering::Ordering;

/// Failures inside a single elimination step.
///
/// Numeric degeneracy is reported as a distinct, catchable error carrying
/// the offending keys; it is propagated unchanged through the recursive
/// drivers so the caller can decide whether to regularize, reorder, or
/// abort. A failed elimination never yields a partial Bayes net or tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EliminationError {
    /// The joint factor is numerically rank-deficient along frontal
    /// directions
    #[error("indeterminate linear system eliminating keys {keys:?}")]
    IndeterminantSystem { keys: Vec<Key> },

    /// A discrete table has an all-zero slice for some parent assignment
    #[error("degenerate discrete table over keys {keys:?}")]
    DegenerateTable { keys: Vec<Key> },

    /// No factor touches the requested frontal keys
    #[error("no factors attached to frontal keys {keys:?}")]
    EmptyCluster { keys: Vec<Key> },

    /// Two factors disagree about a variable's dimension
    #[error("conflicting dimensions for variable {key}")]
    DimensionMismatch { key: Key },

    /// A discrete variable's cardinality is known to no factor
    #[error("cardinality of discrete variable {key} is unknown")]
    UnknownCardinality { key: Key },

    /// Back-substitution requires a parent value that is not assigned
    #[error("variable {key} missing from values")]
    MissingValue { key: Key },

    /// A discrete frontal was requested while continuous factors remain
    #[error("discrete variable {key} eliminated before its continuous neighbors")]
    HybridOrdering { key: Key },

    /// A frontal set mixes continuous and discrete variables
    #[error("frontal keys mix continuous and discrete variables")]
    MixedFrontals,
}

/// Represents P(frontals | separator) for one eliminated cluster.
///
/// Stores enough family-specific information to evaluate log-probability
/// and error, to produce a point estimate by back-substitution, and to
/// re-enter elimination as an ordinary factor.
pub trait Conditional: Send + Sync + Sized {
    /// Assignment type of the family (vector values, discrete values, ...)
    type Values: Default;
    /// Factor type of the family
    type Factor: Factor;

    /// Frontal keys followed by parent (separator) keys
    fn keys(&self) -> &[Key];

    /// Number of frontal keys at the start of [`Conditional::keys`]
    fn nr_frontals(&self) -> usize;

    fn frontals(&self) -> &[Key] {
        &self.keys()[..self.nr_frontals()]
    }

    fn parents(&self) -> &[Key] {
        &self.keys()[self.nr_frontals()..]
    }

    /// log P(frontals | separator) at the assignment
    fn log_probability(&self, values: &Self::Values) -> f64;

    /// Family-specific error, negative log-probability up to a constant
    fn error(&self, values: &Self::Values) -> f64;

    /// Assign the frontal variables given already-assigned parents
    fn solve_into(&self, values: &mut Self::Values) -> Result<(), EliminationError>;

    /// Reinterpret the conditional as a factor over frontals ∪ separator
    fn as_factor(&self) -> Self::Factor;
}

/// Pluggable elimination capability, one implementation per factor family.
///
/// Given the factors attached to a cluster's frontal keys, produces the
/// conditional P(frontals | separator) and a new factor over the separator
/// alone. Selected once per graph by its declared family, never by runtime
/// inspection of individual factors.
pub type Eliminate<F, C> = fn(&FactorGraph<F>, &[Key]) -> Result<(C, F), EliminationError>;

/// Sequential (one-variable-at-a-time) elimination of the whole graph.
///
/// The ordering must cover exactly the graph's variables. Conditionals are
/// appended in elimination order, which is a valid topological order of the
/// elimination tree.
pub fn eliminate_sequential<F, C>(
    graph: &FactorGraph<F>,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<BayesNet<C>>
where
    F: Factor,
    C: Conditional<Factor = F>,
{
    let index = VariableIndex::from_graph(graph);
    let ordering = validate_full(ordering, &index)?;
    let (net, _remaining) = sequential_on_tree(graph, &index, ordering, eliminate)?;
    Ok(net)
}

/// Eliminate only the variables named in `ordering`, in that order.
///
/// Returns the Bayes net over the eliminated variables together with the
/// remaining factor graph over the untouched ones.
pub fn eliminate_partial_sequential<F, C>(
    graph: &FactorGraph<F>,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<(BayesNet<C>, FactorGraph<F>)>
where
    F: Factor,
    C: Conditional<Factor = F>,
{
    let index = VariableIndex::from_graph(graph);
    sequential_on_tree(graph, &index, ordering, eliminate)
}

/// Multifrontal elimination of the whole graph into a Bayes tree.
///
/// Variables are grouped into multi-frontal clusters by the junction-tree
/// merge rule and each cluster is eliminated in one joint factorization.
/// Sibling subtrees are data-independent and eliminated in parallel.
pub fn eliminate_multifrontal<F, C>(
    graph: &FactorGraph<F>,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<BayesTree<C>>
where
    F: Factor + 'static,
    C: Conditional<Factor = F>,
{
    let index = VariableIndex::from_graph(graph);
    let ordering = validate_full(ordering, &index)?;
    let (tree, _remaining) = multifrontal_on_tree(graph, &index, ordering, eliminate)?;
    Ok(tree)
}

/// Multifrontal elimination of only the variables named in `ordering`.
pub fn eliminate_partial_multifrontal<F, C>(
    graph: &FactorGraph<F>,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<(BayesTree<C>, FactorGraph<F>)>
where
    F: Factor + 'static,
    C: Conditional<Factor = F>,
{
    let index = VariableIndex::from_graph(graph);
    multifrontal_on_tree(graph, &index, ordering, eliminate)
}

/// Reject orderings that do not cover exactly the indexed variables
fn validate_full<'a>(
    ordering: &'a Ordering,
    index: &VariableIndex,
) -> Result<&'a Ordering, crate::ordering::OrderingError> {
    use crate::ordering::OrderingError;
    for &key in ordering.keys() {
        if !index.contains(key) {
            return Err(OrderingError::UnknownKey(key));
        }
    }
    if ordering.len() != index.num_variables() {
        for key in index.keys() {
            if ordering.position(key).is_none() {
                return Err(OrderingError::MissingKey(key));
            }
        }
    }
    Ok(ordering)
}

fn sequential_on_tree<F, C>(
    graph: &FactorGraph<F>,
    index: &VariableIndex,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<(BayesNet<C>, FactorGraph<F>)>
where
    F: Factor,
    C: Conditional<Factor = F>,
{
    let tree = EliminationTree::from_graph(graph, index, ordering)?;
    debug!(
        variables = ordering.len(),
        nodes = tree.len(),
        roots = tree.roots().len(),
        "sequential elimination"
    );

    let mut pending: Vec<Vec<Arc<F>>> = (0..tree.len()).map(|_| Vec::new()).collect();
    let mut net = BayesNet::new();
    let mut remaining = tree.remaining_factors().clone();

    for position in 0..tree.len() {
        let node = tree.node(position);
        let mut cluster = FactorGraph::with_capacity(node.factors.len() + pending[position].len());
        for factor in &node.factors {
            cluster.add_shared(Arc::clone(factor));
        }
        for factor in std::mem::take(&mut pending[position]) {
            cluster.add_shared(factor);
        }

        let (conditional, separator) = eliminate(&cluster, std::slice::from_ref(&node.key))?;
        net.push(conditional);

        match node.parent {
            Some(parent) => pending[parent].push(Arc::new(separator)),
            // A root's separator factor involves only variables outside the
            // ordering; pure constants are fully eliminated and dropped.
            None if !separator.keys().is_empty() => {
                remaining.add(separator);
            }
            None => {}
        }
    }

    Ok((net, remaining))
}

fn multifrontal_on_tree<F, C>(
    graph: &FactorGraph<F>,
    index: &VariableIndex,
    ordering: &Ordering,
    eliminate: Eliminate<F, C>,
) -> InferResult<(BayesTree<C>, FactorGraph<F>)>
where
    F: Factor + 'static,
    C: Conditional<Factor = F>,
{
    let etree = EliminationTree::from_graph(graph, index, ordering)?;
    let junction = JunctionTree::from_elimination_tree(&etree);
    debug!(
        variables = ordering.len(),
        elimination_nodes = etree.len(),
        clusters = junction.len(),
        "multifrontal elimination"
    );

    let mut remaining = etree.remaining_factors().clone();
    let mut tree = BayesTree::new();
    for &root in junction.roots() {
        let (separator, clique) = eliminate_subtree(&junction, root, eliminate)?;
        tree.push_subtree(clique, None);
        if !separator.keys().is_empty() {
            remaining.add(separator);
        }
    }

    debug_assert!(
        tree.running_intersection_holds(),
        "clique separator escapes its parent's scope"
    );
    Ok((tree, remaining))
}

/// One eliminated clique with its eliminated children, prior to arena
/// insertion
pub(crate) struct EliminatedClique<C> {
    pub(crate) conditional: Arc<C>,
    pub(crate) children: Vec<EliminatedClique<C>>,
}

fn eliminate_subtree<F, C>(
    junction: &JunctionTree<F>,
    cluster_id: usize,
    eliminate: Eliminate<F, C>,
) -> Result<(F, EliminatedClique<C>), EliminationError>
where
    F: Factor + 'static,
    C: Conditional<Factor = F>,
{
    let cluster = junction.cluster(cluster_id);

    // Children are data-independent; eliminate them in parallel and join
    // before this cluster's own factorization.
    let child_results: Vec<(F, EliminatedClique<C>)> = if cluster.children.len() > 1 {
        cluster
            .children
            .par_iter()
            .map(|&child| eliminate_subtree(junction, child, eliminate))
            .collect::<Result<_, _>>()?
    } else {
        cluster
            .children
            .iter()
            .map(|&child| eliminate_subtree(junction, child, eliminate))
            .collect::<Result<_, _>>()?
    };

    let mut cluster_graph =
        FactorGraph::with_capacity(cluster.factors.len() + child_results.len());
    for factor in &cluster.factors {
        cluster_graph.add_shared(Arc::clone(factor));
    }
    let mut children = Vec::with_capacity(child_results.len());
    for (separator_factor, clique) in child_results {
        cluster_graph.add(separator_factor);
        children.push(clique);
    }

    let (conditional, separator) = eliminate(&cluster_graph, &cluster.frontals)?;
    Ok((
        separator,
        EliminatedClique {
            conditional: Arc::new(conditional),
            children,
        },
    ))
}
