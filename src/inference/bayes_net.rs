//! Bayes net: the ordered product of conditionals from sequential
//! elimination
//!
//! Conditionals are stored in elimination order; evaluating the product at
//! an assignment reconstructs the joint distribution of the eliminated
//! graph, and back-substitution in reverse order produces a point estimate.

use std::sync::Arc;

use crate::graph::FactorGraph;
use crate::inference::{Conditional, EliminationError};

/// Ordered sequence of conditionals, owned by the net.
///
/// Created by sequential elimination, consumed by evaluation and solve
/// operations, discarded or replaced on each re-elimination.
pub struct BayesNet<C> {
    conditionals: Vec<Arc<C>>,
}

impl<C> Default for BayesNet<C> {
    fn default() -> Self {
        Self {
            conditionals: Vec::new(),
        }
    }
}

impl<C: Conditional> BayesNet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conditional: C) {
        self.conditionals.push(Arc::new(conditional));
    }

    pub fn push_shared(&mut self, conditional: Arc<C>) {
        self.conditionals.push(conditional);
    }

    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    /// Conditional at elimination position `i`
    pub fn conditional(&self, i: usize) -> &C {
        &self.conditionals[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<C>> {
        self.conditionals.iter()
    }

    /// Sum of conditional log-probabilities: the joint log-probability of
    /// the assignment under the product of conditionals
    pub fn log_probability(&self, values: &C::Values) -> f64 {
        self.conditionals
            .iter()
            .map(|c| c.log_probability(values))
            .sum()
    }

    /// Sum of conditional errors (negative log-probability up to a
    /// constant)
    pub fn error(&self, values: &C::Values) -> f64 {
        self.conditionals.iter().map(|c| c.error(values)).sum()
    }

    /// Point estimate by back-substitution through the conditional chain
    /// in reverse elimination order.
    ///
    /// For a net produced by sum-product discrete elimination this is the
    /// per-conditional argmax, not necessarily the global maximum; use
    /// max-product elimination for an exact most-probable explanation.
    pub fn optimize(&self) -> Result<C::Values, EliminationError> {
        let mut values = C::Values::default();
        for conditional in self.conditionals.iter().rev() {
            conditional.solve_into(&mut values)?;
        }
        Ok(values)
    }

    /// Reinterpret every conditional as a factor, preserving order.
    ///
    /// The resulting graph encodes the same joint distribution and can be
    /// re-eliminated, which is how incremental updates recycle removed
    /// cliques.
    pub fn as_factor_graph(&self) -> FactorGraph<C::Factor> {
        let mut graph = FactorGraph::with_capacity(self.conditionals.len());
        for conditional in &self.conditionals {
            graph.add(conditional.as_factor());
        }
        graph
    }
}

impl<C: Conditional> FromIterator<C> for BayesNet<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self {
            conditionals: iter.into_iter().map(Arc::new).collect(),
        }
    }
}
