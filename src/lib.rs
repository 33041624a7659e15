//! arbor-infer: a variable-elimination inference engine for factor graphs.
//!
//! Given a graph of local constraints (factors) over named variables, this
//! crate computes either an ordered product-of-conditionals representation
//! (a Bayes net, via sequential elimination) or a tree of multi-variable
//! cliques (a Bayes tree, via multifrontal elimination) that is equivalent
//! to the original graph but far cheaper to query, marginalize, and update
//! incrementally.
//!
//! The symbolic machinery (variable index, orderings, elimination tree,
//! junction tree) is generic over the factor family; the numeric elimination
//! step is a pluggable capability with implementations for continuous
//! (Gaussian), discrete, and hybrid (mixture) factor graphs.

pub mod discrete;
pub mod error;
pub mod gaussian;
pub mod graph;
pub mod hybrid;
pub mod inference;
pub mod logger;
pub mod ordering;

pub use error::{InferError, InferResult};
pub use graph::{Factor, FactorGraph, Key};
pub use inference::{BayesNet, BayesTree, Conditional, Eliminate, EliminationError};
pub use logger::{init_logger, init_logger_with_level};
pub use ordering::{Ordering, OrderingType};
