//! Error types for the arbor-infer library
//!
//! This module provides the main error and result types used throughout the
//! library. All errors use the `thiserror` crate for automatic trait
//! implementations; module-specific errors convert into [`InferError`] via
//! `#[from]` so they compose with `?` across module boundaries.

use crate::inference::EliminationError;
use crate::ordering::OrderingError;
use thiserror::Error;

/// Main result type used throughout the arbor-infer library
pub type InferResult<T> = Result<T, InferError>;

/// Main error type for the arbor-infer library
#[derive(Debug, Clone, Error)]
pub enum InferError {
    /// Configuration errors from ordering construction or validation
    #[error("Ordering error: {0}")]
    Ordering(#[from] OrderingError),

    /// Numerical or structural failures inside an elimination step
    #[error("Elimination error: {0}")]
    Elimination(#[from] EliminationError),

    /// Linear algebra related errors (sparse assembly, batch solves)
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
