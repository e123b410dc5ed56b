//! Node-level error types.

use crate::store::StoreError;
use thiserror::Error;

/// Errors raised by a node handler or while invoking one.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("No handler registered for name: {0}")]
    HandlerNotFound(String),
    #[error("Node execution error: {0}")]
    ExecutionError(String),
    #[error("Invalid node input: {0}")]
    InvalidInput(String),
    #[error("Variable store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
