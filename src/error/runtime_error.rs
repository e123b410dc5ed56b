//! Runtime-level error types.

use super::NodeError;
use thiserror::Error;

/// Errors surfaced by the graph runtime, broker and agent lifecycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Graph validation error: {0}")]
    GraphValidationError(String),
    #[error("Cycle detected in graph: {0}")]
    CycleDetected(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Timed out waiting for message on topic: {0}")]
    Timeout(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for RuntimeError {
    fn from(value: NodeError) -> Self {
        RuntimeError::NodeError(Box::new(value))
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
