//! Variable persistence contract.
//!
//! The runtime passes node outputs downstream and keeps per-execution
//! scratch state through a [`VariableStore`]. How the store is backed — in
//! memory, a relational table, a file — is irrelevant to the core; it only
//! needs these four operations.

mod in_memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use in_memory::InMemoryVariableStore;

/// Errors surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/value store scoped by (graph, execution) for run-scoped variables
/// and by (graph, agent) for agent-scoped cleanup.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Read a run-scoped variable.
    async fn get_run_var(
        &self,
        graph_id: &str,
        execution_id: &str,
        key: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Write a run-scoped variable.
    async fn set_run_var(
        &self,
        graph_id: &str,
        execution_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Purge every run-scoped variable of one execution. Returns the number
    /// of variables removed.
    async fn clear_run_vars(&self, graph_id: &str, execution_id: &str)
        -> Result<usize, StoreError>;

    /// Purge everything the agent accumulated for this graph — agent-scoped
    /// variables and any remaining run-scoped state. Returns the number of
    /// variables removed.
    async fn clear_agent_vars(&self, graph_id: &str, agent_id: &str) -> Result<usize, StoreError>;
}
