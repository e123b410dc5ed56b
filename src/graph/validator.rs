use petgraph::stable_graph::StableDiGraph;

use crate::error::{RuntimeError, RuntimeResult};

use super::types::{Link, Node};

/// Structural validation run at build time. Merge-counter semantics are
/// undefined on cyclic graphs, so cycles are rejected outright.
pub fn validate_graph(graph: &StableDiGraph<Node, Link>, graph_id: &str) -> RuntimeResult<()> {
    if petgraph::algo::is_cyclic_directed(graph) {
        return Err(RuntimeError::CycleDetected(graph_id.to_string()));
    }
    Ok(())
}
