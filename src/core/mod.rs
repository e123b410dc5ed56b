//! Core execution runtime: per-execution bookkeeping, the handler-facing
//! context, runtime events and the graph runtime itself.

mod event_bus;
mod execution;
mod node_context;
mod runtime_context;
mod workflow_runtime;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

pub use event_bus::{create_event_channel, EventEmitter, EventReceiver, EventSender, RuntimeEvent};
pub use node_context::{NodeContext, AGGREGATED_OUTPUTS_KEY};
pub use runtime_context::{FakeIdGenerator, IdGenerator, RealIdGenerator, RuntimeContext};
pub use workflow_runtime::WorkflowRuntime;

/// Shared, live view of an agent's persisted variables. Replacing the map
/// contents is visible to running handlers immediately.
pub type AgentVars = Arc<RwLock<HashMap<String, Value>>>;

/// Agent variable map seeded with `initial`.
pub fn new_agent_vars(initial: HashMap<String, Value>) -> AgentVars {
    Arc::new(RwLock::new(initial))
}
