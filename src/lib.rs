//! # agentflow — graph-driven agent execution runtime
//!
//! `agentflow` executes "agents": autonomous units whose behavior is a
//! directed graph of typed nodes (triggers, resources, actions, generators,
//! custom) wired together with links. The crate provides:
//!
//! - **Graph runtime**: concurrent graph walking with fan-out per outgoing
//!   link, exactly-once merge joins, cooperative cancellation at path /
//!   execution / agent granularity, and per-execution variable cleanup.
//! - **Topic broker**: in-process publish/subscribe with MQTT-style `+`/`#`
//!   wildcards, subscription subsumption and one-shot waiters.
//! - **Cyclic scheduler**: named tasks running on a fixed interval, driving
//!   cyclic triggers.
//! - **Agent lifecycle**: one workflow runtime and one message processing
//!   loop per started agent, with idempotent start/stop.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use agentflow::{
//!     AgentRuntime, CyclicTaskManager, Graph, InMemoryVariableStore, MessageBroker, Node,
//!     NodeHandlerRegistry, RuntimeConfig, RuntimeContext, trigger,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let graph = Arc::new(
//!         Graph::builder("wf-1", "greeter")
//!             .add_node(Node::trigger("init", "Init", trigger::INIT))
//!             .build()
//!             .unwrap(),
//!     );
//!
//!     let broker = Arc::new(MessageBroker::new());
//!     let scheduler = Arc::new(CyclicTaskManager::new());
//!     let agent = AgentRuntime::new(
//!         "agent-1",
//!         "greeter",
//!         graph,
//!         HashMap::new(),
//!         Arc::new(InMemoryVariableStore::new()),
//!         Arc::new(NodeHandlerRegistry::new()),
//!         Arc::new(RuntimeContext::default()),
//!         RuntimeConfig::default(),
//!     );
//!
//!     agent.start(broker, scheduler);
//!     // ... publish messages, let triggers fire ...
//!     agent.stop().await;
//! }
//! ```

pub mod agent;
pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod message;
pub mod nodes;
pub mod scheduler;
pub mod store;

pub use crate::agent::AgentRuntime;
pub use crate::broker::{MessageBroker, MessagePredicate, SubscriberFn, Waiter};
pub use crate::config::RuntimeConfig;
pub use crate::core::{
    create_event_channel, new_agent_vars, AgentVars, EventEmitter, EventReceiver, EventSender,
    FakeIdGenerator, IdGenerator, NodeContext, RealIdGenerator, RuntimeContext, RuntimeEvent,
    WorkflowRuntime, AGGREGATED_OUTPUTS_KEY,
};
pub use crate::error::{NodeError, RuntimeError, RuntimeResult};
pub use crate::graph::{trigger, Graph, GraphBuilder, Link, Node, NodeType};
pub use crate::message::{AgentMessage, Performative};
pub use crate::nodes::{FnHandler, NodeHandler, NodeHandlerRegistry, PassThroughHandler};
pub use crate::scheduler::{CyclicTaskFn, CyclicTaskManager};
pub use crate::store::{InMemoryVariableStore, StoreError, VariableStore};
