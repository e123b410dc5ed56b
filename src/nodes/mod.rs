//! Node handler contract and registry.
//!
//! Every pluggable node kind — built-in or embedder-supplied — implements
//! [`NodeHandler`] and is resolved by name from the
//! [`NodeHandlerRegistry`] at execution time. Custom nodes register
//! statically compiled logic (see [`FnHandler`]) instead of shipping inline
//! code.

mod acl;
mod conditional;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::NodeContext;
use crate::error::NodeError;

pub use acl::{ExtractContentHandler, SendMessageHandler};
pub use conditional::GateOnOutputHandler;

/// Well-known handler names registered by default.
pub mod names {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const EXTRACT_MESSAGE_CONTENT: &str = "extract_message_content";
    pub const PASS_THROUGH: &str = "pass_through";
    pub const GATE_ON_OUTPUT: &str = "gate_on_output";
}

/// Trait for node execution. The handler reads its inputs and writes its
/// outputs exclusively through the provided [`NodeContext`].
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError>;
}

/// Registry of node handlers by name.
pub struct NodeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeHandlerRegistry {
    pub fn new() -> Self {
        let mut registry = NodeHandlerRegistry {
            handlers: HashMap::new(),
        };
        registry.register(names::SEND_MESSAGE, Arc::new(SendMessageHandler));
        registry.register(names::EXTRACT_MESSAGE_CONTENT, Arc::new(ExtractContentHandler));
        registry.register(names::PASS_THROUGH, Arc::new(PassThroughHandler));
        registry.register(names::GATE_ON_OUTPUT, Arc::new(GateOnOutputHandler));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl Default for NodeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter node body: forwards the effective parent output(s) unchanged.
pub struct PassThroughHandler;

#[async_trait]
impl NodeHandler for PassThroughHandler {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        ctx.pass_through().await
    }
}

/// Adapts an async closure to the [`NodeHandler`] contract, the seam for
/// embedder-authored custom nodes.
pub struct FnHandler {
    func: Box<dyn for<'a> Fn(&'a NodeContext) -> BoxFuture<'a, Result<(), NodeError>> + Send + Sync>,
}

impl FnHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: for<'a> Fn(&'a NodeContext) -> BoxFuture<'a, Result<(), NodeError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl NodeHandler for FnHandler {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        (self.func)(ctx).await
    }
}
