use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle trigger topics recognized by the runtime, plus the well-known
/// application channels agents subscribe to by default.
pub mod trigger {
    pub const INIT: &str = "/agent/init";
    pub const STOP: &str = "/agent/stop";
    pub const CYCLIC: &str = "/agent/cyclic";
    pub const BROADCAST: &str = "/broadcast";
    pub const CHAT_START: &str = "/system/chat/start";
    pub const CHAT_MESSAGE_RECEIVED: &str = "/system/chat/new_message";

    /// Whether a topic is one of the lifecycle triggers the runtime fires
    /// itself (never subscribed on the broker).
    pub fn is_lifecycle(topic: &str) -> bool {
        matches!(topic, INIT | STOP | CYCLIC)
    }
}

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Resource,
    Action,
    Generator,
    Custom,
}

/// A graph node.
///
/// `subtype` depends on the type: for triggers it is the topic that
/// activates the node. `handler` names a function in the
/// [`NodeHandlerRegistry`](crate::nodes::NodeHandlerRegistry); a node with
/// no handler is a pass-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub subtype: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub static_input: HashMap<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            subtype: String::new(),
            enabled: true,
            handler: None,
            static_input: HashMap::new(),
        }
    }

    /// Trigger node activated by `topic`.
    pub fn trigger(id: impl Into<String>, name: impl Into<String>, topic: impl Into<String>) -> Self {
        let mut node = Self::new(id, name, NodeType::Trigger);
        node.subtype = topic.into();
        node
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = subtype.into();
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn with_static_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.static_input.insert(key.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A directed link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Link {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Node id to petgraph NodeIndex mapping.
pub type NodeIndexMap = HashMap<String, NodeIndex>;
