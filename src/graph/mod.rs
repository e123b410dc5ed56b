//! Graph data model: nodes, links and the validated graph definition.

mod builder;
mod types;
mod validator;

pub use builder::{Graph, GraphBuilder};
pub use types::{trigger, Link, Node, NodeIndexMap, NodeType};
