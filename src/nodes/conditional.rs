//! Conditional flow handler.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::core::NodeContext;
use crate::error::NodeError;
use crate::nodes::NodeHandler;

/// Gates the current path on a parent output: when any effective parent
/// output under the configured `key` is truthy, the parent output is passed
/// through; otherwise the path stops.
pub struct GateOnOutputHandler;

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

#[async_trait]
impl NodeHandler for GateOnOutputHandler {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        let key = ctx
            .input("key")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::InvalidInput("gate node requires a 'key' input".into()))?;

        let candidates = ctx.parent_outputs_by_key(key).await?;
        if candidates.iter().any(is_truthy) {
            debug!(node_id = %ctx.node_id(), key, "gate open, passing output");
            ctx.pass_through().await?;
        } else {
            debug!(node_id = %ctx.node_id(), key, "gate closed, requesting stop path");
            ctx.request_stop_path();
        }
        Ok(())
    }
}
