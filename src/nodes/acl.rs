//! Messaging handlers: publish parent output to a topic, extract content
//! from the firing message.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{NodeContext, AGGREGATED_OUTPUTS_KEY};
use crate::error::NodeError;
use crate::message::{AgentMessage, Performative};
use crate::nodes::NodeHandler;

const DEFAULT_TOPIC: &str = "/default/topic";

/// Publishes the node's effective parent output(s) to a topic read from the
/// node's static input. A single parent output is sent as-is, several are
/// wrapped into an aggregate bundle. A leading `/self` in the topic is
/// rewritten to the agent's own channel.
pub struct SendMessageHandler;

#[async_trait]
impl NodeHandler for SendMessageHandler {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        let topic = match ctx.input("topic").and_then(Value::as_str) {
            Some(topic) => topic.replacen("/self", &format!("/agent:{}", ctx.agent_id()), 1),
            None => DEFAULT_TOPIC.to_string(),
        };

        let mut parents = ctx.parent_outputs().await?;
        let content = if parents.len() == 1 {
            parents.pop().unwrap_or(Value::Null)
        } else {
            json!({ "key": AGGREGATED_OUTPUTS_KEY, "value": parents })
        };

        let message =
            AgentMessage::new(ctx.agent_id(), content).with_performative(Performative::Inform);
        ctx.broker().publish(&topic, &message);
        ctx.write_output("message_sent", json!({ "topic": topic }));
        Ok(())
    }
}

/// Extracts the content of the message that fired this execution and writes
/// it as the node's output.
pub struct ExtractContentHandler;

#[async_trait]
impl NodeHandler for ExtractContentHandler {
    async fn run(&self, ctx: &NodeContext) -> Result<(), NodeError> {
        match ctx.message() {
            Some(message) => ctx.write_raw_output(message.content.clone()),
            None => ctx.write_output(
                "extracted_content",
                json!({ "error": "no message received" }),
            ),
        }
        Ok(())
    }
}
