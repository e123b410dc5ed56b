//! Inter-agent message envelope.
//!
//! [`AgentMessage`] is the unit of communication on the broker: a sender, an
//! arbitrary JSON content payload and a set of optional conversation fields
//! in the FIPA-ACL style.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speech-act label carried by an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Performative {
    Inform,
    Failure,
    Confirm,
    Disconfirm,
    Accept,
    Decline,
    Proposal,
}

/// A message exchanged between agents through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performative: Option<Performative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl AgentMessage {
    pub fn new(sender: impl Into<String>, content: Value) -> Self {
        Self {
            sender: sender.into(),
            content,
            performative: None,
            receiver: None,
            conversation_id: None,
            reply_to: None,
            in_reply_to: None,
        }
    }

    pub fn with_performative(mut self, performative: Performative) -> Self {
        self.performative = Some(performative);
        self
    }

    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}
