//! Handler-facing execution context.
//!
//! A [`NodeContext`] is the entire capability surface a node handler sees:
//! static input, the firing message, parent outputs, run- and agent-scoped
//! variables, stop callbacks and the broker. Run-scoped writes are buffered
//! and committed only after the handler succeeds, so a failing handler
//! leaves no partial writes behind.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::MessageBroker;
use crate::core::execution::ExecutionState;
use crate::core::AgentVars;
use crate::error::NodeError;
use crate::graph::Graph;
use crate::message::AgentMessage;
use crate::store::VariableStore;

/// Reserved output key marking a bundle of several parent outputs. Parent
/// readers unpack it transparently.
pub const AGGREGATED_OUTPUTS_KEY: &str = "aggregated_parent_outputs";

/// Store key holding a node's output within the execution's namespace.
pub(crate) fn output_key(node_id: &str) -> String {
    format!("{node_id}_output")
}

fn aggregated_values(item: &Value) -> Option<&Vec<Value>> {
    if item.get("key")?.as_str()? != AGGREGATED_OUTPUTS_KEY {
        return None;
    }
    item.get("value")?.as_array()
}

#[derive(Default)]
struct Pending {
    run_vars: Vec<(String, Value)>,
    output: Option<Value>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.run_vars.is_empty() && self.output.is_none()
    }
}

pub struct NodeContext {
    graph: Arc<Graph>,
    execution_id: String,
    node_id: String,
    agent_id: String,
    message: Option<AgentMessage>,
    static_input: HashMap<String, Value>,
    vars: AgentVars,
    broker: Arc<MessageBroker>,
    store: Arc<dyn VariableStore>,
    execution: Arc<ExecutionState>,
    stop_token: CancellationToken,
    pending: Mutex<Pending>,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: Arc<Graph>,
        execution_id: String,
        node_id: String,
        agent_id: String,
        message: Option<AgentMessage>,
        static_input: HashMap<String, Value>,
        vars: AgentVars,
        broker: Arc<MessageBroker>,
        store: Arc<dyn VariableStore>,
        execution: Arc<ExecutionState>,
        stop_token: CancellationToken,
    ) -> Self {
        Self {
            graph,
            execution_id,
            node_id,
            agent_id,
            message,
            static_input,
            vars,
            broker,
            store,
            execution,
            stop_token,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The message that fired this execution's trigger, if any.
    pub fn message(&self) -> Option<&AgentMessage> {
        self.message.as_ref()
    }

    /// Static configuration value of this node.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.static_input.get(key)
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Read an agent-scoped variable.
    pub fn get_var(&self, key: &str) -> Option<Value> {
        self.vars.read().get(key).cloned()
    }

    /// Write an agent-scoped variable; visible to every execution of this
    /// agent immediately.
    pub fn set_var(&self, key: &str, value: Value) {
        self.vars.write().insert(key.to_string(), value);
    }

    /// Read a run-scoped variable, observing this node's own uncommitted
    /// writes.
    pub async fn get_run_var(&self, key: &str) -> Result<Option<Value>, NodeError> {
        {
            let pending = self.pending.lock();
            if let Some((_, value)) = pending.run_vars.iter().rev().find(|(k, _)| k == key) {
                return Ok(Some(value.clone()));
            }
        }
        Ok(self
            .store
            .get_run_var(&self.graph.id, &self.execution_id, key)
            .await?)
    }

    /// Buffer a run-scoped write; committed after the handler succeeds.
    pub fn set_run_var(&self, key: &str, value: Value) {
        if self.stopped() {
            warn!(
                execution_id = %self.execution_id,
                node_id = %self.node_id,
                key,
                "stop requested, run variable write ignored"
            );
            return;
        }
        self.pending.lock().run_vars.push((key.to_string(), value));
    }

    /// Buffer this node's output as a `{key, value}` item.
    pub fn write_output(&self, key: &str, value: Value) {
        self.write_raw_output(json!({ "key": key, "value": value }));
    }

    /// Buffer this node's output verbatim.
    pub fn write_raw_output(&self, output: Value) {
        if self.stopped() {
            warn!(
                execution_id = %self.execution_id,
                node_id = %self.node_id,
                "stop requested, output from node discarded"
            );
            return;
        }
        self.pending.lock().output = Some(output);
    }

    /// Effective outputs of every direct parent. A parent output tagged as
    /// an aggregated bundle is unpacked so each contributing item is visible
    /// individually.
    pub async fn parent_outputs(&self) -> Result<Vec<Value>, NodeError> {
        let mut effective = Vec::new();
        for parent_id in self.graph.parent_ids(&self.node_id) {
            let item = self
                .store
                .get_run_var(&self.graph.id, &self.execution_id, &output_key(&parent_id))
                .await?;
            let Some(item) = item else { continue };
            match aggregated_values(&item).cloned() {
                Some(values) => effective.extend(values),
                None => effective.push(item),
            }
        }
        Ok(effective)
    }

    /// Values of effective parent output items whose key matches `key`.
    pub async fn parent_outputs_by_key(&self, key: &str) -> Result<Vec<Value>, NodeError> {
        let matching = self
            .parent_outputs()
            .await?
            .into_iter()
            .filter_map(|item| {
                if item.get("key").and_then(Value::as_str) == Some(key) {
                    item.get("value").cloned()
                } else {
                    None
                }
            })
            .collect();
        Ok(matching)
    }

    /// Single value for `key` across all effective parent outputs. Multiple
    /// candidates are ambiguous: logged and treated as absent.
    pub async fn single_parent_output(&self, key: &str) -> Result<Option<Value>, NodeError> {
        let mut matching = self.parent_outputs_by_key(key).await?;
        match matching.len() {
            1 => Ok(matching.pop()),
            0 => Ok(None),
            n => {
                warn!(
                    execution_id = %self.execution_id,
                    node_id = %self.node_id,
                    key,
                    candidates = n,
                    "multiple parent output values where a single one was expected"
                );
                Ok(None)
            }
        }
    }

    /// Forward parent output unchanged: a single effective parent output is
    /// passed through as-is, several are re-wrapped into an aggregate
    /// bundle.
    pub async fn pass_through(&self) -> Result<(), NodeError> {
        let mut effective = self.parent_outputs().await?;
        match effective.len() {
            0 => {
                debug!(
                    execution_id = %self.execution_id,
                    node_id = %self.node_id,
                    "no effective parent outputs to pass"
                );
            }
            1 => {
                let single = effective.pop().unwrap_or(Value::Null);
                self.write_raw_output(single);
            }
            _ => {
                self.write_raw_output(json!({
                    "key": AGGREGATED_OUTPUTS_KEY,
                    "value": effective,
                }));
            }
        }
        Ok(())
    }

    /// Stop this execution path: no children of the current node will be
    /// scheduled. Sibling branches continue.
    pub fn request_stop_path(&self) {
        if !self.stopped() {
            self.execution.request_stop_path(&self.node_id);
        }
    }

    /// Stop the whole execution. Sibling tasks observe the flag at their
    /// own entry points.
    pub fn request_execution_stop(&self) {
        if self.execution.request_stop() {
            debug!(execution_id = %self.execution_id, "execution stop requested");
        }
    }

    fn stopped(&self) -> bool {
        self.execution.is_stopped(self.stop_token.is_cancelled())
    }

    /// This node's buffered output, if any.
    pub(crate) fn pending_output(&self) -> Option<Value> {
        self.pending.lock().output.clone()
    }

    /// Flush buffered writes to the store. Discards everything when a stop
    /// arrived in the meantime.
    pub(crate) async fn commit(&self) -> Result<(), NodeError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if self.stopped() {
            if !pending.is_empty() {
                warn!(
                    execution_id = %self.execution_id,
                    node_id = %self.node_id,
                    "stop requested, discarding buffered writes"
                );
            }
            return Ok(());
        }
        for (key, value) in pending.run_vars {
            self.store
                .set_run_var(&self.graph.id, &self.execution_id, &key, value)
                .await?;
        }
        if let Some(output) = pending.output {
            self.store
                .set_run_var(
                    &self.graph.id,
                    &self.execution_id,
                    &output_key(&self.node_id),
                    output,
                )
                .await?;
        }
        Ok(())
    }
}
