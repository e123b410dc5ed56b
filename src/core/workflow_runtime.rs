//! Graph runtime — executes one graph instance on behalf of one agent.
//!
//! A trigger firing allocates a fresh execution id and walks the reachable
//! subgraph: every node runs as its own task, fan-out spawns children
//! concurrently (bounded by a semaphore), merge nodes join on a counter,
//! and the task that finishes last purges the execution's run-scoped
//! variables.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::MessageBroker;
use crate::config::RuntimeConfig;
use crate::core::event_bus::{EventEmitter, RuntimeEvent};
use crate::core::execution::{Admission, ExecutionState};
use crate::core::node_context::NodeContext;
use crate::core::runtime_context::RuntimeContext;
use crate::core::AgentVars;
use crate::graph::{trigger, Graph, NodeType};
use crate::message::AgentMessage;
use crate::nodes::NodeHandlerRegistry;
use crate::store::VariableStore;

/// Per-agent graph execution engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct WorkflowRuntime {
    graph: Arc<Graph>,
    agent_id: String,
    vars: AgentVars,
    broker: Arc<MessageBroker>,
    store: Arc<dyn VariableStore>,
    registry: Arc<NodeHandlerRegistry>,
    context: Arc<RuntimeContext>,
    executions: Arc<DashMap<String, Arc<ExecutionState>>>,
    permits: Arc<Semaphore>,
    stop_token: CancellationToken,
    events: EventEmitter,
}

impl WorkflowRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph>,
        agent_id: impl Into<String>,
        vars: AgentVars,
        broker: Arc<MessageBroker>,
        store: Arc<dyn VariableStore>,
        registry: Arc<NodeHandlerRegistry>,
        context: Arc<RuntimeContext>,
        config: &RuntimeConfig,
    ) -> Self {
        let permits = match config.max_concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        let agent_id = agent_id.into();
        info!(graph_id = %graph.id, agent_id, "workflow runtime initialized");
        Self {
            graph,
            agent_id,
            vars,
            broker,
            store,
            registry,
            context,
            executions: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(permits)),
            stop_token: CancellationToken::new(),
            events: EventEmitter::disabled(),
        }
    }

    pub fn with_event_emitter(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    fn is_globally_stopped(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    /// Resolve `topic` to an enabled trigger node and start a new execution
    /// at it. Unknown topics are a no-op.
    pub fn execute_trigger(&self, topic: &str, message: Option<AgentMessage>) {
        let agent_channel = format!("/agent:{}", self.agent_id);
        let node = self.graph.find_trigger(topic).or_else(|| {
            // A topic addressed to this agent's own channel may be wired up
            // in its self-referential form.
            if topic.contains(&agent_channel) {
                let self_topic = topic.replacen(&agent_channel, "/self", 1);
                self.graph.find_trigger(&self_topic)
            } else {
                None
            }
        });

        let Some(node) = node else {
            debug!(
                graph_id = %self.graph.id,
                topic,
                "no enabled trigger node found for topic"
            );
            return;
        };

        let execution_id = self.context.id_generator.next_id();
        info!(execution_id, topic, node_id = %node.id, "executing trigger");
        self.start_execution(execution_id, topic, node.id.clone(), message, false);
    }

    /// Run the INIT trigger once, when the agent starts.
    pub fn execute_init(&self) {
        self.execute_trigger(trigger::INIT, None);
    }

    /// Run the CYCLIC trigger; invoked by the scheduler. Skipped once a
    /// stop was requested.
    pub fn execute_cyclic(&self) {
        if self.is_globally_stopped() {
            return;
        }
        self.execute_trigger(trigger::CYCLIC, None);
    }

    /// Stop the agent's workflow: set the agent-wide stop token, clear the
    /// agent's persisted variables and run the STOP trigger node if one
    /// exists.
    pub async fn execute_stop(&self) {
        info!(graph_id = %self.graph.id, "executing STOP");
        self.stop_token.cancel();

        match self
            .store
            .clear_agent_vars(&self.graph.id, &self.agent_id)
            .await
        {
            Ok(cleared) => {
                info!(graph_id = %self.graph.id, cleared, "cleared agent variables during stop")
            }
            Err(e) => error!(
                graph_id = %self.graph.id,
                error = %e,
                "error clearing agent variables during stop"
            ),
        }

        if let Some(node) = self.graph.find_trigger(trigger::STOP) {
            let execution_id = self.context.id_generator.next_id();
            info!(execution_id, node_id = %node.id, "executing STOP trigger node");
            // The STOP execution must run even though the stop token is
            // already cancelled.
            self.start_execution(execution_id, trigger::STOP, node.id.clone(), None, true);
        } else {
            info!(
                graph_id = %self.graph.id,
                "no explicit STOP trigger, cleanup occurs as active tasks complete"
            );
        }
    }

    fn start_execution(
        &self,
        execution_id: String,
        topic: &str,
        node_id: String,
        message: Option<AgentMessage>,
        exempt_from_global_stop: bool,
    ) {
        let execution = Arc::new(ExecutionState::new(exempt_from_global_stop));
        self.executions
            .insert(execution_id.clone(), execution.clone());
        self.events.emit(RuntimeEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            trigger_topic: topic.to_string(),
            timestamp: Utc::now(),
        });
        self.spawn_node(execution_id, execution, node_id, message);
    }

    /// Schedule one node-processing task. The active-task count is raised
    /// before spawning so cleanup can never race the spawn.
    fn spawn_node(
        &self,
        execution_id: String,
        execution: Arc<ExecutionState>,
        node_id: String,
        message: Option<AgentMessage>,
    ) {
        execution.task_started();
        let runtime = self.clone();
        tokio::spawn(async move {
            let _permit = runtime.permits.clone().acquire_owned().await.ok();
            runtime
                .process_node(&execution_id, &execution, &node_id, message)
                .await;
            runtime.finish_task(&execution_id, &execution).await;
        });
    }

    async fn process_node(
        &self,
        execution_id: &str,
        execution: &Arc<ExecutionState>,
        node_id: &str,
        message: Option<AgentMessage>,
    ) {
        let Some(node) = self.graph.node(node_id) else {
            error!(
                execution_id,
                node_id,
                graph_id = %self.graph.id,
                "node not found in graph, aborting processing"
            );
            return;
        };

        let admission = execution.admit(
            node_id,
            self.graph.incoming_count(node_id),
            self.is_globally_stopped(),
        );
        match admission {
            Admission::Execute => {}
            Admission::Deferred => {
                debug!(execution_id, node_id, "prerequisites not met, execution deferred");
                return;
            }
            Admission::AlreadyCompleted => {
                debug!(execution_id, node_id, "node already completed in this execution");
                return;
            }
            Admission::Stopped => {
                debug!(execution_id, node_id, "stop requested, node execution skipped");
                return;
            }
        }

        if node.enabled {
            // A sibling may have requested a stop between admission and
            // here.
            if execution.is_stopped(self.is_globally_stopped()) {
                debug!(execution_id, node_id, "stop requested just before executing node");
                return;
            }

            info!(
                execution_id,
                node = %node.name,
                node_id,
                node_type = ?node.node_type,
                subtype = %node.subtype,
                "executing node"
            );
            self.events.emit(RuntimeEvent::NodeStarted {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                timestamp: Utc::now(),
            });

            let ctx = NodeContext::new(
                self.graph.clone(),
                execution_id.to_string(),
                node_id.to_string(),
                self.agent_id.clone(),
                message.clone(),
                node.static_input.clone(),
                self.vars.clone(),
                self.broker.clone(),
                self.store.clone(),
                execution.clone(),
                self.stop_token.clone(),
            );

            let handler = match &node.handler {
                Some(name) => match self.registry.get(name) {
                    Some(handler) => Some(handler),
                    None => {
                        warn!(
                            execution_id,
                            node_id,
                            handler = %name,
                            "no registered handler for name"
                        );
                        None
                    }
                },
                None => None,
            };

            if let Some(handler) = handler {
                if let Err(e) = handler.run(&ctx).await {
                    error!(
                        execution_id,
                        node = %node.name,
                        node_id,
                        error = %e,
                        "error during node execution"
                    );
                    self.events.emit(RuntimeEvent::NodeFailed {
                        execution_id: execution_id.to_string(),
                        node_id: node_id.to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    // Uncommitted writes are discarded with the context.
                    return;
                }
            }

            // A trigger whose output resolves to `false` gates the flow:
            // stop this path without error and without committing.
            if node.node_type == NodeType::Trigger {
                if let Some(output) = ctx.pending_output() {
                    let value = output.get("value").unwrap_or(&output);
                    if value == &Value::Bool(false) {
                        debug!(
                            execution_id,
                            node = %node.name,
                            "trigger returned false, stopping this execution path"
                        );
                        return;
                    }
                }
            }

            let committed_output = ctx.pending_output();
            if let Err(e) = ctx.commit().await {
                error!(
                    execution_id,
                    node_id,
                    error = %e,
                    "error committing node writes"
                );
                return;
            }
            self.events.emit(RuntimeEvent::NodeCompleted {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                output: committed_output,
                timestamp: Utc::now(),
            });
        } else {
            debug!(
                execution_id,
                node = %node.name,
                node_id,
                "node is disabled, skipping execution"
            );
        }

        if execution.take_stop_path(node_id) {
            debug!(
                execution_id,
                node_id, "stop path requested, no further nodes scheduled from this path"
            );
            return;
        }
        if execution.is_stopped(self.is_globally_stopped()) {
            debug!(
                execution_id,
                node_id, "stop requested after processing node, no further nodes scheduled"
            );
            return;
        }

        for child_id in self.graph.child_ids(node_id) {
            if execution.is_completed(&child_id) {
                debug!(
                    execution_id,
                    child_id, "child already completed in this execution, skipping"
                );
                continue;
            }
            self.spawn_node(
                execution_id.to_string(),
                execution.clone(),
                child_id,
                message.clone(),
            );
        }
    }

    /// Bookkeeping after a processing task ends. The task that brings the
    /// active count to zero — and only that one — purges the execution's
    /// run-scoped variables.
    async fn finish_task(&self, execution_id: &str, execution: &Arc<ExecutionState>) {
        let completion = execution.task_finished();
        if completion.remaining > 0 {
            return;
        }
        self.executions.remove(execution_id);
        if completion.purge_vars {
            info!(execution_id, "execution has no more active tasks, cleaning up");
            match self.store.clear_run_vars(&self.graph.id, execution_id).await {
                Ok(cleared) => {
                    debug!(execution_id, cleared, "cleaned up run-scoped variables")
                }
                Err(e) => error!(
                    execution_id,
                    error = %e,
                    "error cleaning up run-scoped variables"
                ),
            }
            self.events.emit(RuntimeEvent::ExecutionCleaned {
                execution_id: execution_id.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
