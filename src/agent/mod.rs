//! Agent lifecycle manager.
//!
//! An [`AgentRuntime`] owns one [`WorkflowRuntime`] while started, bridges
//! the broker to it through an internal message queue with a dedicated
//! processing loop, and registers the agent's cyclic task. `start` and
//! `stop` are idempotent: misuse is logged, never an error.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{MessageBroker, SubscriberFn};
use crate::config::RuntimeConfig;
use crate::core::{new_agent_vars, AgentVars, EventEmitter, RuntimeContext, WorkflowRuntime};
use crate::error::RuntimeError;
use crate::graph::{trigger, Graph};
use crate::message::AgentMessage;
use crate::nodes::NodeHandlerRegistry;
use crate::scheduler::CyclicTaskManager;
use crate::store::VariableStore;

type QueueItem = Option<(String, AgentMessage)>;

/// Runtime state and execution of a single agent instance.
pub struct AgentRuntime {
    id: String,
    name: String,
    graph: Arc<Graph>,
    vars: AgentVars,
    store: Arc<dyn VariableStore>,
    registry: Arc<NodeHandlerRegistry>,
    context: Arc<RuntimeContext>,
    config: RuntimeConfig,
    events: EventEmitter,
    cyclic_task_id: String,
    started: Arc<AtomicBool>,
    runtime: Arc<RwLock<Option<WorkflowRuntime>>>,
    subscriptions: Mutex<Vec<String>>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    processing_task: Mutex<Option<JoinHandle<()>>>,
    attached_broker: Mutex<Option<Arc<MessageBroker>>>,
    attached_scheduler: Mutex<Option<Arc<CyclicTaskManager>>>,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        graph: Arc<Graph>,
        initial_vars: HashMap<String, Value>,
        store: Arc<dyn VariableStore>,
        registry: Arc<NodeHandlerRegistry>,
        context: Arc<RuntimeContext>,
        config: RuntimeConfig,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        info!(agent = %name, agent_id = %id, "agent runtime initialized");
        Self {
            cyclic_task_id: format!("{id}_cyclic_task"),
            id,
            name,
            graph,
            vars: new_agent_vars(initial_vars),
            store,
            registry,
            context,
            config,
            events: EventEmitter::disabled(),
            started: Arc::new(AtomicBool::new(false)),
            runtime: Arc::new(RwLock::new(None)),
            subscriptions: Mutex::new(Vec::new()),
            queue_tx: Mutex::new(None),
            processing_task: Mutex::new(None),
            attached_broker: Mutex::new(None),
            attached_scheduler: Mutex::new(None),
        }
    }

    pub fn with_event_emitter(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Replace the agent's persisted variables. The live runtime sees the
    /// update immediately; no restart required.
    pub fn update_vars(&self, new_vars: HashMap<String, Value>) {
        *self.vars.write() = new_vars;
        debug!(agent = %self.name, "runtime variables updated");
    }

    /// Snapshot of the agent's variables.
    pub fn vars(&self) -> HashMap<String, Value> {
        self.vars.read().clone()
    }

    /// Derived broker subscription set: the agent's id and name channels,
    /// the system wildcard and broadcast channels, plus every non-lifecycle
    /// trigger topic of the graph with a leading `/self` rewritten to the
    /// agent's own channel.
    fn derive_subscriptions(&self) -> Vec<String> {
        let mut topics: BTreeSet<String> = BTreeSet::new();
        topics.insert(format!("/agent:{}", self.id));
        topics.insert(format!("/agent:{}", self.name));
        topics.insert("/system/#".to_string());
        topics.insert(trigger::BROADCAST.to_string());
        for topic in self.graph.trigger_topics() {
            if let Some(tail) = topic.strip_prefix("/self") {
                topics.insert(format!("/agent:{}{tail}", self.id));
            } else {
                topics.insert(topic);
            }
        }
        topics.into_iter().collect()
    }

    /// Start the agent: build the workflow runtime, run INIT, register the
    /// cyclic task, subscribe on the broker and spawn the processing loop.
    /// A no-op with a warning when already started.
    pub fn start(&self, broker: Arc<MessageBroker>, scheduler: Arc<CyclicTaskManager>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(agent = %self.name, "start called but already started");
            return;
        }
        info!(agent = %self.name, "starting");

        let topics = self.derive_subscriptions();
        let has_cyclic = self.graph.has_enabled_trigger(trigger::CYCLIC);

        let runtime = WorkflowRuntime::new(
            self.graph.clone(),
            self.id.clone(),
            self.vars.clone(),
            broker.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.context.clone(),
            &self.config,
        )
        .with_event_emitter(self.events.clone());
        *self.runtime.write() = Some(runtime.clone());

        info!(agent = %self.name, "executing INIT trigger");
        runtime.execute_init();

        if has_cyclic {
            info!(agent = %self.name, task_id = %self.cyclic_task_id, "registering cyclic task");
            let started = self.started.clone();
            let runtime_slot = self.runtime.clone();
            scheduler.add_task(
                &self.cyclic_task_id,
                Arc::new(move || {
                    let started = started.clone();
                    let runtime_slot = runtime_slot.clone();
                    Box::pin(async move {
                        if !started.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        let runtime = runtime_slot.read().clone();
                        if let Some(runtime) = runtime {
                            runtime.execute_cyclic();
                        }
                        Ok(())
                    })
                }),
                Duration::from_millis(self.config.cyclic_interval_ms),
            );
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();

        info!(agent = %self.name, ?topics, "subscribing to topics");
        let callback: SubscriberFn = {
            let started = self.started.clone();
            let tx = tx.clone();
            let agent = self.name.clone();
            Arc::new(move |topic: &str, message: &AgentMessage| {
                if !started.load(Ordering::SeqCst) {
                    warn!(agent = %agent, topic, "received message while stopped, discarding");
                    return Ok(());
                }
                tx.send(Some((topic.to_string(), message.clone())))
                    .map_err(|_| RuntimeError::InternalError("agent message queue closed".into()))?;
                debug!(agent = %agent, topic, "enqueued message");
                Ok(())
            })
        };
        for topic in &topics {
            broker.subscribe(topic, &self.id, callback.clone());
        }

        *self.subscriptions.lock() = topics;
        *self.queue_tx.lock() = Some(tx);
        *self.attached_broker.lock() = Some(broker);
        *self.attached_scheduler.lock() = Some(scheduler);

        info!(agent = %self.name, "starting message processing loop");
        let loop_runtime = runtime;
        let agent = self.name.clone();
        let agent_channel = format!("/agent:{}", self.id);
        let handle = tokio::spawn(async move {
            info!(agent = %agent, "message processing loop started");
            while let Some(item) = rx.recv().await {
                let Some((topic, message)) = item else {
                    info!(agent = %agent, "received stop signal in processing loop");
                    break;
                };
                let topic = if let Some(tail) = topic.strip_prefix("/self") {
                    format!("{agent_channel}{tail}")
                } else {
                    topic
                };
                debug!(agent = %agent, topic, "dequeued message, processing");
                loop_runtime.execute_trigger(&topic, Some(message));
            }
            info!(agent = %agent, "message processing loop finished");
        });
        *self.processing_task.lock() = Some(handle);

        info!(agent = %self.name, "started");
    }

    /// Stop the agent: run STOP on the workflow runtime, remove the cyclic
    /// task, drain the processing loop with a bounded join, unsubscribe and
    /// release the runtime. A no-op with a warning when not started.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!(agent = %self.name, "stop called but not started");
            return;
        }
        info!(agent = %self.name, "stopping");

        let runtime = self.runtime.read().clone();
        match runtime {
            Some(runtime) => {
                info!(agent = %self.name, "executing STOP trigger");
                runtime.execute_stop().await;
            }
            None => warn!(agent = %self.name, "workflow runtime not initialized during stop"),
        }

        if let Some(scheduler) = self.attached_scheduler.lock().take() {
            info!(agent = %self.name, task_id = %self.cyclic_task_id, "removing cyclic task");
            scheduler.remove_task(&self.cyclic_task_id);
        }

        let handle = self.processing_task.lock().take();
        if let Some(handle) = handle {
            info!(agent = %self.name, "signaling message processing loop to stop");
            if let Some(tx) = self.queue_tx.lock().take() {
                let _ = tx.send(None);
            }
            let join_timeout = Duration::from_secs(self.config.stop_join_timeout_secs);
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(_) => info!(agent = %self.name, "message processing loop finished"),
                Err(_) => warn!(
                    agent = %self.name,
                    "message processing loop did not complete within timeout"
                ),
            }
        } else {
            self.queue_tx.lock().take();
        }

        match self.attached_broker.lock().take() {
            Some(broker) => {
                let topics = std::mem::take(&mut *self.subscriptions.lock());
                info!(agent = %self.name, ?topics, "unsubscribing from topics");
                for topic in &topics {
                    broker.unsubscribe(topic, &self.id);
                }
            }
            None => warn!(agent = %self.name, "broker not available during stop, cannot unsubscribe"),
        }

        *self.runtime.write() = None;
        info!(agent = %self.name, "stopped");
    }
}
