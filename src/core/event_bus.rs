//! Runtime events emitted while executing a graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Observable milestones of graph execution.
#[derive(Clone, Debug, Serialize)]
pub enum RuntimeEvent {
    ExecutionStarted {
        execution_id: String,
        trigger_topic: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: String,
        node_id: String,
        output: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCleaned {
        execution_id: String,
        timestamp: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::UnboundedSender<RuntimeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RuntimeEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sender wrapper with an atomic active flag so that event emission can be
/// cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<EventSender>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: EventSender) -> Self {
        Self {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Emitter that drops every event.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn emit(&self, event: RuntimeEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel() {
        let (tx, mut rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);
        emitter.emit(RuntimeEvent::NodeStarted {
            execution_id: "exec-0".into(),
            node_id: "n1".into(),
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            RuntimeEvent::NodeStarted { node_id, .. } => assert_eq!(node_id, "n1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emitter_deactivates_on_closed_channel() {
        let (tx, rx) = create_event_channel();
        drop(rx);
        let emitter = EventEmitter::new(tx);
        emitter.emit(RuntimeEvent::ExecutionCleaned {
            execution_id: "exec-0".into(),
            timestamp: Utc::now(),
        });
        assert!(!emitter.is_active());
    }

    #[test]
    fn test_disabled_emitter_is_inactive() {
        assert!(!EventEmitter::disabled().is_active());
    }
}
