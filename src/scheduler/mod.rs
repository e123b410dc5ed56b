//! Interval-driven named tasks.
//!
//! [`CyclicTaskManager`] runs a registered async callable on a fixed
//! interval until the task is removed or the manager is stopped. It drives
//! cyclic triggers independently of the message queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::RuntimeError;

/// Async callable invoked on every tick.
pub type CyclicTaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), RuntimeError>> + Send + Sync>;

/// Registry of repeating tasks, each backed by its own interval loop.
#[derive(Default)]
pub struct CyclicTaskManager {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl CyclicTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run every `interval` until removed. An existing
    /// task under the same id is replaced.
    pub fn add_task(&self, task_id: &str, task: CyclicTaskFn, interval: Duration) {
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.remove(task_id) {
            warn!(task_id, "task already exists, replacing");
            previous.abort();
        }

        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately;
            // consume it so the task first fires one interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = task().await {
                    error!(task_id = %id, error = %e, "cyclic task failed, waiting for next tick");
                }
            }
        });
        tasks.insert(task_id.to_string(), handle);
    }

    /// Cancel and deregister a task.
    pub fn remove_task(&self, task_id: &str) {
        let mut tasks = self.tasks.lock();
        match tasks.remove(task_id) {
            Some(handle) => handle.abort(),
            None => debug!(task_id, "attempted to remove non-existent task"),
        }
    }

    /// Halt all scheduled work.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for CyclicTaskManager {
    fn drop(&mut self) {
        self.stop();
    }
}
