//! Per-execution bookkeeping.
//!
//! One [`ExecutionState`] exists per trigger firing. Every mutation —
//! completed set, merge counters, stop flags, task counter — happens under
//! the execution's single lock, which is what makes merge-node admission
//! exactly-once across concurrently arriving branches.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// Admission decision for a node-processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Prerequisites met; the caller owns this node's single execution.
    Execute,
    /// Merge node still waiting on sibling branches.
    Deferred,
    /// Node already completed in this execution.
    AlreadyCompleted,
    /// Execution or agent stop requested.
    Stopped,
}

/// Outcome of a finished processing task.
pub(crate) struct TaskCompletion {
    pub remaining: usize,
    /// True for exactly one task per execution: the one that brought the
    /// counter to zero with no stop pending.
    pub purge_vars: bool,
}

#[derive(Default)]
struct Book {
    completed: HashSet<String>,
    merge_counters: HashMap<String, usize>,
    stop_path: HashSet<String>,
    stop_requested: bool,
    active_tasks: usize,
}

pub(crate) struct ExecutionState {
    /// Set for the STOP trigger's execution, which must run even though the
    /// agent-wide stop token is already cancelled.
    exempt_from_global_stop: bool,
    book: Mutex<Book>,
}

impl ExecutionState {
    pub fn new(exempt_from_global_stop: bool) -> Self {
        Self {
            exempt_from_global_stop,
            book: Mutex::new(Book::default()),
        }
    }

    /// Admission check for `node_id`: stop flags, idempotent re-entry guard
    /// and the merge-counter join, all under one lock.
    pub fn admit(&self, node_id: &str, incoming_links: usize, global_stop: bool) -> Admission {
        let mut book = self.book.lock();
        if (global_stop && !self.exempt_from_global_stop) || book.stop_requested {
            return Admission::Stopped;
        }
        if book.completed.contains(node_id) {
            return Admission::AlreadyCompleted;
        }
        if incoming_links > 1 {
            let counter = book.merge_counters.entry(node_id.to_string()).or_insert(0);
            *counter += 1;
            if *counter < incoming_links {
                return Admission::Deferred;
            }
        }
        book.completed.insert(node_id.to_string());
        Admission::Execute
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.book.lock().completed.contains(node_id)
    }

    pub fn is_stopped(&self, global_stop: bool) -> bool {
        (global_stop && !self.exempt_from_global_stop) || self.book.lock().stop_requested
    }

    /// Request the whole execution to stop. Returns true when this call set
    /// the flag.
    pub fn request_stop(&self) -> bool {
        let mut book = self.book.lock();
        if book.stop_requested {
            false
        } else {
            book.stop_requested = true;
            true
        }
    }

    /// Request that no children of `node_id` are scheduled.
    pub fn request_stop_path(&self, node_id: &str) {
        let mut book = self.book.lock();
        if !book.stop_requested {
            book.stop_path.insert(node_id.to_string());
        }
    }

    pub fn take_stop_path(&self, node_id: &str) -> bool {
        self.book.lock().stop_path.remove(node_id)
    }

    pub fn task_started(&self) {
        self.book.lock().active_tasks += 1;
    }

    pub fn task_finished(&self) -> TaskCompletion {
        let mut book = self.book.lock();
        book.active_tasks = book.active_tasks.saturating_sub(1);
        TaskCompletion {
            remaining: book.active_tasks,
            purge_vars: book.active_tasks == 0 && !book.stop_requested,
        }
    }
}
