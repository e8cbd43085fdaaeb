//! The in-memory [`Task`]: authoritative bookkeeping for one task key,
//! mutated under its own lock by the state machine and timeout monitor
//! (§3, §5).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};

use crate::batch::Batch;
use crate::client::WorkerId;
use crate::key::TaskKey;

/// In-memory lifecycle of a task (distinct from the wire `TaskState`
/// published at its key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    InProgress,
    Success,
    Failure,
    Deleted,
}

/// In-memory bookkeeping for one task key (§3 `Task`).
#[derive(Debug)]
pub struct Task {
    pub key: TaskKey,
    /// Null (`None`) means orphan: adopted from the store at startup, or
    /// whose batch has since died.
    pub batch: Option<Arc<Batch>>,
    pub status: TaskStatus,
    pub last_update: Instant,
    pub last_version: i64,
    pub cur_worker: Option<WorkerId>,
    pub incarnation: u64,
    pub unforced_resubmits: u32,
    pub threshold_reached: bool,
}

impl Task {
    /// A freshly created task, about to be published as `Unassigned`.
    pub fn new(key: TaskKey, batch: Option<Arc<Batch>>) -> Self {
        Task {
            key,
            batch,
            status: TaskStatus::InProgress,
            last_update: Instant::now(),
            last_version: 0,
            cur_worker: None,
            incarnation: 0,
            unforced_resubmits: 0,
            threshold_reached: false,
        }
    }

    /// An orphan task adopted from the store at startup (§4.8), inferred
    /// to already be in progress since it has a live znode.
    pub fn orphan(key: TaskKey) -> Self {
        Task::new(key, None)
    }

    pub fn is_unassigned(&self) -> bool {
        self.cur_worker.is_none()
    }

    /// True if this task has no live batch claim: either it never had one
    /// (adopted as an orphan) or its batch died before the task settled.
    pub fn is_orphan(&self) -> bool {
        match &self.batch {
            None => true,
            Some(b) => b.is_dead(),
        }
    }

    /// Drops a batch reference once observed dead, so the task reverts to
    /// orphan semantics for every lookup from here on rather than pointing
    /// at a batch whose caller already gave up (§9 "degrade to orphan
    /// semantics").
    pub fn clear_dead_batch(&mut self) {
        if self.batch.as_ref().is_some_and(|b| b.is_dead()) {
            self.batch = None;
        }
    }
}

/// A [`Task`] plus the synchronization primitives the spec's design notes
/// call for: a lock serializing mutation, and a condition any waiter on
/// this task's state re-checks after being woken (§9 "per-object condition
/// variables").
#[derive(Debug)]
pub struct TaskEntry {
    pub state: Mutex<Task>,
    pub notify: Notify,
}

impl TaskEntry {
    pub fn new(task: Task) -> Arc<Self> {
        Arc::new(TaskEntry {
            state: Mutex::new(task),
            notify: Notify::new(),
        })
    }

    /// Wakes anyone waiting on this task's condition (e.g. `Failure` ->
    /// `Deleted`).
    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }
}
