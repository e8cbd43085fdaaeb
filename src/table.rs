//! The process-wide task table (§2, §3, §4.2): a lock-free concurrent map
//! from task key to in-memory [`Task`], plus the dead-worker set the
//! timeout monitor drains every tick (§4.6 step 1).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::Batch;
use crate::client::WorkerId;
use crate::key::TaskKey;
use crate::task::{Task, TaskEntry, TaskStatus};

/// Result of a successful `enqueue_task` call (§4.2).
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// No prior entry at this key; a fresh `Task` was installed and should
    /// be published as `Unassigned`.
    Fresh(Arc<TaskEntry>),
    /// An orphan in `InProgress` was adopted into this batch; no publish is
    /// needed, the task is already live in the store.
    AdoptedInProgress(Arc<TaskEntry>),
    /// An orphan already in `Success` was "installed" without bumping the
    /// batch counter, since there is no completion event left to fire.
    AdoptedSuccess,
}

/// Failure modes of `enqueue_task` (§4.2), all of which fail the whole
/// batch per the caller façade (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The same key was already installed earlier in this same batch.
    #[error("duplicate task in batch")]
    DuplicateInBatch,
    /// The global stop signal fired while waiting for a `Failure` task to
    /// reach `Deleted`.
    #[error("interrupted waiting for prior incarnation to be deleted")]
    Interrupted,
    /// Another, still-live batch owns this key.
    #[error("task already owned by another batch")]
    CollisionWithLiveBatch,
}

/// The authoritative in-memory task table (§2 "Task table").
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: DashMap<TaskKey, Arc<TaskEntry>>,
    dead_workers: Mutex<HashSet<WorkerId>>,
    /// A single volatile monotonic clock sample (§5 "Shared resources"):
    /// the last time any task's znode was (re)created, used by the
    /// timeout monitor's global-rescan gate (§4.6 step 5).
    last_node_create_time: Mutex<Option<Instant>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TaskKey) -> Option<Arc<TaskEntry>> {
        self.tasks.get(key).map(|e| e.clone())
    }

    pub fn remove(&self, key: &TaskKey) {
        self.tasks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of every `(key, entry)` pair, for the timeout monitor sweep
    /// and orphan discovery.
    pub fn snapshot(&self) -> Vec<(TaskKey, Arc<TaskEntry>)> {
        self.tasks
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Marks `worker` dead; drained by the next timeout monitor tick.
    pub fn handle_dead_worker(&self, worker: WorkerId) {
        self.dead_workers.lock().insert(worker);
    }

    pub fn handle_dead_workers(&self, workers: impl IntoIterator<Item = WorkerId>) {
        self.dead_workers.lock().extend(workers);
    }

    /// Atomically takes the dead-worker set and resets it to empty (§4.6
    /// step 1).
    pub fn take_dead_workers(&self) -> HashSet<WorkerId> {
        std::mem::take(&mut self.dead_workers.lock())
    }

    /// Records that a task znode was just (re)created, for the global
    /// rescan gate (§4.6 step 5).
    pub fn record_node_created(&self) {
        *self.last_node_create_time.lock() = Some(Instant::now());
    }

    pub fn last_node_create_time(&self) -> Option<Instant> {
        *self.last_node_create_time.lock()
    }

    /// Inserts a bare orphan entry discovered via `list_children` at
    /// startup (§4.8). The entry has no batch and is freshly `InProgress`.
    pub fn insert_orphan(&self, key: TaskKey) -> Arc<TaskEntry> {
        self.tasks
            .entry(key.clone())
            .or_insert_with(|| TaskEntry::new(Task::orphan(key)))
            .clone()
    }

    /// `createTaskIfAbsent` (§4.2): atomically resolves a collision between
    /// a fresh task key and whatever may already be in the table.
    pub async fn enqueue_task(
        &self,
        key: TaskKey,
        batch: Arc<Batch>,
        stop: &CancellationToken,
    ) -> Result<EnqueueOutcome, EnqueueError> {
        loop {
            match self.tasks.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    let entry = TaskEntry::new(Task::new(key.clone(), Some(batch.clone())));
                    vacant.insert(entry.clone());
                    batch.install();
                    return Ok(EnqueueOutcome::Fresh(entry));
                }
                Entry::Occupied(occupied) => {
                    let entry = occupied.get().clone();
                    drop(occupied);

                    // Snapshot status and batch-sameness under the per-task
                    // lock before deciding how to react. A dead batch is
                    // cleared here so the task reverts to orphan semantics
                    // instead of staying collided against a batch whose
                    // caller already gave up.
                    let (status, is_orphan, same_batch) = {
                        let mut guard = entry.state.lock().await;
                        guard.clear_dead_batch();
                        let is_orphan = guard.batch.is_none();
                        let same_batch = guard
                            .batch
                            .as_ref()
                            .is_some_and(|b| Arc::ptr_eq(b, &batch));
                        (guard.status, is_orphan, same_batch)
                    };

                    if same_batch {
                        return Err(EnqueueError::DuplicateInBatch);
                    }

                    match (status, is_orphan) {
                        (TaskStatus::InProgress, true) => {
                            let mut guard = entry.state.lock().await;
                            guard.batch = Some(batch.clone());
                            drop(guard);
                            batch.install();
                            return Ok(EnqueueOutcome::AdoptedInProgress(entry));
                        }
                        (TaskStatus::Success, true) => {
                            // Pretend to install: no completion event will
                            // ever fire for an already-done orphan.
                            return Ok(EnqueueOutcome::AdoptedSuccess);
                        }
                        (TaskStatus::Failure, _) => {
                            debug!(%key, "waiting for prior incarnation to be deleted");
                            // Arm the notification before re-checking status:
                            // a delete racing between our status read above
                            // and this arm is otherwise invisible to
                            // `notify_waiters`, which stores no permit for
                            // futures created after it fires (see
                            // `Batch::wait_for_termination` for the same
                            // pattern).
                            let notified = entry.notify.notified();
                            tokio::pin!(notified);
                            notified.as_mut().enable();
                            let already_deleted = {
                                let guard = entry.state.lock().await;
                                guard.status == TaskStatus::Deleted
                            };
                            if !already_deleted {
                                tokio::select! {
                                    _ = notified => {}
                                    _ = stop.cancelled() => return Err(EnqueueError::Interrupted),
                                }
                            }
                            // Either way, retry the whole entry lookup from
                            // scratch: the delete callback may have already
                            // removed the key from the map.
                            continue;
                        }
                        (TaskStatus::InProgress, false) | (TaskStatus::Success, false) => {
                            return Err(EnqueueError::CollisionWithLiveBatch);
                        }
                        (TaskStatus::Deleted, _) => {
                            // Raced with the remove; retry the entry lookup.
                            continue;
                        }
                    }
                }
            }
        }
    }
}
