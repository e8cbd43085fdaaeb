//! Top-level wiring: the public `Coordinator` callers construct and drive
//! (§4.1 caller surface, §6 "Caller surface": `splitBatch`,
//! `handleDeadWorker(s)`, `stop()`).

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{CoordinationClient, WorkerId};
use crate::config::CoordinatorConfig;
use crate::errors::CoordinatorError;
use crate::facade;
use crate::finisher::{NoopFinisher, TaskFinisher};
use crate::fs_collab::{FsLogFileSource, LogFileSource};
use crate::state_machine::StateMachine;
use crate::table::TaskTable;
use crate::task::TaskStatus;
use crate::timeout_monitor;

/// A snapshot of task-table counts, in the teacher's `generate_report()`
/// style (§10.6) — a plain method, no metrics crate involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub total: usize,
    pub in_progress: usize,
    pub success: usize,
    pub failure: usize,
}

/// The master-side coordinator. Owns the task table, talks to the
/// coordination store through a [`CoordinationClient`], and runs the
/// timeout monitor as a background task until [`Coordinator::stop`].
pub struct Coordinator {
    sm: Arc<StateMachine>,
    fs: Arc<dyn LogFileSource>,
    stop: CancellationToken,
    monitor_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    /// Builds a coordinator over the real filesystem and a default
    /// (always-succeeds) finisher.
    pub fn new(client: Arc<dyn CoordinationClient>, config: CoordinatorConfig, self_id: WorkerId) -> Self {
        Self::with_finisher_and_fs(
            client,
            config,
            self_id,
            Arc::new(NoopFinisher),
            Arc::new(FsLogFileSource),
        )
    }

    pub fn with_finisher_and_fs(
        client: Arc<dyn CoordinationClient>,
        config: CoordinatorConfig,
        self_id: WorkerId,
        finisher: Arc<dyn TaskFinisher>,
        fs: Arc<dyn LogFileSource>,
    ) -> Self {
        let table = Arc::new(TaskTable::new());
        let sm = StateMachine::new(client, Arc::new(config), finisher, self_id, table);
        Coordinator {
            sm,
            fs,
            stop: CancellationToken::new(),
            monitor_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Orphan discovery (§4.8): lists children of the namespace, pulls any
    /// stale tasks into memory, and force-resubmits incarnation-0 orphans
    /// still `Unassigned`. Then starts the timeout monitor.
    pub async fn initialize(&self) -> Result<(), CoordinatorError> {
        let namespace = self.sm.config.namespace.path.clone();
        let children = self
            .sm
            .client
            .list_children(&namespace)
            .await
            .map_err(|err| CoordinatorError::StoreExhausted {
                path: namespace.clone(),
                reason: err.to_string(),
            })?;

        info!(count = children.len(), "orphan discovery: adopting stale tasks");
        for key in children {
            if key.is_rescan_marker(&namespace) {
                continue;
            }
            let entry = self.sm.table.insert_orphan(key.clone());
            self.sm.table.record_node_created();
            self.sm.issue_get_data_with_watch(key, entry).await;
        }

        self.start_monitor().await;
        Ok(())
    }

    async fn start_monitor(&self) {
        let mut guard = self.monitor_handle.lock().await;
        if guard.is_some() {
            return;
        }
        let sm = self.sm.clone();
        let stop = self.stop.clone();
        *guard = Some(tokio::spawn(timeout_monitor::run(sm, stop)));
    }

    /// `splitBatch` (§4.1).
    pub async fn split_batch(&self, log_dirs: &[PathBuf]) -> Result<u64, CoordinatorError> {
        facade::split_batch(&self.sm, self.fs.as_ref(), log_dirs, &self.stop).await
    }

    pub fn handle_dead_worker(&self, worker: WorkerId) {
        self.sm.table.handle_dead_worker(worker);
    }

    pub fn handle_dead_workers(&self, workers: impl IntoIterator<Item = WorkerId>) {
        self.sm.table.handle_dead_workers(workers);
    }

    /// Halts the timeout monitor and unblocks any waiting callers with
    /// failure (§5 "Cancellation").
    pub async fn stop(&self) {
        self.stop.cancel();
        if let Some(handle) = self.monitor_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn generate_report(&self) -> Report {
        let mut report = Report::default();
        for (_, entry) in self.sm.table.snapshot() {
            report.total += 1;
            // `try_lock` is sufficient here: this is a best-effort
            // diagnostic snapshot, not a correctness-critical read.
            if let Ok(guard) = entry.state.try_lock() {
                match guard.status {
                    TaskStatus::InProgress => report.in_progress += 1,
                    TaskStatus::Success => report.success += 1,
                    TaskStatus::Failure => report.failure += 1,
                    TaskStatus::Deleted => {}
                }
            }
        }
        report
    }
}
