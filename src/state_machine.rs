//! Event handler / state machine (§4.3): consumes watch callbacks and
//! async-call completions, drives each task through
//! `Unassigned -> Owned -> Done/Err -> Deleted`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, warn};

use crate::client::{
    CoordinationClient, CreateMode, CreateOutcome, DeleteOutcome, GetDataOutcome, WorkerId,
};
use crate::config::CoordinatorConfig;
use crate::finisher::{FinishOutcome, TaskFinisher};
use crate::key::TaskKey;
use crate::resubmit::{self, Directive, ResubmitOutcome};
use crate::table::TaskTable;
use crate::task::{Task, TaskEntry, TaskStatus};
use crate::wire::TaskState;

/// Owns the pieces the state machine needs to react to a callback:
/// the store, the table it mutates, the finisher it invokes, and this
/// coordinator's own worker identity (used as the `owner` of resubmitted
/// `Unassigned` payloads).
pub struct StateMachine {
    pub client: Arc<dyn CoordinationClient>,
    pub config: Arc<CoordinatorConfig>,
    pub finisher: Arc<dyn TaskFinisher>,
    pub self_id: WorkerId,
    pub table: Arc<TaskTable>,
}

impl StateMachine {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        config: Arc<CoordinatorConfig>,
        finisher: Arc<dyn TaskFinisher>,
        self_id: WorkerId,
        table: Arc<TaskTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            finisher,
            self_id,
            table,
        })
    }

    /// On create result (§4.3 "On create result").
    pub async fn on_create_result(
        self: &Arc<Self>,
        key: TaskKey,
        entry: Arc<TaskEntry>,
        outcome: CreateOutcome,
    ) {
        match outcome {
            CreateOutcome::Created { .. } | CreateOutcome::AlreadyExists => {
                self.table.record_node_created();
                self.issue_get_data_with_watch(key, entry).await;
            }
            CreateOutcome::SessionExpired => {
                error!(%key, "session expired creating task; abandoning");
            }
            CreateOutcome::RetriesExhausted(reason) => {
                warn!(%key, %reason, "create retries exhausted, marking task failed");
                self.mark_terminal(&key, &entry, TaskStatus::Failure).await;
            }
        }
    }

    /// Issues `getData` with a one-shot watch, dispatches the immediate
    /// result, then spawns a task that waits for the watch to fire and
    /// re-arms itself (§4.3 "On watch event").
    pub(crate) async fn issue_get_data_with_watch(self: &Arc<Self>, key: TaskKey, entry: Arc<TaskEntry>) {
        let (tx, mut rx) = unbounded_channel();
        let outcome = self
            .client
            .get_data(&key, Some(tx), self.config.retry.zk_retries)
            .await;
        self.on_get_data_result(key.clone(), entry.clone(), outcome)
            .await;

        let sm = self.clone();
        tokio::spawn(async move {
            if rx.recv().await.is_some() {
                sm.on_watch_event(key, entry).await;
            }
            // `rx` closing (sender dropped, e.g. the node was deleted)
            // means there is nothing left to watch; let the task end.
        });
    }

    /// On watch event (§4.3 "On watch event"): heartbeat, then re-issue
    /// `getData` with watch to refresh version and re-arm.
    pub async fn on_watch_event(self: &Arc<Self>, key: TaskKey, entry: Arc<TaskEntry>) {
        {
            let mut guard = entry.state.lock().await;
            guard.last_update = Instant::now();
        }
        self.issue_get_data_with_watch(key, entry).await;
    }

    /// On getData result (§4.3 "On getData result").
    pub async fn on_get_data_result(
        self: &Arc<Self>,
        key: TaskKey,
        entry: Arc<TaskEntry>,
        outcome: GetDataOutcome,
    ) {
        match outcome {
            GetDataOutcome::Data { bytes, version } => {
                self.dispatch_payload(&key, &entry, &bytes, version).await;
            }
            GetDataOutcome::NoNode => {
                debug!(%key, "task vanished beneath us, treating as success");
                self.mark_vanished(&key, &entry).await;
            }
            GetDataOutcome::SessionExpired => {
                error!(%key, "session expired on getData; abandoning");
            }
            GetDataOutcome::RetriesExhausted(reason) => {
                warn!(%key, %reason, "getData retries exhausted, marking task failed");
                self.mark_terminal(&key, &entry, TaskStatus::Failure).await;
            }
        }
    }

    async fn dispatch_payload(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>, bytes: &[u8], version: i64) {
        if bytes.is_empty() {
            error!(%key, version, "null payload at non-sentinel version; logic error");
            self.mark_terminal(key, entry, TaskStatus::Failure).await;
            return;
        }

        let state = match TaskState::decode(bytes) {
            Ok(state) => state,
            Err(err) => {
                warn!(%key, %err, "dropping unparseable task payload");
                return;
            }
        };

        match state {
            TaskState::Unassigned { .. } => {
                let should_force = {
                    let mut guard = entry.state.lock().await;
                    guard.clear_dead_batch();
                    guard.is_orphan() && guard.incarnation == 0
                };
                if should_force {
                    self.force_resubmit_or_vanish(key, entry).await;
                }
            }
            TaskState::Owned { owner } => {
                let mut guard = entry.state.lock().await;
                if version != guard.last_version {
                    guard.last_version = version;
                    guard.last_update = Instant::now();
                    guard.cur_worker = Some(owner);
                } else {
                    debug!(%key, "duplicate heartbeat");
                }
            }
            TaskState::Resigned { .. } => {
                self.force_resubmit_or_vanish(key, entry).await;
            }
            TaskState::Done { .. } => {
                self.handle_done(key, entry).await;
            }
            TaskState::Err { .. } => {
                self.check_resubmit_or_fail(key, entry).await;
            }
        }
    }

    async fn handle_done(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>) {
        if key.is_rescan_marker(&self.config.namespace.path) {
            self.mark_terminal(key, entry, TaskStatus::Success).await;
            return;
        }

        match self.finisher.finish(key).await {
            FinishOutcome::Done => {
                self.mark_terminal(key, entry, TaskStatus::Success).await;
            }
            FinishOutcome::Err => {
                self.check_resubmit_or_fail(key, entry).await;
            }
        }
    }

    /// `FORCE`-resubmits, unifying a `NONODE` result with the `getData`
    /// NONODE success path rather than inventing a parallel one (§9 open
    /// question 2).
    async fn force_resubmit_or_vanish(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>) {
        let mut guard = entry.state.lock().await;
        if guard.status != TaskStatus::InProgress {
            return;
        }
        let outcome = resubmit::resubmit(
            self.client.as_ref(),
            &self.config,
            &mut guard,
            &self.self_id,
            Directive::Force,
        )
        .await;
        drop(guard);

        match outcome {
            ResubmitOutcome::Resubmitted => {
                self.publish_rescan_marker().await;
            }
            ResubmitOutcome::Vanished => {
                self.mark_vanished(key, entry).await;
            }
            ResubmitOutcome::Rejected(_) => {
                self.mark_terminal(key, entry, TaskStatus::Failure).await;
            }
        }
    }

    /// `CHECK`-resubmits; on any rejection, the task fails (§4.3 `Err`
    /// dispatch, §7 "Finisher failure").
    async fn check_resubmit_or_fail(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>) {
        let mut guard = entry.state.lock().await;
        if guard.status != TaskStatus::InProgress {
            return;
        }
        let outcome = resubmit::resubmit(
            self.client.as_ref(),
            &self.config,
            &mut guard,
            &self.self_id,
            Directive::Check,
        )
        .await;
        drop(guard);

        match outcome {
            ResubmitOutcome::Resubmitted => {
                self.publish_rescan_marker().await;
            }
            ResubmitOutcome::Vanished => {
                self.mark_vanished(key, entry).await;
            }
            ResubmitOutcome::Rejected(_) => {
                self.mark_terminal(key, entry, TaskStatus::Failure).await;
            }
        }
    }

    /// Publishes a rescan marker (§4.5): an ephemeral sequential child
    /// carrying a `Done` payload, whose only purpose is the watch event its
    /// creation pushes to workers. Threads the marker's own key through the
    /// same create/getData pipeline real tasks use, so the coordinator's
    /// own watch observes the `Done` payload and deletes the marker
    /// immediately (§4.5) instead of leaking it into the store forever.
    pub async fn publish_rescan_marker(self: &Arc<Self>) {
        let prefix = TaskKey::from_raw(format!("{}/rescan", self.config.namespace.path));
        let payload = TaskState::Done {
            owner: self.self_id.clone(),
        };
        let bytes = match payload.encode() {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let outcome = self
            .client
            .create(
                &prefix,
                bytes,
                CreateMode::EphemeralSequential,
                self.config.retry.zk_retries,
            )
            .await;
        let actual_key = match &outcome {
            CreateOutcome::Created { actual_path } => actual_path.clone(),
            _ => prefix,
        };
        let entry = TaskEntry::new(Task::orphan(actual_key.clone()));
        self.on_create_result(actual_key, entry, outcome).await;
    }

    /// `setDone` (§4.7): marks the task terminal, notifies its batch, and
    /// schedules an effectively-unbounded delete.
    pub async fn mark_terminal(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>, outcome: TaskStatus) {
        {
            let mut guard = entry.state.lock().await;
            if guard.status == TaskStatus::InProgress {
                guard.status = outcome;
                if let Some(batch) = guard.batch.clone() {
                    match outcome {
                        TaskStatus::Success => batch.mark_done(),
                        TaskStatus::Failure => batch.mark_error(),
                        _ => {}
                    }
                }
            }
        }
        entry.notify_all();

        match self.client.delete(key, -1).await {
            DeleteOutcome::Deleted | DeleteOutcome::NoNode => {
                self.finish_delete(key, entry).await;
            }
            DeleteOutcome::SessionExpired => {
                error!(%key, "session expired deleting task; abandoning");
            }
            DeleteOutcome::RetriesExhausted(reason) => {
                error!(%key, %reason, "delete retries exhausted despite unbounded budget");
            }
        }
    }

    /// The task vanished from the store directly (NONODE on `getData` or
    /// on a resubmit's `setData`): no delete call is needed, it is already
    /// gone.
    pub(crate) async fn mark_vanished(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>) {
        {
            let mut guard = entry.state.lock().await;
            if guard.status == TaskStatus::InProgress {
                guard.status = TaskStatus::Success;
                if let Some(batch) = guard.batch.clone() {
                    batch.mark_done();
                }
            }
        }
        self.finish_delete(key, entry).await;
    }

    async fn finish_delete(self: &Arc<Self>, key: &TaskKey, entry: &Arc<TaskEntry>) {
        {
            let mut guard = entry.state.lock().await;
            guard.status = TaskStatus::Deleted;
        }
        self.table.remove(key);
        entry.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use crate::client::memory::MemoryCoordinationClient;
    use crate::finisher::NoopFinisher;

    use super::*;

    fn build(client: Arc<MemoryCoordinationClient>) -> Arc<StateMachine> {
        let dyn_client: Arc<dyn CoordinationClient> = client;
        StateMachine::new(
            dyn_client,
            Arc::new(CoordinatorConfig::default()),
            Arc::new(NoopFinisher),
            WorkerId::from("coord"),
            Arc::new(TaskTable::new()),
        )
    }

    /// §4.5: a published rescan marker must not just be created — the
    /// coordinator's own watch has to observe its `Done` payload and
    /// delete it, bounding its residency rather than leaking one marker
    /// per resubmission into the store forever.
    #[tokio::test]
    async fn rescan_marker_is_created_then_deletes_itself() {
        let client = Arc::new(MemoryCoordinationClient::new());
        let sm = build(client.clone());

        sm.publish_rescan_marker().await;

        let namespace = "/coordinator/splitlog";
        let mut remaining = client.list_children(namespace).await.unwrap();
        for _ in 0..50 {
            if remaining.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
            remaining = client.list_children(namespace).await.unwrap();
        }
        assert!(
            remaining.is_empty(),
            "rescan marker should have deleted itself: {remaining:?}"
        );
    }
}
