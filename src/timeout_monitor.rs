//! Timeout monitor (§4.6): the periodic sweep that resubmits stalled
//! tasks, drives dead-worker takeover, and nudges a global rescan out of
//! the "no workers ever showed up" state. Modeled on the teacher's
//! `checkpoint_proof_runner` tick loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::resubmit::{self, Directive, ResubmitOutcome};
use crate::state_machine::StateMachine;
use crate::task::TaskStatus;

/// Runs the monitor loop until `stop` fires. Intended to be spawned as its
/// own task by the coordinator.
pub async fn run(sm: Arc<StateMachine>, stop: CancellationToken) {
    let period = Duration::from_millis(sm.config.timing.timeout_monitor_period_ms);
    let mut ticker = interval(period);
    info!(?period, "timeout monitor started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.cancelled() => {
                info!("timeout monitor stopping");
                return;
            }
        }
        tick(&sm).await;
    }
}

async fn tick(sm: &Arc<StateMachine>) {
    // Step 1: atomically take the dead-worker set.
    let dead = sm.table.take_dead_workers();

    let snapshot = sm.table.snapshot();
    let total = snapshot.len();
    let mut unassigned_count = 0usize;
    let mut non_failed_total = 0usize;
    let mut unassigned_keys = Vec::new();

    for (key, entry) in &snapshot {
        let (status, cur_worker, is_unassigned) = {
            let guard = entry.state.lock().await;
            (guard.status, guard.cur_worker.clone(), guard.is_unassigned())
        };

        if status != TaskStatus::InProgress {
            continue;
        }
        non_failed_total += 1;
        if is_unassigned {
            unassigned_count += 1;
            unassigned_keys.push(key.clone());
        }

        // Step 3: dead-worker takeover, FORCE-resubmit.
        if let Some(worker) = &cur_worker {
            if dead.contains(worker) {
                let outcome = force_resubmit(sm, key, entry).await;
                if matches!(outcome, Some(ResubmitOutcome::Rejected(_))) {
                    // Re-enqueue the worker as dead so the next tick retries.
                    sm.table.handle_dead_worker(worker.clone());
                }
                continue;
            }
        }

        // Step 4: otherwise, a normal CHECK-resubmit attempt.
        check_resubmit(sm, key, entry).await;
    }

    // Step 5: global rescan gate for the pathological "no workers ever"
    // state.
    if total > 0 && unassigned_count == non_failed_total && non_failed_total > 0 {
        let unassigned_timeout = Duration::from_millis(sm.config.timing.manager_unassigned_timeout_ms);
        let stale = sm
            .table
            .last_node_create_time()
            .map(|t| t.elapsed() > unassigned_timeout)
            .unwrap_or(false);

        if stale {
            debug!(unassigned_count, "issuing confirmation getData sweep before global rescan");
            for key in &unassigned_keys {
                // Fire-and-forget: retry count -1, no error handling (§4.6
                // step 5).
                let _ = sm.client.get_data(key, None, -1).await;
            }
            sm.publish_rescan_marker().await;
        }
    }
}

async fn force_resubmit(
    sm: &Arc<StateMachine>,
    key: &crate::key::TaskKey,
    entry: &Arc<crate::task::TaskEntry>,
) -> Option<ResubmitOutcome> {
    let mut guard = entry.state.lock().await;
    if guard.status != TaskStatus::InProgress {
        return None;
    }
    let outcome = resubmit::resubmit(
        sm.client.as_ref(),
        &sm.config,
        &mut guard,
        &sm.self_id,
        Directive::Force,
    )
    .await;
    drop(guard);

    finish_resubmit_outcome(sm, key, entry, outcome).await;
    Some(outcome)
}

async fn check_resubmit(
    sm: &Arc<StateMachine>,
    key: &crate::key::TaskKey,
    entry: &Arc<crate::task::TaskEntry>,
) {
    let mut guard = entry.state.lock().await;
    if guard.status != TaskStatus::InProgress {
        return;
    }
    let outcome = resubmit::resubmit(
        sm.client.as_ref(),
        &sm.config,
        &mut guard,
        &sm.self_id,
        Directive::Check,
    )
    .await;
    drop(guard);

    finish_resubmit_outcome(sm, key, entry, outcome).await;
}

async fn finish_resubmit_outcome(
    sm: &Arc<StateMachine>,
    key: &crate::key::TaskKey,
    entry: &Arc<crate::task::TaskEntry>,
    outcome: ResubmitOutcome,
) {
    match outcome {
        ResubmitOutcome::Resubmitted => {
            sm.publish_rescan_marker().await;
        }
        ResubmitOutcome::Vanished => {
            sm.mark_vanished(key, entry).await;
        }
        ResubmitOutcome::Rejected(_) => {}
    }
}
