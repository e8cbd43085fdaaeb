//! `resubmit(key, task, directive)` (§4.4): the only place a task is
//! pushed back to `Unassigned`, whether timeout-driven (`CHECK`) or
//! unconditional (`FORCE`).

use std::time::{Duration, Instant};

use tokio::sync::MutexGuard;
use tracing::{debug, warn};

use crate::client::{CoordinationClient, SetDataOutcome, WorkerId};
use crate::config::CoordinatorConfig;
use crate::key::TaskKey;
use crate::task::Task;
use crate::wire::TaskState;

/// `CHECK` is gated by the idle timeout and the resubmit budget; `FORCE`
/// skips both gates (dead-worker takeover, resignation, orphan startup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Check,
    Force,
}

/// Why a `resubmit` call did not result in a fresh `Unassigned` publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitRejected {
    /// `CHECK` only: the task has not been idle long enough.
    TooSoon,
    /// `CHECK` only: `unforced_resubmits >= max_resubmit`.
    BudgetExhausted,
    /// The store reported a version mismatch; `last_update` was refreshed
    /// to silence the task until its next natural check.
    VersionMismatch,
    /// The store reported some other (non-`NONODE`) error.
    StoreError,
}

/// Outcome of attempting to resubmit a task back to `Unassigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmitOutcome {
    Resubmitted,
    Rejected(ResubmitRejected),
    /// The key vanished from the store (`NONODE`): callers should drive the
    /// "success via NONODE" path (§4.3) rather than treat this as failure.
    Vanished,
}

/// Attempts to resubmit `task` (already locked by the caller) back to
/// `Unassigned` under `self_id`. Precondition: `task.status` is
/// `InProgress` (§4.4).
pub async fn resubmit(
    client: &dyn CoordinationClient,
    config: &CoordinatorConfig,
    task: &mut MutexGuard<'_, Task>,
    self_id: &WorkerId,
    directive: Directive,
) -> ResubmitOutcome {
    let timeout = Duration::from_millis(config.timing.manager_timeout_ms);

    match directive {
        Directive::Check => {
            if task.last_update.elapsed() < timeout {
                return ResubmitOutcome::Rejected(ResubmitRejected::TooSoon);
            }
            if task.unforced_resubmits >= config.resubmit.max_resubmit {
                if !task.threshold_reached {
                    task.threshold_reached = true;
                    warn!(
                        key = %task.key,
                        max_resubmit = config.resubmit.max_resubmit,
                        "resubmit budget exhausted"
                    );
                }
                return ResubmitOutcome::Rejected(ResubmitRejected::BudgetExhausted);
            }
        }
        Directive::Force => {}
    }

    let target_version = match directive {
        Directive::Check => task.last_version,
        Directive::Force => -1,
    };

    task.incarnation += 1;
    let payload = TaskState::Unassigned {
        owner: self_id.clone(),
    };
    let bytes = match payload.encode() {
        Ok(bytes) => bytes,
        Err(_) => return ResubmitOutcome::Rejected(ResubmitRejected::StoreError),
    };

    match client.set_data(&task.key, bytes, target_version).await {
        SetDataOutcome::Ok => {
            if directive == Directive::Check {
                task.unforced_resubmits += 1;
            }
            task.cur_worker = None;
            task.last_update = Instant::now();
            debug!(
                key = %task.key,
                incarnation = task.incarnation,
                ?directive,
                "resubmitted"
            );
            ResubmitOutcome::Resubmitted
        }
        SetDataOutcome::BadVersion => {
            task.last_update = Instant::now();
            ResubmitOutcome::Rejected(ResubmitRejected::VersionMismatch)
        }
        SetDataOutcome::NoNode => ResubmitOutcome::Vanished,
        SetDataOutcome::SessionExpired | SetDataOutcome::Error(_) => {
            ResubmitOutcome::Rejected(ResubmitRejected::StoreError)
        }
    }
}
