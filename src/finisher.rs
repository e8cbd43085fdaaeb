//! The `TaskFinisher` seam (§1 "DLSC invokes a `TaskFinisher` after a
//! worker reports success", §4.3 `Done` dispatch). The actual log-splitting
//! algorithm lives on the other side of this trait and is out of scope.

use async_trait::async_trait;

use crate::key::TaskKey;

/// What a finisher run against a completed task decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The post-processing step succeeded; the task may be marked `Success`
    /// and its znode deleted.
    Done,
    /// The post-processing step failed; the coordinator should attempt a
    /// `CHECK`-resubmit before giving up.
    Err,
}

/// Idempotent, restartable post-processing invoked once a worker reports a
/// task `Done` (§4.3). Never called for rescan markers (§4.5).
#[async_trait]
pub trait TaskFinisher: Send + Sync + 'static {
    async fn finish(&self, key: &TaskKey) -> FinishOutcome;
}

/// A finisher that always reports success; used when no real
/// post-processing step is configured and by tests that only exercise the
/// coordination state machine.
#[derive(Debug, Default)]
pub struct NoopFinisher;

#[async_trait]
impl TaskFinisher for NoopFinisher {
    async fn finish(&self, _key: &TaskKey) -> FinishOutcome {
        FinishOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_finisher_always_reports_done() {
        let finisher = NoopFinisher;
        let key = TaskKey::from_raw("/ns/deadbeef");
        assert_eq!(finisher.finish(&key).await, FinishOutcome::Done);
    }
}
