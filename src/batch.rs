//! One caller submission's set of tasks (§3 `Batch`). The batch object
//! doubles as the condition variable its creator sleeps on.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Counters {
    installed: u64,
    done: u64,
    error: u64,
    is_dead: bool,
}

/// How a batch wait resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// `done + error == installed`.
    Terminated,
    /// The caller gave up (stop signal) before every task settled.
    Dead,
}

#[derive(Debug, Default)]
pub struct Batch {
    counters: Mutex<Counters>,
    notify: Notify,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps `installed` (a fresh task, or an adopted in-progress orphan).
    pub fn install(&self) {
        self.counters.lock().installed += 1;
    }

    pub fn mark_done(&self) {
        let mut c = self.counters.lock();
        c.done += 1;
        drop(c);
        self.notify.notify_waiters();
    }

    pub fn mark_error(&self) {
        let mut c = self.counters.lock();
        c.error += 1;
        drop(c);
        self.notify.notify_waiters();
    }

    pub fn mark_dead(&self) {
        let mut c = self.counters.lock();
        c.is_dead = true;
        drop(c);
        self.notify.notify_waiters();
    }

    pub fn is_dead(&self) -> bool {
        self.counters.lock().is_dead
    }

    pub fn installed(&self) -> u64 {
        self.counters.lock().installed
    }

    fn has_terminated(&self) -> (bool, u64, u64) {
        let c = self.counters.lock();
        (c.done + c.error >= c.installed, c.done, c.error)
    }

    /// Blocks until `done + error == installed`, the batch is marked dead,
    /// or the process-wide stop signal fires.
    pub async fn wait_for_termination(&self, stop: &CancellationToken) -> BatchOutcome {
        loop {
            if self.is_dead() || stop.is_cancelled() {
                return BatchOutcome::Dead;
            }
            let (terminated, _, _) = self.has_terminated();
            if terminated {
                return BatchOutcome::Terminated;
            }
            // Re-check-after-wake: the notified future is armed before we
            // re-read state, so a mark_done/mark_error/mark_dead racing
            // with this check is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let (terminated, _, _) = self.has_terminated();
            if terminated || self.is_dead() {
                continue;
            }
            tokio::select! {
                _ = notified => {}
                _ = stop.cancelled() => return BatchOutcome::Dead,
            }
        }
    }

    /// Counts at the moment of inspection, for diagnostics and tests.
    pub fn counts(&self) -> (u64, u64, u64) {
        let c = self.counters.lock();
        (c.installed, c.done, c.error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn terminates_when_counts_settle() {
        let batch = Arc::new(Batch::new());
        batch.install();
        batch.install();
        let stop = CancellationToken::new();

        let waiter = {
            let batch = batch.clone();
            let stop = stop.clone();
            tokio::spawn(async move { batch.wait_for_termination(&stop).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        batch.mark_done();
        batch.mark_error();

        assert_eq!(waiter.await.unwrap(), BatchOutcome::Terminated);
    }

    #[tokio::test]
    async fn stop_signal_wakes_waiter_as_dead() {
        let batch = Arc::new(Batch::new());
        batch.install();
        let stop = CancellationToken::new();

        let waiter = {
            let batch = batch.clone();
            let stop = stop.clone();
            tokio::spawn(async move { batch.wait_for_termination(&stop).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.cancel();

        assert_eq!(waiter.await.unwrap(), BatchOutcome::Dead);
    }

    #[test]
    fn installed_must_be_at_least_done_plus_error() {
        let batch = Batch::new();
        batch.install();
        batch.mark_done();
        let (installed, done, error) = batch.counts();
        assert!(installed >= done + error);
    }
}
