use thiserror::Error;

use crate::key::TaskKey;

/// Errors surfaced to a caller of [`crate::coordinator::Coordinator`].
///
/// This mirrors the teacher's `ProvingTaskError`: one variant per distinct
/// failure cause, with `#[from]` used only where the wrapped error is
/// unambiguous.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A batch submission named the same task key twice.
    #[error("duplicate task {0} within the same batch")]
    DuplicateInBatch(TaskKey),

    /// Another, still-live batch already owns this task key.
    #[error("task {0} is already owned by another in-flight batch")]
    TaskOwnedByOtherBatch(TaskKey),

    /// The caller's batch woke before every installed task reached a
    /// terminal state (stopper-triggered abort).
    #[error("batch aborted with {done_plus_error} of {installed} tasks settled")]
    BatchAborted { installed: u64, done_plus_error: u64 },

    /// A wait on a per-task condition was interrupted by the global stop
    /// signal before the awaited state was reached.
    #[error("interrupted while waiting for task {0} to settle")]
    Interrupted(TaskKey),

    /// A store operation exhausted its caller-owned retry budget.
    #[error("store operation for {path} exhausted its retry budget: {reason}")]
    StoreExhausted { path: String, reason: String },

    /// The coordination store reported the session as expired; the process
    /// is expected to be torn down externally.
    #[error("coordination store session expired")]
    SessionExpired,

    /// A logic error: state the spec declares unreachable under correct
    /// operation (e.g. null data at a non-sentinel version).
    #[error("logic error for task {key}: {detail}")]
    LogicError { key: TaskKey, detail: String },

    #[error("task key error: {0}")]
    Key(#[from] crate::key::KeyError),

    #[error("wire format error: {0}")]
    Wire(#[from] crate::wire::WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
