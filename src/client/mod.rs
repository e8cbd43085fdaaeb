//! The coordination store contract (§6): a hierarchical, watchable
//! key-value store with ephemeral nodes, sequential naming, conditional
//! writes guarded by per-key versions, and server-push watch events.
//!
//! DLSC only consumes this contract; the store implementation itself is
//! out of scope (§1). [`memory::MemoryCoordinationClient`] is a reference
//! fake used by tests and by the demo binary — not a production adapter.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::key::TaskKey;

/// Identity of a worker claiming or holding a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        WorkerId(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        WorkerId(value)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node creation flavor (§6 namespace layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session; deleted explicitly.
    Persistent,
    /// An ephemeral sequential child, used only for rescan markers (§4.5).
    EphemeralSequential,
}

/// Outcome of an `asyncCreate` call after its retry budget is spent.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The node did not exist and was created at `actual_path` (for
    /// `EphemeralSequential`, this differs from the requested prefix).
    Created { actual_path: TaskKey },
    /// `NODE_EXISTS`: treated as non-fatal by the contract (§6).
    AlreadyExists,
    SessionExpired,
    RetriesExhausted(String),
}

/// Outcome of an `asyncGetData` call.
#[derive(Debug)]
pub enum GetDataOutcome {
    Data { bytes: Vec<u8>, version: i64 },
    /// The task vanished beneath us.
    NoNode,
    SessionExpired,
    RetriesExhausted(String),
}

/// Outcome of a blocking `setData` call.
#[derive(Debug, PartialEq, Eq)]
pub enum SetDataOutcome {
    Ok,
    /// The expected version did not match (silent per §7).
    BadVersion,
    NoNode,
    SessionExpired,
    Error(String),
}

/// Outcome of an `asyncDelete` call.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted,
    /// Idempotent: the node was already gone.
    NoNode,
    SessionExpired,
    RetriesExhausted(String),
}

/// A one-shot watch event pushed by the store when armed node data changes.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    DataChanged(TaskKey),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("coordination store session expired")]
    SessionExpired,
    #[error("coordination store error: {0}")]
    Other(String),
}

/// The coordination store contract DLSC consumes (§6).
///
/// Every create/getData/delete call carries a caller-owned retry budget:
/// the adapter retries transient failures internally up to that budget,
/// and only reports a terminal [`CreateOutcome`]/[`GetDataOutcome`]/
/// [`DeleteOutcome`] once it gives up or succeeds. `-1` means "retry
/// forever" (used for `setDone`'s delete per §4.7).
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    async fn create(&self, path: &TaskKey, data: Vec<u8>, mode: CreateMode, retries: i64)
        -> CreateOutcome;

    async fn get_data(
        &self,
        path: &TaskKey,
        watch: Option<UnboundedSender<WatchEvent>>,
        retries: i64,
    ) -> GetDataOutcome;

    /// Blocking in spirit: only ever called from the timeout monitor or a
    /// watch callback, never from the caller façade (§5).
    async fn set_data(&self, path: &TaskKey, data: Vec<u8>, expected_version: i64)
        -> SetDataOutcome;

    async fn delete(&self, path: &TaskKey, retries: i64) -> DeleteOutcome;

    async fn list_children(&self, namespace: &str) -> Result<Vec<TaskKey>, StoreError>;
}
