//! The published payload at a task key: a tagged variant carrying the
//! owner, serialized to bytes with `bincode` (the variant tag survives the
//! round trip because `bincode` writes the enum discriminant).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::WorkerId;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("failed to deserialize task payload: {0}")]
    Decode(String),

    #[error("failed to serialize task payload: {0}")]
    Encode(String),
}

/// The published payload at a task key (§3 `TaskState`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Published by the coordinator; awaits worker claim.
    Unassigned { owner: WorkerId },
    /// Written by a claiming worker; progress heartbeats mutate only the
    /// store-side version, not this payload.
    Owned { owner: WorkerId },
    /// Worker gave up but did not fail; coordinator must force-resubmit.
    Resigned { owner: WorkerId },
    /// Worker finished successfully; coordinator must run the finisher
    /// then delete.
    Done { owner: WorkerId },
    /// Worker failed terminally; coordinator resubmits or fails.
    Err { owner: WorkerId },
}

impl TaskState {
    pub fn owner(&self) -> &WorkerId {
        match self {
            TaskState::Unassigned { owner }
            | TaskState::Owned { owner }
            | TaskState::Resigned { owner }
            | TaskState::Done { owner }
            | TaskState::Err { owner } => owner,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}
