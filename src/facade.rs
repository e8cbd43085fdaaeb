//! Caller façade (§4.1): the synchronous entry point callers invoke —
//! `splitBatch(logDirs) -> totalBytes`.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{Batch, BatchOutcome};
use crate::client::CreateMode;
use crate::errors::CoordinatorError;
use crate::fs_collab::LogFileSource;
use crate::key::TaskKey;
use crate::state_machine::StateMachine;
use crate::table::{EnqueueError, EnqueueOutcome};
use crate::wire::TaskState;

/// Enumerates `log_dirs`, installs one task per file, publishes each as
/// `Unassigned`, blocks until the batch settles, then best-effort cleans
/// up source directories (§4.1).
pub async fn split_batch(
    sm: &Arc<StateMachine>,
    fs: &dyn LogFileSource,
    log_dirs: &[std::path::PathBuf],
    stop: &CancellationToken,
) -> Result<u64, CoordinatorError> {
    let batch = Arc::new(Batch::new());
    let mut total_bytes: u64 = 0;
    let mut files_by_dir: Vec<(std::path::PathBuf, Vec<std::path::PathBuf>)> = Vec::new();

    for dir in log_dirs {
        let files = fs.list_files(dir).await?;
        let mut file_list = Vec::with_capacity(files.len());
        for file in files {
            total_bytes += fs.file_len(&file).await.unwrap_or(0);
            file_list.push(file);
        }
        files_by_dir.push((dir.clone(), file_list));
    }

    for (_, files) in &files_by_dir {
        for file in files {
            enqueue_task(sm, file, batch.clone(), stop).await?;
        }
    }

    match batch.wait_for_termination(stop).await {
        BatchOutcome::Terminated => {}
        BatchOutcome::Dead => {
            // Flag the batch dead so any task still pointing at it degrades
            // to orphan semantics instead of permanently colliding with
            // whichever batch next tries to claim the same key (§9).
            batch.mark_dead();
            let (installed, done, error) = batch.counts();
            return Err(CoordinatorError::BatchAborted {
                installed,
                done_plus_error: done + error,
            });
        }
    }

    for (dir, _) in &files_by_dir {
        match fs.remove_dir_if_empty(dir).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(dir = %dir.display(), "source directory not empty after split, leaving it");
            }
            Err(err) => {
                warn!(dir = %dir.display(), %err, "failed to remove source directory");
            }
        }
    }

    info!(total_bytes, files = batch.installed(), "split batch complete");
    Ok(total_bytes)
}

/// `enqueueTask` (§4.2): derives the task key, resolves any collision via
/// the table, and publishes a fresh task as `Unassigned`.
async fn enqueue_task(
    sm: &Arc<StateMachine>,
    file: &Path,
    batch: Arc<Batch>,
    stop: &CancellationToken,
) -> Result<(), CoordinatorError> {
    let key = TaskKey::for_log_path(&sm.config.namespace.path, file);

    let outcome = sm
        .table
        .enqueue_task(key.clone(), batch, stop)
        .await
        .map_err(|err| match err {
            EnqueueError::DuplicateInBatch => CoordinatorError::DuplicateInBatch(key.clone()),
            EnqueueError::Interrupted => CoordinatorError::Interrupted(key.clone()),
            EnqueueError::CollisionWithLiveBatch => {
                CoordinatorError::TaskOwnedByOtherBatch(key.clone())
            }
        })?;

    let entry = match outcome {
        EnqueueOutcome::Fresh(entry) => entry,
        // Already-live work: nothing left to publish.
        EnqueueOutcome::AdoptedInProgress(_) | EnqueueOutcome::AdoptedSuccess => return Ok(()),
    };

    let payload = TaskState::Unassigned {
        owner: sm.self_id.clone(),
    };
    let bytes = payload.encode()?;
    let create_outcome = sm
        .client
        .create(&key, bytes, CreateMode::Persistent, sm.config.retry.zk_retries)
        .await;
    sm.on_create_result(key, entry, create_outcome).await;
    Ok(())
}
