//! The filesystem collaborator interface (§1 "log file listing /
//! directory cleanup wrappers around the filesystem" — out of scope as an
//! algorithm, but its seam is named so the façade can be tested without
//! touching a real filesystem).

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Lists the log files under a directory and removes it once drained.
/// [`FsLogFileSource`] is the default, real-filesystem implementation;
/// tests substitute an in-memory fake.
#[async_trait]
pub trait LogFileSource: Send + Sync + 'static {
    /// Lists the regular files directly under `dir`. Returns an empty list
    /// (not an error) if `dir` does not exist.
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// The raw byte length of `path`, best-effort: under-reporting for an
    /// actively-written file is acceptable (§4.1).
    async fn file_len(&self, path: &Path) -> io::Result<u64>;

    /// Removes `dir` if it is empty; returns `Ok(false)` (not an error) if
    /// it is not, so the caller can log and continue (§4.1).
    async fn remove_dir_if_empty(&self, dir: &Path) -> io::Result<bool>;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct FsLogFileSource;

#[async_trait]
impl LogFileSource for FsLogFileSource {
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn remove_dir_if_empty(&self, dir: &Path) -> io::Result<bool> {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            // Anything else (most commonly "directory not empty") is not
            // escalated to an error: partial cleanup is acceptable (§4.1).
            Err(_) => Ok(false),
        }
    }
}
