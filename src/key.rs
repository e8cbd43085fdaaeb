//! Task keys: reversible encodings of log file paths into coordination
//! store paths.
//!
//! Two distinct log files always produce two distinct keys, and decoding a
//! key always recovers the exact path that produced it (hex round-trips
//! byte-for-byte, unlike a human-readable percent-encoding that would need
//! to special-case non-UTF8 paths).

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("task key {0:?} has no child component under namespace {1:?}")]
    NotUnderNamespace(String, String),

    #[error("task key child {0:?} is not valid hex: {1}")]
    InvalidHex(String, hex::FromHexError),
}

/// A task key: an opaque store path of the form `<namespace>/<hex log
/// path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(String);

impl TaskKey {
    /// Derives the task key for `log_path` within `namespace`.
    pub fn for_log_path(namespace: &str, log_path: &Path) -> Self {
        let encoded = hex::encode(log_path.as_os_str().as_encoded_bytes());
        TaskKey(format!("{namespace}/{encoded}"))
    }

    /// Wraps an already-encoded store path (used for rescan markers and
    /// orphan discovery, where the path comes from `list_children` rather
    /// than from a fresh log path).
    pub fn from_raw(path: impl Into<String>) -> Self {
        TaskKey(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the original log path, given the namespace this key was
    /// minted under.
    pub fn decode_log_path(&self, namespace: &str) -> Result<PathBuf, KeyError> {
        let prefix = format!("{namespace}/");
        let encoded = self
            .0
            .strip_prefix(&prefix)
            .ok_or_else(|| KeyError::NotUnderNamespace(self.0.clone(), namespace.to_string()))?;
        let bytes =
            hex::decode(encoded).map_err(|e| KeyError::InvalidHex(encoded.to_string(), e))?;
        // Safety: `bytes` came from `as_encoded_bytes()` on this same
        // platform in `for_log_path`, round-tripped byte-for-byte through
        // hex. That is exactly the contract `from_encoded_bytes_unchecked`
        // requires.
        let os_str = unsafe { std::ffi::OsStr::from_encoded_bytes_unchecked(&bytes) };
        Ok(PathBuf::from(os_str))
    }

    /// True if this key names a rescan marker rather than a log-split task.
    pub fn is_rescan_marker(&self, namespace: &str) -> bool {
        self.0
            .strip_prefix(&format!("{namespace}/"))
            .is_some_and(|rest| rest.starts_with("rescan-"))
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_path() {
        let path = PathBuf::from("/data/wal/region-a/wal-1");
        let key = TaskKey::for_log_path("/coordinator/splitlog", &path);
        assert_eq!(key.decode_log_path("/coordinator/splitlog").unwrap(), path);
    }

    #[test]
    fn distinct_paths_yield_distinct_keys() {
        let a = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        let b = TaskKey::for_log_path("/ns", Path::new("/wal/b"));
        assert_ne!(a, b);
    }

    #[test]
    fn rescan_marker_detection() {
        let marker = TaskKey::from_raw("/ns/rescan-0000000001");
        assert!(marker.is_rescan_marker("/ns"));
        let task = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        assert!(!task.is_rescan_marker("/ns"));
    }

    #[test]
    fn decode_rejects_foreign_namespace() {
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        assert!(key.decode_log_path("/other").is_err());
    }
}
