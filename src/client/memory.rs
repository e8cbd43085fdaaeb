//! An in-memory [`CoordinationClient`] used by tests and by the demo
//! binary. Not a production adapter (§1 names the real store out of
//! scope) — it exists so the coordination state machine has something
//! concrete to drive end to end.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    CoordinationClient, CreateMode, CreateOutcome, DeleteOutcome, GetDataOutcome, SetDataOutcome,
    StoreError, WatchEvent,
};
use crate::key::TaskKey;

struct Node {
    data: Vec<u8>,
    version: i64,
    watcher: Option<UnboundedSender<WatchEvent>>,
}

/// In-memory reference implementation of the coordination store contract.
#[derive(Default)]
pub struct MemoryCoordinationClient {
    nodes: DashMap<String, Node>,
    sequence: AtomicU64,
    session_expired: AtomicBool,
}

impl MemoryCoordinationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates session expiry: every subsequent call fails terminally
    /// without touching stored data, matching §7's "abandon retries, do
    /// not touch state".
    pub fn expire_session(&self) {
        self.session_expired.store(true, Ordering::SeqCst);
    }

    fn session_expired(&self) -> bool {
        self.session_expired.load(Ordering::SeqCst)
    }

    /// Test/worker-facing helper: write `data` directly at `path`,
    /// bumping the version and firing any armed watch. Mirrors what a
    /// worker does when it claims or updates a task.
    pub fn worker_write(&self, path: &TaskKey, data: Vec<u8>) {
        let mut entry = self.nodes.entry(path.as_str().to_string()).or_insert(Node {
            data: Vec::new(),
            version: 0,
            watcher: None,
        });
        entry.data = data;
        entry.version += 1;
        if let Some(tx) = entry.watcher.take() {
            let _ = tx.send(WatchEvent::DataChanged(path.clone()));
        }
    }

    pub fn contains(&self, path: &TaskKey) -> bool {
        self.nodes.contains_key(path.as_str())
    }

    pub fn version_of(&self, path: &TaskKey) -> Option<i64> {
        self.nodes.get(path.as_str()).map(|n| n.version)
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinationClient {
    async fn create(
        &self,
        path: &TaskKey,
        data: Vec<u8>,
        mode: CreateMode,
        _retries: i64,
    ) -> CreateOutcome {
        if self.session_expired() {
            return CreateOutcome::SessionExpired;
        }

        match mode {
            CreateMode::Persistent => {
                if self.nodes.contains_key(path.as_str()) {
                    return CreateOutcome::AlreadyExists;
                }
                self.nodes.insert(
                    path.as_str().to_string(),
                    Node {
                        data,
                        version: 0,
                        watcher: None,
                    },
                );
                CreateOutcome::Created {
                    actual_path: path.clone(),
                }
            }
            CreateMode::EphemeralSequential => {
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                let actual = TaskKey::from_raw(format!("{path}-{seq:010}"));
                self.nodes.insert(
                    actual.as_str().to_string(),
                    Node {
                        data,
                        version: 0,
                        watcher: None,
                    },
                );
                CreateOutcome::Created {
                    actual_path: actual,
                }
            }
        }
    }

    async fn get_data(
        &self,
        path: &TaskKey,
        watch: Option<UnboundedSender<WatchEvent>>,
        _retries: i64,
    ) -> GetDataOutcome {
        if self.session_expired() {
            return GetDataOutcome::SessionExpired;
        }

        match self.nodes.get_mut(path.as_str()) {
            Some(mut node) => {
                if let Some(tx) = watch {
                    node.watcher = Some(tx);
                }
                GetDataOutcome::Data {
                    bytes: node.data.clone(),
                    version: node.version,
                }
            }
            None => GetDataOutcome::NoNode,
        }
    }

    async fn set_data(
        &self,
        path: &TaskKey,
        data: Vec<u8>,
        expected_version: i64,
    ) -> SetDataOutcome {
        if self.session_expired() {
            return SetDataOutcome::SessionExpired;
        }

        match self.nodes.get_mut(path.as_str()) {
            Some(mut node) => {
                if expected_version != -1 && expected_version != node.version {
                    return SetDataOutcome::BadVersion;
                }
                node.data = data;
                node.version += 1;
                if let Some(tx) = node.watcher.take() {
                    let _ = tx.send(WatchEvent::DataChanged(path.clone()));
                }
                SetDataOutcome::Ok
            }
            None => SetDataOutcome::NoNode,
        }
    }

    async fn delete(&self, path: &TaskKey, _retries: i64) -> DeleteOutcome {
        if self.session_expired() {
            return DeleteOutcome::SessionExpired;
        }

        match self.nodes.remove(path.as_str()) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NoNode,
        }
    }

    async fn list_children(&self, namespace: &str) -> Result<Vec<TaskKey>, StoreError> {
        if self.session_expired() {
            return Err(StoreError::SessionExpired);
        }
        let prefix = format!("{namespace}/");
        Ok(self
            .nodes
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| TaskKey::from_raw(entry.key().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips_version() {
        let client = MemoryCoordinationClient::new();
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        let outcome = client
            .create(&key, b"hello".to_vec(), CreateMode::Persistent, 3)
            .await;
        assert!(matches!(outcome, CreateOutcome::Created { .. }));

        match client.get_data(&key, None, 3).await {
            GetDataOutcome::Data { bytes, version } => {
                assert_eq!(bytes, b"hello");
                assert_eq!(version, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_create_reports_already_exists() {
        let client = MemoryCoordinationClient::new();
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        client
            .create(&key, b"x".to_vec(), CreateMode::Persistent, 3)
            .await;
        let second = client
            .create(&key, b"y".to_vec(), CreateMode::Persistent, 3)
            .await;
        assert!(matches!(second, CreateOutcome::AlreadyExists));
    }

    #[tokio::test]
    async fn set_data_rejects_stale_version() {
        let client = MemoryCoordinationClient::new();
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        client
            .create(&key, b"x".to_vec(), CreateMode::Persistent, 3)
            .await;
        let outcome = client.set_data(&key, b"y".to_vec(), 41).await;
        assert_eq!(outcome, SetDataOutcome::BadVersion);
    }

    #[tokio::test]
    async fn watch_fires_once_on_data_change() {
        let client = MemoryCoordinationClient::new();
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        client
            .create(&key, b"x".to_vec(), CreateMode::Persistent, 3)
            .await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.get_data(&key, Some(tx), 3).await;
        client.set_data(&key, b"y".to_vec(), 0).await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, WatchEvent::DataChanged(k) if k == key));
        // one-shot: a second mutation with no re-armed watch fires nothing.
        client.set_data(&key, b"z".to_vec(), 1).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ephemeral_sequential_names_are_distinct() {
        let client = MemoryCoordinationClient::new();
        let prefix = TaskKey::from_raw("/ns/rescan");
        let a = client
            .create(&prefix, vec![], CreateMode::EphemeralSequential, 3)
            .await;
        let b = client
            .create(&prefix, vec![], CreateMode::EphemeralSequential, 3)
            .await;
        let (CreateOutcome::Created { actual_path: a }, CreateOutcome::Created { actual_path: b }) =
            (a, b)
        else {
            panic!("expected both creates to succeed");
        };
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn session_expired_short_circuits_everything() {
        let client = MemoryCoordinationClient::new();
        let key = TaskKey::for_log_path("/ns", Path::new("/wal/a"));
        client
            .create(&key, b"x".to_vec(), CreateMode::Persistent, 3)
            .await;
        client.expire_session();

        assert!(matches!(
            client.get_data(&key, None, 3).await,
            GetDataOutcome::SessionExpired
        ));
        assert!(matches!(
            client.delete(&key, 3).await,
            DeleteOutcome::SessionExpired
        ));
        // data untouched
        assert!(client.contains(&key));
    }
}
