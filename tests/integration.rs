//! End-to-end scenarios against the in-memory coordination client (§8
//! "End-to-end scenarios").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use logsplit_coordinator::client::memory::MemoryCoordinationClient;
use logsplit_coordinator::client::{CoordinationClient, WorkerId};
use logsplit_coordinator::config::CoordinatorConfig;
use logsplit_coordinator::coordinator::Coordinator;
use logsplit_coordinator::finisher::NoopFinisher;
use logsplit_coordinator::fs_collab::FsLogFileSource;
use logsplit_coordinator::key::TaskKey;
use logsplit_coordinator::wire::TaskState;

fn fast_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.timing.manager_timeout_ms = 30;
    config.timing.timeout_monitor_period_ms = 10;
    config.timing.manager_unassigned_timeout_ms = 200;
    config.resubmit.max_resubmit = 3;
    config
}

fn build_coordinator(config: CoordinatorConfig) -> (Arc<Coordinator>, Arc<MemoryCoordinationClient>) {
    let client = Arc::new(MemoryCoordinationClient::new());
    let dyn_client: Arc<dyn CoordinationClient> = client.clone();
    let coordinator = Arc::new(Coordinator::with_finisher_and_fs(
        dyn_client,
        config,
        WorkerId::from("coord"),
        Arc::new(NoopFinisher),
        Arc::new(FsLogFileSource),
    ));
    (coordinator, client)
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn make_single_file_dir(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("wal-1");
    tokio::fs::write(&file, contents).await.unwrap();
    (dir, file)
}

fn owned(owner: &str) -> Vec<u8> {
    TaskState::Owned {
        owner: WorkerId::from(owner),
    }
    .encode()
    .unwrap()
}

fn done(owner: &str) -> Vec<u8> {
    TaskState::Done {
        owner: WorkerId::from(owner),
    }
    .encode()
    .unwrap()
}

#[tokio::test]
async fn happy_path_single_file() {
    let config = fast_config();
    let namespace = config.namespace.path.clone();
    let (coordinator, client) = build_coordinator(config);
    coordinator.initialize().await.unwrap();
    let (dir, file) = make_single_file_dir(b"hello world").await;
    let key = TaskKey::for_log_path(&namespace, &file);

    let split = tokio::spawn({
        let coordinator = coordinator.clone();
        let dir_path = dir.path().to_path_buf();
        async move { coordinator.split_batch(&[dir_path]).await }
    });

    assert!(wait_until(|| client.contains(&key), Duration::from_secs(1)).await);
    client.worker_write(&key, owned("worker-a"));
    client.worker_write(&key, done("worker-a"));

    let total = split.await.unwrap().unwrap();
    assert_eq!(total, "hello world".len() as u64);
    assert!(wait_until(|| !client.contains(&key), Duration::from_secs(1)).await);
    coordinator.stop().await;
}

#[tokio::test]
async fn duplicate_in_batch_fails_before_any_worker_activity() {
    let (coordinator, _client) = build_coordinator(fast_config());
    coordinator.initialize().await.unwrap();
    let (dir, _file) = make_single_file_dir(b"x").await;

    // Listing the same directory twice enqueues the same task key twice
    // within one batch.
    let result = coordinator
        .split_batch(&[dir.path().to_path_buf(), dir.path().to_path_buf()])
        .await;
    assert!(result.is_err());
    coordinator.stop().await;
}

#[tokio::test]
async fn timeout_driven_resubmit_bumps_incarnation_and_budget() {
    let config = fast_config();
    let namespace = config.namespace.path.clone();
    let (coordinator, client) = build_coordinator(config);
    coordinator.initialize().await.unwrap();
    let (dir, file) = make_single_file_dir(b"data").await;
    let key = TaskKey::for_log_path(&namespace, &file);

    let split = tokio::spawn({
        let coordinator = coordinator.clone();
        let dir_path = dir.path().to_path_buf();
        async move { coordinator.split_batch(&[dir_path]).await }
    });

    assert!(wait_until(|| client.contains(&key), Duration::from_secs(1)).await);
    client.worker_write(&key, owned("worker-a"));

    // Never heartbeat again; let the monitor's CHECK-resubmit fire.
    assert!(
        wait_until(
            || client.version_of(&key).map(|v| v >= 2).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await,
        "expected the monitor to resubmit after the idle timeout"
    );

    client.worker_write(&key, owned("worker-b"));
    client.worker_write(&key, done("worker-b"));

    let total = split.await.unwrap().unwrap();
    assert_eq!(total, 4);
    coordinator.stop().await;
}

#[tokio::test]
async fn dead_worker_takeover_is_unconditional() {
    let config = fast_config();
    let namespace = config.namespace.path.clone();
    let (coordinator, client) = build_coordinator(config);
    coordinator.initialize().await.unwrap();
    let (dir, file) = make_single_file_dir(b"abcd").await;
    let key = TaskKey::for_log_path(&namespace, &file);

    let split = tokio::spawn({
        let coordinator = coordinator.clone();
        let dir_path = dir.path().to_path_buf();
        async move { coordinator.split_batch(&[dir_path]).await }
    });

    assert!(wait_until(|| client.contains(&key), Duration::from_secs(1)).await);
    client.worker_write(&key, owned("worker-a"));
    coordinator.handle_dead_worker(WorkerId::from("worker-a"));

    // The dead-worker sweep forces a resubmit regardless of idleness; a
    // fresh worker then claims and finishes it.
    assert!(
        wait_until(
            || client.version_of(&key).map(|v| v >= 2).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await,
        "expected the dead-worker sweep to force-resubmit"
    );
    client.worker_write(&key, owned("worker-b"));
    client.worker_write(&key, done("worker-b"));

    let total = split.await.unwrap().unwrap();
    assert_eq!(total, 4);
    coordinator.stop().await;
}

#[tokio::test]
async fn orphan_adoption_on_startup() {
    let config = fast_config();
    let namespace = config.namespace.path.clone();
    let (coordinator, client) = build_coordinator(config);

    let (dir, owned_file) = make_single_file_dir(b"owned-file").await;
    let owned_key = TaskKey::for_log_path(&namespace, &owned_file);
    client
        .create(
            &owned_key,
            owned("worker-a"),
            logsplit_coordinator::client::CreateMode::Persistent,
            3,
        )
        .await;

    let unassigned_key = TaskKey::from_raw(format!("{namespace}/deadbeef"));
    client
        .create(
            &unassigned_key,
            TaskState::Unassigned {
                owner: WorkerId::from("coord"),
            }
            .encode()
            .unwrap(),
            logsplit_coordinator::client::CreateMode::Persistent,
            3,
        )
        .await;

    coordinator.initialize().await.unwrap();

    // The `Unassigned` orphan at incarnation 0 is force-resubmitted
    // proactively, which bumps its store-side version.
    assert!(
        wait_until(
            || client.version_of(&unassigned_key).map(|v| v >= 1).unwrap_or(false),
            Duration::from_secs(1)
        )
        .await
    );

    // A caller splitting the directory underlying the `Owned` orphan
    // adopts it into the new batch rather than failing.
    let split = tokio::spawn({
        let coordinator = coordinator.clone();
        let dir_path = dir.path().to_path_buf();
        async move { coordinator.split_batch(&[dir_path]).await }
    });

    client.worker_write(&owned_key, done("worker-a"));
    let total = split.await.unwrap().unwrap();
    assert_eq!(total, "owned-file".len() as u64);
    coordinator.stop().await;
}

#[tokio::test]
async fn resubmit_budget_exhausted_then_err_event_fails_task() {
    let mut config = fast_config();
    config.resubmit.max_resubmit = 1;
    config.timing.manager_timeout_ms = 20;
    let namespace = config.namespace.path.clone();
    let (coordinator, client) = build_coordinator(config);
    coordinator.initialize().await.unwrap();
    let (dir, file) = make_single_file_dir(b"zz").await;
    let key = TaskKey::for_log_path(&namespace, &file);

    let split = tokio::spawn({
        let coordinator = coordinator.clone();
        let dir_path = dir.path().to_path_buf();
        async move { coordinator.split_batch(&[dir_path]).await }
    });

    assert!(wait_until(|| client.contains(&key), Duration::from_secs(1)).await);
    // Never claim; the monitor CHECK-resubmits exactly once before the
    // budget is exhausted.
    assert!(
        wait_until(
            || client.version_of(&key).map(|v| v >= 1).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );
    // Give the monitor a few more ticks to hit and latch the exhausted
    // budget; no further setData should occur from CHECK alone.
    tokio::time::sleep(Duration::from_millis(150)).await;

    // An `Err` event arrives; CHECK-resubmit is refused (budget
    // exhausted), so the task is marked `Failure` and deleted.
    client.worker_write(
        &key,
        TaskState::Err {
            owner: WorkerId::from("worker-a"),
        }
        .encode()
        .unwrap(),
    );

    let total = split.await.unwrap().unwrap();
    assert_eq!(total, 2);
    assert!(wait_until(|| !client.contains(&key), Duration::from_secs(1)).await);
    coordinator.stop().await;
}
