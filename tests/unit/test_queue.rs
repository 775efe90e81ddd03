//! Job queue unit tests

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use shipwright::filesys::Dir;
use shipwright::models::deployment::{Budget, DeploymentConfig, Environment};
use shipwright::models::job::JobPayload;
use shipwright::queue::{CancelOutcome, JobQueue};
use tokio::sync::broadcast;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("queue-test-{}", uuid::Uuid::new_v4()))
}

fn payload() -> JobPayload {
    JobPayload {
        repo_url: "https://github.com/octocat/hello-world".to_string(),
        branch: "main".to_string(),
        environment: Environment::School,
        budget: Budget::Free,
        preferred_providers: Vec::new(),
        explicit_provider: None,
        explicit_credential_id: None,
        config: DeploymentConfig {
            name: "hello".to_string(),
            build_command: None,
            build_directory: None,
            env_vars: HashMap::new(),
        },
    }
}

async fn cleanup(path: &PathBuf) {
    let _ = Dir::new(path).delete().await;
}

#[tokio::test]
async fn test_enqueue_lease_complete() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (tx, mut rx) = broadcast::channel(1);

    let item = queue
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(item.attempts_made, 0);

    let leased = queue.lease_next("worker-0", &mut rx).await.unwrap();
    assert_eq!(leased.job_id, item.job_id);
    assert_eq!(leased.attempts_made, 1);

    queue.complete(&leased.job_id, "success", None).await.unwrap();

    let history = queue.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, "success");
    assert_eq!(history[0].attempts_made, 1);

    drop(tx);
    cleanup(&dir).await;
}

#[tokio::test]
async fn test_lease_blocks_until_shutdown() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (tx, mut rx) = broadcast::channel(1);

    // Empty queue: lease_next should return None once shutdown fires.
    tx.send(()).unwrap();
    assert!(queue.lease_next("worker-0", &mut rx).await.is_none());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_retry_backoff_gates_item() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (_tx, mut rx) = broadcast::channel::<()>(1);

    queue
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();

    let leased = queue.lease_next("worker-0", &mut rx).await.unwrap();
    assert!(leased.can_retry());
    queue.release_for_retry(&leased.job_id).await.unwrap();

    // The item is gated by backoff (5 s minimum), so an immediate
    // lease attempt with a short shutdown window finds nothing.
    let (quick_tx, mut quick_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = quick_tx.send(());
    });
    assert!(queue.lease_next("worker-0", &mut quick_rx).await.is_none());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_cancel_queued_item_removes_it() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();

    let item = queue
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(queue.cancel(&item.job_id).await.unwrap(), CancelOutcome::Removed);
    assert_eq!(queue.backlog().await, 0);
    assert_eq!(queue.cancel(&item.job_id).await.unwrap(), CancelOutcome::NotFound);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_cancel_leased_item_flags_intent() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (_tx, mut rx) = broadcast::channel::<()>(1);

    let item = queue
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();
    queue.lease_next("worker-0", &mut rx).await.unwrap();

    assert_eq!(queue.cancel(&item.job_id).await.unwrap(), CancelOutcome::Flagged);
    assert!(queue.is_cancel_requested(&item.job_id).await);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_items_survive_restart() {
    let dir = temp_dir();

    let first = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let item = first
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();
    let (_tx, mut rx) = broadcast::channel::<()>(1);
    first.lease_next("worker-0", &mut rx).await.unwrap();
    drop(first);

    // A fresh process sees the item; the old lease is gone, attempts
    // from the crashed run are preserved.
    let second = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (_tx2, mut rx2) = broadcast::channel::<()>(1);
    let recovered = second.lease_next("worker-1", &mut rx2).await.unwrap();
    assert_eq!(recovered.job_id, item.job_id);
    assert_eq!(recovered.attempts_made, 2);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_fifo_order() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (_tx, mut rx) = broadcast::channel::<()>(1);

    let first = queue
        .enqueue("dep-1", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();
    let second = queue
        .enqueue("dep-2", payload(), 3, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(
        queue.lease_next("w", &mut rx).await.unwrap().job_id,
        first.job_id
    );
    assert_eq!(
        queue.lease_next("w", &mut rx).await.unwrap().job_id,
        second.job_id
    );

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_attempts_never_exceed_max() {
    let dir = temp_dir();
    let queue = JobQueue::open(Dir::new(&dir)).await.unwrap();
    let (_tx, mut rx) = broadcast::channel::<()>(1);

    queue
        .enqueue("dep-1", payload(), 1, Duration::from_secs(60))
        .await
        .unwrap();

    let leased = queue.lease_next("worker-0", &mut rx).await.unwrap();
    assert_eq!(leased.attempts_made, 1);
    assert!(!leased.can_retry());

    queue
        .complete(&leased.job_id, "failed", Some("terminal".to_string()))
        .await
        .unwrap();
    let history = queue.history().await;
    assert!(history[0].attempts_made <= 1);

    cleanup(&dir).await;
}
