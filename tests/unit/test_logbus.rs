//! Log bus unit tests

use std::path::PathBuf;

use shipwright::filesys::Dir;
use shipwright::logbus::{LogBus, ReadQuery};
use shipwright::models::log_event::EventLevel;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("logbus-test-{}", uuid::Uuid::new_v4()))
}

async fn cleanup(path: &PathBuf) {
    let _ = Dir::new(path).delete().await;
}

#[tokio::test]
async fn test_append_assigns_monotonic_ids() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    let first = bus
        .append("dep-1", EventLevel::Info, "first", Some("clone"))
        .await
        .unwrap();
    let second = bus
        .append("dep-1", EventLevel::Info, "second", Some("clone"))
        .await
        .unwrap();

    assert!(first.id < second.id);
    assert!(first.timestamp <= second.timestamp);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_replay_then_follow() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    bus.append("dep-1", EventLevel::Info, "before", None).await;
    let mut subscription = bus.subscribe("dep-1").await;
    assert_eq!(subscription.replay.len(), 1);
    assert_eq!(subscription.replay[0].message, "before");

    bus.append("dep-1", EventLevel::Info, "after", None).await;
    let live = subscription.live.recv().await.unwrap();
    assert_eq!(live.message, "after");
    assert!(live.id > subscription.replay[0].id);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_events_survive_restart() {
    let dir = temp_dir();

    {
        let bus = LogBus::open(Dir::new(&dir)).await.unwrap();
        bus.append("dep-1", EventLevel::Info, "persisted", Some("clone"))
            .await;
    }

    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();
    let events = bus.read("dep-1", &ReadQuery::default()).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "persisted");

    // New appends continue the id sequence.
    let next = bus
        .append("dep-1", EventLevel::Info, "more", None)
        .await
        .unwrap();
    assert_eq!(next.id, events[0].id + 1);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_read_filters() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    bus.append("dep-1", EventLevel::Info, "cloning repository", Some("clone"))
        .await;
    bus.append("dep-1", EventLevel::Error, "build exploded", Some("build"))
        .await;
    bus.append("dep-1", EventLevel::Info, "uploading artifact", Some("deployment"))
        .await;

    let errors = bus
        .read(
            "dep-1",
            &ReadQuery {
                level: Some(EventLevel::Error),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "build exploded");

    let found = bus
        .read(
            "dep-1",
            &ReadQuery {
                search: Some("UPLOADING".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(found.len(), 1);

    let limited = bus
        .read(
            "dep-1",
            &ReadQuery {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(limited.len(), 2);
    // limit keeps the most recent events
    assert_eq!(limited[1].message, "uploading artifact");

    let since = bus
        .read(
            "dep-1",
            &ReadQuery {
                since_id: Some(1),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(since.len(), 2);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_summary_counts_by_level() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    bus.append("dep-1", EventLevel::Info, "one", None).await;
    bus.append("dep-1", EventLevel::Info, "two", None).await;
    bus.append("dep-1", EventLevel::Success, "done", None).await;

    let summary = bus.summary("dep-1").await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.by_level.get("info"), Some(&2));
    assert_eq!(summary.by_level.get("success"), Some(&1));
    assert!(summary.duration_ms.is_some());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_clear_detaches_subscribers() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    bus.append("dep-1", EventLevel::Info, "hello", None).await;
    let mut subscription = bus.subscribe("dep-1").await;

    bus.clear("dep-1").await.unwrap();

    // The broadcast sender is gone; the receiver observes closure.
    assert!(subscription.live.recv().await.is_err());
    assert!(bus.read("dep-1", &ReadQuery::default()).await.is_empty());

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_independent_deployments_do_not_interleave() {
    let dir = temp_dir();
    let bus = LogBus::open(Dir::new(&dir)).await.unwrap();

    bus.append("dep-a", EventLevel::Info, "a1", None).await;
    bus.append("dep-b", EventLevel::Info, "b1", None).await;
    bus.append("dep-a", EventLevel::Info, "a2", None).await;

    let a = bus.read("dep-a", &ReadQuery::default()).await;
    let b = bus.read("dep-b", &ReadQuery::default()).await;
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    // Ids are per-deployment sequences.
    assert_eq!(a[0].id, 1);
    assert_eq!(b[0].id, 1);

    cleanup(&dir).await;
}

#[tokio::test]
async fn test_gap_marker_shape() {
    let marker = LogBus::gap_marker("dep-1", 7);
    assert_eq!(marker.id, 0);
    assert_eq!(marker.level, EventLevel::Warn);
    assert_eq!(
        marker.metadata.get("missed_events"),
        Some(&serde_json::json!(7))
    );
}
