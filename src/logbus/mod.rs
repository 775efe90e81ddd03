//! Per-deployment append-only log with durable persistence and live
//! fan-out.
//!
//! Every append is persisted (one JSON file per deployment, rewritten
//! on append) before any subscriber is notified. Fan-out runs over a
//! per-deployment broadcast ring of 256 events; a slow subscriber that
//! falls behind observes a lag signal and receives a synthesized
//! gap-marker event, then continues with the newest events
//! (drop-oldest policy). Subscribers never block appenders.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::warn;

use crate::errors::Error;
use crate::filesys::{Dir, File};
use crate::models::log_event::{EventLevel, LogEvent};

/// Broadcast ring capacity per deployment
const FANOUT_CAPACITY: usize = 256;

/// Replay-then-follow subscription handle.
///
/// `replay` is the full existing log in order; `live` yields every
/// append after it with no gap or duplication in between.
pub struct Subscription {
    pub replay: Vec<LogEvent>,
    pub live: broadcast::Receiver<LogEvent>,
}

/// Filters for reading a slice of the log
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ReadQuery {
    pub limit: Option<usize>,
    pub level: Option<EventLevel>,
    pub search: Option<String>,
    pub since_id: Option<u64>,
}

/// Aggregate view of one deployment's log
#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub total: usize,
    pub by_level: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

struct DeploymentLog {
    next_id: u64,
    events: Vec<LogEvent>,
    sender: broadcast::Sender<LogEvent>,
}

impl DeploymentLog {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            next_id: 1,
            events: Vec::new(),
            sender,
        }
    }
}

pub struct LogBus {
    dir: Dir,
    logs: RwLock<HashMap<String, Arc<Mutex<DeploymentLog>>>>,
}

impl LogBus {
    pub async fn open(dir: Dir) -> Result<Self, Error> {
        dir.create().await?;
        Ok(Self {
            dir,
            logs: RwLock::new(HashMap::new()),
        })
    }

    /// Append an event: assign the next id and a server timestamp,
    /// persist, then notify subscribers.
    ///
    /// Returns `None` when the durable write failed; in that case no
    /// subscriber sees the event and callers carry on.
    pub async fn append(
        &self,
        deployment_id: &str,
        level: EventLevel,
        message: &str,
        step: Option<&str>,
    ) -> Option<LogEvent> {
        self.append_with_metadata(deployment_id, level, message, step, HashMap::new())
            .await
    }

    pub async fn append_with_metadata(
        &self,
        deployment_id: &str,
        level: EventLevel,
        message: &str,
        step: Option<&str>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Option<LogEvent> {
        let log = self.entry(deployment_id).await;
        let mut log = log.lock().await;

        let event = LogEvent {
            id: log.next_id,
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            level,
            step: step.map(|s| s.to_string()),
            message: message.to_string(),
            metadata,
        };

        log.events.push(event.clone());
        if let Err(e) = self.persist(deployment_id, &log.events).await {
            // Durable write failed: the event did not happen.
            warn!("Dropping log event for {}: {}", deployment_id, e);
            log.events.pop();
            return None;
        }

        log.next_id += 1;
        // No receivers is fine; send only fails then.
        let _ = log.sender.send(event.clone());
        Some(event)
    }

    /// Read a filtered slice from durable storage.
    pub async fn read(&self, deployment_id: &str, query: &ReadQuery) -> Vec<LogEvent> {
        let log = self.entry(deployment_id).await;
        let log = log.lock().await;

        let mut slice: Vec<LogEvent> = log
            .events
            .iter()
            .filter(|e| query.since_id.is_none_or(|since| e.id > since))
            .filter(|e| query.level.is_none_or(|level| e.level == level))
            .filter(|e| {
                query
                    .search
                    .as_deref()
                    .is_none_or(|needle| e.message.to_lowercase().contains(&needle.to_lowercase()))
            })
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            if slice.len() > limit {
                // Keep the most recent events.
                slice.drain(..slice.len() - limit);
            }
        }
        slice
    }

    /// Subscribe: deliver the full existing log, then follow appends.
    ///
    /// Replay and the live receiver are taken under the same lock as
    /// appends, so the hand-off point has no gap and no duplicates.
    pub async fn subscribe(&self, deployment_id: &str) -> Subscription {
        let log = self.entry(deployment_id).await;
        let log = log.lock().await;
        Subscription {
            replay: log.events.clone(),
            live: log.sender.subscribe(),
        }
    }

    /// Aggregate counts and timing for one deployment.
    pub async fn summary(&self, deployment_id: &str) -> LogSummary {
        let log = self.entry(deployment_id).await;
        let log = log.lock().await;

        let mut by_level: HashMap<String, usize> = HashMap::new();
        for event in &log.events {
            *by_level.entry(event.level.as_str().to_string()).or_default() += 1;
        }

        let start_time = log.events.first().map(|e| e.timestamp);
        let end_time = log.events.last().map(|e| e.timestamp);
        let duration_ms = match (start_time, end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };

        LogSummary {
            total: log.events.len(),
            by_level,
            start_time,
            end_time,
            duration_ms,
        }
    }

    /// Drop a deployment's log from storage and memory, detaching all
    /// subscribers (their receivers close).
    pub async fn clear(&self, deployment_id: &str) -> Result<(), Error> {
        self.dir
            .file(&format!("{}.json", deployment_id))
            .delete()
            .await?;
        self.logs.write().await.remove(deployment_id);
        Ok(())
    }

    /// Synthesized marker delivered to a subscriber that lagged behind
    /// the fan-out ring. Ids `0` never collide with appended events.
    pub fn gap_marker(deployment_id: &str, missed: u64) -> LogEvent {
        let mut metadata = HashMap::new();
        metadata.insert("missed_events".to_string(), serde_json::json!(missed));
        LogEvent {
            id: 0,
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            level: EventLevel::Warn,
            step: Some("logbus".to_string()),
            message: format!("{} log events were dropped for this subscriber", missed),
            metadata,
        }
    }

    async fn entry(&self, deployment_id: &str) -> Arc<Mutex<DeploymentLog>> {
        {
            let logs = self.logs.read().await;
            if let Some(log) = logs.get(deployment_id) {
                return log.clone();
            }
        }

        let mut logs = self.logs.write().await;
        if let Some(log) = logs.get(deployment_id) {
            return log.clone();
        }

        // First touch: recover any persisted events from disk.
        let mut fresh = DeploymentLog::new();
        let file = self.dir.file(&format!("{}.json", deployment_id));
        if file.exists().await {
            match file.read_json::<Vec<LogEvent>>().await {
                Ok(events) => {
                    fresh.next_id = events.last().map(|e| e.id + 1).unwrap_or(1);
                    fresh.events = events;
                }
                Err(e) => warn!("Unreadable log file for {}: {}", deployment_id, e),
            }
        }

        let log = Arc::new(Mutex::new(fresh));
        logs.insert(deployment_id.to_string(), log.clone());
        log
    }

    async fn persist(&self, deployment_id: &str, events: &[LogEvent]) -> Result<(), Error> {
        let file = File::new(self.dir.path().join(format!("{}.json", deployment_id)));
        file.write_json_atomic(&events.to_vec()).await
    }
}
