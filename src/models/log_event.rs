//! Deployment log events

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
    Success,
    Debug,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
            EventLevel::Success => "success",
            EventLevel::Debug => "debug",
        }
    }
}

/// One entry in a deployment's append-only log.
///
/// `id` is assigned by the bus and is monotonic per deployment;
/// timestamps never decrease along ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: u64,

    pub deployment_id: String,

    pub timestamp: DateTime<Utc>,

    pub level: EventLevel,

    /// Short pipeline step tag, e.g. "clone" or "deployment"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}
