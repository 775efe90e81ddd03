//! Durable queue work items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::{Budget, DeploymentConfig, Environment};
use crate::providers::ProviderKind;

/// Copy of the intake fields a worker needs to run the pipeline
/// without re-reading the deployment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub repo_url: String,
    pub branch: String,
    pub environment: Environment,
    pub budget: Budget,
    #[serde(default)]
    pub preferred_providers: Vec<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_credential_id: Option<String>,
    pub config: DeploymentConfig,
}

/// One unit of deployment work in the durable queue.
///
/// At most one worker holds the lease at any time; a lease that expires
/// without an ack re-enqueues the item with `attempts_made` incremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub job_id: String,

    pub deployment_id: String,

    pub attempts_made: u32,

    pub max_attempts: u32,

    /// Per-job wall-clock timeout in milliseconds
    pub timeout_ms: u64,

    pub payload: JobPayload,

    pub enqueued_at: DateTime<Utc>,

    /// Backoff gate; the item is not leased before this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Cancellation intent recorded while the item was leased
    #[serde(default)]
    pub cancel_requested: bool,
}

impl JobItem {
    /// Whether the item may still be retried after a retryable failure
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// Completed item kept in the bounded debug history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedJob {
    pub job_id: String,
    pub deployment_id: String,
    pub attempts_made: u32,
    pub completed_at: DateTime<Utc>,
    /// "success", "failed" or "cancelled"
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
