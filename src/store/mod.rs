//! Deployment store: durable records with state-machine-aware updates.
//!
//! One JSON file per deployment under the store directory, mirrored by
//! an in-memory index. The owning worker is the single writer for a
//! deployment; cancel and sweep paths serialize through the same
//! write lock.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::Error;
use crate::filesys::Dir;
use crate::models::deployment::{
    Budget, Deployment, DeploymentConfig, DeploymentState, Environment,
};
use crate::models::detection::DetectionResult;
use crate::providers::ProviderKind;
use crate::utils::generate_uuid;

/// Validated intake fields for a new deployment
#[derive(Debug, Clone)]
pub struct Intake {
    pub repo_url: String,
    pub branch: String,
    pub environment: Environment,
    pub budget: Budget,
    pub preferred_providers: Vec<ProviderKind>,
    pub explicit_provider: Option<ProviderKind>,
    pub explicit_credential_id: Option<String>,
    pub config: DeploymentConfig,
}

/// Fields that may accompany a state transition
#[derive(Debug, Default, Clone)]
pub struct StatePatch {
    pub chosen_provider: Option<ProviderKind>,
    pub deployment_url: Option<String>,
    pub error_message: Option<String>,
    pub detected: Option<DetectionResult>,
    pub job_handle: Option<String>,
}

/// Paging and filters for listing
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub status: Option<DeploymentState>,
    pub provider: Option<ProviderKind>,
}

pub struct DeploymentStore {
    dir: Dir,
    index: RwLock<HashMap<String, Deployment>>,
}

impl DeploymentStore {
    /// Open the store, loading every persisted deployment.
    pub async fn open(dir: Dir) -> Result<Self, Error> {
        dir.create().await?;
        let mut index = HashMap::new();

        for path in dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match crate::filesys::File::new(&path).read_json::<Deployment>().await {
                Ok(deployment) => {
                    index.insert(deployment.id.clone(), deployment);
                }
                Err(e) => warn!("Skipping unreadable deployment file {:?}: {}", path, e),
            }
        }

        info!("Deployment store opened with {} records", index.len());
        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    /// Create a new deployment in `queued`.
    pub async fn create(&self, intake: Intake) -> Result<Deployment, Error> {
        let now = Utc::now();
        let deployment = Deployment {
            id: generate_uuid(),
            repo_url: intake.repo_url,
            branch: intake.branch,
            environment: intake.environment,
            budget: intake.budget,
            preferred_providers: intake.preferred_providers,
            explicit_provider: intake.explicit_provider,
            explicit_credential_id: intake.explicit_credential_id,
            config: intake.config,
            state: DeploymentState::Queued,
            chosen_provider: None,
            deployment_url: None,
            error_message: None,
            detected: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            job_handle: None,
        };

        self.persist(&deployment).await?;
        self.index
            .write()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(deployment)
    }

    pub async fn get(&self, id: &str) -> Result<Deployment, Error> {
        self.index
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))
    }

    /// Page through deployments, newest first.
    pub async fn list(&self, query: &ListQuery) -> (Vec<Deployment>, usize) {
        let index = self.index.read().await;
        let mut deployments: Vec<Deployment> = index
            .values()
            .filter(|d| query.status.is_none_or(|s| d.state == s))
            .filter(|d| query.provider.is_none_or(|p| d.chosen_provider == Some(p)))
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = deployments.len();
        let limit = query.limit.unwrap_or(20).clamp(1, 100);
        let page = query.page.unwrap_or(1).max(1);
        let start = (page - 1) * limit;
        let page_items = deployments
            .into_iter()
            .skip(start)
            .take(limit)
            .collect();
        (page_items, total)
    }

    /// Transition a deployment, enforcing the state DAG.
    ///
    /// Sets `started_at` on first entry to `building` and
    /// `completed_at` on any terminal state. Rejects illegal
    /// transitions with a storage error.
    pub async fn update_state(
        &self,
        id: &str,
        new_state: DeploymentState,
        patch: StatePatch,
    ) -> Result<Deployment, Error> {
        let mut index = self.index.write().await;
        let deployment = index
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))?;

        if deployment.state != new_state && !deployment.state.can_transition_to(new_state) {
            return Err(Error::Storage(format!(
                "illegal state transition {:?} -> {:?} for deployment {}",
                deployment.state, new_state, id
            )));
        }

        let now = Utc::now();
        deployment.state = new_state;
        deployment.updated_at = now;

        if new_state == DeploymentState::Building && deployment.started_at.is_none() {
            deployment.started_at = Some(now);
        }
        if new_state.is_terminal() {
            deployment.completed_at = Some(now);
        }

        if let Some(provider) = patch.chosen_provider {
            deployment.chosen_provider = Some(provider);
        }
        if let Some(url) = patch.deployment_url {
            deployment.deployment_url = Some(url);
        }
        if let Some(message) = patch.error_message {
            deployment.error_message = Some(message);
        }
        if patch.detected.is_some() && deployment.detected.is_none() {
            deployment.detected = patch.detected;
        }
        if let Some(handle) = patch.job_handle {
            deployment.job_handle = Some(handle);
        }

        let snapshot = deployment.clone();
        drop(index);

        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    /// Rewind a deployment to `queued` for a fresh attempt after a
    /// retryable failure. The no-backward invariant applies within an
    /// attempt; a retry restarts the forward path from the top.
    pub async fn reset_for_retry(&self, id: &str) -> Result<(), Error> {
        let mut index = self.index.write().await;
        let deployment = index
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))?;

        if deployment.state.is_terminal() {
            return Err(Error::Storage(format!(
                "deployment {} is terminal and cannot be retried",
                id
            )));
        }

        deployment.state = DeploymentState::Queued;
        deployment.updated_at = Utc::now();
        let snapshot = deployment.clone();
        drop(index);
        self.persist(&snapshot).await
    }

    /// Attach the queue handle without touching the state machine.
    pub async fn set_job_handle(&self, id: &str, job_id: &str) -> Result<(), Error> {
        let mut index = self.index.write().await;
        let deployment = index
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))?;
        deployment.job_handle = Some(job_id.to_string());
        deployment.updated_at = Utc::now();
        let snapshot = deployment.clone();
        drop(index);
        self.persist(&snapshot).await
    }

    async fn persist(&self, deployment: &Deployment) -> Result<(), Error> {
        self.dir
            .file(&format!("{}.json", deployment.id))
            .write_json_atomic(deployment)
            .await
    }
}
