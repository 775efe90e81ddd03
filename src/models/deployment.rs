//! Deployment record and its state machine

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::detection::DetectionResult;
use crate::providers::ProviderKind;

/// Target environment for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    School,
    Staging,
    Prod,
}

/// Budget constraint declared at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Free,
    Low,
    Any,
}

/// Deployment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Accepted, waiting for a worker
    Queued,

    /// Worker is fetching the repository
    Cloning,

    /// Build container running (or build being skipped)
    Building,

    /// Artifact being uploaded to the provider
    Deploying,

    /// Live; `deployment_url` is set
    Success,

    /// Terminal failure; `error_message` is set
    Failed,

    /// User-initiated cancellation observed
    Cancelled,
}

impl DeploymentState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Success | DeploymentState::Failed | DeploymentState::Cancelled
        )
    }

    /// Whether a transition to `next` is legal.
    ///
    /// The forward path is queued -> cloning -> building -> deploying ->
    /// success; `failed` may follow any non-terminal state and
    /// `cancelled` may preempt any non-terminal state. No backward
    /// transitions.
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Queued, Cloning) => true,
            (Cloning, Building) => true,
            (Building, Deploying) => true,
            (Deploying, Success) => true,
            (_, Failed) => true,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

/// Per-deployment build configuration supplied at intake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Project name; used to derive the provider site name
    pub name: String,

    /// Explicit build command; overrides detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    /// Explicit output directory; overrides detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_directory: Option<String>,

    /// Environment variables passed to the build
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// The top-level entity tracking one user request through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Source repository URL
    pub repo_url: String,

    /// Requested branch
    pub branch: String,

    pub environment: Environment,

    pub budget: Budget,

    /// Ordered provider preference; may be empty
    #[serde(default)]
    pub preferred_providers: Vec<ProviderKind>,

    /// Hard provider override from intake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_provider: Option<ProviderKind>,

    /// Credential override from intake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_credential_id: Option<String>,

    pub config: DeploymentConfig,

    /// Current lifecycle state
    pub state: DeploymentState,

    /// Provider the selector chose; set once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_provider: Option<ProviderKind>,

    /// Live URL; set exactly when state is `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,

    /// Sanitized failure message; set exactly when state is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Stack detection outcome; monotonic once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected: Option<DetectionResult>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// First entry into `building`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Entry into any terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Link to the queue work item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        use DeploymentState::*;
        assert!(Queued.can_transition_to(Cloning));
        assert!(Cloning.can_transition_to(Building));
        assert!(Building.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Success));
    }

    #[test]
    fn test_no_backward_transitions() {
        use DeploymentState::*;
        assert!(!Building.can_transition_to(Cloning));
        assert!(!Deploying.can_transition_to(Building));
        assert!(!Cloning.can_transition_to(Queued));
        assert!(!Deploying.can_transition_to(Cloning));
    }

    #[test]
    fn test_terminal_states_frozen() {
        use DeploymentState::*;
        for terminal in [Success, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Cloning, Building, Deploying, Success, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_cancel_preempts_any_live_state() {
        use DeploymentState::*;
        for live in [Queued, Cloning, Building, Deploying] {
            assert!(live.can_transition_to(Cancelled));
            assert!(live.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_no_skipping_forward() {
        use DeploymentState::*;
        assert!(!Queued.can_transition_to(Building));
        assert!(!Cloning.can_transition_to(Deploying));
        assert!(!Building.can_transition_to(Success));
    }
}
