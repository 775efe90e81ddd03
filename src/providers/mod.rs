//! Hosting provider adapters.
//!
//! The provider set is closed: {netlify, vercel}. Each adapter exposes
//! the uniform `{validate, deploy, status, delete}` contract and owns
//! its artifact packaging (Netlify zips the directory, Vercel inlines a
//! base64 file manifest). Adapters keep no state between calls; all
//! context arrives in arguments.

pub mod netlify;
pub mod select;
pub mod vercel;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::models::detection::ProjectType;

/// The closed set of supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Netlify,
    Vercel,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Netlify => "netlify",
            ProviderKind::Vercel => "vercel",
        }
    }

    /// Every registered provider, in registration order.
    /// Registration order breaks ranking ties.
    pub fn registered() -> &'static [ProviderKind] {
        &[ProviderKind::Netlify, ProviderKind::Vercel]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "netlify" => Ok(ProviderKind::Netlify),
            "vercel" => Ok(ProviderKind::Vercel),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Static capability record for a provider
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub supports_free_tier: bool,
    pub max_artifact_mb: f64,
    pub supported_project_types: &'static [ProjectType],
    pub required_credential_fields: &'static [&'static str],
    pub required_config_fields: &'static [&'static str],
    pub optional_config_fields: &'static [&'static str],
}

/// Deployment context handed to an adapter alongside the artifact
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Sanitized site/project name
    pub site_name: String,

    /// Environment variables to attach to the deployment
    pub env_vars: HashMap<String, String>,

    pub project_type: ProjectType,

    /// Output directory relative to the artifact, when known
    pub build_directory: Option<String>,
}

/// Successful upload result
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub deployment_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Normalized provider-side deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Pending,
    Building,
    Success,
    Failed,
}

/// `status` call result
#[derive(Debug, Clone, Serialize)]
pub struct StatusOutcome {
    pub status: DeployStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

/// A stateless provider adapter: a kind plus a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Adapter {
    kind: ProviderKind,
    http: reqwest::Client,
}

impl Adapter {
    pub fn new(kind: ProviderKind) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { kind, http })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        match self.kind {
            ProviderKind::Netlify => netlify::capabilities(),
            ProviderKind::Vercel => vercel::capabilities(),
        }
    }

    /// Check the credential against the provider's user endpoint.
    ///
    /// `Ok(false)` means the provider rejected the secret; a network
    /// failure surfaces as `ValidationUnavailable` and must not be
    /// treated as a verdict.
    pub async fn validate(&self, credentials: &serde_json::Value) -> Result<bool, Error> {
        match self.kind {
            ProviderKind::Netlify => netlify::validate(&self.http, credentials).await,
            ProviderKind::Vercel => vercel::validate(&self.http, credentials).await,
        }
    }

    /// Upload an artifact directory and return the live deployment.
    pub async fn deploy(
        &self,
        artifact: &Path,
        context: &DeployContext,
        credentials: &serde_json::Value,
    ) -> Result<DeployOutcome, Error> {
        match self.kind {
            ProviderKind::Netlify => {
                netlify::deploy(&self.http, artifact, context, credentials).await
            }
            ProviderKind::Vercel => {
                vercel::deploy(&self.http, artifact, context, credentials).await
            }
        }
    }

    pub async fn status(
        &self,
        deployment_id: &str,
        credentials: &serde_json::Value,
    ) -> Result<StatusOutcome, Error> {
        match self.kind {
            ProviderKind::Netlify => netlify::status(&self.http, deployment_id, credentials).await,
            ProviderKind::Vercel => vercel::status(&self.http, deployment_id, credentials).await,
        }
    }

    pub async fn delete(
        &self,
        deployment_id: &str,
        credentials: &serde_json::Value,
    ) -> Result<bool, Error> {
        match self.kind {
            ProviderKind::Netlify => netlify::delete(&self.http, deployment_id, credentials).await,
            ProviderKind::Vercel => vercel::delete(&self.http, deployment_id, credentials).await,
        }
    }
}

/// Classify a provider API response status for retry purposes:
/// 4xx is the provider's final word (terminal), everything else about
/// the transport is worth retrying.
pub(crate) fn deploy_error(status: reqwest::StatusCode, body: String) -> Error {
    Error::Deploy {
        message: format!("{}: {}", status, body),
        terminal: status.is_client_error(),
    }
}

/// Missing or malformed credential fields are terminal deploy errors.
pub(crate) fn credential_field<'a>(
    credentials: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, Error> {
    credentials
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidCredential(format!("missing field `{}`", field)))
}

/// Optional string field helper for credential records.
pub(crate) fn optional_field(credentials: &serde_json::Value, field: &str) -> Option<String> {
    credentials
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}
