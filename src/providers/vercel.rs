//! Vercel adapter.
//!
//! Deploys post an inline file manifest (base64 file contents), then
//! poll the deployment until it reaches READY or ERROR. Team and
//! project ids from the credential are passed through when present.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::Error;
use crate::filesys::walk;
use crate::models::detection::ProjectType;
use crate::providers::{
    credential_field, deploy_error, optional_field, Capabilities, DeployContext, DeployOutcome,
    DeployStatus, StatusOutcome,
};

const API_BASE: &str = "https://api.vercel.com";

/// Poll cadence and bound for the post-upload readiness loop.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_ATTEMPTS: u32 = 30;

pub fn capabilities() -> Capabilities {
    Capabilities {
        supports_free_tier: true,
        max_artifact_mb: 100.0,
        supported_project_types: &[ProjectType::Static, ProjectType::Spa, ProjectType::Ssr],
        required_credential_fields: &["token"],
        required_config_fields: &[],
        optional_config_fields: &["team_id", "project_id"],
    }
}

#[derive(Debug, Deserialize)]
struct VercelDeployment {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "readyState")]
    ready_state: Option<String>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

pub async fn validate(
    http: &reqwest::Client,
    credentials: &serde_json::Value,
) -> Result<bool, Error> {
    let token = credential_field(credentials, "token")?;
    let response = http
        .get(format!("{}/v2/user", API_BASE))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| Error::ValidationUnavailable(e.to_string()))?;
    Ok(response.status().is_success())
}

pub async fn deploy(
    http: &reqwest::Client,
    artifact: &Path,
    context: &DeployContext,
    credentials: &serde_json::Value,
) -> Result<DeployOutcome, Error> {
    let token = credential_field(credentials, "token")?.to_string();
    let team_id = optional_field(credentials, "team_id");
    let project_id = optional_field(credentials, "project_id");

    let files = file_manifest(artifact).await?;
    info!("Creating Vercel deployment with {} files", files.len());

    let mut body = serde_json::json!({
        "name": context.site_name,
        "files": files,
        "target": "production",
        "projectSettings": {
            "framework": null,
            "buildCommand": null,
            "outputDirectory": context.build_directory,
        },
    });
    if let Some(project) = &project_id {
        body["project"] = serde_json::json!(project);
    }
    if !context.env_vars.is_empty() {
        body["env"] = serde_json::json!(context.env_vars);
    }

    let mut url = format!("{}/v13/deployments", API_BASE);
    if let Some(team) = &team_id {
        url = format!("{}?teamId={}", url, team);
    }

    let response = http
        .post(&url)
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Deploy {
            message: e.to_string(),
            terminal: false,
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(deploy_error(status, body));
    }

    let created: VercelDeployment = response.json().await?;
    let deployment = poll_until_settled(http, &created.id, &token, team_id.as_deref()).await?;

    let url = deployment
        .url
        .map(|u| format!("https://{}", u))
        .unwrap_or_else(|| format!("https://{}.vercel.app", context.site_name));

    let mut metadata = std::collections::HashMap::new();
    if let Some(team) = team_id {
        metadata.insert("team_id".to_string(), serde_json::json!(team));
    }

    Ok(DeployOutcome {
        deployment_id: deployment.id,
        url,
        preview_url: None,
        metadata,
    })
}

pub async fn status(
    http: &reqwest::Client,
    deployment_id: &str,
    credentials: &serde_json::Value,
) -> Result<StatusOutcome, Error> {
    let token = credential_field(credentials, "token")?;
    let team_id = optional_field(credentials, "team_id");
    let deployment = fetch_deployment(http, deployment_id, token, team_id.as_deref()).await?;

    let status = map_ready_state(deployment.ready_state.as_deref());

    Ok(StatusOutcome {
        status,
        url: deployment.url.map(|u| format!("https://{}", u)),
        error: deployment.error_message,
        logs: None,
    })
}

pub async fn delete(
    http: &reqwest::Client,
    deployment_id: &str,
    credentials: &serde_json::Value,
) -> Result<bool, Error> {
    let token = credential_field(credentials, "token")?;
    let mut url = format!("{}/v13/deployments/{}", API_BASE, deployment_id);
    if let Some(team) = optional_field(credentials, "team_id") {
        url = format!("{}?teamId={}", url, team);
    }
    let response = http.delete(&url).bearer_auth(token).send().await?;
    Ok(response.status().is_success())
}

fn map_ready_state(state: Option<&str>) -> DeployStatus {
    match state {
        Some("READY") => DeployStatus::Success,
        Some("BUILDING") => DeployStatus::Building,
        Some("ERROR") | Some("CANCELED") => DeployStatus::Failed,
        _ => DeployStatus::Pending,
    }
}

async fn fetch_deployment(
    http: &reqwest::Client,
    deployment_id: &str,
    token: &str,
    team_id: Option<&str>,
) -> Result<VercelDeployment, Error> {
    let mut url = format!("{}/v13/deployments/{}", API_BASE, deployment_id);
    if let Some(team) = team_id {
        url = format!("{}?teamId={}", url, team);
    }
    let response = http.get(&url).bearer_auth(token).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(deploy_error(status, body));
    }

    Ok(response.json().await?)
}

/// Poll at ~2 s intervals until READY, ERROR or the attempt bound.
async fn poll_until_settled(
    http: &reqwest::Client,
    deployment_id: &str,
    token: &str,
    team_id: Option<&str>,
) -> Result<VercelDeployment, Error> {
    for attempt in 0..POLL_ATTEMPTS {
        let deployment = fetch_deployment(http, deployment_id, token, team_id).await?;
        match map_ready_state(deployment.ready_state.as_deref()) {
            DeployStatus::Success => return Ok(deployment),
            DeployStatus::Failed => {
                return Err(Error::Deploy {
                    message: deployment
                        .error_message
                        .unwrap_or_else(|| "Vercel reported deployment error".to_string()),
                    terminal: true,
                });
            }
            _ => {
                debug!(
                    "Vercel deployment {} not ready (poll {}/{})",
                    deployment_id,
                    attempt + 1,
                    POLL_ATTEMPTS
                );
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    Err(Error::Deploy {
        message: format!(
            "Vercel deployment {} did not become ready within {} seconds",
            deployment_id,
            POLL_ATTEMPTS as u64 * POLL_INTERVAL.as_secs()
        ),
        terminal: false,
    })
}

/// Build the inline `{file, data}` manifest from the artifact tree.
async fn file_manifest(root: &Path) -> Result<Vec<serde_json::Value>, Error> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>, Error> {
        let mut manifest = Vec::new();
        for rel in walk::collect_files(&root) {
            let bytes = std::fs::read(root.join(&rel))?;
            manifest.push(serde_json::json!({
                "file": rel.to_string_lossy().replace('\\', "/"),
                "data": BASE64.encode(&bytes),
                "encoding": "base64",
            }));
        }
        Ok(manifest)
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}
