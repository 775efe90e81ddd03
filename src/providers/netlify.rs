//! Netlify adapter.
//!
//! Deploys are zip uploads: the artifact directory is packaged
//! in-memory and POSTed to the site's deploys endpoint. The site is
//! reused when the credential carries a `site_id`, otherwise created
//! under the sanitized project name.

use std::io::Write;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::Error;
use crate::filesys::walk;
use crate::models::detection::ProjectType;
use crate::providers::{
    credential_field, deploy_error, optional_field, Capabilities, DeployContext, DeployOutcome,
    DeployStatus, StatusOutcome,
};

const API_BASE: &str = "https://api.netlify.com/api/v1";

pub fn capabilities() -> Capabilities {
    Capabilities {
        supports_free_tier: true,
        max_artifact_mb: 200.0,
        supported_project_types: &[ProjectType::Static, ProjectType::Spa],
        required_credential_fields: &["access_token"],
        required_config_fields: &[],
        optional_config_fields: &["site_id"],
    }
}

#[derive(Debug, Deserialize)]
struct Site {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Deploy {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    ssl_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    deploy_ssl_url: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl Deploy {
    fn best_url(&self) -> Option<String> {
        self.ssl_url
            .clone()
            .or_else(|| self.url.clone())
            .or_else(|| self.deploy_ssl_url.clone())
    }
}

/// GET the user endpoint with the bearer token; 200 means valid.
pub async fn validate(
    http: &reqwest::Client,
    credentials: &serde_json::Value,
) -> Result<bool, Error> {
    let token = credential_field(credentials, "access_token")?;
    let response = http
        .get(format!("{}/user", API_BASE))
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
    let token = credential_field(credentials, "access_token")?.to_string();

    // Reuse the credential's site when present, otherwise create one.
    let site_id = match optional_field(credentials, "site_id") {
        Some(id) => id,
        None => create_site(http, &token, &context.site_name).await?,
    };

    info!("Uploading zip artifact to Netlify site {}", site_id);
    let zip_bytes = zip_directory(artifact).await?;

    let response = http
        .post(format!("{}/sites/{}/deploys", API_BASE, site_id))
        .bearer_auth(&token)
        .header(reqwest::header::CONTENT_TYPE, "application/zip")
        .body(zip_bytes)
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

    let deploy: Deploy = response.json().await?;
    let url = deploy
        .best_url()
        .unwrap_or_else(|| format!("https://{}.netlify.app", context.site_name));

    let mut metadata = std::collections::HashMap::new();
    metadata.insert("site_id".to_string(), serde_json::json!(site_id));

    Ok(DeployOutcome {
        deployment_id: deploy.id,
        url,
        preview_url: deploy.deploy_ssl_url,
        metadata,
    })
}

pub async fn status(
    http: &reqwest::Client,
    deployment_id: &str,
    credentials: &serde_json::Value,
) -> Result<StatusOutcome, Error> {
    let token = credential_field(credentials, "access_token")?;
    let response = http
        .get(format!("{}/deploys/{}", API_BASE, deployment_id))
        .bearer_auth(token)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(deploy_error(status, body));
    }

    let deploy: Deploy = response.json().await?;
    let status = match deploy.state.as_deref() {
        Some("ready") => DeployStatus::Success,
        Some("building") | Some("processing") => DeployStatus::Building,
        Some("error") | Some("stopped") => DeployStatus::Failed,
        _ => DeployStatus::Pending,
    };

    Ok(StatusOutcome {
        status,
        url: deploy.best_url(),
        error: deploy.error_message,
        logs: None,
    })
}

pub async fn delete(
    http: &reqwest::Client,
    deployment_id: &str,
    credentials: &serde_json::Value,
) -> Result<bool, Error> {
    let token = credential_field(credentials, "access_token")?;
    let response = http
        .delete(format!("{}/deploys/{}", API_BASE, deployment_id))
        .bearer_auth(token)
        .send()
        .await?;
    Ok(response.status().is_success())
}

async fn create_site(
    http: &reqwest::Client,
    token: &str,
    site_name: &str,
) -> Result<String, Error> {
    debug!("Creating Netlify site {}", site_name);
    let response = http
        .post(format!("{}/sites", API_BASE))
        .bearer_auth(token)
        .json(&serde_json::json!({ "name": site_name }))
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

    let site: Site = response.json().await?;
    Ok(site.id)
}

/// Package a directory into an in-memory zip archive.
async fn zip_directory(root: &Path) -> Result<Vec<u8>, Error> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, Error> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut archive = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            for rel in walk::collect_files(&root) {
                let name = rel.to_string_lossy().replace('\\', "/");
                archive
                    .start_file(name, options)
                    .map_err(|e| Error::Deploy {
                        message: format!("zip packaging failed: {}", e),
                        terminal: true,
                    })?;
                let bytes = std::fs::read(root.join(&rel))?;
                archive.write_all(&bytes)?;
            }
            archive.finish().map_err(|e| Error::Deploy {
                message: format!("zip packaging failed: {}", e),
                terminal: true,
            })?;
        }
        Ok(cursor.into_inner())
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?
}
