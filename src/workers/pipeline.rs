//! The single-job deployment pipeline.
//!
//! A linear machine: clone, analyze, select provider, load credentials,
//! build, deploy. Each step emits an info start event and a terminal
//! success or error event on the log bus. Cancellation intent is
//! checked at the start of every step; the build step additionally
//! watches for it mid-flight so a running container can be killed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::Error;
use crate::filesys::Dir;
use crate::models::detection::DetectionResult;
use crate::models::deployment::DeploymentState;
use crate::models::job::JobItem;
use crate::models::log_event::EventLevel;
use crate::providers::select::{self, SelectionPolicy};
use crate::providers::{Adapter, DeployContext, DeployOutcome, ProviderKind};
use crate::store::StatePatch;
use crate::utils::sanitize_site_name;
use crate::workers::WorkerContext;

/// Cadence of the mid-build cancellation watch
const CANCEL_POLL: Duration = Duration::from_secs(1);

/// Mutable run bookkeeping that survives the pipeline future being
/// dropped (timeout path), so the worker can always clean up.
#[derive(Default)]
pub struct RunState {
    pub workspace: Option<Dir>,
    pub uploaded: Option<UploadRecord>,
}

/// Record of a completed provider upload, kept for cancellation
/// compensation. Lives only in worker memory.
pub struct UploadRecord {
    pub provider: ProviderKind,
    pub provider_deployment_id: String,
    pub credentials: serde_json::Value,
}

/// Drive one deployment through the pipeline. The caller owns the
/// terminal state transition, queue completion and cleanup.
pub async fn run(
    ctx: &WorkerContext,
    item: &JobItem,
    state: Arc<Mutex<RunState>>,
) -> Result<DeployOutcome, Error> {
    let id = item.deployment_id.as_str();

    // ── Clone ───────────────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.store
        .update_state(id, DeploymentState::Cloning, StatePatch::default())
        .await?;
    ctx.bus
        .append(
            id,
            EventLevel::Info,
            &format!("Cloning {} (branch: {})", item.payload.repo_url, item.payload.branch),
            Some("clone"),
        )
        .await;

    let workspace = match ctx
        .builder
        .clone_repository(id, &item.payload.repo_url, &item.payload.branch, &ctx.bus)
        .await
    {
        Ok(workspace) => workspace,
        Err(e) => {
            ctx.bus
                .append(id, EventLevel::Error, &e.sanitized(), Some("clone"))
                .await;
            return Err(e);
        }
    };
    state.lock().await.workspace = Some(workspace.clone());
    ctx.bus
        .append(id, EventLevel::Success, "Repository cloned", Some("clone"))
        .await;

    // ── Analyze ─────────────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.bus
        .append(id, EventLevel::Info, "Analyzing project stack", Some("analysis"))
        .await;

    let detection = analyze(item, &workspace).await?;
    ctx.store
        .update_state(
            id,
            DeploymentState::Cloning,
            StatePatch {
                detected: Some(detection.clone()),
                ..Default::default()
            },
        )
        .await?;

    let mut metadata = std::collections::HashMap::new();
    metadata.insert(
        "framework".to_string(),
        serde_json::json!(detection.framework),
    );
    metadata.insert(
        "build_command".to_string(),
        serde_json::json!(detection.build_command),
    );
    metadata.insert(
        "build_directory".to_string(),
        serde_json::json!(detection.build_directory),
    );
    ctx.bus
        .append_with_metadata(
            id,
            EventLevel::Success,
            &format!(
                "Detected {} ({:?} project)",
                detection.framework, detection.project_type
            ),
            Some("analysis"),
            metadata,
        )
        .await;

    // ── Select provider ─────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.bus
        .append(id, EventLevel::Info, "Selecting hosting provider", Some("provider-selection"))
        .await;

    let chosen = match item.payload.explicit_provider {
        Some(provider) => provider,
        None => select::choose(
            &detection,
            &SelectionPolicy {
                budget: item.payload.budget,
                preferred_providers: item.payload.preferred_providers.clone(),
                explicit_provider: None,
            },
        ),
    };
    ctx.store
        .update_state(
            id,
            DeploymentState::Cloning,
            StatePatch {
                chosen_provider: Some(chosen),
                ..Default::default()
            },
        )
        .await?;
    ctx.bus
        .append(
            id,
            EventLevel::Success,
            &format!("Selected provider: {}", chosen),
            Some("provider-selection"),
        )
        .await;

    // ── Load credentials ────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.bus
        .append(id, EventLevel::Info, "Loading provider credentials", Some("credentials"))
        .await;

    let credentials = match load_credentials(ctx, item, chosen).await {
        Ok(credentials) => credentials,
        Err(e) => {
            ctx.bus
                .append(id, EventLevel::Error, &e.sanitized(), Some("credentials"))
                .await;
            return Err(e);
        }
    };
    ctx.bus
        .append(id, EventLevel::Success, "Credentials loaded", Some("credentials"))
        .await;

    // ── Build ───────────────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.store
        .update_state(id, DeploymentState::Building, StatePatch::default())
        .await?;
    ctx.bus
        .append(id, EventLevel::Info, "Building project", Some("build"))
        .await;

    let artifact = {
        let build = ctx.builder.build(
            id,
            &workspace,
            &detection,
            &item.payload.config.env_vars,
            item.payload.config.build_command.as_deref(),
            &ctx.bus,
        );
        tokio::select! {
            result = build => match result {
                Ok(artifact) => artifact,
                Err(e) => {
                    ctx.bus
                        .append(id, EventLevel::Error, &e.sanitized(), Some("build"))
                        .await;
                    return Err(e);
                }
            },
            _ = watch_cancel(ctx, item) => {
                ctx.builder.kill_build(id).await;
                return Err(Error::Cancelled);
            }
        }
    };
    ctx.bus
        .append(id, EventLevel::Success, "Build completed", Some("build"))
        .await;

    // ── Deploy ──────────────────────────────────────────────────────
    checkpoint(ctx, item).await?;
    ctx.store
        .update_state(id, DeploymentState::Deploying, StatePatch::default())
        .await?;
    ctx.bus
        .append(
            id,
            EventLevel::Info,
            &format!("Uploading artifact to {}", chosen),
            Some("deployment"),
        )
        .await;

    let adapter = Adapter::new(chosen)?;
    let context = DeployContext {
        site_name: site_name(item),
        env_vars: item.payload.config.env_vars.clone(),
        project_type: detection.project_type,
        build_directory: detection.build_directory.clone(),
    };

    let outcome = match adapter.deploy(&artifact, &context, &credentials).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.bus
                .append(id, EventLevel::Error, &e.sanitized(), Some("deployment"))
                .await;
            return Err(e);
        }
    };

    state.lock().await.uploaded = Some(UploadRecord {
        provider: chosen,
        provider_deployment_id: outcome.deployment_id.clone(),
        credentials,
    });

    // Final checkpoint: a cancel that lands after the upload still wins;
    // the worker compensates with the adapter's delete.
    checkpoint(ctx, item).await?;

    Ok(outcome)
}

/// Err(Cancelled) when cancellation intent is recorded for this job.
async fn checkpoint(ctx: &WorkerContext, item: &JobItem) -> Result<(), Error> {
    if ctx.queue.is_cancel_requested(&item.job_id).await {
        debug!("Cancellation observed for job {}", item.job_id);
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Resolves when cancellation intent appears.
async fn watch_cancel(ctx: &WorkerContext, item: &JobItem) {
    loop {
        if ctx.queue.is_cancel_requested(&item.job_id).await {
            return;
        }
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

/// Run detection off the async runtime and apply intake overrides.
async fn analyze(item: &JobItem, workspace: &Dir) -> Result<DetectionResult, Error> {
    let path = workspace.path().to_path_buf();
    let mut detection = tokio::task::spawn_blocking(move || crate::detect::detect(&path))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    if let Some(command) = &item.payload.config.build_command {
        detection.build_command = Some(command.clone());
    }
    if let Some(directory) = &item.payload.config.build_directory {
        detection.build_directory = Some(directory.clone());
    }
    Ok(detection)
}

/// Resolve the credential for the chosen provider.
///
/// An explicit credential is used when it is active and matches the
/// provider; otherwise the first active credential for the provider.
async fn load_credentials(
    ctx: &WorkerContext,
    item: &JobItem,
    chosen: ProviderKind,
) -> Result<serde_json::Value, Error> {
    if let Some(credential_id) = &item.payload.explicit_credential_id {
        if let Ok(summary) = ctx.vault.get_summary(credential_id).await {
            if summary.is_active && summary.provider == chosen {
                return ctx.vault.get_decrypted(credential_id, None).await;
            }
        }
    }

    match ctx.vault.get_first_active(chosen).await {
        Some((_, plaintext)) => Ok(plaintext),
        None => Err(Error::MissingCredential(chosen.to_string())),
    }
}

fn site_name(item: &JobItem) -> String {
    let name = if item.payload.config.name.is_empty() {
        item.payload
            .repo_url
            .rsplit('/')
            .next()
            .unwrap_or("site")
            .trim_end_matches(".git")
    } else {
        item.payload.config.name.as_str()
    };
    sanitize_site_name(name)
}
