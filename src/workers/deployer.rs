//! Deployment worker loop: lease, run the pipeline, finalize, clean up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::errors::Error;
use crate::models::deployment::DeploymentState;
use crate::models::job::JobItem;
use crate::models::log_event::EventLevel;
use crate::providers::{Adapter, DeployOutcome};
use crate::store::StatePatch;
use crate::workers::pipeline::{self, RunState};
use crate::workers::WorkerContext;

/// Run one worker until shutdown. Each worker handles one job at a time.
pub async fn run(worker_id: usize, ctx: WorkerContext, mut shutdown_rx: broadcast::Receiver<()>) {
    let worker_name = format!("worker-{}", worker_id);
    info!("{} starting...", worker_name);

    loop {
        let Some(item) = ctx.queue.lease_next(&worker_name, &mut shutdown_rx).await else {
            info!("{} shutting down...", worker_name);
            return;
        };

        info!(
            "{} picked up deployment {} (attempt {}/{})",
            worker_name, item.deployment_id, item.attempts_made, item.max_attempts
        );
        execute(&ctx, item).await;
    }
}

/// Run one leased item to a queue-visible conclusion. Never panics the
/// worker loop; every path ends in complete or release-for-retry.
async fn execute(ctx: &WorkerContext, item: JobItem) {
    let id = item.deployment_id.clone();
    let state = Arc::new(Mutex::new(RunState::default()));
    let timeout = Duration::from_millis(item.timeout_ms);

    // The wall-clock timer is independent of any per-step client
    // timeout; expiry takes the same abort path as cancellation.
    let result = tokio::select! {
        result = pipeline::run(ctx, &item, state.clone()) => result,
        _ = tokio::time::sleep(timeout) => Err(Error::Timeout(timeout.as_secs())),
    };

    // Abort paths can leave a build container running.
    if matches!(result, Err(Error::Timeout(_)) | Err(Error::Cancelled)) {
        ctx.builder.kill_build(&id).await;
    }

    // An upload that finished provider-side before cancellation was
    // observed gets compensated with the adapter's delete.
    if matches!(result, Err(Error::Cancelled)) {
        let uploaded = state.lock().await.uploaded.take();
        if let Some(upload) = uploaded {
            if let Ok(adapter) = Adapter::new(upload.provider) {
                let deleted = adapter
                    .delete(&upload.provider_deployment_id, &upload.credentials)
                    .await
                    .unwrap_or(false);
                info!(
                    "Compensating delete for cancelled upload {}: {}",
                    upload.provider_deployment_id,
                    if deleted { "done" } else { "not removed" }
                );
            }
        }
    }

    cleanup(ctx, &id, &state).await;
    finalize(ctx, &item, result).await;
}

/// Remove the workspace whether the run succeeded or not. Failures are
/// logged, never fatal. Runs before the terminal event so the log
/// freezes in order.
async fn cleanup(ctx: &WorkerContext, id: &str, state: &Arc<Mutex<RunState>>) {
    let workspace = state.lock().await.workspace.take();
    if let Some(workspace) = workspace {
        ctx.builder.workspaces().remove(&workspace).await;
        ctx.bus
            .append(id, EventLevel::Info, "Workspace cleaned up", Some("cleanup"))
            .await;
    }
}

/// Convert the pipeline outcome into a state transition, a final log
/// event and a queue completion (or a retry release).
async fn finalize(ctx: &WorkerContext, item: &JobItem, result: Result<DeployOutcome, Error>) {
    let id = item.deployment_id.as_str();

    match result {
        Ok(outcome) => {
            if let Err(e) = ctx
                .store
                .update_state(
                    id,
                    DeploymentState::Success,
                    StatePatch {
                        deployment_url: Some(outcome.url.clone()),
                        ..Default::default()
                    },
                )
                .await
            {
                error!("Failed to record success for {}: {}", id, e);
            }

            let mut metadata = std::collections::HashMap::new();
            metadata.insert("url".to_string(), serde_json::json!(outcome.url));
            ctx.bus
                .append_with_metadata(
                    id,
                    EventLevel::Success,
                    &format!("Deployment live at {}", outcome.url),
                    Some("deployment"),
                    metadata,
                )
                .await;

            complete(ctx, item, "success", None).await;
        }

        Err(Error::Cancelled) => {
            if let Err(e) = ctx
                .store
                .update_state(id, DeploymentState::Cancelled, StatePatch::default())
                .await
            {
                error!("Failed to record cancellation for {}: {}", id, e);
            }
            ctx.bus
                .append(id, EventLevel::Warn, "Deployment cancelled", None)
                .await;
            complete(ctx, item, "cancelled", None).await;
        }

        Err(e) if e.is_retryable() && item.can_retry() => {
            warn!(
                "Deployment {} attempt {}/{} failed ({}), retrying",
                id, item.attempts_made, item.max_attempts, e
            );
            ctx.bus
                .append(
                    id,
                    EventLevel::Error,
                    &format!(
                        "Attempt {}/{} failed: {}, retrying",
                        item.attempts_made,
                        item.max_attempts,
                        e.sanitized()
                    ),
                    None,
                )
                .await;

            if let Err(reset_err) = ctx.store.reset_for_retry(id).await {
                error!("Failed to rewind {} for retry: {}", id, reset_err);
            }
            if let Err(release_err) = ctx.queue.release_for_retry(&item.job_id).await {
                error!("Failed to release job {} for retry: {}", item.job_id, release_err);
            }
        }

        Err(e) => {
            let message = e.sanitized();
            if let Err(update_err) = ctx
                .store
                .update_state(
                    id,
                    DeploymentState::Failed,
                    StatePatch {
                        error_message: Some(message.clone()),
                        ..Default::default()
                    },
                )
                .await
            {
                error!("Failed to record failure for {}: {}", id, update_err);
            }
            ctx.bus.append(id, EventLevel::Error, &message, None).await;
            complete(ctx, item, "failed", Some(message)).await;
        }
    }
}

async fn complete(ctx: &WorkerContext, item: &JobItem, outcome: &str, error: Option<String>) {
    if let Err(e) = ctx.queue.complete(&item.job_id, outcome, error).await {
        error!("Failed to complete job {}: {}", item.job_id, e);
    }
}
