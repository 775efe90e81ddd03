//! HTTP request handlers for the deployment surface.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::warn;

use crate::errors::Error;
use crate::logbus::{LogBus, ReadQuery, Subscription};
use crate::models::deployment::{Budget, Deployment, DeploymentConfig, DeploymentState, Environment};
use crate::models::job::JobPayload;
use crate::models::log_event::{EventLevel, LogEvent};
use crate::providers::select;
use crate::providers::ProviderKind;
use crate::server::state::{ServerState, BACKLOG_HIGH_WATER};
use crate::store::{Intake, ListQuery, StatePatch};
use crate::utils::version_info;

/// Heartbeat cadence on SSE streams
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ── Health and version ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipwright".to_string(),
        version: version.version,
    })
}

pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// ── Intake ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub environment: Environment,
    pub budget: Budget,
    #[serde(default)]
    pub preferred_providers: Vec<ProviderKind>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub config: Option<DeployRequestConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequestConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub build_directory: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub deployment_id: String,
}

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, Error> {
    if !state.rate_limiter.try_acquire() {
        return Ok((
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "rate limit exceeded, retry shortly" })),
        )
            .into_response());
    }

    validate_repo_url(&request.repo_url)?;

    let branch = request
        .branch
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "main".to_string());

    let config = request.config.unwrap_or_default();
    let config = DeploymentConfig {
        name: config.name.unwrap_or_default(),
        build_command: config.build_command,
        build_directory: config.build_directory,
        env_vars: config.env_vars,
    };

    let intake = Intake {
        repo_url: request.repo_url,
        branch,
        environment: request.environment,
        budget: request.budget,
        preferred_providers: request.preferred_providers,
        explicit_provider: request.provider,
        explicit_credential_id: request.credential_id,
        config,
    };

    let deployment = state.store.create(intake.clone()).await?;

    let payload = JobPayload {
        repo_url: intake.repo_url,
        branch: intake.branch,
        environment: intake.environment,
        budget: intake.budget,
        preferred_providers: intake.preferred_providers,
        explicit_provider: intake.explicit_provider,
        explicit_credential_id: intake.explicit_credential_id,
        config: intake.config,
    };

    let item = state
        .queue
        .enqueue(
            &deployment.id,
            payload,
            state.job_defaults.max_attempts,
            state.job_defaults.timeout,
        )
        .await?;
    state.store.set_job_handle(&deployment.id, &item.job_id).await?;

    state
        .bus
        .append(
            &deployment.id,
            EventLevel::Info,
            "Deployment accepted and queued",
            Some("intake"),
        )
        .await;

    let backlog = state.queue.backlog().await;
    if backlog > BACKLOG_HIGH_WATER {
        warn!("Queue backlog is high: {} pending jobs", backlog);
    }

    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!(DeployResponse {
            deployment_id: deployment.id,
        })),
    )
        .into_response())
}

/// `^https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$`
fn validate_repo_url(repo_url: &str) -> Result<(), Error> {
    let rest = repo_url
        .strip_prefix("https://github.com/")
        .ok_or_else(|| Error::Validation("repoUrl must be a GitHub HTTPS URL".to_string()))?;

    let mut segments = rest.split('/');
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    let valid_segment = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    };

    if !valid_segment(owner) || !valid_segment(repo) || segments.next().is_some() {
        return Err(Error::Validation(
            "repoUrl must look like https://github.com/<owner>/<repo>".to_string(),
        ));
    }
    Ok(())
}

// ── Status, list, cancel ────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub deployment_id: String,
    pub state: DeploymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected: Option<crate::models::detection::DetectionResult>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Deployment> for DeploymentStatus {
    fn from(d: Deployment) -> Self {
        Self {
            deployment_id: d.id,
            state: d.state,
            provider: d.chosen_provider,
            url: d.deployment_url,
            error: d.error_message,
            detected: d.detected,
            created_at: d.created_at,
            updated_at: d.updated_at,
            started_at: d.started_at,
            completed_at: d.completed_at,
        }
    }
}

pub async fn deployment_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let deployment = state.store.get(&id).await?;
    Ok(Json(DeploymentStatus::from(deployment)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub deployments: Vec<DeploymentStatus>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let (deployments, total) = state.store.list(&query).await;

    Json(ListResponse {
        deployments: deployments.into_iter().map(DeploymentStatus::from).collect(),
        total,
        page,
        limit,
    })
}

pub async fn cancel_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let deployment = state.store.get(&id).await?;

    if deployment.state.is_terminal() {
        return Ok(Json(serde_json::json!({
            "message": format!("deployment is already {}", serde_json::to_value(deployment.state)?.as_str().unwrap_or("finished"))
        })));
    }

    let outcome = match &deployment.job_handle {
        Some(job_id) => state.queue.cancel(job_id).await?,
        None => crate::queue::CancelOutcome::NotFound,
    };

    let message = match outcome {
        crate::queue::CancelOutcome::Removed => {
            // Never picked up by a worker; the cancel path owns the
            // terminal transition.
            state
                .store
                .update_state(&id, DeploymentState::Cancelled, StatePatch::default())
                .await?;
            state
                .bus
                .append(&id, EventLevel::Warn, "Deployment cancelled before it started", None)
                .await;
            "deployment cancelled"
        }
        crate::queue::CancelOutcome::Flagged => {
            "cancellation requested; the worker will stop at its next checkpoint"
        }
        crate::queue::CancelOutcome::NotFound => "deployment has no active job to cancel",
    };

    Ok(Json(serde_json::json!({ "message": message })))
}

// ── Recommendations ─────────────────────────────────────────────────

pub async fn recommendations_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let deployment = state.store.get(&id).await?;
    let detection = deployment.detected.ok_or_else(|| {
        Error::Validation("deployment has not been analyzed yet".to_string())
    })?;

    let ranked = select::recommend(&detection, deployment.budget, detection.estimated_size_mb);
    Ok(Json(serde_json::json!({ "recommendations": ranked })))
}

// ── Logs ────────────────────────────────────────────────────────────

pub async fn read_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<impl IntoResponse, Error> {
    state.store.get(&id).await?;
    let events = state.bus.read(&id, &query).await;
    Ok(Json(events))
}

pub async fn log_summary_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    state.store.get(&id).await?;
    Ok(Json(state.bus.summary(&id).await))
}

/// Replay-then-follow event stream with 30 s heartbeats.
pub async fn logs_sse_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Error> {
    state.store.get(&id).await?;

    let subscription = state.bus.subscribe(&id).await;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(forward_events(subscription, tx, id));

    Ok(Sse::new(ReceiverStream::new(rx)))
}

/// Pump one subscription into one SSE connection. A closed client side
/// just ends this task; the bus and other subscribers are unaffected.
async fn forward_events(
    mut subscription: Subscription,
    tx: mpsc::Sender<Result<Event, Infallible>>,
    deployment_id: String,
) {
    for event in subscription.replay.drain(..) {
        if tx.send(Ok(log_sse_event(&event))).await.is_err() {
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            received = subscription.live.recv() => match received {
                Ok(event) => {
                    if tx.send(Ok(log_sse_event(&event))).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    let marker = LogBus::gap_marker(&deployment_id, missed);
                    if tx.send(Ok(log_sse_event(&marker))).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = heartbeat.tick() => {
                let event = Event::default()
                    .event("heartbeat")
                    .data(serde_json::json!({ "timestamp": chrono::Utc::now() }).to_string());
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn log_sse_event(event: &LogEvent) -> Event {
    Event::default()
        .event("log")
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}
