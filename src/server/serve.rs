//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::Error;
use crate::server::credentials::{
    create_credential_handler, delete_credential_handler, list_credentials_handler,
    update_credential_handler, validate_credential_handler,
};
use crate::server::handlers::{
    cancel_deployment_handler, create_deployment_handler, deployment_status_handler,
    health_handler, list_deployments_handler, log_summary_handler, logs_sse_handler,
    read_logs_handler, recommendations_handler, version_handler,
};
use crate::server::state::ServerState;

/// Bind address options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), Error>>, Error> {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deploy",
            post(create_deployment_handler).get(list_deployments_handler),
        )
        .route("/deploy/{id}/status", get(deployment_status_handler))
        .route("/deploy/{id}/cancel", post(cancel_deployment_handler))
        .route("/deploy/{id}/recommendations", get(recommendations_handler))
        // Logs
        .route("/deploy/{id}/logs", get(read_logs_handler))
        .route("/deploy/{id}/logs/summary", get(log_summary_handler))
        .route("/deploy/{id}/logs/sse", get(logs_sse_handler))
        // Credentials
        .route(
            "/credentials",
            post(create_credential_handler).get(list_credentials_handler),
        )
        .route(
            "/credentials/{id}",
            put(update_credential_handler).delete(delete_credential_handler),
        )
        .route("/credentials/{id}/validate", post(validate_credential_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| Error::Server(e.to_string()))
    });

    Ok(handle)
}
