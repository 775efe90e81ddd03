//! Credential vault HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::errors::Error;
use crate::providers::ProviderKind;
use crate::server::state::ServerState;
use crate::vault::UpdateRequest;

/// Fallback owner until authentication fronts this service.
const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
    #[serde(default)]
    pub owner: Option<String>,
    pub provider: ProviderKind,
    pub name: String,
    pub credentials: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub credentials: Option<serde_json::Value>,
}

pub async fn create_credential_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateCredentialRequest>,
) -> Result<impl IntoResponse, Error> {
    if request.name.is_empty() {
        return Err(Error::Validation("credential name must not be empty".to_string()));
    }

    let owner = request.owner.as_deref().unwrap_or(DEFAULT_OWNER);
    let summary = state
        .vault
        .create(owner, request.provider, &request.name, request.credentials)
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(summary)))
}

pub async fn list_credentials_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<OwnerQuery>,
) -> impl IntoResponse {
    let owner = query.owner.as_deref().unwrap_or(DEFAULT_OWNER).to_string();
    Json(state.vault.list(&owner).await)
}

pub async fn update_credential_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCredentialRequest>,
) -> Result<impl IntoResponse, Error> {
    let owner = request.owner.as_deref().unwrap_or(DEFAULT_OWNER).to_string();
    let summary = state
        .vault
        .update(
            &id,
            &owner,
            UpdateRequest {
                name: request.name,
                is_active: request.is_active,
                new_credentials: request.credentials,
            },
        )
        .await?;
    Ok(Json(summary))
}

pub async fn delete_credential_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<impl IntoResponse, Error> {
    let owner = query.owner.as_deref().unwrap_or(DEFAULT_OWNER).to_string();
    state.vault.delete(&id, &owner).await?;
    Ok(Json(serde_json::json!({ "message": "credential deleted" })))
}

pub async fn validate_credential_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let outcome = state.vault.validate(&id).await?;
    Ok(Json(outcome))
}
