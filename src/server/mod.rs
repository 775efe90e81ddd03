//! REST surface: a thin adapter translating HTTP to core operations.

pub mod credentials;
pub mod handlers;
pub mod serve;
pub mod state;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::errors::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidCredential(_) | Error::MissingCredential(_) => StatusCode::BAD_REQUEST,
            Error::ValidationUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.sanitized() }));
        (status, body).into_response()
    }
}
