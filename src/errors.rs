//! Error types for shipwright

use thiserror::Error;

/// Main error type for the deployment service
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Credential validation unavailable: {0}")]
    ValidationUnavailable(String),

    #[error("No active credential for provider {0}")]
    MissingCredential(String),

    #[error("Clone failed: {0}")]
    Clone(String),

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Deploy failed: {message}")]
    Deploy { message: String, terminal: bool },

    #[error("Deployment timed out after {0} seconds")]
    Timeout(u64),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Container daemon unavailable: {0}")]
    ContainerUnavailable(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the job queue should re-enqueue the work item after this error.
    ///
    /// Clone failures and network-class provider errors are retryable;
    /// build failures, missing credentials, timeouts, cancellation and a
    /// missing container daemon are terminal (§7).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Clone(_) | Error::Transient(_) | Error::ValidationUnavailable(_) => true,
            Error::Deploy { terminal, .. } => !terminal,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Short machine-readable kind tag used in log events and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Http(_) => "HttpError",
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "ConflictError",
            Error::InvalidCredential(_) => "InvalidCredentialError",
            Error::ValidationUnavailable(_) => "ValidationUnavailable",
            Error::MissingCredential(_) => "MissingCredential",
            Error::Clone(_) => "CloneError",
            Error::Build(_) => "BuildError",
            Error::Deploy { .. } => "DeployError",
            Error::Timeout(_) => "TimeoutError",
            Error::Cancelled => "Cancelled",
            Error::ContainerUnavailable(_) => "ContainerUnavailable",
            Error::Transient(_) => "TransientError",
            Error::Storage(_) => "StorageError",
            Error::Config(_) => "ConfigError",
            Error::Server(_) => "ServerError",
            Error::Shutdown(_) => "ShutdownError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Message safe to surface to users: the display text without any
    /// nested source chains or secrets.
    pub fn sanitized(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
