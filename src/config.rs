//! Centralized environment configuration.
//!
//! Every tunable the service reads from the environment is parsed once
//! at startup into a typed `Config`; components receive only the slice
//! they need.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::Error;
use crate::logs::LogLevel;

/// Service configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind host (`SHIPWRIGHT_HOST`, default 0.0.0.0)
    pub host: String,

    /// HTTP bind port (`SHIPWRIGHT_PORT`, default 3050)
    pub port: u16,

    /// Root directory for durable state (`DATA_DIR`)
    pub data_dir: PathBuf,

    /// Root directory for clone workspaces (`WORKSPACE_DIR`)
    pub workspace_dir: PathBuf,

    /// Container daemon endpoint (`CONTAINER_HOST`); empty means the
    /// platform's local socket
    pub container_host: Option<String>,

    /// Vault master key (`ENCRYPTION_KEY`, hex or base64); None means
    /// an ephemeral key is generated at startup
    pub encryption_key: Option<String>,

    /// Worker pool size (`WORKER_COUNT`, default = CPU cores, min 1)
    pub worker_count: usize,

    /// Per-job wall-clock timeout (`JOB_TIMEOUT_MS`, default 900000)
    pub job_timeout: Duration,

    /// Queue retry limit (`MAX_ATTEMPTS`, default 3)
    pub max_attempts: u32,

    /// Intake throttle (`RATE_LIMIT_PER_MINUTE`, default 60)
    pub rate_limit_per_minute: u32,

    /// Log level (`LOG_LEVEL`)
    pub log_level: LogLevel,

    /// JSON log output (`LOG_FORMAT=json`)
    pub log_json: bool,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        let worker_count = match env::var("WORKER_COUNT") {
            Ok(v) => v
                .parse::<usize>()
                .map_err(|_| Error::Config(format!("WORKER_COUNT is not a number: {v}")))?,
            Err(_) => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
        .max(1);

        let job_timeout_ms = parse_or("JOB_TIMEOUT_MS", 900_000u64)?;
        let max_attempts = parse_or("MAX_ATTEMPTS", 3u32)?;
        let rate_limit_per_minute = parse_or("RATE_LIMIT_PER_MINUTE", 60u32)?;
        let port = parse_or("SHIPWRIGHT_PORT", 3050u16)?;

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .map(|v| v.parse::<LogLevel>().map_err(Error::Config))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            host: env::var("SHIPWRIGHT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            workspace_dir: env::var("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("shipwright-workspaces")),
            container_host: env::var("CONTAINER_HOST").ok().filter(|v| !v.is_empty()),
            encryption_key: env::var("ENCRYPTION_KEY").ok().filter(|v| !v.is_empty()),
            worker_count,
            job_timeout: Duration::from_millis(job_timeout_ms),
            max_attempts,
            rate_limit_per_minute,
            log_level,
            log_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Error> {
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {v}"))),
        Err(_) => Ok(default),
    }
}
