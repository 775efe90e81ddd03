//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::server::serve::ServerOptions;
use crate::server::state::JobDefaults;
use crate::storage::StorageLayout;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Clone workspace base directory
    pub workspace_dir: PathBuf,

    /// Container daemon endpoint; None means the local socket
    pub container_host: Option<String>,

    /// Vault master key; None selects the ephemeral degraded mode
    pub encryption_key: Option<String>,

    /// Worker pool size
    pub worker_count: usize,

    /// Queue defaults applied at intake
    pub job_defaults: JobDefaults,

    /// Intake requests allowed per minute
    pub rate_limit_per_minute: u32,

    /// HTTP server configuration
    pub server: ServerOptions,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            layout: StorageLayout::new(&config.data_dir),
            workspace_dir: config.workspace_dir.clone(),
            container_host: config.container_host.clone(),
            encryption_key: config.encryption_key.clone(),
            worker_count: config.worker_count,
            job_defaults: JobDefaults {
                max_attempts: config.max_attempts,
                timeout: config.job_timeout,
            },
            rate_limit_per_minute: config.rate_limit_per_minute,
            server: ServerOptions {
                host: config.host.clone(),
                port: config.port,
            },
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
