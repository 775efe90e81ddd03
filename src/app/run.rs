//! Main application run loop.
//!
//! The entry point builds every component in dependency order and hands
//! references down; there is no runtime wiring registry.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::builder::{Builder, WorkspaceManager};
use crate::errors::Error;
use crate::logbus::LogBus;
use crate::queue::JobQueue;
use crate::server::serve::serve;
use crate::server::state::{RateLimiter, ServerState};
use crate::store::DeploymentStore;
use crate::vault::crypto::VaultCipher;
use crate::vault::CredentialVault;
use crate::workers::{deployer, WorkerContext};

/// Run the deployment service until the shutdown signal fires.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    info!("Initializing shipwright...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    match init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        Ok(()) => {}
        Err(e) => {
            error!("Failed to start: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), Error> {
    options.layout.setup().await?;

    // Vault cipher: configured master key, or the documented degraded
    // mode with an ephemeral key.
    let cipher = match &options.encryption_key {
        Some(master) => VaultCipher::from_master_key(master),
        None => {
            warn!(
                "ENCRYPTION_KEY is not set; using an ephemeral vault key. \
                 Stored credentials will not survive a restart."
            );
            VaultCipher::ephemeral()
        }
    };

    let vault = Arc::new(CredentialVault::open(options.layout.credentials_dir(), cipher).await?);
    let bus = Arc::new(LogBus::open(options.layout.logs_dir()).await?);
    let store = Arc::new(DeploymentStore::open(options.layout.deployments_dir()).await?);
    let queue = Arc::new(JobQueue::open(options.layout.queue_dir()).await?);

    let workspaces = WorkspaceManager::new(&options.workspace_dir);
    workspaces.sweep_orphans().await?;
    let builder = Arc::new(Builder::new(workspaces, options.container_host.clone()));

    let worker_context = WorkerContext {
        store: store.clone(),
        queue: queue.clone(),
        bus: bus.clone(),
        vault: vault.clone(),
        builder: builder.clone(),
    };

    info!("Starting {} deployment workers", options.worker_count);
    for worker_id in 0..options.worker_count {
        let ctx = worker_context.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            deployer::run(worker_id, ctx, shutdown_rx).await;
        });
        shutdown_manager.add_worker_handle(handle);
    }

    let server_state = Arc::new(ServerState {
        store,
        queue,
        bus,
        vault,
        job_defaults: options.job_defaults.clone(),
        rate_limiter: RateLimiter::new(options.rate_limit_per_minute),
    });

    let mut server_shutdown_rx = shutdown_tx.subscribe();
    let server_handle = serve(&options.server, server_state, async move {
        let _ = server_shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(server_handle)?;

    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: std::time::Duration,
    worker_handles: Vec<JoinHandle<()>>,
    server_handle: Option<JoinHandle<Result<(), Error>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: std::time::Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            worker_handles: Vec::new(),
            server_handle: None,
        }
    }

    fn add_worker_handle(&mut self, handle: JoinHandle<()>) {
        self.worker_handles.push(handle);
    }

    fn with_server_handle(&mut self, handle: JoinHandle<Result<(), Error>>) -> Result<(), Error> {
        if self.server_handle.is_some() {
            return Err(Error::Shutdown("server handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), Error> {
        info!("Shutting down shipwright...");

        // 1. Workers drain first so no job is left mid-flight.
        for handle in self.worker_handles.drain(..) {
            handle
                .await
                .map_err(|e| Error::Shutdown(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| Error::Shutdown(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
