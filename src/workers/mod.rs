//! Worker pool: leases queue items and drives the deployment pipeline.

pub mod deployer;
pub mod pipeline;

use std::sync::Arc;

use crate::builder::Builder;
use crate::logbus::LogBus;
use crate::queue::JobQueue;
use crate::store::DeploymentStore;
use crate::vault::CredentialVault;

/// Shared components a worker needs to run one deployment.
///
/// Workers are independent; they coordinate exclusively through these
/// durable stores.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<DeploymentStore>,
    pub queue: Arc<JobQueue>,
    pub bus: Arc<LogBus>,
    pub vault: Arc<CredentialVault>,
    pub builder: Arc<Builder>,
}
