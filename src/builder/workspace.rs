//! Per-deployment workspace directories.
//!
//! Every clone lands in a uniquely-named subdirectory of the configured
//! base, so concurrent workers never collide. Workspaces are removed on
//! pipeline exit regardless of outcome; anything left behind by a crash
//! is swept at startup.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::errors::Error;
use crate::filesys::Dir;

#[derive(Clone)]
pub struct WorkspaceManager {
    base: Dir,
}

impl WorkspaceManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Dir::new(base),
        }
    }

    /// Create a fresh workspace for a deployment.
    pub async fn create(&self, deployment_id: &str) -> Result<Dir, Error> {
        self.base.create().await?;
        self.base.create_unique_subdir(deployment_id).await
    }

    /// Remove a workspace. Failure is logged, not fatal.
    pub async fn remove(&self, workspace: &Dir) {
        if let Err(e) = workspace.delete().await {
            warn!("Failed to remove workspace {:?}: {}", workspace.path(), e);
        }
    }

    /// Remove every leftover workspace from a previous process.
    ///
    /// Called once at startup before any worker runs, so everything
    /// under the base is orphaned by definition.
    pub async fn sweep_orphans(&self) -> Result<usize, Error> {
        if !self.base.exists().await {
            return Ok(0);
        }
        let orphans = self.base.list_dirs().await?;
        let count = orphans.len();
        for path in orphans {
            if let Err(e) = Dir::new(&path).delete().await {
                warn!("Failed to sweep orphaned workspace {:?}: {}", path, e);
            }
        }
        if count > 0 {
            info!("Swept {} orphaned workspaces", count);
        }
        Ok(count)
    }
}
