//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;

/// On-disk layout for all durable state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Deployment records, one JSON file per id
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Encrypted credentials, one JSON file per id
    pub fn credentials_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("credentials"))
    }

    /// Per-deployment append logs
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Queue items and completed-job history
    pub fn queue_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("queue"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::Error> {
        self.deployments_dir().create().await?;
        self.credentials_dir().create().await?;
        self.logs_dir().create().await?;
        self.queue_dir().create().await?;
        Ok(())
    }
}
