//! Container builder: clone a repository, run its build in an isolated
//! container (or skip it for pure-static trees) and resolve the
//! artifact directory.

pub mod container;
pub mod git;
pub mod workspace;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::errors::Error;
use crate::filesys::Dir;
use crate::logbus::LogBus;
use crate::models::detection::DetectionResult;
use crate::models::log_event::EventLevel;

pub use workspace::WorkspaceManager;

/// Orchestrates clone + containerized build for one deployment.
pub struct Builder {
    workspaces: WorkspaceManager,
    container_host: Option<String>,
}

impl Builder {
    pub fn new(workspaces: WorkspaceManager, container_host: Option<String>) -> Self {
        Self {
            workspaces,
            container_host,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run the clone protocol into a fresh workspace.
    pub async fn clone_repository(
        &self,
        deployment_id: &str,
        repo_url: &str,
        branch: &str,
        bus: &Arc<LogBus>,
    ) -> Result<Dir, Error> {
        let workspace = self.workspaces.create(deployment_id).await?;
        match git::clone_with_fallbacks(repo_url, branch, &workspace, bus, deployment_id).await {
            Ok(()) => Ok(workspace),
            Err(e) => {
                // The workspace is useless after a failed clone.
                let _ = workspace.delete().await;
                Err(e)
            }
        }
    }

    /// Run the build protocol and resolve the artifact directory.
    ///
    /// Pure-static trees skip the container entirely. A missing output
    /// directory after the build degrades to the workspace root with a
    /// warning naming the directories that do exist.
    pub async fn build(
        &self,
        deployment_id: &str,
        workspace: &Dir,
        detection: &DetectionResult,
        env_vars: &HashMap<String, String>,
        build_command_override: Option<&str>,
        bus: &Arc<LogBus>,
    ) -> Result<PathBuf, Error> {
        let dockerfile = workspace.file("Dockerfile");

        if dockerfile.exists().await {
            container::verify_daemon(self.container_host.as_deref()).await?;
            container::build_image(
                workspace,
                &container::image_tag(deployment_id),
                self.container_host.as_deref(),
                bus,
                deployment_id,
            )
            .await?;
        } else if detection.is_pure_static {
            info!("Pure static site, skipping build for {}", deployment_id);
            bus.append(
                deployment_id,
                EventLevel::Info,
                "Static site detected, no build required",
                Some("build"),
            )
            .await;
        } else if detection.has_build_script || build_command_override.is_some() {
            container::verify_daemon(self.container_host.as_deref()).await?;

            let build_command = build_command_override
                .map(|c| c.to_string())
                .or_else(|| detection.build_command.clone())
                .unwrap_or_else(|| detection.package_manager.run_build_command());
            let install_command = detection.package_manager.install_command();
            let command = format!("{} && {}", install_command, build_command);

            container::run_build(
                workspace,
                &container::build_container_name(deployment_id),
                container::image_for(detection),
                &command,
                env_vars,
                self.container_host.as_deref(),
                bus,
                deployment_id,
            )
            .await?;
        } else {
            bus.append(
                deployment_id,
                EventLevel::Info,
                "No build script found, deploying files as-is",
                Some("build"),
            )
            .await;
        }

        self.resolve_artifact(deployment_id, workspace, detection, bus)
            .await
    }

    /// Best-effort kill of a running build container (cancellation path).
    pub async fn kill_build(&self, deployment_id: &str) {
        container::kill(
            &container::build_container_name(deployment_id),
            self.container_host.as_deref(),
        )
        .await;
    }

    async fn resolve_artifact(
        &self,
        deployment_id: &str,
        workspace: &Dir,
        detection: &DetectionResult,
        bus: &Arc<LogBus>,
    ) -> Result<PathBuf, Error> {
        let root = workspace.path().to_path_buf();

        let candidate = detection
            .build_directory
            .as_deref()
            .filter(|d| *d != ".")
            .map(|d| root.join(d));

        match candidate {
            Some(path) if path.is_dir() => Ok(path),
            Some(_) => {
                let declared = detection.build_directory.as_deref().unwrap_or_default();
                let dirs = workspace.list_dirs().await.unwrap_or_default();
                let existing = dirs
                    .iter()
                    .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                bus.append(
                    deployment_id,
                    EventLevel::Warn,
                    &format!(
                        "Expected output directory '{}' not found, using workspace root. Existing directories: [{}]",
                        declared, existing
                    ),
                    Some("build"),
                )
                .await;
                Ok(root)
            }
            None => Ok(root),
        }
    }
}
