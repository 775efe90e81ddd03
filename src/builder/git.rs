//! Repository cloning with branch fallbacks.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::Error;
use crate::filesys::Dir;
use crate::logbus::LogBus;
use crate::models::log_event::EventLevel;

/// Branches tried, in order, when the requested branch does not exist.
const FALLBACK_BRANCHES: &[&str] = &["main", "master", "develop", "dev"];

/// Shallow-clone `repo_url` into `workspace`, falling back through the
/// well-known branch names and finally the repository default.
///
/// The workspace is wiped between attempts. On total failure the error
/// carries both the original and the final underlying messages.
pub async fn clone_with_fallbacks(
    repo_url: &str,
    branch: &str,
    workspace: &Dir,
    bus: &Arc<LogBus>,
    deployment_id: &str,
) -> Result<(), Error> {
    info!("Cloning {} (branch: {})", repo_url, branch);

    let original_error = match clone_once(repo_url, Some(branch), workspace).await {
        Ok(()) => return Ok(()),
        Err(message) => message,
    };

    let mut last_error = original_error.clone();

    for fallback in FALLBACK_BRANCHES.iter().filter(|b| **b != branch) {
        bus.append(
            deployment_id,
            EventLevel::Warn,
            &format!("Branch '{}' not available, trying '{}'", branch, fallback),
            Some("clone"),
        )
        .await;

        wipe(workspace).await?;
        match clone_once(repo_url, Some(fallback), workspace).await {
            Ok(()) => {
                info!("Clone succeeded on fallback branch {}", fallback);
                return Ok(());
            }
            Err(message) => last_error = message,
        }
    }

    // Last resort: whatever the repository's default branch is.
    bus.append(
        deployment_id,
        EventLevel::Warn,
        "Falling back to the repository default branch",
        Some("clone"),
    )
    .await;
    wipe(workspace).await?;
    match clone_once(repo_url, None, workspace).await {
        Ok(()) => Ok(()),
        Err(message) => {
            last_error = message;
            Err(Error::Clone(format!(
                "could not clone {}: {} (final attempt: {})",
                repo_url, original_error, last_error
            )))
        }
    }
}

/// One `git clone --depth 1` attempt. Returns the captured stderr on failure.
async fn clone_once(
    repo_url: &str,
    branch: Option<&str>,
    workspace: &Dir,
) -> Result<(), String> {
    let mut command = Command::new("git");
    command.arg("clone").arg("--depth").arg("1");
    if let Some(branch) = branch {
        command.arg("--branch").arg(branch);
    }
    command
        .arg(repo_url)
        .arg(workspace.path())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!("git clone {:?} -> {:?}", branch, workspace.path());

    let output = command
        .output()
        .await
        .map_err(|e| format!("failed to run git: {}", e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(stderr.trim().to_string())
    }
}

/// Empty the workspace between clone attempts (git refuses to clone
/// into a non-empty directory).
async fn wipe(workspace: &Dir) -> Result<(), Error> {
    workspace.delete().await?;
    workspace.create().await?;
    Ok(())
}
