//! Build-container driving over the local container daemon CLI.
//!
//! Builds run in a dedicated container with the workspace bind-mounted
//! read-write, capped at 4 GiB of memory and one CPU share. Container
//! output is streamed verbatim onto the deployment's log.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::filesys::Dir;
use crate::logbus::LogBus;
use crate::models::detection::DetectionResult;
use crate::models::log_event::EventLevel;

const MEMORY_LIMIT: &str = "4g";
const CPU_SHARE: &str = "1";

/// How many trailing output lines are carried in a BuildError message.
const ERROR_TAIL_LINES: usize = 40;

/// Node LTS image for web-framework builds.
const NODE_IMAGE: &str = "node:20-alpine";

pub fn image_for(_detection: &DetectionResult) -> &'static str {
    // All detectable stacks are Node-built; a Python image would slot
    // in here if API detection is ever added.
    NODE_IMAGE
}

pub fn image_tag(deployment_id: &str) -> String {
    format!("shipwright-{}", deployment_id)
}

pub fn build_container_name(deployment_id: &str) -> String {
    format!("shipwright-build-{}", deployment_id)
}

fn docker(container_host: Option<&str>) -> Command {
    let mut command = Command::new("docker");
    if let Some(host) = container_host {
        command.env("DOCKER_HOST", host);
    }
    command
}

/// Fail fast with `ContainerUnavailable` when no daemon answers.
pub async fn verify_daemon(container_host: Option<&str>) -> Result<(), Error> {
    let output = docker(container_host)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::ContainerUnavailable(format!("cannot run docker: {}", e)))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::ContainerUnavailable(stderr.trim().to_string()))
    }
}

/// `docker build` against the workspace, streaming progress verbatim.
pub async fn build_image(
    workspace: &Dir,
    tag: &str,
    container_host: Option<&str>,
    bus: &Arc<LogBus>,
    deployment_id: &str,
) -> Result<(), Error> {
    info!("Building image {} from Dockerfile", tag);

    let mut child = docker(container_host)
        .args(["build", "-t", tag, "."])
        .current_dir(workspace.path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ContainerUnavailable(format!("cannot run docker: {}", e)))?;

    let tail = stream_output(&mut child, bus, deployment_id).await;

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Build(e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Build(format!(
            "image build exited with {}: {}",
            status,
            tail.join("\n")
        )))
    }
}

/// Run `<install> && <build>` in a language container over the
/// bind-mounted workspace. The container is removed on exit either way.
#[allow(clippy::too_many_arguments)]
pub async fn run_build(
    workspace: &Dir,
    container_name: &str,
    image: &str,
    command: &str,
    env_vars: &HashMap<String, String>,
    container_host: Option<&str>,
    bus: &Arc<LogBus>,
    deployment_id: &str,
) -> Result<(), Error> {
    info!("Running build in {}: {}", image, command);

    let mount = format!("{}:/app", workspace.path().display());
    let mut docker_command = docker(container_host);
    docker_command.args([
        "run",
        "--rm",
        "--name",
        container_name,
        "-v",
        mount.as_str(),
        "-w",
        "/app",
        "--memory",
        MEMORY_LIMIT,
        "--cpus",
        CPU_SHARE,
    ]);
    for (key, value) in env_vars {
        docker_command.arg("-e").arg(format!("{}={}", key, value));
    }
    docker_command.args([image, "sh", "-c", command]);

    let mut child = docker_command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ContainerUnavailable(format!("cannot run docker: {}", e)))?;

    let tail = stream_output(&mut child, bus, deployment_id).await;

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Build(e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        // --rm already removed the container; report the captured output.
        Err(Error::Build(format!(
            "build exited with {}: {}",
            status,
            tail.join("\n")
        )))
    }
}

/// Best-effort kill; used by cancellation and timeout paths.
pub async fn kill(container_name: &str, container_host: Option<&str>) {
    debug!("Killing container {}", container_name);
    let result = docker(container_host)
        .args(["kill", container_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!("Failed to kill container {}: {}", container_name, e);
    }
}

/// Forward the child's stdout and stderr line-by-line onto the log bus,
/// keeping a bounded tail for error reporting.
async fn stream_output(
    child: &mut tokio::process::Child,
    bus: &Arc<LogBus>,
    deployment_id: &str,
) -> Vec<String> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut tail: Vec<String> = Vec::new();
    while let Some(line) = rx.recv().await {
        if tail.len() == ERROR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line.clone());
        bus.append(deployment_id, EventLevel::Info, &line, Some("build"))
            .await;
    }
    tail
}
