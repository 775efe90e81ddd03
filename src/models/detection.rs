//! Stack detection result types

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Broad category of the detected project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Static,
    Spa,
    Ssr,
    Unknown,
}

/// Node package manager, inferred from lockfiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    /// Dependency install command for the build container
    pub fn install_command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm ci",
            PackageManager::Yarn => "yarn install --frozen-lockfile",
            PackageManager::Pnpm => "pnpm install",
            PackageManager::Bun => "bun install",
        }
    }

    /// `<pm> run build` invocation
    pub fn run_build_command(&self) -> String {
        match self {
            PackageManager::Npm => "npm run build".to_string(),
            PackageManager::Yarn => "yarn run build".to_string(),
            PackageManager::Pnpm => "pnpm run build".to_string(),
            PackageManager::Bun => "bun run build".to_string(),
        }
    }
}

/// Deterministic analysis of a workspace tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "type")]
    pub project_type: ProjectType,

    /// Human-readable framework name, e.g. "Next.js" or "React (Vite)"
    pub framework: String,

    pub has_package_manifest: bool,

    pub has_build_script: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_directory: Option<String>,

    /// index.html with no manifest; deployable without a build
    pub is_pure_static: bool,

    pub package_manager: PackageManager,

    pub estimated_size_mb: f64,

    /// Names of environment variables the project references
    #[serde(default)]
    pub environment_variable_refs: BTreeSet<String>,
}
