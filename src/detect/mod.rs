//! Stack detection: a pure, total analysis of a workspace tree.
//!
//! The detector never fails: malformed manifests degrade to "no
//! manifest" and unknown trees fall through to the static fallback.
//! The scan is bounded to the top two directory levels.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::filesys::walk;
use crate::models::detection::{DetectionResult, PackageManager, ProjectType};

/// How deep the detector looks into the tree
const SCAN_DEPTH: usize = 2;

/// Source extensions scanned for environment variable references
const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "vue", "svelte", "mjs", "cjs"];

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    #[serde(default)]
    dependencies: HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: HashMap<String, String>,
    #[serde(default)]
    scripts: HashMap<String, String>,
}

impl PackageManifest {
    fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    fn build_script(&self) -> Option<&str> {
        self.scripts.get("build").map(|s| s.as_str())
    }
}

/// Analyze a workspace directory. Deterministic: same bytes, same result.
pub fn detect(workspace: &Path) -> DetectionResult {
    let manifest = read_manifest(workspace);
    let files = walk::shallow_file_names(workspace, SCAN_DEPTH);
    let package_manager = detect_package_manager(&files);

    let has_package_manifest = manifest.is_some();
    let has_build_script = manifest
        .as_ref()
        .and_then(|m| m.build_script())
        .is_some();

    let mut result = classify(
        workspace,
        manifest.as_ref(),
        &files,
        package_manager,
        has_build_script,
    );

    result.has_package_manifest = has_package_manifest;
    result.has_build_script = has_build_script;
    result.package_manager = package_manager;
    result.estimated_size_mb = walk::estimate_size_mb(workspace);
    result.environment_variable_refs = scan_env_refs(workspace);

    // An explicit output flag in the build script overrides the
    // framework's conventional output directory.
    if let Some(script) = manifest.as_ref().and_then(|m| m.build_script()) {
        if let Some(out_dir) = parse_output_flag(script) {
            result.build_directory = Some(out_dir);
        }
    }

    result
}

fn classify(
    workspace: &Path,
    manifest: Option<&PackageManifest>,
    files: &[String],
    package_manager: PackageManager,
    has_build_script: bool,
) -> DetectionResult {
    let build_command = has_build_script.then(|| package_manager.run_build_command());
    let has_file = |name: &str| files.iter().any(|f| f == name);
    let has_prefix = |prefix: &str| files.iter().any(|f| f.starts_with(prefix));

    if let Some(manifest) = manifest {
        // Priority-ordered rules; first match wins.
        if manifest.has_dependency("vite") || has_prefix("vite.config.") {
            let framework = if manifest.has_dependency("react") {
                "React (Vite)"
            } else if manifest.has_dependency("vue") {
                "Vue (Vite)"
            } else {
                "Vite"
            };
            return base(ProjectType::Spa, framework, build_command, Some("dist"));
        }
        if manifest.has_dependency("next") {
            return base(ProjectType::Ssr, "Next.js", build_command, Some(".next"));
        }
        if manifest.has_dependency("gatsby") {
            return base(ProjectType::Static, "Gatsby", build_command, Some("public"));
        }
        if manifest.has_dependency("remix") || manifest.has_dependency("@remix-run/react") {
            return base(ProjectType::Ssr, "Remix", build_command, Some("build"));
        }
        if manifest.has_dependency("nuxt") || manifest.has_dependency("nuxt3") {
            return base(ProjectType::Ssr, "Nuxt", build_command, Some(".nuxt/dist"));
        }
        if manifest.has_dependency("@vue/cli-service") {
            return base(ProjectType::Spa, "Vue CLI", build_command, Some("dist"));
        }
        if manifest.has_dependency("@angular/core") {
            return base(ProjectType::Spa, "Angular", build_command, Some("dist"));
        }
        if manifest.has_dependency("svelte") || manifest.has_dependency("@sveltejs/kit") {
            return base(ProjectType::Spa, "Svelte", build_command, Some("dist"));
        }
        if manifest.has_dependency("react-scripts") {
            return base(
                ProjectType::Spa,
                "Create React App",
                build_command,
                Some("build"),
            );
        }
        if manifest.has_dependency("react") {
            return base(ProjectType::Spa, "React", build_command, Some("build"));
        }
        if manifest.has_dependency("vue") {
            return base(ProjectType::Spa, "Vue", build_command, Some("dist"));
        }
        if manifest.has_dependency("@11ty/eleventy") {
            return base(
                ProjectType::Static,
                "Eleventy",
                build_command,
                Some("_site"),
            );
        }
    }

    if manifest.is_none() && (has_file("index.html") || workspace.join("index.html").is_file()) {
        let mut result = base(ProjectType::Static, "Static HTML", None, Some("."));
        result.is_pure_static = true;
        return result;
    }

    if manifest.is_some() && has_build_script {
        return base(
            ProjectType::Spa,
            "Custom build",
            build_command,
            Some("dist"),
        );
    }

    base(ProjectType::Static, "Unknown", None, Some("."))
}

fn base(
    project_type: ProjectType,
    framework: &str,
    build_command: Option<String>,
    build_directory: Option<&str>,
) -> DetectionResult {
    DetectionResult {
        project_type,
        framework: framework.to_string(),
        has_package_manifest: false,
        has_build_script: false,
        build_command,
        build_directory: build_directory.map(|s| s.to_string()),
        is_pure_static: false,
        package_manager: PackageManager::Npm,
        estimated_size_mb: 0.0,
        environment_variable_refs: BTreeSet::new(),
    }
}

/// A malformed or unreadable manifest is the same as no manifest.
fn read_manifest(workspace: &Path) -> Option<PackageManifest> {
    let raw = std::fs::read_to_string(workspace.join("package.json")).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Lockfile presence, first match wins: bun > pnpm > yarn > npm.
fn detect_package_manager(files: &[String]) -> PackageManager {
    let has = |name: &str| files.iter().any(|f| f == name);
    if has("bun.lockb") || has("bun.lock") {
        PackageManager::Bun
    } else if has("pnpm-lock.yaml") {
        PackageManager::Pnpm
    } else if has("yarn.lock") {
        PackageManager::Yarn
    } else {
        PackageManager::Npm
    }
}

/// Extract the value of an explicit output flag from a build script.
fn parse_output_flag(script: &str) -> Option<String> {
    const FLAGS: &[&str] = &["--outDir", "--out-dir", "--output", "--dist"];
    let tokens: Vec<&str> = script.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        for flag in FLAGS {
            if let Some(value) = token.strip_prefix(&format!("{}=", flag)) {
                if !value.is_empty() {
                    return Some(value.trim_matches('"').to_string());
                }
            }
            if token == flag {
                if let Some(value) = tokens.get(i + 1) {
                    if !value.starts_with('-') {
                        return Some(value.trim_matches('"').to_string());
                    }
                }
            }
        }
    }
    None
}

/// Collect `process.env.X` and `import.meta.env.X` references from
/// source files in the top levels of the tree.
fn scan_env_refs(workspace: &Path) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for entry in walkdir::WalkDir::new(workspace)
        .max_depth(SCAN_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if !is_source {
            continue;
        }
        if let Ok(contents) = std::fs::read_to_string(entry.path()) {
            collect_refs(&contents, "process.env.", &mut refs);
            collect_refs(&contents, "import.meta.env.", &mut refs);
        }
    }
    refs
}

fn collect_refs(contents: &str, prefix: &str, refs: &mut BTreeSet<String>) {
    for (start, _) in contents.match_indices(prefix) {
        let rest = &contents[start + prefix.len()..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && name.chars().next().is_some_and(|c| !c.is_ascii_digit()) {
            refs.insert(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    struct TempWorkspace(PathBuf);

    impl TempWorkspace {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("detect-test-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&root).unwrap();
            Self(root)
        }

        fn write(&self, name: &str, contents: &str) -> &Self {
            let path = self.0.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
            self
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_pure_static_detection() {
        let ws = TempWorkspace::new();
        ws.write("index.html", "<html><body>hi</body></html>");

        let result = detect(ws.path());
        assert_eq!(result.project_type, ProjectType::Static);
        assert!(result.is_pure_static);
        assert!(!result.has_package_manifest);
        assert_eq!(result.build_directory.as_deref(), Some("."));
        assert!(result.build_command.is_none());
    }

    #[test]
    fn test_vite_react_detection() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"dependencies":{"react":"^18.0.0"},"devDependencies":{"vite":"^5.0.0"},"scripts":{"build":"vite build"}}"#,
        );
        ws.write("vite.config.ts", "export default {}");

        let result = detect(ws.path());
        assert_eq!(result.project_type, ProjectType::Spa);
        assert_eq!(result.framework, "React (Vite)");
        assert_eq!(result.build_directory.as_deref(), Some("dist"));
        assert_eq!(result.build_command.as_deref(), Some("npm run build"));
    }

    #[test]
    fn test_nextjs_detection() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"dependencies":{"next":"14.0.0","react":"^18.0.0"},"scripts":{"build":"next build"}}"#,
        );

        let result = detect(ws.path());
        assert_eq!(result.project_type, ProjectType::Ssr);
        assert_eq!(result.framework, "Next.js");
        assert_eq!(result.build_directory.as_deref(), Some(".next"));
    }

    #[test]
    fn test_vite_beats_react() {
        // Vite rule outranks the generic React rule.
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"dependencies":{"react":"^18.0.0","vite":"^5.0.0"}}"#,
        );

        let result = detect(ws.path());
        assert_eq!(result.framework, "React (Vite)");
        assert_eq!(result.build_directory.as_deref(), Some("dist"));
    }

    #[test]
    fn test_cra_detection() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"dependencies":{"react":"^18.0.0","react-scripts":"5.0.0"},"scripts":{"build":"react-scripts build"}}"#,
        );

        let result = detect(ws.path());
        assert_eq!(result.framework, "Create React App");
        assert_eq!(result.build_directory.as_deref(), Some("build"));
    }

    #[test]
    fn test_malformed_manifest_degrades_to_static() {
        let ws = TempWorkspace::new();
        ws.write("package.json", "{not json at all");
        ws.write("index.html", "<html></html>");

        let result = detect(ws.path());
        assert!(!result.has_package_manifest);
        assert!(result.is_pure_static);
    }

    #[test]
    fn test_output_flag_overrides_build_directory() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"devDependencies":{"vite":"^5.0.0"},"scripts":{"build":"vite build --outDir out"}}"#,
        );

        let result = detect(ws.path());
        assert_eq!(result.build_directory.as_deref(), Some("out"));
    }

    #[test]
    fn test_output_flag_equals_form() {
        assert_eq!(
            parse_output_flag("esbuild src/app.js --out-dir=public/js"),
            Some("public/js".to_string())
        );
        assert_eq!(parse_output_flag("vite build"), None);
    }

    #[test]
    fn test_lockfile_priority() {
        let ws = TempWorkspace::new();
        ws.write("package.json", r#"{"scripts":{"build":"vite build"},"devDependencies":{"vite":"1"}}"#);
        ws.write("yarn.lock", "");
        ws.write("pnpm-lock.yaml", "");

        // pnpm outranks yarn
        let result = detect(ws.path());
        assert_eq!(result.package_manager, PackageManager::Pnpm);
        assert_eq!(result.build_command.as_deref(), Some("pnpm run build"));
    }

    #[test]
    fn test_manifest_with_build_script_fallback() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"scripts":{"build":"node build.js"}}"#,
        );

        let result = detect(ws.path());
        assert_eq!(result.project_type, ProjectType::Spa);
        assert_eq!(result.framework, "Custom build");
        assert_eq!(result.build_directory.as_deref(), Some("dist"));
    }

    #[test]
    fn test_unknown_tree_is_static() {
        let ws = TempWorkspace::new();
        ws.write("readme.txt", "nothing here");

        let result = detect(ws.path());
        assert_eq!(result.project_type, ProjectType::Static);
        assert_eq!(result.framework, "Unknown");
        assert!(!result.is_pure_static);
    }

    #[test]
    fn test_env_ref_scan() {
        let ws = TempWorkspace::new();
        ws.write("package.json", r#"{"dependencies":{"react":"1"}}"#);
        ws.write(
            "src/config.js",
            "const url = process.env.API_URL; const key = import.meta.env.VITE_KEY;",
        );

        let result = detect(ws.path());
        assert!(result.environment_variable_refs.contains("API_URL"));
        assert!(result.environment_variable_refs.contains("VITE_KEY"));
    }

    #[test]
    fn test_detect_is_deterministic() {
        let ws = TempWorkspace::new();
        ws.write(
            "package.json",
            r#"{"dependencies":{"vue":"^3.0.0"},"scripts":{"build":"vue-cli-service build"}}"#,
        );

        let first = detect(ws.path());
        let second = detect(ws.path());
        assert_eq!(first, second);
    }
}
