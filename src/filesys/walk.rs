//! File-tree helpers shared by the stack detector, the size estimator
//! and the provider packagers.
//!
//! All functions here are synchronous and pure with respect to the tree
//! contents; callers that need async wrap them in `spawn_blocking` or
//! accept the small bounded scan cost inline.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directories never counted as project content: dependency trees,
/// VCS metadata and known build outputs.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "_site",
    "public",
    ".cache",
    "coverage",
];

fn is_excluded(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Estimated content size of a tree in megabytes, excluding dependency,
/// VCS and build-output directories.
pub fn estimate_size_mb(root: &Path) -> f64 {
    let mut total: u64 = 0;
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (total as f64) / (1024.0 * 1024.0)
}

/// Collect every file under `root` (relative paths, forward slashes),
/// excluding dependency and VCS directories. Used to package artifacts.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0
                && e.file_type().is_dir()
                && matches!(e.file_name().to_str(), Some("node_modules") | Some(".git")))
        })
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }
    files.sort();
    files
}

/// File names present in the top `depth` levels of the tree.
/// The detector only ever looks this deep.
pub fn shallow_file_names(root: &Path, depth: usize) -> Vec<String> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root)
        .max_depth(depth)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_tree() -> PathBuf {
        let root = std::env::temp_dir().join(format!("walk-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("index.html"), "<html></html>").unwrap();
        fs::write(root.join("src/app.js"), "console.log(1)").unwrap();
        fs::write(root.join("node_modules/pkg/big.js"), vec![b'x'; 4096]).unwrap();
        root
    }

    #[test]
    fn test_estimate_excludes_node_modules() {
        let root = temp_tree();
        let mb = estimate_size_mb(&root);
        // node_modules content (4 KiB) must not be counted
        assert!(mb < 0.001);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_collect_files_relative() {
        let root = temp_tree();
        let files = collect_files(&root);
        assert!(files.contains(&PathBuf::from("index.html")));
        assert!(files.contains(&PathBuf::from("src/app.js")));
        assert!(!files.iter().any(|p| p.starts_with("node_modules")));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_shallow_file_names_depth_bound() {
        let root = temp_tree();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/deep.txt"), "x").unwrap();
        let names = shallow_file_names(&root, 2);
        assert!(names.contains(&"index.html".to_string()));
        assert!(!names.contains(&"deep.txt".to_string()));
        fs::remove_dir_all(&root).unwrap();
    }
}
