//! Enumerates markdown files under a workspace root. See SPEC_FULL.md §4.A.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// One discovered markdown file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the workspace root, forward-slash separated.
    pub relative_path: String,
    pub project_name: String,
    /// First path segment under the project, or empty for project-root files.
    pub folder: String,
    pub filename: String,
    pub mtime: f64,
    /// Hex-encoded SHA-256 digest of the file bytes.
    pub content_hash: String,
}

pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Walk `workspace_root`, yielding a `FileInfo` for every `.md` file found
/// under a non-dot-prefixed immediate subdirectory (a project). Missing root
/// yields an empty vector. Hidden path segments within a project are skipped.
pub fn walk_workspace_root(workspace_root: &Path) -> Vec<FileInfo> {
    let mut out = Vec::new();

    let mut project_dirs: Vec<PathBuf> = match fs::read_dir(workspace_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| !is_dot_named(p))
            .collect(),
        Err(_) => return out,
    };
    project_dirs.sort();

    for project_dir in project_dirs {
        let project_name = match project_dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        walk_project(workspace_root, &project_dir, &project_name, &mut out);
    }

    out
}

fn walk_project(
    workspace_root: &Path,
    project_dir: &Path,
    project_name: &str,
    out: &mut Vec<FileInfo>,
) {
    let mut stack = vec![project_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if is_dot_named(&path) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(info) = build_file_info(workspace_root, project_dir, project_name, &path) {
                out.push(info);
            }
        }
    }
}

fn build_file_info(
    workspace_root: &Path,
    project_dir: &Path,
    project_name: &str,
    path: &Path,
) -> Option<FileInfo> {
    let relative_to_project = path.strip_prefix(project_dir).ok()?;
    let mut segments: Vec<&str> = relative_to_project
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    let filename = segments.pop()?.to_string();
    let folder = segments.first().map(|s| s.to_string()).unwrap_or_default();

    let relative_to_root = path.strip_prefix(workspace_root).ok()?;
    let relative_path = relative_to_root
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/");

    let metadata = fs::metadata(path).ok()?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let content = fs::read(path).ok()?;
    let content_hash = compute_hash(&content);

    Some(FileInfo {
        path: path.to_path_buf(),
        relative_path,
        project_name: project_name.to_string(),
        folder,
        filename,
        mtime,
        content_hash,
    })
}

fn is_dot_named(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).map(|n| n.starts_with('.')).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_dot_prefixed_projects_and_hidden_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        fs::create_dir_all(root.join("p1/tasks")).unwrap();
        fs::write(root.join("p1/status.md"), "hi").unwrap();
        fs::write(root.join("p1/tasks/001-a.md"), "hi").unwrap();
        fs::create_dir_all(root.join("p1/.hidden")).unwrap();
        fs::write(root.join("p1/.hidden/x.md"), "hi").unwrap();

        fs::create_dir_all(root.join("p2/plans")).unwrap();
        fs::write(root.join("p2/plans/p.md"), "hi").unwrap();

        fs::create_dir_all(root.join(".dotproj")).unwrap();
        fs::write(root.join(".dotproj/x.md"), "hi").unwrap();

        let mut files = walk_workspace_root(root);
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].relative_path, "p1/status.md");
        assert_eq!(files[0].folder, "");
        assert_eq!(files[1].relative_path, "p1/tasks/001-a.md");
        assert_eq!(files[1].folder, "tasks");
        assert_eq!(files[2].relative_path, "p2/plans/p.md");
    }

    #[test]
    fn missing_root_yields_empty() {
        let files = walk_workspace_root(Path::new("/nonexistent/path/does/not/exist"));
        assert!(files.is_empty());
    }

    #[test]
    fn hash_is_stable_sha256_hex() {
        let h = compute_hash(b"hello");
        assert_eq!(h, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }
}
