//! Filesystem mutation pipeline: `init_project`, `create_task`, `log_session`,
//! `update_task_status`, `create_doc`, `create_plan`. See SPEC_FULL.md §4.G.
//!
//! Every entry point follows the same sequence: auth gate, path-safety
//! validation, filesystem write, index update, webhook emission. A webhook
//! emission failure is swallowed by the [`crate::webhooks::WebhookEngine`]
//! itself and must never surface as a write failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;
use vibe_core::error::VibeError;
use vibe_core::types::{STANDARD_SUBFOLDERS, TASK_STATUSES};

use crate::auth::AuthGate;
use crate::indexer::Indexer;
use crate::webhooks::WebhookEngine;

pub struct InitProjectResult {
    pub project: String,
    pub path: String,
    pub folders: Vec<String>,
}

pub struct CreateTaskResult {
    pub path: String,
    pub task_number: u32,
}

pub enum SessionAction {
    Created,
    Appended,
}

pub struct LogSessionResult {
    pub path: String,
    pub action: SessionAction,
}

/// Coordinates filesystem writes, reindexing, and webhook emission.
pub struct WriteEngine {
    workspace_root: PathBuf,
    indexer: Arc<Indexer>,
    auth: Arc<AuthGate>,
    webhooks: Arc<WebhookEngine>,
}

impl WriteEngine {
    pub fn new(
        workspace_root: PathBuf,
        indexer: Arc<Indexer>,
        auth: Arc<AuthGate>,
        webhooks: Arc<WebhookEngine>,
    ) -> Self {
        Self { workspace_root, indexer, auth, webhooks }
    }

    pub fn init_project(&self, name: &str) -> Result<InitProjectResult, VibeError> {
        self.auth.check_write_allowed()?;
        let project_dir = self.safe_project_path(name)?;

        if project_dir.exists() {
            return Err(VibeError::conflict(format!("project already exists: {name}")));
        }

        fs::create_dir_all(&project_dir)
            .map_err(|e| VibeError::input_invalid(format!("failed to create project directory: {e}")))?;
        for folder in STANDARD_SUBFOLDERS {
            fs::create_dir_all(project_dir.join(folder))
                .map_err(|e| VibeError::input_invalid(format!("failed to create {folder}: {e}")))?;
        }

        let status_path = project_dir.join("status.md");
        fs::write(&status_path, format!("# {name}\n\nStatus: setup\n"))
            .map_err(|e| VibeError::input_invalid(format!("failed to write status.md: {e}")))?;

        self.reindex_relative(&format!("{name}/status.md"));
        info!(project = name, "initialized project");

        let folders: Vec<String> = STANDARD_SUBFOLDERS.iter().map(|s| s.to_string()).collect();
        self.webhooks.fire_event(
            "project.initialized",
            Some(name),
            serde_json::json!({
                "project": name,
                "path": project_dir.display().to_string(),
                "folders": folders,
            }),
        );

        Ok(InitProjectResult { project: name.to_string(), path: project_dir.display().to_string(), folders })
    }

    pub fn create_task(
        &self,
        project: &str,
        title: &str,
        objective: &str,
        steps: Option<&[String]>,
        feature: Option<&str>,
    ) -> Result<CreateTaskResult, VibeError> {
        self.auth.check_write_allowed()?;
        let tasks_dir = self.safe_subfolder_path(project, "tasks")?;
        if !tasks_dir.exists() {
            return Err(VibeError::not_found(format!("project not found: {project}")));
        }

        let task_number = next_task_number(&tasks_dir);
        let slug = slugify(title);
        let filename = format!("{task_number:03}-{slug}.md");
        let file_path = tasks_dir.join(&filename);

        let mut body = String::new();
        if let Some(feature) = feature {
            body.push_str("---\n");
            body.push_str("type: task\n");
            body.push_str("status: pending\n");
            body.push_str(&format!("feature: {feature}\n"));
            body.push_str("---\n");
            body.push_str(&format!("# Task: {title}\n\n"));
        } else {
            body.push_str(&format!("# Task: {title}\n\nStatus: pending\n\n"));
        }
        body.push_str("## Objective\n");
        body.push_str(objective);
        body.push('\n');

        if let Some(steps) = steps {
            if !steps.is_empty() {
                body.push_str("\n## Steps\n");
                for (i, step) in steps.iter().enumerate() {
                    body.push_str(&format!("{}. [ ] {}\n", i + 1, step));
                }
            }
        }

        fs::write(&file_path, &body)
            .map_err(|e| VibeError::input_invalid(format!("failed to write task file: {e}")))?;

        let relative_path = format!("{project}/tasks/{filename}");
        self.reindex_relative(&relative_path);
        info!(project, task_number, "created task");

        self.webhooks.fire_event(
            "task.created",
            Some(project),
            serde_json::json!({
                "project": project,
                "path": relative_path,
                "task_number": task_number,
                "title": title,
            }),
        );

        Ok(CreateTaskResult { path: relative_path, task_number })
    }

    pub fn log_session(&self, project: &str, content: &str) -> Result<LogSessionResult, VibeError> {
        self.auth.check_write_allowed()?;
        let sessions_dir = self.safe_subfolder_path(project, "sessions")?;
        fs::create_dir_all(&sessions_dir)
            .map_err(|e| VibeError::input_invalid(format!("failed to create sessions directory: {e}")))?;

        let now = Local::now();
        let date = now.format("%Y-%m-%d").to_string();
        let file_path = sessions_dir.join(format!("{date}.md"));

        let action = if file_path.exists() {
            let time = now.format("%H:%M:%S").to_string();
            let addition = format!("\n\n---\n**{time}**\n\n{content}\n");
            let mut existing = fs::read_to_string(&file_path)
                .map_err(|e| VibeError::input_invalid(format!("failed to read session log: {e}")))?;
            existing.push_str(&addition);
            fs::write(&file_path, existing)
                .map_err(|e| VibeError::input_invalid(format!("failed to append session log: {e}")))?;
            SessionAction::Appended
        } else {
            let initial = format!("# Session Log - {date}\n\n{content}\n");
            fs::write(&file_path, initial)
                .map_err(|e| VibeError::input_invalid(format!("failed to write session log: {e}")))?;
            SessionAction::Created
        };

        let relative_path = format!("{project}/sessions/{date}.md");
        self.reindex_relative(&relative_path);

        let action_str = match action {
            SessionAction::Created => "created",
            SessionAction::Appended => "appended",
        };
        info!(project, date, action = action_str, "logged session");

        self.webhooks.fire_event(
            "session.logged",
            Some(project),
            serde_json::json!({
                "project": project,
                "path": relative_path,
                "action": action_str,
            }),
        );

        Ok(LogSessionResult { path: relative_path, action })
    }

    pub fn update_task_status(
        &self,
        project: &str,
        task_file: &str,
        new_status: &str,
    ) -> Result<(), VibeError> {
        self.auth.check_write_allowed()?;
        if !TASK_STATUSES.contains(&new_status) {
            return Err(VibeError::input_invalid(format!(
                "invalid status: {new_status} (expected one of {TASK_STATUSES:?})"
            )));
        }

        let tasks_dir = self.safe_subfolder_path(project, "tasks")?;
        let file_path = safe_join(&tasks_dir, task_file)?;
        if !file_path.exists() {
            return Err(VibeError::not_found(format!("task not found: {task_file}")));
        }

        let content = fs::read_to_string(&file_path)
            .map_err(|e| VibeError::input_invalid(format!("failed to read task file: {e}")))?;
        let updated = replace_or_insert_status(&content, new_status);
        fs::write(&file_path, updated)
            .map_err(|e| VibeError::input_invalid(format!("failed to write task file: {e}")))?;

        let relative_path = format!("{project}/tasks/{task_file}");
        self.reindex_relative(&relative_path);
        info!(project, task_file, new_status, "updated task status");

        self.webhooks.fire_event(
            "task.updated",
            Some(project),
            serde_json::json!({
                "project": project,
                "path": relative_path,
                "status": new_status,
            }),
        );

        Ok(())
    }

    pub fn create_doc(
        &self,
        project: &str,
        folder: &str,
        filename: &str,
        content: &str,
    ) -> Result<String, VibeError> {
        self.auth.check_write_allowed()?;
        let folder_dir = self.safe_subfolder_path(project, folder)?;
        fs::create_dir_all(&folder_dir)
            .map_err(|e| VibeError::input_invalid(format!("failed to create folder: {e}")))?;

        let filename = if filename.ends_with(".md") { filename.to_string() } else { format!("{filename}.md") };
        let file_path = safe_join(&folder_dir, &filename)?;
        if file_path.exists() {
            return Err(VibeError::conflict(format!("document already exists: {filename}")));
        }

        fs::write(&file_path, content)
            .map_err(|e| VibeError::input_invalid(format!("failed to write document: {e}")))?;

        let relative_path = format!("{project}/{folder}/{filename}");
        self.reindex_relative(&relative_path);
        info!(project, folder, filename, "created document");

        self.webhooks.fire_event(
            "doc.created",
            Some(project),
            serde_json::json!({ "project": project, "path": relative_path }),
        );

        Ok(relative_path)
    }

    pub fn create_plan(
        &self,
        project: &str,
        content: &str,
        filename: Option<&str>,
    ) -> Result<String, VibeError> {
        self.auth.check_write_allowed()?;
        let plans_dir = self.safe_subfolder_path(project, "plans")?;
        fs::create_dir_all(&plans_dir)
            .map_err(|e| VibeError::input_invalid(format!("failed to create plans directory: {e}")))?;

        let filename = filename.unwrap_or("execution-plan.md");
        let file_path = safe_join(&plans_dir, filename)?;
        let existed = file_path.exists();

        fs::write(&file_path, content)
            .map_err(|e| VibeError::input_invalid(format!("failed to write plan: {e}")))?;

        let relative_path = format!("{project}/plans/{filename}");
        self.reindex_relative(&relative_path);

        let event_type = if existed { "plan.updated" } else { "plan.created" };
        info!(project, filename, event_type, "wrote plan");

        self.webhooks.fire_event(
            event_type,
            Some(project),
            serde_json::json!({ "project": project, "path": relative_path }),
        );

        Ok(relative_path)
    }

    pub fn reindex(&self) -> Result<usize, VibeError> {
        self.auth.check_write_allowed()?;
        let count = self.indexer.reindex().map_err(|e| VibeError::input_invalid(e.to_string()))?;
        self.webhooks.fire_event("index.reindexed", None, serde_json::json!({ "documents": count }));
        Ok(count)
    }

    fn reindex_relative(&self, relative_path: &str) {
        if let Err(e) = self.indexer.index_relative_path(relative_path) {
            tracing::warn!(path = relative_path, error = %e, "failed to index newly written file");
        }
    }

    /// Validate and resolve `<root>/<name>`, rejecting any name containing a
    /// path separator or `..` segment before the name ever reaches the
    /// filesystem.
    fn safe_project_path(&self, name: &str) -> Result<PathBuf, VibeError> {
        validate_segment(name)?;
        Ok(self.workspace_root.join(name))
    }

    fn safe_subfolder_path(&self, project: &str, folder: &str) -> Result<PathBuf, VibeError> {
        validate_segment(project)?;
        validate_segment(folder)?;
        Ok(self.workspace_root.join(project).join(folder))
    }
}

/// Reject empty names, `.`/`..`, and any name containing a path separator —
/// the only names that may legitimately appear as a single project or
/// folder segment.
fn validate_segment(name: &str) -> Result<(), VibeError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(VibeError::input_invalid(format!("invalid name: {name}")));
    }
    Ok(())
}

/// Join `base` with a possibly multi-segment relative path, rejecting any
/// result that escapes `base` via `..` or a symlink.
fn safe_join(base: &Path, relative: &str) -> Result<PathBuf, VibeError> {
    if relative.is_empty() {
        return Err(VibeError::input_invalid("path must not be empty"));
    }
    let candidate = base.join(relative);
    let base_resolved = base
        .canonicalize()
        .map_err(|e| VibeError::input_invalid(format!("invalid base path: {e}")))?;
    let parent = candidate.parent().unwrap_or(&candidate);
    let parent_resolved = parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf());
    if !parent_resolved.starts_with(&base_resolved) {
        return Err(VibeError::input_invalid(format!("path escapes project boundary: {relative}")));
    }
    Ok(candidate)
}

fn task_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3})-.*\.md$").unwrap())
}

fn next_task_number(tasks_dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(tasks_dir) else { return 1 };
    let max = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().ok().is_some_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| task_number_pattern().captures(&name).and_then(|c| c[1].parse::<u32>().ok()))
        .max();
    max.map(|n| n + 1).unwrap_or(1)
}

fn slug_invalid_char(c: char) -> bool {
    !(c.is_alphanumeric() || c.is_whitespace() || c == '-' || c == '_')
}

fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let filtered: String = lowered.chars().filter(|c| !slug_invalid_char(*c)).collect();
    let mut slug = String::with_capacity(filtered.len());
    let mut last_was_sep = false;
    for c in filtered.chars() {
        if c.is_whitespace() || c == '-' {
            if !last_was_sep {
                slug.push('-');
                last_was_sep = true;
            }
        } else {
            slug.push(c);
            last_was_sep = false;
        }
    }
    slug.trim_matches('-').to_string()
}

fn status_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^Status:.*$").unwrap())
}

fn heading_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#.*$").unwrap())
}

fn replace_or_insert_status(content: &str, new_status: &str) -> String {
    let replacement = format!("Status: {new_status}");
    if status_line_pattern().is_match(content) {
        return status_line_pattern().replace(content, replacement.as_str()).to_string();
    }

    if let Some(m) = heading_line_pattern().find(content) {
        let insert_at = m.end();
        let mut out = String::with_capacity(content.len() + replacement.len() + 1);
        out.push_str(&content[..insert_at]);
        out.push('\n');
        out.push_str(&replacement);
        out.push_str(&content[insert_at..]);
        return out;
    }

    format!("{replacement}\n{content}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc;

    fn fresh_engine() -> (tempfile::TempDir, WriteEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("index.db")));
        store.initialize().unwrap();
        let indexer = Arc::new(Indexer::new(
            dir.path().to_path_buf(),
            Store::new(dir.path().join("index.db")),
        ));
        let auth = Arc::new(AuthGate::new(None, false));
        let webhooks = Arc::new(WebhookEngine::new(store, false));
        let engine = WriteEngine::new(dir.path().to_path_buf(), indexer, auth, webhooks);
        (dir, engine)
    }

    #[test]
    fn init_project_creates_standard_layout() {
        let (dir, engine) = fresh_engine();
        let result = engine.init_project("foo").unwrap();
        assert_eq!(result.folders.len(), 8);
        for folder in STANDARD_SUBFOLDERS {
            assert!(dir.path().join("foo").join(folder).is_dir());
        }
        let status = fs::read_to_string(dir.path().join("foo/status.md")).unwrap();
        assert_eq!(status, "# foo\n\nStatus: setup\n");
    }

    #[test]
    fn init_project_rejects_traversal_name() {
        let (_dir, engine) = fresh_engine();
        assert!(engine.init_project("../x").is_err());
    }

    #[test]
    fn init_project_fails_if_exists() {
        let (_dir, engine) = fresh_engine();
        engine.init_project("foo").unwrap();
        assert!(engine.init_project("foo").is_err());
    }

    #[test]
    fn create_task_numbers_sequentially_and_slugifies() {
        let (dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        let first = engine.create_task("demo", "Fix Bug #1 (hot!)", "squash it", None, None).unwrap();
        assert_eq!(first.task_number, 1);
        assert!(dir.path().join("demo/tasks/001-fix-bug-1-hot.md").is_file());

        let second = engine.create_task("demo", "Second task", "do it", None, None).unwrap();
        assert_eq!(second.task_number, 2);
        assert!(second.path.contains("002-"));
    }

    #[test]
    fn create_task_with_feature_uses_header_block() {
        let (dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        let result = engine.create_task("demo", "Add auth", "wire it up", None, Some("auth")).unwrap();
        let content = fs::read_to_string(dir.path().join(&result.path)).unwrap();
        assert!(content.starts_with("---\ntype: task\nstatus: pending\nfeature: auth\n---\n"));
    }

    #[test]
    fn log_session_creates_then_appends() {
        let (_dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        let first = engine.log_session("demo", "started work").unwrap();
        assert!(matches!(first.action, SessionAction::Created));
        let second = engine.log_session("demo", "more work").unwrap();
        assert!(matches!(second.action, SessionAction::Appended));

        let content = fs::read_to_string(
            PathBuf::from(env_root(&engine)).join(&second.path),
        )
        .unwrap();
        assert!(content.contains("---"));
        assert_eq!(content.matches("started work").count(), 1);
        assert!(content.contains("more work"));
    }

    fn env_root(engine: &WriteEngine) -> PathBuf {
        engine.workspace_root.clone()
    }

    #[test]
    fn update_task_status_replaces_single_line() {
        let (dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        engine.create_task("demo", "X", "obj", None, None).unwrap();
        engine.update_task_status("demo", "001-x.md", "in-progress").unwrap();
        engine.update_task_status("demo", "001-x.md", "blocked").unwrap();

        let content = fs::read_to_string(dir.path().join("demo/tasks/001-x.md")).unwrap();
        let status_lines: Vec<&str> =
            content.lines().filter(|l| l.starts_with("Status:")).collect();
        assert_eq!(status_lines, vec!["Status: blocked"]);
    }

    #[test]
    fn update_task_status_rejects_invalid_value() {
        let (_dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        engine.create_task("demo", "X", "obj", None, None).unwrap();
        assert!(engine.update_task_status("demo", "001-x.md", "nonsense").is_err());
    }

    #[test]
    fn create_doc_rejects_existing_and_traversal() {
        let (_dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        engine.create_doc("demo", "references", "x", "hello").unwrap();
        assert!(engine.create_doc("demo", "references", "x", "hello").is_err());
        assert!(engine.create_doc("demo", "..", "x", "").is_err());
    }

    #[test]
    fn create_plan_creates_then_overwrites() {
        let (dir, engine) = fresh_engine();
        engine.init_project("demo").unwrap();
        engine.create_plan("demo", "v1", None).unwrap();
        engine.create_plan("demo", "v2", None).unwrap();
        let content = fs::read_to_string(dir.path().join("demo/plans/execution-plan.md")).unwrap();
        assert_eq!(content, "v2");
    }

    #[test]
    fn slugify_matches_expected_conventions() {
        assert_eq!(slugify("Fix Bug #1 (hot!)"), "fix-bug-1-hot");
        assert_eq!(slugify("  leading and trailing  "), "leading-and-trailing");
    }
}
