//! Reconciliation loop over [`crate::walker`] output, writing through
//! [`crate::header`] and [`crate::chunker`] into the [`crate::store::Store`].
//! See SPEC_FULL.md §4.E.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};
use vibe_core::types::{Chunk, Document, Project, SearchResult};

use crate::header::parse_header;
use crate::store::{DocumentUpsert, Store};
use crate::walker::{walk_workspace_root, FileInfo};

/// Result of a [`Indexer::sync`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Coordinates the filesystem→index reconciliation. All mutators
/// (`reindex`, `sync`, `index_project`, `index_file`) are mutually
/// exclusive through a process-wide writer mutex; reads do not take it.
pub struct Indexer {
    workspace_root: PathBuf,
    store: Store,
    writer_mutex: Mutex<()>,
}

impl Indexer {
    pub fn new(workspace_root: PathBuf, store: Store) -> Self {
        Self { workspace_root, store, writer_mutex: Mutex::new(()) }
    }

    pub fn initialize(&self) -> anyhow::Result<()> {
        self.store.initialize()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Clear the store and re-index every file under the workspace root.
    /// Returns the number of documents indexed.
    pub fn reindex(&self) -> anyhow::Result<usize> {
        let _guard = self.writer_mutex.lock().unwrap();
        info!(root = %self.workspace_root.display(), "starting full reindex");
        self.store.clear()?;

        let mut count = 0usize;
        for file_info in walk_workspace_root(&self.workspace_root) {
            if self.index_file_inner(&file_info).is_some() {
                count += 1;
            }
        }
        info!(count, "reindex complete");
        Ok(count)
    }

    /// Reconcile the index with the current filesystem state using mtime as
    /// a fast path and content hash to confirm real changes.
    pub fn sync(&self) -> anyhow::Result<SyncCounts> {
        let _guard = self.writer_mutex.lock().unwrap();
        let mut counts = SyncCounts::default();
        let mut seen_paths = std::collections::HashSet::new();

        for file_info in walk_workspace_root(&self.workspace_root) {
            seen_paths.insert(file_info.relative_path.clone());

            match self.store.get_document_mtime(&file_info.relative_path)? {
                None => {
                    if self.index_file_inner(&file_info).is_some() {
                        counts.added += 1;
                    }
                }
                Some(existing_mtime) => {
                    if (file_info.mtime - existing_mtime).abs() > 0.001 {
                        let existing_hash = self.store.get_document_hash(&file_info.relative_path)?;
                        if existing_hash.as_deref() != Some(file_info.content_hash.as_str()) {
                            if self.index_file_inner(&file_info).is_some() {
                                counts.updated += 1;
                            }
                        } else {
                            self.store
                                .touch_document_mtime(&file_info.relative_path, file_info.mtime)?;
                        }
                    }
                }
            }
        }

        for project in self.store.list_projects()? {
            let indexed_paths = self.store.get_indexed_paths(&project.name)?;
            for path in indexed_paths {
                if !seen_paths.contains(&path) {
                    self.store.delete_document(&path)?;
                    counts.deleted += 1;
                }
            }
        }

        if counts.added + counts.updated + counts.deleted > 0 {
            debug!(
                added = counts.added,
                updated = counts.updated,
                deleted = counts.deleted,
                "sync complete"
            );
        }
        Ok(counts)
    }

    /// Index every file belonging to a single project.
    pub fn index_project(&self, project_name: &str) -> anyhow::Result<usize> {
        let _guard = self.writer_mutex.lock().unwrap();
        let mut count = 0usize;
        for file_info in walk_workspace_root(&self.workspace_root) {
            if file_info.project_name == project_name && self.index_file_inner(&file_info).is_some()
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Index a single already-resolved file descriptor (thread-safe, takes
    /// the writer mutex). Used by the Write engine after a filesystem write.
    pub fn index_file(&self, file_info: &FileInfo) -> anyhow::Result<()> {
        let _guard = self.writer_mutex.lock().unwrap();
        self.index_file_inner(file_info);
        Ok(())
    }

    /// Build a `FileInfo` for a single relative path and index it — used by
    /// the Write engine, which knows the exact path it just touched.
    pub fn index_relative_path(&self, relative_path: &str) -> anyhow::Result<()> {
        let absolute = self.workspace_root.join(relative_path);
        let project_name = relative_path.split('/').next().unwrap_or_default().to_string();
        let segments: Vec<&str> = relative_path.split('/').collect();
        let filename = segments.last().copied().unwrap_or_default().to_string();
        let folder = if segments.len() > 2 { segments[1].to_string() } else { String::new() };

        let metadata = std::fs::metadata(&absolute)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let content = std::fs::read(&absolute)?;
        let content_hash = crate::walker::compute_hash(&content);

        let file_info = FileInfo {
            path: absolute,
            relative_path: relative_path.to_string(),
            project_name,
            folder,
            filename,
            mtime,
            content_hash,
        };

        let _guard = self.writer_mutex.lock().unwrap();
        self.index_file_inner(&file_info);
        Ok(())
    }

    /// The per-file pipeline: validate, read, parse, chunk, upsert. Errors
    /// are logged and the file is skipped — never propagated, per §4.E's
    /// failure semantics. Returns `Some(())` on success.
    fn index_file_inner(&self, file_info: &FileInfo) -> Option<()> {
        let resolved_root = self.workspace_root.canonicalize().ok()?;
        let resolved_path = match file_info.path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %file_info.relative_path, error = %e, "cannot resolve path, skipping");
                return None;
            }
        };
        if !resolved_path.starts_with(&resolved_root) {
            warn!(path = %file_info.relative_path, "skipping file outside workspace root");
            return None;
        }

        let project_path = self.workspace_root.join(&file_info.project_name);
        let project_id = match self
            .store
            .get_or_create_project(&file_info.project_name, &project_path.display().to_string())
        {
            Ok(id) => id,
            Err(e) => {
                warn!(project = %file_info.project_name, error = %e, "failed to upsert project, skipping file");
                return None;
            }
        };

        let content = match std::fs::read(&file_info.path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %file_info.relative_path, error = %e, "invalid UTF-8, skipping");
                    return None;
                }
            },
            Err(e) => {
                warn!(path = %file_info.relative_path, error = %e, "read failed, skipping");
                return None;
            }
        };

        let (metadata, _body) = parse_header(&content, &file_info.relative_path);

        let doc = DocumentUpsert {
            project_id,
            path: &file_info.relative_path,
            folder: &file_info.folder,
            filename: &file_info.filename,
            doc_type: metadata.doc_type.as_deref(),
            status: metadata.status.as_deref(),
            owner: metadata.owner.as_deref(),
            feature: metadata.feature.as_deref(),
            tags: metadata.tags.as_deref().unwrap_or(&[]),
            content_hash: &file_info.content_hash,
            mtime: file_info.mtime,
            updated: metadata.updated.as_deref(),
        };

        let document_id = match self.store.upsert_document(&doc) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %file_info.relative_path, error = %e, "failed to upsert document, skipping");
                return None;
            }
        };

        if let Err(e) = self.store.delete_chunks_for_document(document_id) {
            warn!(path = %file_info.relative_path, error = %e, "failed to clear old chunks");
            return None;
        }

        let chunks = crate::chunker::chunk_document(&content);
        if let Err(e) = self.store.insert_chunks(document_id, &chunks) {
            warn!(path = %file_info.relative_path, error = %e, "failed to insert chunks");
            return None;
        }

        Some(())
    }

    // -- read-only query passthroughs ----------------------------------------

    pub fn search(
        &self,
        query: &str,
        project: Option<&str>,
        limit: i64,
    ) -> anyhow::Result<Vec<SearchResult>> {
        self.store.search(query, project, limit)
    }

    pub fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        self.store.list_projects()
    }

    pub fn list_documents(
        &self,
        project: Option<&str>,
        folder: Option<&str>,
    ) -> anyhow::Result<Vec<Document>> {
        self.store.list_documents(project, folder)
    }

    pub fn get_document(&self, path: &str) -> anyhow::Result<Option<Document>> {
        self.store.get_document_by_path(path)
    }

    pub fn get_chunks(&self, document_id: i64) -> anyhow::Result<Vec<Chunk>> {
        self.store.get_chunks(document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use std::time::Duration;

    fn fresh_indexer() -> (tempfile::TempDir, Indexer) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("index.db"));
        let indexer = Indexer::new(dir.path().to_path_buf(), store);
        indexer.initialize().unwrap();
        (dir, indexer)
    }

    #[test]
    fn reindex_counts_all_markdown_files() {
        let (dir, indexer) = fresh_indexer();
        fs::create_dir_all(dir.path().join("demo/tasks")).unwrap();
        fs::write(dir.path().join("demo/status.md"), "# demo\n\nStatus: setup\n").unwrap();
        fs::write(
            dir.path().join("demo/tasks/001-setup.md"),
            "---\ntype: task\nstatus: done\n---\n## Objective\nfoo\n## Acceptance\nbar",
        )
        .unwrap();

        let count = indexer.reindex().unwrap();
        assert_eq!(count, 2);
        assert_eq!(indexer.list_projects().unwrap().len(), 1);
        assert_eq!(indexer.list_documents(Some("demo"), None).unwrap().len(), 2);
    }

    #[test]
    fn sync_is_idempotent_on_unchanged_tree() {
        let (dir, indexer) = fresh_indexer();
        fs::create_dir_all(dir.path().join("demo")).unwrap();
        fs::write(dir.path().join("demo/status.md"), "# demo\n").unwrap();

        indexer.sync().unwrap();
        let second = indexer.sync().unwrap();
        assert_eq!(second, SyncCounts::default());
    }

    #[test]
    fn sync_detects_deletion() {
        let (dir, indexer) = fresh_indexer();
        fs::create_dir_all(dir.path().join("demo")).unwrap();
        let file = dir.path().join("demo/status.md");
        fs::write(&file, "# demo\n").unwrap();
        indexer.sync().unwrap();

        fs::remove_file(&file).unwrap();
        let counts = indexer.sync().unwrap();
        assert_eq!(counts.deleted, 1);
        assert!(indexer.list_documents(Some("demo"), None).unwrap().is_empty());
    }

    #[test]
    fn sync_detects_content_change_via_hash() {
        let (dir, indexer) = fresh_indexer();
        fs::create_dir_all(dir.path().join("demo")).unwrap();
        let file = dir.path().join("demo/status.md");
        fs::write(&file, "# demo\n\nStatus: setup\n").unwrap();
        indexer.sync().unwrap();

        sleep(Duration::from_millis(10));
        fs::write(&file, "# demo\n\nStatus: done\n").unwrap();
        let counts = indexer.sync().unwrap();
        assert_eq!(counts.updated, 1);
    }
}
