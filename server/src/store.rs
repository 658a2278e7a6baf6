//! Embedded transactional store: projects, documents, chunks, an FTS5 shadow
//! over chunk text, webhook subscriptions, and the delivery audit log. See
//! SPEC_FULL.md §4.D.
//!
//! Every call opens its own `rusqlite::Connection` — SQLite's WAL journal
//! mode lets readers proceed without blocking on a writer. Writes go through
//! `write_lock`, an in-process mutex serializing this store's own writers
//! (a simplification of the source's thread-local-connection pattern; see
//! DESIGN.md).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use vibe_core::types::{Chunk, DeliveryLogEntry, Document, Project, SearchResult, WebhookSubscription};

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    path        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);

CREATE TABLE IF NOT EXISTS documents (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id   INTEGER NOT NULL,
    path         TEXT NOT NULL UNIQUE,
    folder       TEXT NOT NULL,
    filename     TEXT NOT NULL,
    type         TEXT,
    status       TEXT,
    owner        TEXT,
    feature      TEXT,
    tags         TEXT,
    content_hash TEXT NOT NULL,
    mtime        REAL NOT NULL,
    updated      TEXT,
    indexed_at   TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id);
CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder);
CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(type);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_mtime ON documents(mtime DESC);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);
CREATE INDEX IF NOT EXISTS idx_documents_project_folder ON documents(project_id, folder);

CREATE TABLE IF NOT EXISTS chunks (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id         INTEGER NOT NULL,
    heading             TEXT,
    heading_level       INTEGER DEFAULT 0,
    content             TEXT NOT NULL,
    chunk_order         INTEGER NOT NULL,
    char_offset         INTEGER NOT NULL,
    is_priority_heading INTEGER DEFAULT 0,
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_document_order ON chunks(document_id, chunk_order);
CREATE INDEX IF NOT EXISTS idx_chunks_heading ON chunks(heading);
CREATE INDEX IF NOT EXISTS idx_chunks_priority ON chunks(is_priority_heading) WHERE is_priority_heading = 1;

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    heading,
    content='chunks',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content, heading) VALUES (new.id, new.content, new.heading);
END;
CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, heading) VALUES ('delete', old.id, old.content, old.heading);
END;
CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, heading) VALUES ('delete', old.id, old.content, old.heading);
    INSERT INTO chunks_fts(rowid, content, heading) VALUES (new.id, new.content, new.heading);
END;

CREATE TABLE IF NOT EXISTS webhook_subscriptions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    url          TEXT NOT NULL,
    secret       TEXT NOT NULL,
    event_types  TEXT NOT NULL,
    project      TEXT,
    description  TEXT,
    active       INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_webhooks_project ON webhook_subscriptions(project);

CREATE TABLE IF NOT EXISTS delivery_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    subscription_id  INTEGER NOT NULL,
    event_type       TEXT NOT NULL,
    event_id         TEXT NOT NULL,
    payload          TEXT NOT NULL,
    status_code      INTEGER,
    success          INTEGER NOT NULL,
    error_message    TEXT,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (subscription_id) REFERENCES webhook_subscriptions(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_delivery_log_subscription ON delivery_log(subscription_id);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT
);
INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '1.0');
"#;

/// Fields needed to upsert a document; mirrors [`vibe_core::types::Document`]
/// minus the fields the store itself assigns (`id`, `indexed_at`).
pub struct DocumentUpsert<'a> {
    pub project_id: i64,
    pub path: &'a str,
    pub folder: &'a str,
    pub filename: &'a str,
    pub doc_type: Option<&'a str>,
    pub status: Option<&'a str>,
    pub owner: Option<&'a str>,
    pub feature: Option<&'a str>,
    pub tags: &'a [String],
    pub content_hash: &'a str,
    pub mtime: f64,
    pub updated: Option<&'a str>,
}

pub struct Store {
    db_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), write_lock: Mutex::new(()) }
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening database at {}", self.db_path.display()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    pub fn initialize(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Delete all rows and rebuild the FTS shadow from scratch.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute_batch(
            "DELETE FROM chunks; DELETE FROM documents; DELETE FROM projects;",
        )?;
        conn.execute("INSERT INTO chunks_fts(chunks_fts) VALUES('rebuild')", [])?;
        Ok(())
    }

    pub fn rebuild_fts(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute("INSERT INTO chunks_fts(chunks_fts) VALUES('rebuild')", [])?;
        Ok(())
    }

    // -- projects -----------------------------------------------------------

    pub fn get_or_create_project(&self, name: &str, path: &str) -> Result<i64> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM projects WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?;
        if let Some(id) = existing {
            conn.execute(
                "UPDATE projects SET path = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![path, id],
            )?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO projects (name, path) VALUES (?1, ?2)",
                params![name, path],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }

    pub fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let conn = self.open()?;
        conn.query_row("SELECT * FROM projects WHERE name = ?1", params![name], row_to_project)
            .optional()
            .context("querying project")
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], row_to_project)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing projects")
    }

    // -- documents ------------------------------------------------------------

    pub fn get_document_by_path(&self, path: &str) -> Result<Option<Document>> {
        let conn = self.open()?;
        conn.query_row("SELECT * FROM documents WHERE path = ?1", params![path], row_to_document)
            .optional()
            .context("querying document by path")
    }

    pub fn get_document_hash(&self, path: &str) -> Result<Option<String>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT content_hash FROM documents WHERE path = ?1",
            params![path],
            |r| r.get(0),
        )
        .optional()
        .context("querying document hash")
    }

    pub fn get_document_mtime(&self, path: &str) -> Result<Option<f64>> {
        let conn = self.open()?;
        conn.query_row("SELECT mtime FROM documents WHERE path = ?1", params![path], |r| r.get(0))
            .optional()
            .context("querying document mtime")
    }

    pub fn upsert_document(&self, doc: &DocumentUpsert) -> Result<i64> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        let tags_json = serde_json::to_string(doc.tags)?;
        conn.execute(
            "INSERT INTO documents
                (project_id, path, folder, filename, type, status, owner, feature, tags, content_hash, mtime, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(path) DO UPDATE SET
                project_id = excluded.project_id,
                folder = excluded.folder,
                filename = excluded.filename,
                type = excluded.type,
                status = excluded.status,
                owner = excluded.owner,
                feature = excluded.feature,
                tags = excluded.tags,
                content_hash = excluded.content_hash,
                mtime = excluded.mtime,
                updated = excluded.updated,
                indexed_at = datetime('now')",
            params![
                doc.project_id,
                doc.path,
                doc.folder,
                doc.filename,
                doc.doc_type,
                doc.status,
                doc.owner,
                doc.feature,
                tags_json,
                doc.content_hash,
                doc.mtime,
                doc.updated,
            ],
        )?;
        conn.query_row("SELECT id FROM documents WHERE path = ?1", params![doc.path], |r| r.get(0))
            .context("fetching upserted document id")
    }

    /// Update only `mtime` for a path, leaving content and chunks untouched —
    /// used when a file's mtime changed but its content hash did not.
    pub fn touch_document_mtime(&self, path: &str, mtime: f64) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute("UPDATE documents SET mtime = ?1 WHERE path = ?2", params![mtime, path])?;
        Ok(())
    }

    pub fn delete_document(&self, path: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub fn list_documents(
        &self,
        project_name: Option<&str>,
        folder: Option<&str>,
    ) -> Result<Vec<Document>> {
        let conn = self.open()?;
        let mut query = String::from(
            "SELECT d.* FROM documents d JOIN projects p ON d.project_id = p.id WHERE 1=1",
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(name) = project_name {
            query.push_str(" AND p.name = ?");
            bound.push(Box::new(name.to_string()));
        }
        if let Some(f) = folder {
            query.push_str(" AND d.folder = ?");
            bound.push(Box::new(f.to_string()));
        }
        query.push_str(" ORDER BY d.path");

        let mut stmt = conn.prepare(&query)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), row_to_document)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing documents")
    }

    pub fn get_indexed_paths(&self, project_name: &str) -> Result<HashSet<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT d.path FROM documents d JOIN projects p ON d.project_id = p.id WHERE p.name = ?1",
        )?;
        let rows = stmt.query_map(params![project_name], |r| r.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>().context("listing indexed paths")
    }

    // -- chunks ---------------------------------------------------------------

    pub fn delete_chunks_for_document(&self, document_id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        Ok(())
    }

    pub fn insert_chunks(&self, document_id: i64, chunks: &[crate::chunker::Chunk]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (document_id, heading, heading_level, content, chunk_order, char_offset, is_priority_heading)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    document_id,
                    chunk.heading,
                    chunk.heading_level,
                    chunk.content,
                    chunk.chunk_order,
                    chunk.char_offset,
                    chunk.is_priority_heading as i32,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_order")?;
        let rows = stmt.query_map(params![document_id], row_to_chunk)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing chunks")
    }

    // -- search -----------------------------------------------------------

    pub fn search(
        &self,
        query: &str,
        project_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.open()?;
        let mut sql = String::from(
            "SELECT
                c.id as chunk_id,
                c.document_id,
                p.name as project_name,
                d.path as document_path,
                d.folder,
                c.heading,
                snippet(chunks_fts, 0, '>>>', '<<<', '...', 64) as snippet,
                bm25(chunks_fts) as bm25_score,
                CASE
                    WHEN d.path LIKE '%/status.md' OR d.path = 'status.md' THEN 3.0
                    WHEN d.folder = 'tasks' THEN 2.0
                    WHEN d.folder = 'plans' THEN 1.8
                    WHEN d.folder = 'sessions' THEN 1.5
                    WHEN d.folder = 'changelog' THEN 1.2
                    WHEN d.folder = 'reports' THEN 1.0
                    WHEN d.folder = 'references' THEN 0.8
                    WHEN d.folder = 'scratch' THEN 0.5
                    ELSE 0.3
                END as type_boost,
                CASE
                    WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 1 THEN 2.0
                    WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 7 THEN 1.5
                    WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 30 THEN 1.2
                    WHEN julianday('now') - julianday(COALESCE(d.updated, datetime(d.mtime, 'unixepoch'))) <= 90 THEN 1.0
                    ELSE 0.8
                END as recency_boost,
                CASE
                    WHEN c.is_priority_heading = 1 THEN 2.5
                    WHEN c.heading LIKE '%Objective%' THEN 1.5
                    WHEN c.heading LIKE '%Acceptance%' THEN 1.5
                    ELSE 1.0
                END as heading_boost,
                CASE
                    WHEN d.status = 'in-progress' THEN 2.0
                    WHEN d.status = 'blocked' THEN 1.8
                    WHEN d.status = 'pending' THEN 1.2
                    WHEN d.status = 'done' THEN 0.6
                    ELSE 1.0
                END as status_boost
            FROM chunks_fts
            JOIN chunks c ON chunks_fts.rowid = c.id
            JOIN documents d ON c.document_id = d.id
            JOIN projects p ON d.project_id = p.id
            WHERE chunks_fts MATCH ?1",
        );

        if project_name.is_some() {
            sql.push_str(" AND p.name = ?2");
        }
        sql.push_str(
            " ORDER BY (bm25(chunks_fts) * type_boost * recency_boost * heading_boost * status_boost) DESC LIMIT ",
        );
        sql.push_str(&limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(name) = project_name {
            stmt.query_map(params![query, name], row_to_search_result)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![query], row_to_search_result)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    // -- webhooks -----------------------------------------------------------

    pub fn create_webhook_subscription(
        &self,
        url: &str,
        secret: &str,
        event_types: &[String],
        project: Option<&str>,
        description: Option<&str>,
    ) -> Result<i64> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        let event_types_json = serde_json::to_string(event_types)?;
        conn.execute(
            "INSERT INTO webhook_subscriptions (url, secret, event_types, project, description, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![url, secret, event_types_json, project, description],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_webhook_subscription(&self, id: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM webhook_subscriptions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn list_webhook_subscriptions(
        &self,
        project: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<WebhookSubscription>> {
        let conn = self.open()?;
        let mut sql = String::from("SELECT * FROM webhook_subscriptions WHERE 1=1");
        if active_only {
            sql.push_str(" AND active = 1");
        }
        if project.is_some() {
            sql.push_str(" AND (project IS NULL OR project = ?1)");
        }
        sql.push_str(" ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(p) = project {
            stmt.query_map(params![p], row_to_subscription)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], row_to_subscription)?.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    pub fn get_active_subscriptions_for_event(
        &self,
        event_type: &str,
        project: Option<&str>,
    ) -> Result<Vec<WebhookSubscription>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM webhook_subscriptions
             WHERE active = 1 AND (project IS NULL OR project = ?1)",
        )?;
        let rows = stmt.query_map(params![project], row_to_subscription)?;
        let all = rows.collect::<rusqlite::Result<Vec<_>>>().context("listing subscriptions")?;
        Ok(all
            .into_iter()
            .filter(|s| s.event_types.iter().any(|t| t == event_type || t == "*"))
            .collect())
    }

    pub fn log_webhook_delivery(
        &self,
        subscription_id: i64,
        event_type: &str,
        event_id: &str,
        payload: &str,
        status_code: Option<i32>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO delivery_log
                (subscription_id, event_type, event_id, payload, status_code, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![subscription_id, event_type, event_id, payload, status_code, success as i32, error_message],
        )?;
        Ok(())
    }

    pub fn list_delivery_logs(&self, subscription_id: Option<i64>) -> Result<Vec<DeliveryLogEntry>> {
        let conn = self.open()?;
        if let Some(id) = subscription_id {
            let mut stmt = conn.prepare(
                "SELECT * FROM delivery_log WHERE subscription_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map(params![id], row_to_delivery_log)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context("listing delivery logs")
        } else {
            let mut stmt = conn.prepare("SELECT * FROM delivery_log ORDER BY id DESC")?;
            let rows = stmt.query_map([], row_to_delivery_log)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context("listing delivery logs")
        }
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|d| DateTime::<Utc>::from_naive_utc_and_offset(d, Utc))
        })
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        created_at: parse_rfc3339(&row.get::<_, String>("created_at")?),
        updated_at: parse_rfc3339(&row.get::<_, String>("updated_at")?),
    })
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let tags_json: Option<String> = row.get("tags")?;
    let tags = tags_json
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default();
    Ok(Document {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        path: row.get("path")?,
        folder: row.get("folder")?,
        filename: row.get("filename")?,
        doc_type: row.get("type")?,
        status: row.get("status")?,
        owner: row.get("owner")?,
        feature: row.get("feature")?,
        tags,
        content_hash: row.get("content_hash")?,
        mtime: row.get("mtime")?,
        updated: row.get("updated")?,
        indexed_at: parse_rfc3339(&row.get::<_, String>("indexed_at")?),
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        heading: row.get("heading")?,
        heading_level: row.get("heading_level")?,
        content: row.get("content")?,
        chunk_order: row.get("chunk_order")?,
        char_offset: row.get("char_offset")?,
        is_priority_heading: row.get::<_, i32>("is_priority_heading")? != 0,
    })
}

fn row_to_search_result(row: &rusqlite::Row) -> rusqlite::Result<SearchResult> {
    let bm25_score: f64 = row.get("bm25_score")?;
    let type_boost: f64 = row.get("type_boost")?;
    let recency_boost: f64 = row.get("recency_boost")?;
    let heading_boost: f64 = row.get("heading_boost")?;
    let status_boost: f64 = row.get("status_boost")?;
    Ok(SearchResult {
        chunk_id: row.get("chunk_id")?,
        document_id: row.get("document_id")?,
        project_name: row.get("project_name")?,
        document_path: row.get("document_path")?,
        folder: row.get("folder")?,
        heading: row.get("heading")?,
        snippet: row.get("snippet")?,
        bm25_score,
        type_boost,
        recency_boost,
        heading_boost,
        status_boost,
        final_score: bm25_score * type_boost * recency_boost * heading_boost * status_boost,
    })
}

fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<WebhookSubscription> {
    let event_types_json: String = row.get("event_types")?;
    let event_types = serde_json::from_str(&event_types_json).unwrap_or_default();
    Ok(WebhookSubscription {
        id: row.get("id")?,
        url: row.get("url")?,
        secret: row.get("secret")?,
        event_types,
        project: row.get("project")?,
        description: row.get("description")?,
        active: row.get::<_, i32>("active")? != 0,
        created_at: parse_rfc3339(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_delivery_log(row: &rusqlite::Row) -> rusqlite::Result<DeliveryLogEntry> {
    Ok(DeliveryLogEntry {
        id: row.get("id")?,
        subscription_id: row.get("subscription_id")?,
        event_type: row.get("event_type")?,
        event_id: row.get("event_id")?,
        payload: row.get("payload")?,
        status_code: row.get("status_code")?,
        success: row.get::<_, i32>("success")? != 0,
        error_message: row.get("error_message")?,
        created_at: parse_rfc3339(&row.get::<_, String>("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("index.db"));
        store.initialize().unwrap();
        (dir, store)
    }

    #[test]
    fn get_or_create_project_is_idempotent() {
        let (_dir, store) = test_store();
        let id1 = store.get_or_create_project("demo", "/root/demo").unwrap();
        let id2 = store.get_or_create_project("demo", "/root/demo").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn upsert_then_search_finds_chunk() {
        let (_dir, store) = test_store();
        let project_id = store.get_or_create_project("demo", "/root/demo").unwrap();
        let tags = vec![];
        let doc_id = store
            .upsert_document(&DocumentUpsert {
                project_id,
                path: "demo/tasks/001-setup.md",
                folder: "tasks",
                filename: "001-setup.md",
                doc_type: Some("task"),
                status: Some("done"),
                owner: None,
                feature: None,
                tags: &tags,
                content_hash: "abc123",
                mtime: 1000.0,
                updated: None,
            })
            .unwrap();

        let chunks = vec![crate::chunker::Chunk {
            heading: Some("# Setup".to_string()),
            heading_level: 1,
            content: "run the setup wizard".to_string(),
            chunk_order: 0,
            char_offset: 0,
            is_priority_heading: false,
        }];
        store.insert_chunks(doc_id, &chunks).unwrap();

        let results = store.search("setup", Some("demo"), 20).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].folder, "tasks");
        assert!(results[0].snippet.contains(">>>"));
    }

    #[test]
    fn webhook_subscription_crud() {
        let (_dir, store) = test_store();
        let id = store
            .create_webhook_subscription(
                "https://example.com/hook",
                &"s".repeat(32),
                &["task.created".to_string()],
                Some("demo"),
                None,
            )
            .unwrap();
        let matches = store.get_active_subscriptions_for_event("task.created", Some("demo")).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(store.delete_webhook_subscription(id).unwrap());
        assert!(!store.delete_webhook_subscription(id).unwrap());
    }
}
