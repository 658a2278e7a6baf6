//! Core data-model records shared across the server crate. See SPEC_FULL.md
//! §3 for field semantics and invariants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace project — one immediate, non-dot-prefixed subdirectory of the
/// workspace root. Name and path are each unique across the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A markdown document owned by exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub project_id: i64,
    /// Workspace-relative path, forward-slash separated. Unique.
    pub path: String,
    /// First path segment under the project, or empty for project-root files.
    pub folder: String,
    pub filename: String,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub feature: Option<String>,
    pub tags: Vec<String>,
    /// Hex-encoded SHA-256 digest of the file bytes.
    pub content_hash: String,
    pub mtime: f64,
    /// `updated` declaration from the header block, stringified verbatim.
    pub updated: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// A heading-or-size-bounded slice of a document's body — the unit of
/// retrieval. `chunk_order` is zero-based and total across a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub heading: Option<String>,
    pub heading_level: i32,
    pub content: String,
    pub chunk_order: i32,
    pub char_offset: i64,
    pub is_priority_heading: bool,
}

/// A ranked search hit. Every ranking factor is carried individually so
/// callers can explain the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub document_id: i64,
    pub project_name: String,
    pub document_path: String,
    pub folder: String,
    pub heading: Option<String>,
    pub snippet: String,
    pub bm25_score: f64,
    pub type_boost: f64,
    pub recency_boost: f64,
    pub heading_boost: f64,
    pub status_boost: f64,
    pub final_score: f64,
}

/// A registered webhook subscription. The secret is kept only server-side —
/// never serialize this type directly into a listing response; strip the
/// secret first (see `server::webhooks::PublicSubscription`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: i64,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One delivery attempt, recorded regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: String,
    pub event_id: String,
    pub payload: String,
    pub status_code: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The closed set of event types a subscription may select. `*` matches all.
pub const EVENT_TYPES: &[&str] = &[
    "task.created",
    "task.updated",
    "doc.created",
    "doc.updated",
    "session.logged",
    "plan.created",
    "plan.updated",
    "project.initialized",
    "index.reindexed",
    "*",
];

/// Folder name → document type, used by the header parser when the header
/// block omits `type`.
pub const FOLDER_TYPE_MAP: &[(&str, &str)] = &[
    ("tasks", "task"),
    ("plans", "plan"),
    ("sessions", "session"),
    ("reports", "report"),
    ("changelog", "changelog"),
    ("references", "reference"),
    ("scratch", "scratch"),
    ("assets", "asset"),
];

/// The eight standard subfolders created by `init_project`.
pub const STANDARD_SUBFOLDERS: &[&str] = &[
    "tasks",
    "plans",
    "sessions",
    "reports",
    "changelog",
    "references",
    "scratch",
    "assets",
];

/// Heading texts (lowercased, `#` stripped) that receive a search boost.
pub const PRIORITY_HEADINGS: &[&str] =
    &["current status", "next", "next steps", "blockers", "blocked by", "decisions"];

/// Valid values for `update_task_status`.
pub const TASK_STATUSES: &[&str] = &["pending", "in-progress", "done", "blocked"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_include_wildcard() {
        assert!(EVENT_TYPES.contains(&"*"));
        assert!(EVENT_TYPES.contains(&"task.created"));
    }

    #[test]
    fn folder_type_map_covers_standard_subfolders() {
        for folder in STANDARD_SUBFOLDERS {
            assert!(FOLDER_TYPE_MAP.iter().any(|(f, _)| f == folder));
        }
    }
}
