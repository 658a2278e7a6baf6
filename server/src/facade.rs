//! Thin, schema-typed adapter exposing the request operations of SPEC_FULL.md
//! §6 over the Indexer, Write engine, and Webhook engine. The outer
//! request/response protocol and transport that would carry these calls to
//! an external agent are out of scope (§1) — this module is the contract
//! they would bind to.

use std::sync::Arc;

use serde::Serialize;
use vibe_core::error::VibeError;

use crate::indexer::Indexer;
use crate::webhooks::{PublicSubscription, WebhookEngine};
use crate::write::WriteEngine;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub project_name: String,
    pub document_path: String,
    pub folder: String,
    pub heading: Option<String>,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadDocResult {
    pub project: String,
    pub folder: String,
    pub filename: String,
    pub path: String,
    pub metadata: Option<DocMetadata>,
    pub content: Option<String>,
    pub exists: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocMetadata {
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub feature: Option<String>,
    pub tags: Vec<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub project_name: String,
    pub path: String,
    pub filename: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub project: String,
    pub filename: String,
    pub path: String,
    pub exists: bool,
    pub metadata: Option<DocMetadata>,
    pub content: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteAck {
    pub status: &'static str,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionAck {
    pub status: &'static str,
    pub path: String,
    pub action: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexAck {
    pub status: &'static str,
    pub documents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterWebhookAck {
    pub status: &'static str,
    pub subscription_id: i64,
    pub url: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnregisterWebhookAck {
    pub status: &'static str,
    pub subscription_id: i64,
}

/// Composition point binding the Indexer, Write engine, and Webhook engine
/// into the operation set external callers invoke.
pub struct OperationFacade {
    indexer: Arc<Indexer>,
    write: Arc<WriteEngine>,
    webhooks: Arc<WebhookEngine>,
}

impl OperationFacade {
    pub fn new(indexer: Arc<Indexer>, write: Arc<WriteEngine>, webhooks: Arc<WebhookEngine>) -> Self {
        Self { indexer, write, webhooks }
    }

    // -- reads ----------------------------------------------------------

    pub fn search(
        &self,
        query: &str,
        project: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchHit>, VibeError> {
        let results =
            self.indexer.search(query, project, limit).map_err(|e| VibeError::input_invalid(e.to_string()))?;
        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                project_name: r.project_name,
                document_path: r.document_path,
                folder: r.folder,
                heading: r.heading,
                snippet: r.snippet,
                score: r.final_score,
            })
            .collect())
    }

    pub fn read_doc(&self, project: &str, folder: &str, filename: &str) -> Result<ReadDocResult, VibeError> {
        let path = if folder.is_empty() {
            format!("{project}/{filename}")
        } else {
            format!("{project}/{folder}/{filename}")
        };

        let doc = self.indexer.get_document(&path).map_err(|e| VibeError::input_invalid(e.to_string()))?;
        let absolute = self.indexer.workspace_root().join(&path);

        match doc {
            None => Ok(ReadDocResult {
                project: project.to_string(),
                folder: folder.to_string(),
                filename: filename.to_string(),
                path,
                metadata: None,
                content: None,
                exists: false,
                error: Some("document not found".to_string()),
            }),
            Some(doc) => match std::fs::read_to_string(&absolute) {
                Ok(content) => Ok(ReadDocResult {
                    project: project.to_string(),
                    folder: folder.to_string(),
                    filename: filename.to_string(),
                    path,
                    metadata: Some(DocMetadata {
                        doc_type: doc.doc_type,
                        status: doc.status,
                        owner: doc.owner,
                        feature: doc.feature,
                        tags: doc.tags,
                        updated: doc.updated,
                    }),
                    content: Some(content),
                    exists: true,
                    error: None,
                }),
                Err(e) => Ok(ReadDocResult {
                    project: project.to_string(),
                    folder: folder.to_string(),
                    filename: filename.to_string(),
                    path,
                    metadata: None,
                    content: None,
                    exists: false,
                    error: Some(e.to_string()),
                }),
            },
        }
    }

    pub fn list_tasks(
        &self,
        project: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<TaskSummary>, VibeError> {
        let docs = self
            .indexer
            .list_documents(project, Some("tasks"))
            .map_err(|e| VibeError::input_invalid(e.to_string()))?;
        Ok(docs
            .into_iter()
            .filter(|d| match status {
                Some(s) => d.status.as_deref() == Some(s),
                None => true,
            })
            .map(|d| TaskSummary {
                project_name: d.path.split('/').next().unwrap_or_default().to_string(),
                path: d.path,
                filename: d.filename,
                status: d.status,
                owner: d.owner,
                updated: d.updated,
            })
            .collect())
    }

    pub fn get_plan(&self, project: &str, filename: Option<&str>) -> Result<PlanResult, VibeError> {
        let filename = filename.unwrap_or("execution-plan.md");
        let path = format!("{project}/plans/{filename}");
        let doc = self.indexer.get_document(&path).map_err(|e| VibeError::input_invalid(e.to_string()))?;
        let absolute = self.indexer.workspace_root().join(&path);

        match doc {
            None => Ok(PlanResult {
                project: project.to_string(),
                filename: filename.to_string(),
                path,
                exists: false,
                metadata: None,
                content: None,
                error: Some("plan not found".to_string()),
            }),
            Some(doc) => match std::fs::read_to_string(&absolute) {
                Ok(content) => Ok(PlanResult {
                    project: project.to_string(),
                    filename: filename.to_string(),
                    path,
                    exists: true,
                    metadata: Some(DocMetadata {
                        doc_type: doc.doc_type,
                        status: doc.status,
                        owner: doc.owner,
                        feature: doc.feature,
                        tags: doc.tags,
                        updated: doc.updated,
                    }),
                    content: Some(content),
                    error: None,
                }),
                Err(e) => Ok(PlanResult {
                    project: project.to_string(),
                    filename: filename.to_string(),
                    path,
                    exists: false,
                    metadata: None,
                    content: None,
                    error: Some(e.to_string()),
                }),
            },
        }
    }

    // -- writes -----------------------------------------------------------

    pub fn init_project(&self, name: &str) -> Result<WriteAck, VibeError> {
        let result = self.write.init_project(name)?;
        Ok(WriteAck { status: "created", path: result.path })
    }

    pub fn create_task(
        &self,
        project: &str,
        title: &str,
        objective: &str,
        steps: Option<&[String]>,
        feature: Option<&str>,
    ) -> Result<WriteAck, VibeError> {
        let result = self.write.create_task(project, title, objective, steps, feature)?;
        Ok(WriteAck { status: "created", path: result.path })
    }

    pub fn log_session(&self, project: &str, content: &str) -> Result<SessionAck, VibeError> {
        let result = self.write.log_session(project, content)?;
        let action = match result.action {
            crate::write::SessionAction::Created => "created",
            crate::write::SessionAction::Appended => "appended",
        };
        Ok(SessionAck { status: "ok", path: result.path, action })
    }

    pub fn update_task_status(
        &self,
        project: &str,
        task_file: &str,
        new_status: &str,
    ) -> Result<WriteAck, VibeError> {
        self.write.update_task_status(project, task_file, new_status)?;
        Ok(WriteAck { status: "updated", path: format!("{project}/tasks/{task_file}") })
    }

    pub fn create_doc(
        &self,
        project: &str,
        folder: &str,
        filename: &str,
        content: &str,
    ) -> Result<WriteAck, VibeError> {
        let path = self.write.create_doc(project, folder, filename, content)?;
        Ok(WriteAck { status: "created", path })
    }

    pub fn create_plan(
        &self,
        project: &str,
        content: &str,
        filename: Option<&str>,
    ) -> Result<WriteAck, VibeError> {
        let path = self.write.create_plan(project, content, filename)?;
        Ok(WriteAck { status: "ok", path })
    }

    pub fn reindex(&self) -> Result<ReindexAck, VibeError> {
        let documents = self.write.reindex()?;
        Ok(ReindexAck { status: "ok", documents })
    }

    // -- webhook admin ------------------------------------------------------

    pub fn register_webhook(
        &self,
        url: &str,
        secret: &str,
        event_types: &[String],
        project: Option<&str>,
        description: Option<&str>,
    ) -> Result<RegisterWebhookAck, VibeError> {
        let result = self.webhooks.register(url, secret, event_types, project, description)?;
        Ok(RegisterWebhookAck {
            status: "registered",
            subscription_id: result.subscription_id,
            url: result.url,
            event_types: result.event_types,
            project: result.project,
        })
    }

    pub fn unregister_webhook(&self, subscription_id: i64) -> Result<UnregisterWebhookAck, VibeError> {
        self.webhooks.unregister(subscription_id)?;
        Ok(UnregisterWebhookAck { status: "unregistered", subscription_id })
    }

    pub fn list_webhooks(&self, project: Option<&str>) -> Result<Vec<PublicSubscription>, VibeError> {
        self.webhooks.list_subscriptions(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthGate;
    use crate::store::Store;

    fn fresh_facade() -> (tempfile::TempDir, OperationFacade) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("index.db")));
        store.initialize().unwrap();
        let indexer = Arc::new(Indexer::new(
            dir.path().to_path_buf(),
            Store::new(dir.path().join("index.db")),
        ));
        let auth = Arc::new(AuthGate::new(None, false));
        let webhooks = Arc::new(WebhookEngine::new(Arc::clone(&store), false));
        let write = Arc::new(WriteEngine::new(
            dir.path().to_path_buf(),
            Arc::clone(&indexer),
            auth,
            Arc::clone(&webhooks),
        ));
        (dir, OperationFacade::new(indexer, write, webhooks))
    }

    #[test]
    fn create_task_then_search_finds_it() {
        let (_dir, facade) = fresh_facade();
        facade.init_project("demo").unwrap();
        facade
            .create_task("demo", "Add auth", "Implement JWT", Some(&["design".to_string(), "code".to_string()]), None)
            .unwrap();

        let hits = facade.search("JWT", Some("demo"), 5).unwrap();
        assert!(hits.iter().any(|h| h.document_path.ends_with("001-add-auth.md")));
        assert!(hits.iter().any(|h| h.snippet.contains(">>>") && h.snippet.contains("<<<")));
    }

    #[test]
    fn read_doc_reports_not_found() {
        let (_dir, facade) = fresh_facade();
        facade.init_project("demo").unwrap();
        let result = facade.read_doc("demo", "plans", "missing.md").unwrap();
        assert!(!result.exists);
        assert!(result.error.is_some());
    }

    #[test]
    fn list_tasks_filters_by_status() {
        let (_dir, facade) = fresh_facade();
        facade.init_project("demo").unwrap();
        facade.create_task("demo", "A", "obj", None, None).unwrap();
        facade.create_task("demo", "B", "obj", None, None).unwrap();
        facade.update_task_status("demo", "002-b.md", "done").unwrap();

        let pending = facade.list_tasks(Some("demo"), Some("pending")).unwrap();
        assert_eq!(pending.len(), 1);
        let done = facade.list_tasks(Some("demo"), Some("done")).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].project_name, "demo");
    }

    #[test]
    fn get_plan_roundtrips_content() {
        let (_dir, facade) = fresh_facade();
        facade.init_project("demo").unwrap();
        facade.create_plan("demo", "the plan", None).unwrap();
        let plan = facade.get_plan("demo", None).unwrap();
        assert!(plan.exists);
        assert_eq!(plan.content.as_deref(), Some("the plan"));
    }
}
