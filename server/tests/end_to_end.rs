//! End-to-end scenarios spanning the Indexer, Write engine, and Webhook
//! engine together, the way a composed server would exercise them.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use vibe_server::auth::AuthGate;
use vibe_server::facade::OperationFacade;
use vibe_server::indexer::Indexer;
use vibe_server::store::Store;
use vibe_server::webhooks::WebhookEngine;
use vibe_server::write::WriteEngine;

fn build(root: &std::path::Path, read_only: bool, webhooks_enabled: bool) -> (Arc<Indexer>, OperationFacade) {
    let db_path = root.join("index.db");
    let store = Arc::new(Store::new(db_path.clone()));
    store.initialize().unwrap();
    let indexer = Arc::new(Indexer::new(root.to_path_buf(), Store::new(db_path)));
    indexer.initialize().unwrap();
    let auth = Arc::new(AuthGate::new(None, read_only));
    let webhooks = Arc::new(WebhookEngine::new(Arc::clone(&store), webhooks_enabled));
    let write = Arc::new(WriteEngine::new(
        root.to_path_buf(),
        Arc::clone(&indexer),
        auth,
        Arc::clone(&webhooks),
    ));
    let facade = OperationFacade::new(Arc::clone(&indexer), write, webhooks);
    (indexer, facade)
}

#[test]
fn initial_index_on_existing_workspace() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("demo/tasks")).unwrap();
    fs::write(dir.path().join("demo/status.md"), "# demo\n\nStatus: setup\n\nAll good.\n").unwrap();
    fs::write(
        dir.path().join("demo/tasks/001-setup.md"),
        "---\ntype: task\nstatus: done\n---\n## Objective\nsetup the project\n## Acceptance\ndone",
    )
    .unwrap();

    let (indexer, facade) = build(dir.path(), false, false);
    let count = indexer.reindex().unwrap();
    assert_eq!(count, 2);

    let projects = indexer.list_projects().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "demo");

    let docs = indexer.list_documents(Some("demo"), None).unwrap();
    assert_eq!(docs.len(), 2);

    let hits = facade.search("setup", None, 20).unwrap();
    assert!(hits.iter().any(|h| h.folder == "tasks"));
}

#[test]
fn create_then_search_read_your_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (_indexer, facade) = build(dir.path(), false, false);
    facade.init_project("demo").unwrap();

    facade
        .create_task(
            "demo",
            "Add auth",
            "Implement JWT",
            Some(&["design".to_string(), "code".to_string()]),
            None,
        )
        .unwrap();

    let hits = facade.search("JWT", Some("demo"), 5).unwrap();
    assert!(hits.iter().any(|h| h.document_path.ends_with("001-add-auth.md")));
    assert!(hits.iter().any(|h| h.snippet.contains(">>>JWT<<<")));
}

#[test]
fn out_of_band_edit_visible_only_after_sync() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("demo")).unwrap();
    let status_path = dir.path().join("demo/status.md");
    fs::write(&status_path, "# demo\n\nStatus: setup\n").unwrap();

    let (indexer, facade) = build(dir.path(), false, false);
    indexer.reindex().unwrap();

    assert!(facade.search("Redis", None, 20).unwrap().is_empty());

    std::thread::sleep(Duration::from_millis(10));
    let mut content = fs::read_to_string(&status_path).unwrap();
    content.push_str("\n## Blockers\n- Redis\n");
    fs::write(&status_path, content).unwrap();

    indexer.sync().unwrap();

    let hits = facade.search("Redis", None, 20).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h.heading.as_deref() == Some("Blockers")));
}

#[test]
fn read_only_mode_blocks_writes_but_allows_reads() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("demo")).unwrap();
    fs::write(dir.path().join("demo/status.md"), "# demo\n").unwrap();

    let (indexer, facade) = build(dir.path(), true, false);
    indexer.reindex().unwrap();

    let result = facade.create_doc("demo", "references", "x.md", "content");
    assert!(result.is_err());

    assert!(facade.search("demo", None, 20).is_ok());
}

#[test]
fn rename_and_sync_updates_document_paths() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("demo/tasks")).unwrap();
    let old_path = dir.path().join("demo/tasks/001-a.md");
    fs::write(&old_path, "# Task A\n\nStatus: pending\n").unwrap();

    let (indexer, _facade) = build(dir.path(), false, false);
    indexer.reindex().unwrap();

    let new_path = dir.path().join("demo/tasks/002-b.md");
    fs::rename(&old_path, &new_path).unwrap();

    let counts = indexer.sync().unwrap();
    assert!(counts.deleted >= 1);
    assert!(counts.added >= 1);

    let docs = indexer.list_documents(Some("demo"), Some("tasks")).unwrap();
    let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
    assert!(!paths.contains(&"demo/tasks/001-a.md"));
    assert!(paths.contains(&"demo/tasks/002-b.md"));
}

#[tokio::test]
async fn webhook_fan_out_delivers_to_matching_subscriptions_and_logs() {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let project_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("X-Vibe-Event", "task.created"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&project_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (_indexer, facade) = build(dir.path(), false, true);
    facade.init_project("p").unwrap();
    facade.init_project("q").unwrap();

    let secret = "a".repeat(32);
    let url = format!("{}/hook", project_server.uri());

    facade
        .register_webhook(&url, &secret, &["task.created".to_string()], Some("p"), None)
        .unwrap();
    facade.register_webhook(&url, &secret, &["*".to_string()], None, None).unwrap();

    facade.create_task("p", "First", "obj", None, None).unwrap();
    facade.create_task("q", "Second", "obj", None, None).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    project_server.verify().await;
}
