//! Vibe binary — composition root over the [`vibe_server`] library crate.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vibe_core::Config;
use vibe_server::auth::AuthGate;
use vibe_server::facade::OperationFacade;
use vibe_server::indexer::Indexer;
use vibe_server::store::Store;
use vibe_server::syncer::Syncer;
use vibe_server::webhooks::WebhookEngine;
use vibe_server::write::WriteEngine;

/// Personal knowledge-and-work indexing server: markdown workspace indexer,
/// write pipeline, and webhook delivery engine.
#[derive(Parser)]
#[command(name = "vibe", version, about, long_about = None)]
struct Cli {
    /// Force a full reindex before serving.
    #[arg(long)]
    reindex: bool,

    /// Force read-only mode regardless of VIBE_READ_ONLY.
    #[arg(long)]
    read_only: bool,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vibe=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env(if cli.read_only { Some(true) } else { None }) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "fatal: invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!("=================================================");
    info!("  vibe — workspace indexing server");
    info!("=================================================");
    info!(root = %config.vibe_root.display(), "workspace root");
    info!(db = %config.vibe_db.display(), "index database");
    info!(port = config.vibe_port, "configured port");
    info!(read_only = config.read_only, "mode");
    info!(webhooks_enabled = config.webhooks_enabled, "webhooks");
    info!(sync_interval = config.sync_interval, "sync interval (s)");
    info!("=================================================");

    let store = Store::new(config.vibe_db.clone());
    if let Err(e) = store.initialize() {
        error!(error = %e, "fatal: cannot open or initialize the index database");
        return ExitCode::FAILURE;
    }
    let store = Arc::new(store);

    let indexer_store = Store::new(config.vibe_db.clone());
    let indexer = Arc::new(Indexer::new(config.vibe_root.clone(), indexer_store));
    if let Err(e) = indexer.initialize() {
        error!(error = %e, "fatal: cannot initialize indexer");
        return ExitCode::FAILURE;
    }

    let project_count = match indexer.list_projects() {
        Ok(projects) => projects.len(),
        Err(e) => {
            error!(error = %e, "fatal: cannot read project list");
            return ExitCode::FAILURE;
        }
    };

    if cli.reindex || project_count == 0 {
        info!(forced = cli.reindex, empty_database = project_count == 0, "performing initial reindex");
        match indexer.reindex() {
            Ok(count) => info!(count, "initial reindex complete"),
            Err(e) => {
                error!(error = %e, "fatal: initial reindex failed");
                return ExitCode::FAILURE;
            }
        }
    }

    let auth = Arc::new(AuthGate::new(config.auth_token.clone(), config.read_only));
    let webhooks = Arc::new(WebhookEngine::new(Arc::clone(&store), config.webhooks_enabled));
    let write = Arc::new(WriteEngine::new(
        config.vibe_root.clone(),
        Arc::clone(&indexer),
        Arc::clone(&auth),
        Arc::clone(&webhooks),
    ));
    // The request/response transport that would dispatch into this facade is
    // an external collaborator; this process only owns indexing, writes, and
    // webhook delivery.
    let _facade = OperationFacade::new(Arc::clone(&indexer), Arc::clone(&write), Arc::clone(&webhooks));

    let syncer = Syncer::new(Arc::clone(&indexer), config.sync_interval);
    if config.sync_interval > 0 {
        syncer.start();
        info!("background syncer started");
    } else {
        info!("background syncer disabled (sync interval = 0)");
    }

    info!("vibe is ready");
    shutdown_signal().await;

    syncer.stop().await;
    webhooks.shutdown().await;
    info!("shutdown complete");

    ExitCode::SUCCESS
}
