//! Periodic scheduler that invokes the Indexer's reconcile operation. See
//! SPEC_FULL.md §4.F.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::indexer::Indexer;

/// A single long-lived cooperative background task that calls
/// `indexer.sync()` every `interval`, cancellable through a stop signal.
pub struct Syncer {
    indexer: Arc<Indexer>,
    interval: Duration,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Syncer {
    pub fn new(indexer: Arc<Indexer>, interval_secs: u64) -> Self {
        Self {
            indexer,
            interval: Duration::from_secs(interval_secs.max(1)),
            stop: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the background task. Idempotent: calling twice is a no-op.
    pub fn start(&self) {
        let mut guard = self.handle.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let indexer = Arc::clone(&self.indexer);
        let interval = self.interval;
        let stop = Arc::clone(&self.stop);
        let stopped = Arc::clone(&self.stopped);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop.notified() => {
                        debug!("syncer received stop signal");
                        break;
                    }
                }

                if stopped.load(Ordering::SeqCst) {
                    break;
                }

                match indexer.sync() {
                    Ok(counts) => {
                        if counts.added + counts.updated + counts.deleted > 0 {
                            info!(
                                added = counts.added,
                                updated = counts.updated,
                                deleted = counts.deleted,
                                "background sync"
                            );
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "background sync failed, will retry next tick");
                    }
                }
            }
        });

        *guard = Some(handle);
    }

    /// Signal the task to stop and wait up to `interval + 1s` for it to
    /// exit. A process exit while the task is running must not block —
    /// the task is spawned with `tokio::spawn`, not joined at shutdown time
    /// unless this is called.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_one();

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let wait = self.interval + Duration::from_secs(1);
            if tokio::time::timeout(wait, handle).await.is_err() {
                error!("syncer did not stop within the grace period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn start_is_idempotent_and_stop_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("index.db"));
        let indexer = Arc::new(Indexer::new(dir.path().to_path_buf(), store));
        indexer.initialize().unwrap();

        let syncer = Syncer::new(indexer, 1);
        syncer.start();
        syncer.start();
        syncer.stop().await;
    }
}
