use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::manager::{SyncError, SyncManager};

/// Messages to control the sync scheduler
#[derive(Debug)]
pub enum SyncSchedulerMessage {
    /// Run a pass now instead of waiting for the interval
    ForceSync,
    /// Stop after the current pass
    Shutdown,
}

/// Handle for the periodic sync scheduler
pub struct SyncScheduler {
    sender: mpsc::Sender<SyncSchedulerMessage>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Ask for an immediate pass
    pub fn force_sync(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::ForceSync);
    }

    /// Shut down the scheduler
    pub fn shutdown(&self) {
        let _ = self.sender.try_send(SyncSchedulerMessage::Shutdown);
    }

    /// Get a clone of the internal sender for external message producers (signal handlers)
    pub fn sender_clone(&self) -> mpsc::Sender<SyncSchedulerMessage> {
        self.sender.clone()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            log::error!("Sync scheduler task failed: {}", e);
        }
    }
}

/// Start the periodic sync scheduler.
///
/// Spawns an async loop that runs one pass immediately and then one every
/// `interval`. A message that arrives mid-pass is handled once the pass ends.
pub fn start_sync_scheduler(sync_manager: Arc<SyncManager>, interval: Duration) -> SyncScheduler {
    let (tx, rx) = mpsc::channel(32);

    let handle = tokio::spawn(async move {
        sync_scheduler_loop(sync_manager, interval, rx).await;
    });

    SyncScheduler { sender: tx, handle }
}

async fn run_scheduled_pass(sync_manager: &SyncManager, reason: &str) {
    log::info!("Sync scheduler: running {} sync", reason);
    match sync_manager.sync_now().await {
        Ok(result) => log::info!(
            "Sync scheduler: {} sync complete, updated {} item(s)",
            reason,
            result.updated
        ),
        Err(SyncError::AlreadyRunning) => {
            log::info!("Sync scheduler: pass already running, skipping {} sync", reason)
        }
        Err(e) => log::error!("Sync scheduler: {} sync failed: {}", reason, e),
    }
}

/// Main scheduler loop
async fn sync_scheduler_loop(
    sync_manager: Arc<SyncManager>,
    interval: Duration,
    mut receiver: mpsc::Receiver<SyncSchedulerMessage>,
) {
    log::info!(
        "Sync scheduler started, syncing every {} minute(s)",
        interval.as_secs() / 60
    );

    run_scheduled_pass(&sync_manager, "initial").await;

    loop {
        log::info!("Sync scheduler: next sync in {:.0}s", interval.as_secs_f64());

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                run_scheduled_pass(&sync_manager, "periodic").await;
            }

            msg = receiver.recv() => {
                match msg {
                    Some(SyncSchedulerMessage::ForceSync) => {
                        log::info!("Sync scheduler: force sync requested");
                        run_scheduled_pass(&sync_manager, "forced").await;
                    }
                    Some(SyncSchedulerMessage::Shutdown) | None => {
                        log::info!("Sync scheduler: shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::SyncConfig;
    use crate::sync::reconcile::tests::{FakeMaterializer, FakeSource};
    use crate::sync::remote::RemoteItem;
    use tempfile::TempDir;

    fn create_test_manager(temp: &TempDir, source: &FakeSource) -> Arc<SyncManager> {
        let config = SyncConfig {
            sync_dir: Some(temp.path().join("mirror")),
            data_dir: Some(temp.path().join("data")),
            request_delay_ms: 0,
            ..Default::default()
        };
        Arc::new(
            SyncManager::new(
                &config,
                Box::new(source.clone()),
                Arc::new(FakeMaterializer::default()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_initial_pass_then_forced_pass() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);
        let manager = create_test_manager(&temp, &source);

        let scheduler = start_sync_scheduler(manager.clone(), Duration::from_secs(3600));
        scheduler.force_sync();
        scheduler.shutdown();
        scheduler.join().await;

        let log = source.log.lock().unwrap();
        assert_eq!(log.opens.len(), 2);
        assert_eq!(log.renders.len(), 1);
        assert!(manager.status().unwrap().last_success.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_after_initial_pass() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);
        let manager = create_test_manager(&temp, &source);

        let scheduler = start_sync_scheduler(manager, Duration::from_secs(3600));
        scheduler.shutdown();
        scheduler.join().await;

        assert_eq!(source.log.lock().unwrap().opens.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interval_triggers_pass() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);
        let manager = create_test_manager(&temp, &source);

        let scheduler = start_sync_scheduler(manager, Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.shutdown();
        scheduler.join().await;

        let log = source.log.lock().unwrap();
        assert!(log.opens.len() >= 2, "expected a periodic pass, saw {} open(s)", log.opens.len());
        assert_eq!(log.renders.len(), 1);
    }
}
