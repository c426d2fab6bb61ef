use chrono::Local;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use super::auth::{AuthProvider, CookieStore};
use super::config::{ConfigError, SyncConfig, SyncResult, SyncStatus};
use super::metadata::{SnapshotError, SnapshotStore, SnapshotTree};
use super::reconcile::{Reconciler, SyncSession};
use super::remote::{NotebookSource, RemoteError, RemoteSession};
use super::render::{DocumentMaterializer, Materializer};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Remote tree nests deeper than {0} folders")]
    TreeTooDeep(usize),
    #[error("A sync pass is already running")]
    AlreadyRunning,
}

/// State owned by whichever pass holds the lock
struct PassState {
    session: SyncSession,
    snapshot: SnapshotTree,
}

/// Runs sync passes: fetch the remote tree, reconcile, prune, persist.
///
/// Only one pass runs at a time per data dir, across processes too: a trigger
/// that arrives while a pass is in progress is rejected with
/// [`SyncError::AlreadyRunning`]. The snapshot is reloaded from disk at the
/// start of every pass since another process may have written it since.
pub struct SyncManager {
    sync_dir: PathBuf,
    status_path: PathBuf,
    lock_path: PathBuf,
    request_delay: Duration,
    store: SnapshotStore,
    materializer: Arc<dyn Materializer>,
    state: Mutex<PassState>,
}

impl SyncManager {
    /// Create a manager over an arbitrary source and materializer
    pub fn new(
        config: &SyncConfig,
        source: Box<dyn NotebookSource>,
        materializer: Arc<dyn Materializer>,
    ) -> Result<Self, SyncError> {
        let store = SnapshotStore::new(config.snapshot_path()?);
        let snapshot = store.load();

        Ok(Self {
            sync_dir: config.sync_dir()?,
            status_path: config.status_path()?,
            lock_path: config.lock_path()?,
            request_delay: config.request_delay(),
            store,
            materializer,
            state: Mutex::new(PassState {
                session: SyncSession::new(source),
                snapshot,
            }),
        })
    }

    /// Wire up the real remote session and PDF materializer
    pub fn from_config(config: &SyncConfig, auth: Arc<dyn AuthProvider>) -> Result<Self, SyncError> {
        let cookie_store = CookieStore::new(config.cookies_path()?);
        let session = RemoteSession::new(config.clone(), auth, cookie_store)?;
        let materializer = DocumentMaterializer::new(config.extraction_dir()?);
        Self::new(config, Box::new(session), Arc::new(materializer))
    }

    pub fn sync_dir(&self) -> &Path {
        &self.sync_dir
    }

    /// Last recorded pass outcome
    pub fn status(&self) -> Option<SyncStatus> {
        SyncStatus::load(&self.status_path)
    }

    /// Copy of the snapshot as of the last pass, unless a pass holds it
    pub fn snapshot(&self) -> Option<SnapshotTree> {
        self.state.try_lock().ok().map(|state| state.snapshot.clone())
    }

    /// Best-effort cookie cache write, skipped while a pass is running
    pub fn persist_session(&self) {
        match self.state.try_lock() {
            Ok(state) => state.session.source.persist_session(),
            Err(_) => log::debug!("Pass in progress, session will be persisted when it ends"),
        }
    }

    /// Run one full pass
    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        let Ok(mut state) = self.state.try_lock() else {
            log::warn!("Sync requested while a pass is running, ignoring");
            return Err(SyncError::AlreadyRunning);
        };
        // Released when dropped at the end of the pass
        let Some(_pass_lock) = self.acquire_pass_lock()? else {
            log::warn!("Sync requested while another process is running a pass, ignoring");
            return Err(SyncError::AlreadyRunning);
        };
        let PassState { session, snapshot } = &mut *state;

        log::info!("Sync: starting pass into {}", self.sync_dir.display());
        let started = Instant::now();
        session.reset_counters();
        *snapshot = self.store.load();

        let outcome = self.run_pass(session, snapshot).await;

        // Partial progress is kept even when the pass failed
        let saved = self.store.save(snapshot);
        session.source.persist_session();

        let outcome = match (outcome, saved) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(SyncError::from(e)),
            (Err(e), saved) => {
                if let Err(save_error) = saved {
                    log::error!("Sync: failed to save snapshot: {}", save_error);
                }
                Err(e)
            }
        };

        let counters = session.counters;
        let previous = SyncStatus::load(&self.status_path);
        let (status, result) = match outcome {
            Ok(()) => {
                let result = SyncResult {
                    updated: counters.updated,
                    materialized: counters.materialized,
                    pruned: counters.pruned,
                    prune_failures: counters.prune_failures,
                    finished_at: Local::now(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                log::info!(
                    "Sync: pass complete in {}ms (updated={}, materialized={}, pruned={}, prune_failures={}, materialize_failures={})",
                    result.duration_ms,
                    result.updated,
                    result.materialized,
                    result.pruned,
                    result.prune_failures,
                    counters.materialize_failures,
                );
                let status = SyncStatus {
                    last_attempt: result.finished_at,
                    last_success: Some(result.clone()),
                    error: None,
                };
                (status, Ok(result))
            }
            Err(e) => {
                log::error!("Sync: pass failed after {} update(s): {}", counters.updated, e);
                let status = SyncStatus {
                    last_attempt: Local::now(),
                    last_success: previous.and_then(|s| s.last_success),
                    error: Some(e.to_string()),
                };
                (status, Err(e))
            }
        };

        if let Err(e) = status.save(&self.status_path) {
            log::warn!("Sync: failed to save status: {}", e);
        }
        result
    }

    /// Exclusive lock on the data dir's lock file, `None` if someone else holds it
    fn acquire_pass_lock(&self) -> Result<Option<File>, SyncError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_pass(&self, session: &mut SyncSession, snapshot: &mut SnapshotTree) -> Result<(), SyncError> {
        // 1. Remote tree (authenticates if there is no session yet)
        let remote = session.source.list_items().await?;
        log::info!("Sync: remote tree has {} top-level item(s)", remote.len());

        // 2. Create/update, then delete
        let reconciler = Reconciler::new(&self.sync_dir, Arc::clone(&self.materializer), self.request_delay);
        reconciler.reconcile(session, &remote, snapshot).await?;
        reconciler.prune(session, &remote, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::reconcile::tests::{FakeMaterializer, FakeSource};
    use crate::sync::remote::RemoteItem;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> SyncConfig {
        SyncConfig {
            sync_dir: Some(temp.path().join("mirror")),
            data_dir: Some(temp.path().join("data")),
            request_delay_ms: 0,
            ..Default::default()
        }
    }

    fn create_test_manager(temp: &TempDir, source: &FakeSource) -> SyncManager {
        SyncManager::new(
            &test_config(temp),
            Box::new(source.clone()),
            Arc::new(FakeMaterializer::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sync_now_persists_snapshot_and_status() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![
            RemoteItem::folder("f1", "Work", vec![RemoteItem::notebook("n1", "Plans")]),
            RemoteItem::notebook("n2", "Diary"),
        ]);
        let manager = create_test_manager(&temp, &source);

        let result = manager.sync_now().await.unwrap();
        assert_eq!(result.updated, 2);
        assert_eq!(result.materialized, 2);

        let saved = SnapshotStore::new(temp.path().join("data").join("notebooks.json")).load();
        assert_eq!(saved.counts(), (1, 2));
        assert_eq!(Some(saved), manager.snapshot());

        let status = manager.status().unwrap();
        assert_eq!(status.last_success, Some(result));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);

        create_test_manager(&temp, &source).sync_now().await.unwrap();
        let result = create_test_manager(&temp, &source).sync_now().await.unwrap();

        assert_eq!(result.updated, 0);
        assert_eq!(source.log.lock().unwrap().renders.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        let manager = create_test_manager(&temp, &source);

        let _running = manager.state.try_lock().unwrap();
        let result = manager.sync_now().await;

        assert!(matches!(result, Err(SyncError::AlreadyRunning)));
        assert!(source.log.lock().unwrap().opens.is_empty());
    }

    #[tokio::test]
    async fn test_managers_sharing_a_data_dir_see_each_others_passes() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);

        // Both built before either has synced, like a daemon and a one-shot CLI
        let daemon = create_test_manager(&temp, &source);
        let cli = create_test_manager(&temp, &source);

        let first = cli.sync_now().await.unwrap();
        assert_eq!(first.updated, 1);

        let second = daemon.sync_now().await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(source.log.lock().unwrap().renders.len(), 1);
        assert_eq!(daemon.snapshot(), cli.snapshot());
    }

    #[tokio::test]
    async fn test_pass_is_rejected_while_another_process_holds_the_lock() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![RemoteItem::notebook("n1", "Diary")]);
        let manager = create_test_manager(&temp, &source);

        let lock_path = test_config(&temp).lock_path().unwrap();
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        let held = OpenOptions::new().create(true).write(true).open(&lock_path).unwrap();
        held.try_lock_exclusive().unwrap();

        let result = manager.sync_now().await;
        assert!(matches!(result, Err(SyncError::AlreadyRunning)));
        assert!(source.log.lock().unwrap().opens.is_empty());

        drop(held);
        assert_eq!(manager.sync_now().await.unwrap().updated, 1);
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_partial_progress() {
        let temp = TempDir::new().unwrap();
        let source = FakeSource::default();
        source.set_tree(vec![
            RemoteItem::notebook("n1", "First"),
            RemoteItem::notebook("n2", "Second"),
        ]);
        let manager = create_test_manager(&temp, &source);
        let first = manager.sync_now().await.unwrap();

        let n2_before = manager.snapshot().unwrap().find("n2").unwrap().update_time;
        let future = chrono::Utc::now().timestamp() + 1000;
        source.set_notebook("n1", future, 1);
        source.set_notebook("n2", future, 1);
        source.unavailable.lock().unwrap().push("n2".to_string());

        let result = manager.sync_now().await;
        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::RemoteUnavailable { .. }))
        ));

        // n1 was re-rendered before n2 failed; n2 keeps its old timestamp
        let saved = SnapshotStore::new(temp.path().join("data").join("notebooks.json")).load();
        assert_eq!(source.log.lock().unwrap().renders.len(), 3);
        assert_eq!(saved.find("n2").unwrap().update_time, n2_before);

        let status = manager.status().unwrap();
        assert!(status.error.unwrap().contains("unavailable"));
        assert_eq!(status.last_success, Some(first));
    }
}
