//! Tree reconciliation
//!
//! A pass walks the remote hierarchy against the snapshot twice: `reconcile`
//! creates snapshot nodes and mirror folders for newly seen items and
//! re-renders notebooks modified since their last materialization; `prune`
//! then removes snapshot entries and mirror artifacts whose id is no longer
//! listed remotely. Prune must only run after reconcile has completed.

use chrono::Utc;
use futures_util::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::manager::SyncError;
use super::metadata::{NodeType, SnapshotChildren, SnapshotNode, SnapshotTree};
use super::remote::{NotebookSource, RemoteError, RemoteItem};
use super::render::Materializer;

/// Deepest folder nesting accepted from the remote listing
pub const MAX_TREE_DEPTH: usize = 64;

/// Per-pass counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassCounters {
    /// Materializations plus successful mirror removals
    pub updated: usize,
    pub notebooks_checked: usize,
    pub materialized: usize,
    pub materialize_failures: usize,
    pub pruned: usize,
    pub prune_failures: usize,
}

/// Everything a pass mutates besides the snapshot and the mirror:
/// the authenticated remote source and the pass counters.
pub struct SyncSession {
    pub source: Box<dyn NotebookSource>,
    pub counters: PassCounters,
}

impl SyncSession {
    pub fn new(source: Box<dyn NotebookSource>) -> Self {
        Self {
            source,
            counters: PassCounters::default(),
        }
    }

    /// Start a new pass
    pub fn reset_counters(&mut self) {
        self.counters = PassCounters::default();
    }
}

/// Applies a remote listing to the snapshot and the mirror directory
pub struct Reconciler<'a> {
    sync_dir: &'a Path,
    materializer: Arc<dyn Materializer>,
    request_delay: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(sync_dir: &'a Path, materializer: Arc<dyn Materializer>, request_delay: Duration) -> Self {
        Self {
            sync_dir,
            materializer,
            request_delay,
        }
    }

    /// Create/update half of a pass
    pub async fn reconcile(
        &self,
        session: &mut SyncSession,
        remote: &[RemoteItem],
        snapshot: &mut SnapshotTree,
    ) -> Result<(), SyncError> {
        self.reconcile_items(session, remote, &mut snapshot.items, None, 0)
            .await
    }

    /// Deletion half of a pass
    pub fn prune(&self, session: &mut SyncSession, remote: &[RemoteItem], snapshot: &mut SnapshotTree) {
        self.prune_items(&mut session.counters, &mut snapshot.items, remote);
    }

    fn reconcile_items<'s>(
        &'s self,
        session: &'s mut SyncSession,
        remote: &'s [RemoteItem],
        children: &'s mut SnapshotChildren,
        parent_path: Option<String>,
        depth: usize,
    ) -> BoxFuture<'s, Result<(), SyncError>> {
        Box::pin(async move {
            if depth > MAX_TREE_DEPTH {
                return Err(SyncError::TreeTooDeep(MAX_TREE_DEPTH));
            }

            for item in remote {
                let Some(node_type) = item.item_type.node_type() else {
                    log::warn!("Skipping item '{}' ({}) of unknown type", item.title, item.id);
                    continue;
                };

                if !children.contains_key(&item.id) {
                    let node = SnapshotNode::discovered_among(
                        node_type,
                        &item.title,
                        parent_path.as_deref(),
                        children,
                    );
                    log::info!("Discovered {:?} '{}' ({}) at '{}'", node_type, item.title, item.id, node.path);
                    children.insert(item.id.clone(), node);
                }
                let Some(node) = children.get_mut(&item.id) else {
                    continue;
                };

                match node_type {
                    NodeType::Folder => {
                        let dir = node.folder_path(self.sync_dir);
                        if !dir.exists() {
                            log::info!("Creating folder {}", dir.display());
                            std::fs::create_dir_all(&dir)?;
                        }
                        let path = node.path.clone();
                        self.reconcile_items(session, &item.items, &mut node.items, Some(path), depth + 1)
                            .await?;
                    }
                    NodeType::Notebook => {
                        self.reconcile_notebook(session, &item.id, node).await?;
                    }
                }
            }

            Ok(())
        })
    }

    async fn reconcile_notebook(
        &self,
        session: &mut SyncSession,
        id: &str,
        node: &mut SnapshotNode,
    ) -> Result<(), SyncError> {
        let metadata = session.source.open_notebook(id).await?;
        session.counters.notebooks_checked += 1;
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        if metadata.modification_time <= node.update_time {
            log::debug!("Notebook '{}' is up to date", node.name);
            return Ok(());
        }

        log::info!(
            "Notebook '{}' changed (remote {} > local {}), rendering {} page(s)",
            node.name,
            metadata.modification_time,
            node.update_time,
            metadata.end_page() + 1
        );

        let archive = match session
            .source
            .render_pages(&metadata.rendering_token, metadata.end_page())
            .await
        {
            Ok(archive) => archive,
            Err(RemoteError::TokenInvalidated) => {
                log::info!("Re-opening notebook '{}' for a fresh render token", node.name);
                let fresh = session.source.open_notebook(id).await?;
                session
                    .source
                    .render_pages(&fresh.rendering_token, fresh.end_page())
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        // Image decoding and PDF assembly are CPU-bound, keep them off the runtime workers
        let destination = node.document_path(self.sync_dir);
        let materializer = Arc::clone(&self.materializer);
        let target = destination.clone();
        let outcome =
            tokio::task::spawn_blocking(move || materializer.materialize(&archive, &target)).await;

        match outcome {
            Ok(Ok(())) => {
                session.counters.updated += 1;
                session.counters.materialized += 1;
                node.update_time = Utc::now().timestamp();
            }
            // Left stale so the next pass retries it
            Ok(Err(e)) => {
                log::error!("Failed to materialize '{}': {}", destination.display(), e);
                session.counters.materialize_failures += 1;
            }
            Err(e) => {
                log::error!("Materializer task for '{}' did not finish: {}", destination.display(), e);
                session.counters.materialize_failures += 1;
            }
        }
        Ok(())
    }

    fn prune_items(&self, counters: &mut PassCounters, children: &mut SnapshotChildren, remote: &[RemoteItem]) {
        children.retain(|id, node| match remote.iter().find(|r| &r.id == id) {
            None => {
                self.remove_artifact(node, counters);
                false
            }
            Some(sibling) => {
                if node.node_type == NodeType::Folder {
                    self.prune_items(counters, &mut node.items, &sibling.items);
                }
                true
            }
        });
    }

    /// Removal failures are logged; the snapshot entry goes away regardless
    fn remove_artifact(&self, node: &SnapshotNode, counters: &mut PassCounters) {
        let path = node.artifact_path(self.sync_dir);
        let result = match node.node_type {
            NodeType::Folder => {
                log::info!("Pruning '{}' folder", path.display());
                std::fs::remove_dir_all(&path)
            }
            NodeType::Notebook => {
                log::info!("Pruning '{}' notebook", path.display());
                std::fs::remove_file(&path)
            }
        };

        match result {
            Ok(()) => {
                counters.updated += 1;
                counters.pruned += 1;
            }
            Err(e) => {
                log::error!("Pruning '{}' failed: {}", path.display(), e);
                counters.prune_failures += 1;
            }
        }
    }
}
