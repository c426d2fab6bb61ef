pub mod auth;
pub mod config;
pub mod metadata;
pub mod reconcile;
pub mod remote;
pub mod render;
pub mod scheduler;

mod manager;

pub use auth::{AuthError, AuthProvider, CookieSet, CookieStore, PromptAuthProvider};
pub use config::{ConfigError, SyncConfig, SyncResult, SyncStatus};
pub use manager::{SyncError, SyncManager};
pub use metadata::{NodeType, SnapshotChildren, SnapshotNode, SnapshotStore, SnapshotTree};
pub use reconcile::{PassCounters, Reconciler, SyncSession, MAX_TREE_DEPTH};
pub use remote::{NotebookMetadata, NotebookSource, RemoteError, RemoteItem, RemoteSession};
pub use render::{DocumentMaterializer, MaterializeError, Materializer};
pub use scheduler::{start_sync_scheduler, SyncScheduler, SyncSchedulerMessage};
