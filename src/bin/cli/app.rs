use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use scribe_sync_lib::logging;
use scribe_sync_lib::sync::{
    CookieStore, PromptAuthProvider, SnapshotStore, SyncConfig, SyncManager, SyncStatus,
};

/// Shared application state for CLI commands
pub struct App {
    pub config: SyncConfig,
}

impl App {
    /// Load configuration from `config_path` or the default location
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = SyncConfig::load(config_path).context("Failed to load configuration")?;
        Ok(Self { config })
    }

    /// Console plus `<data_dir>/scribe-sync.log`
    pub fn init_logging(&self) {
        let log_path = self.config.log_path().ok();
        logging::init(log_path.as_deref());
    }

    /// Manager wired to the real service, prompting for sign-in when needed
    pub fn manager(&self) -> Result<SyncManager> {
        let auth = Arc::new(PromptAuthProvider::new(
            self.config.endpoints.sign_in.clone(),
            self.config.auth_timeout(),
        ));
        SyncManager::from_config(&self.config, auth).context("Failed to set up sync")
    }

    pub fn snapshot_store(&self) -> Result<SnapshotStore> {
        let path = self
            .config
            .snapshot_path()
            .context("Failed to get data directory")?;
        Ok(SnapshotStore::new(path))
    }

    pub fn cookie_store(&self) -> Result<CookieStore> {
        let path = self
            .config
            .cookies_path()
            .context("Failed to get data directory")?;
        Ok(CookieStore::new(path))
    }

    pub fn last_status(&self) -> Result<Option<SyncStatus>> {
        let path = self
            .config
            .status_path()
            .context("Failed to get data directory")?;
        Ok(SyncStatus::load(&path))
    }
}
