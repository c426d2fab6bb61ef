use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name used under the platform config/data directories
const APP_DIR: &str = "scribe-sync";

/// Minimum sync interval (prevents runaway syncing)
const MIN_INTERVAL_MINUTES: u64 = 1;

/// Mobile user agent. The notebook pages are only served to mobile browsers.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; SAMSUNG SM-G973U) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/14.2 Chrome/87.0.4280.141 Mobile Safari/537.36";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Could not determine a data directory for this platform")]
    DataDirNotFound,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Sync configuration, loaded from a TOML file. Every key is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root of the local PDF mirror
    pub sync_dir: Option<PathBuf>,
    /// Where the snapshot, cookie cache, status and scratch files live
    pub data_dir: Option<PathBuf>,
    /// Minutes between scheduled passes
    pub interval_minutes: u64,
    /// Pause after each notebook metadata fetch
    pub request_delay_ms: u64,
    /// How long to wait for the user to complete sign-in
    pub auth_timeout_secs: u64,
    pub user_agent: String,
    pub render_width: u32,
    pub render_height: u32,
    pub render_dpi: u32,
    pub retry: RetryPolicy,
    pub endpoints: Endpoints,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_dir: None,
            data_dir: None,
            interval_minutes: 30,
            request_delay_ms: 1000,
            auth_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            render_width: 1200,
            render_height: 2500,
            render_dpi: 160,
            retry: RetryPolicy::default(),
            endpoints: Endpoints::default(),
        }
    }
}

/// Bounded retry for transient remote failures and session renewals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per request before giving up with `RemoteUnavailable`
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive re-authentications allowed for a single request
    pub max_reauth: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_reauth: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), doubling and capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Remote endpoint templates.
///
/// `open` takes `{id}`; `render` takes `{end}`, `{width}`, `{height}` and `{dpi}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub sign_in: String,
    pub list: String,
    pub open: String,
    pub render: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sign_in: "https://read.amazon.com/kindle-notebook?ref_=neo_mm_yn_na_kfa".to_string(),
            list: "https://read.amazon.com/kindle-notebook/api/notes".to_string(),
            open: "https://read.amazon.com/openNotebook?notebookId={id}&marketplaceId=ATVPDKIKX0DER"
                .to_string(),
            render: "https://read.amazon.com/renderPage?startPage=0&endPage={end}&width={width}&height={height}&dpi={dpi}"
                .to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at another host (used by tests against a local server)
    pub fn with_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            sign_in: format!("{}/kindle-notebook", base),
            list: format!("{}/kindle-notebook/api/notes", base),
            open: format!("{}/openNotebook?notebookId={{id}}", base),
            render: format!(
                "{}/renderPage?startPage=0&endPage={{end}}&width={{width}}&height={{height}}&dpi={{dpi}}",
                base
            ),
        }
    }
}

impl SyncConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&data).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()));
        }
        if !self.endpoints.open.contains("{id}") {
            return Err(ConfigError::Invalid("endpoints.open must contain {id}".to_string()));
        }
        if !self.endpoints.render.contains("{end}") {
            return Err(ConfigError::Invalid("endpoints.render must contain {end}".to_string()));
        }
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|p| p.join(APP_DIR))
                .ok_or(ConfigError::DataDirNotFound),
        }
    }

    /// Resolved mirror root
    pub fn sync_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.sync_dir {
            return Ok(dir.clone());
        }
        match dirs::document_dir() {
            Some(docs) => Ok(docs.join("kindle_notebooks")),
            None => Ok(self.data_dir()?.join("kindle_notebooks")),
        }
    }

    pub fn snapshot_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("notebooks.json"))
    }

    pub fn cookies_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("cookies.json"))
    }

    pub fn status_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("last_sync.json"))
    }

    pub fn extraction_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("extraction"))
    }

    /// Advisory lock held for the length of a pass, shared by every process on this data dir
    pub fn lock_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("sync.lock"))
    }

    pub fn log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("scribe-sync.log"))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(MIN_INTERVAL_MINUTES) * 60)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn list_url(&self) -> String {
        self.endpoints.list.clone()
    }

    pub fn open_url(&self, notebook_id: &str) -> String {
        self.endpoints.open.replace("{id}", notebook_id)
    }

    pub fn render_url(&self, end_page: u32) -> String {
        self.endpoints
            .render
            .replace("{end}", &end_page.to_string())
            .replace("{width}", &self.render_width.to_string())
            .replace("{height}", &self.render_height.to_string())
            .replace("{dpi}", &self.render_dpi.to_string())
    }
}

/// Result of a sync pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Update counter: materializations plus successful mirror removals
    pub updated: usize,
    /// Notebooks rendered to PDF this pass
    pub materialized: usize,
    /// Orphans whose mirror artifact was removed
    pub pruned: usize,
    /// Orphans whose mirror artifact could not be removed
    pub prune_failures: usize,
    pub finished_at: DateTime<Local>,
    pub duration_ms: u64,
}

/// Outcome of the most recent pass, persisted for `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_attempt: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<SyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Load from file; missing or unreadable yields `None`
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }

    /// One-line summary, in the spirit of "Last Updated: ... | Updated N item(s)"
    pub fn summary(&self) -> String {
        match (&self.last_success, &self.error) {
            (_, Some(error)) => format!(
                "Last attempt: {} | Failed: {}",
                self.last_attempt.format("%m/%d/%Y, %H:%M:%S"),
                error
            ),
            (Some(result), None) => format!(
                "Last Updated: {} | Updated '{}' item(s)",
                result.finished_at.format("%m/%d/%Y, %H:%M:%S"),
                result.updated
            ),
            (None, None) => "No Updates".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        assert_eq!(config.interval_minutes, 30);
        assert_eq!(config.request_delay_ms, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.user_agent.contains("Android"));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = SyncConfig::from_toml(
            r#"
            sync_dir = "/tmp/mirror"
            interval_minutes = 5

            [retry]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_dir().unwrap(), PathBuf::from("/tmp/mirror"));
        assert_eq!(config.interval(), Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_reauth, 3);
    }

    #[test]
    fn test_render_url_substitution() {
        let config = SyncConfig::default();
        let url = config.render_url(7);
        assert!(url.contains("endPage=7"));
        assert!(url.contains("width=1200"));
        assert!(url.contains("height=2500"));
        assert!(url.contains("dpi=160"));
        assert!(config.open_url("nb-1").contains("notebookId=nb-1"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1000,
            max_reauth: 3,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_load_rejects_zero_attempts() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(matches!(SyncConfig::load(Some(&path)), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SyncConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.render_dpi, 160);
    }
}
