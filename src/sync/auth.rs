use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// A cached cookie set with fewer cookies than this is not a real session
const MIN_SESSION_COOKIES: usize = 5;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Timed out after {0:?} waiting for sign-in")]
    Timeout(Duration),
    #[error("Sign-in was cancelled")]
    Cancelled,
    #[error("No cookies in the pasted value")]
    NoCookies,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session cookies, name -> value
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CookieSet {
    cookies: BTreeMap<String, String>,
}

impl CookieSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cookie` header value: `a=1; b=2`
    pub fn parse_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { cookies }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for a `Cookie` request header
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Merge a `Set-Cookie` response header (only the name=value part matters here)
    pub fn apply_set_cookie(&mut self, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                self.cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
}

/// Cookie cache file
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached cookies; `None` when absent, unreadable or too small to be a session
    pub fn load(&self) -> Option<CookieSet> {
        log::info!("Attempting to load cookies");
        let data = std::fs::read_to_string(&self.path).ok()?;
        let cookies: CookieSet = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Cookie cache {} is unreadable: {}", self.path.display(), e);
                return None;
            }
        };
        if cookies.len() < MIN_SESSION_COOKIES {
            log::info!("Cached cookie set is incomplete ({} cookies), ignoring", cookies.len());
            return None;
        }
        log::info!("Loaded {} cookies from cache", cookies.len());
        Some(cookies)
    }

    pub fn save(&self, cookies: &CookieSet) -> Result<(), std::io::Error> {
        log::debug!("Saving cookies");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, data)?;
        // Restrict permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }

    /// Delete the cache file
    pub fn clear(&self) -> Result<(), std::io::Error> {
        log::info!("Deleting cached cookies");
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Produces a fresh authenticated cookie set
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self) -> Result<CookieSet, AuthError>;
}

/// Asks the user to sign in with a browser and paste the resulting `Cookie` header.
///
/// Pasted lines come from one long-lived reader, so a prompt that timed out
/// leaves nothing behind and a late paste answers the next prompt.
pub struct PromptAuthProvider {
    sign_in_url: String,
    timeout: Duration,
    /// Started on first use when reading from stdin
    lines: Mutex<Option<mpsc::Receiver<String>>>,
}

impl PromptAuthProvider {
    pub fn new(sign_in_url: String, timeout: Duration) -> Self {
        Self {
            sign_in_url,
            timeout,
            lines: Mutex::new(None),
        }
    }

    /// Read pasted lines from `lines` instead of stdin
    pub fn with_lines(sign_in_url: String, timeout: Duration, lines: mpsc::Receiver<String>) -> Self {
        Self {
            sign_in_url,
            timeout,
            lines: Mutex::new(Some(lines)),
        }
    }
}

/// Forward stdin lines until EOF. The thread is detached; closing the
/// channel on EOF is what turns a pending prompt into `Cancelled`.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>, AuthError> {
    let (tx, rx) = mpsc::channel(4);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.blocking_send(line.clone()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Reading stdin failed: {}", e);
                        break;
                    }
                }
            }
            log::debug!("stdin closed, sign-in prompts will be cancelled");
        })?;
    Ok(rx)
}

#[async_trait]
impl AuthProvider for PromptAuthProvider {
    async fn authenticate(&self) -> Result<CookieSet, AuthError> {
        log::info!("Authenticating to {}", self.sign_in_url);
        eprintln!();
        eprintln!("Sign in required. Open this page in a browser using a mobile user agent:");
        eprintln!("  {}", self.sign_in_url);
        eprintln!("Once the notebook library is shown, paste the request's Cookie header here");
        eprintln!("(waiting {}s):", self.timeout.as_secs());

        let mut lines = self.lines.lock().await;
        if lines.is_none() {
            *lines = Some(spawn_stdin_reader()?);
        }
        let Some(receiver) = lines.as_mut() else {
            return Err(AuthError::Cancelled);
        };

        log::info!("Waiting for authentication");
        let line = match tokio::time::timeout(self.timeout, receiver.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(AuthError::Cancelled),
            Err(_) => return Err(AuthError::Timeout(self.timeout)),
        };

        let value = line.trim();
        let value = value
            .strip_prefix("Cookie:")
            .or_else(|| value.strip_prefix("cookie:"))
            .unwrap_or(value);
        let cookies = CookieSet::parse_header(value);
        if cookies.is_empty() {
            return Err(AuthError::NoCookies);
        }
        log::info!("Authenticated with {} cookies", cookies.len());
        Ok(cookies)
    }
}
