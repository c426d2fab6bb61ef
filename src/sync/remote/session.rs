use async_trait::async_trait;
use std::sync::Arc;

use super::client::{FetchOutcome, NotebookClient};
use super::{NotebookListing, NotebookMetadata, NotebookSource, OpenNotebookResponse, RemoteError, RemoteItem};
use crate::sync::auth::{AuthProvider, CookieSet, CookieStore};
use crate::sync::config::SyncConfig;

/// Authenticated session against the notebook service.
///
/// Every call follows the same contract: a redirect means the session
/// expired, so the cookies are dropped, a fresh set is obtained from the
/// auth provider and the request is retried. Other failures are retried with
/// exponential backoff up to the configured attempt limit.
pub struct RemoteSession {
    client: NotebookClient,
    config: SyncConfig,
    auth: Arc<dyn AuthProvider>,
    cookie_store: CookieStore,
    cookies: Option<CookieSet>,
    authentications: usize,
}

impl RemoteSession {
    pub fn new(
        config: SyncConfig,
        auth: Arc<dyn AuthProvider>,
        cookie_store: CookieStore,
    ) -> Result<Self, RemoteError> {
        let client = NotebookClient::new(&config.user_agent)?;
        Ok(Self {
            client,
            config,
            auth,
            cookie_store,
            cookies: None,
            authentications: 0,
        })
    }

    /// Start from a known cookie set instead of the cache
    pub fn with_cookies(mut self, cookies: CookieSet) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// Number of times the auth provider was asked for a new session
    pub fn authentications(&self) -> usize {
        self.authentications
    }

    /// Drop the session, in memory and on disk
    pub fn invalidate(&mut self) {
        self.cookies = None;
        if let Err(e) = self.cookie_store.clear() {
            log::warn!("Failed to delete cookie cache: {}", e);
        }
    }

    async fn ensure_cookies(&mut self) -> Result<CookieSet, RemoteError> {
        if let Some(cookies) = &self.cookies {
            return Ok(cookies.clone());
        }
        if let Some(cookies) = self.cookie_store.load() {
            self.cookies = Some(cookies.clone());
            return Ok(cookies);
        }
        self.authenticate().await
    }

    async fn authenticate(&mut self) -> Result<CookieSet, RemoteError> {
        let cookies = self.auth.authenticate().await?;
        self.authentications += 1;
        if let Err(e) = self.cookie_store.save(&cookies) {
            log::warn!("Failed to save cookies: {}", e);
        }
        self.cookies = Some(cookies.clone());
        Ok(cookies)
    }

    /// GET with the session retry contract. With a render token, a session
    /// renewal ends the call with `TokenInvalidated` instead of retrying.
    async fn fetch(&mut self, url: &str, render_token: Option<&str>) -> Result<Vec<u8>, RemoteError> {
        let retry = self.config.retry.clone();
        let mut failures = 0u32;
        let mut reauths = 0u32;

        loop {
            let cookies = self.ensure_cookies().await?;

            let (status, message) = match self.client.get(url, &cookies, render_token).await {
                Ok(FetchOutcome::Success { body, set_cookies }) => {
                    if let Some(current) = self.cookies.as_mut() {
                        for set_cookie in &set_cookies {
                            current.apply_set_cookie(set_cookie);
                        }
                    }
                    self.persist_session();
                    return Ok(body);
                }
                Ok(FetchOutcome::SessionExpired { status }) => {
                    reauths += 1;
                    if reauths > retry.max_reauth {
                        return Err(RemoteError::AuthLoop(retry.max_reauth));
                    }
                    log::info!("Session expired (HTTP {}) on {}, re-authenticating", status, url);
                    self.invalidate();
                    self.authenticate().await?;
                    if render_token.is_some() {
                        return Err(RemoteError::TokenInvalidated);
                    }
                    continue;
                }
                Ok(FetchOutcome::Failed { status, message }) => (Some(status), message),
                Err(e) => (None, e.to_string()),
            };

            failures += 1;
            if failures >= retry.max_attempts {
                return Err(RemoteError::RemoteUnavailable {
                    url: url.to_string(),
                    status,
                    attempts: failures,
                    message,
                });
            }

            let delay = retry.backoff(failures);
            log::warn!(
                "Request to {} failed (status={:?}, attempt {}/{}), retrying in {:?}",
                url,
                status,
                failures,
                retry.max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NotebookSource for RemoteSession {
    async fn list_items(&mut self) -> Result<Vec<RemoteItem>, RemoteError> {
        log::info!("Getting all notebooks");
        let url = self.config.list_url();
        let body = self.fetch(&url, None).await?;
        let listing: NotebookListing = serde_json::from_slice(&body)?;
        Ok(listing.items_list)
    }

    async fn open_notebook(&mut self, id: &str) -> Result<NotebookMetadata, RemoteError> {
        log::info!("Getting notebook '{}' data", id);
        let url = self.config.open_url(id);
        let body = self.fetch(&url, None).await?;
        let response: OpenNotebookResponse = serde_json::from_slice(&body)?;
        Ok(response.into())
    }

    async fn render_pages(&mut self, token: &str, end_page: u32) -> Result<Vec<u8>, RemoteError> {
        log::info!("Rendering notebook pages 0..={}", end_page);
        let url = self.config.render_url(end_page);
        self.fetch(&url, Some(token)).await
    }

    fn persist_session(&self) {
        if let Some(cookies) = &self.cookies {
            if let Err(e) = self.cookie_store.save(cookies) {
                log::warn!("Failed to save cookies: {}", e);
            }
        }
    }
}
