use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{redirect, Client};

use crate::sync::auth::CookieSet;

/// Header carrying the one-time render token
pub const RENDER_TOKEN_HEADER: &str = "x-amzn-karamel-notebook-rendering-token";

/// HTTP transport for the notebook service.
///
/// Redirects are never followed: the service answers an expired session with
/// a redirect to its sign-in page, and that has to be visible to the caller.
pub struct NotebookClient {
    client: Client,
}

/// What a single request came back with
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        body: Vec<u8>,
        set_cookies: Vec<String>,
    },
    /// Redirected to sign-in
    SessionExpired { status: u16 },
    /// Any other non-success status
    Failed { status: u16, message: String },
}

impl NotebookClient {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }

    /// GET `url` with the session cookies and, for render calls, the render token
    pub async fn get(
        &self,
        url: &str,
        cookies: &CookieSet,
        render_token: Option<&str>,
    ) -> Result<FetchOutcome, reqwest::Error> {
        let mut request = self.client.get(url);
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookies.header_value());
        }
        if let Some(token) = render_token {
            request = request.header(RENDER_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_redirection() {
            return Ok(FetchOutcome::SessionExpired {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Ok(FetchOutcome::Failed {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = response.bytes().await?.to_vec();
        Ok(FetchOutcome::Success { body, set_cookies })
    }
}
