mod client;
mod session;

pub use client::{FetchOutcome, NotebookClient};
pub use session::RemoteSession;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::auth::AuthError;
use super::metadata::NodeType;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Session kept expiring after {0} re-authentications")]
    AuthLoop(u32),
    #[error("Remote unavailable after {attempts} attempts on {url}: {message}")]
    RemoteUnavailable {
        url: String,
        status: Option<u16>,
        attempts: u32,
        message: String,
    },
    #[error("Render token invalidated by re-authentication")]
    TokenInvalidated,
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Kind of a remote item as reported by the list endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteItemType {
    Folder,
    Notebook,
    #[serde(other)]
    Unknown,
}

impl RemoteItemType {
    pub fn node_type(self) -> Option<NodeType> {
        match self {
            Self::Folder => Some(NodeType::Folder),
            Self::Notebook => Some(NodeType::Notebook),
            Self::Unknown => None,
        }
    }
}

/// One entry of the remote hierarchy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: RemoteItemType,
    #[serde(default)]
    pub title: String,
    /// Children, for folders
    #[serde(default)]
    pub items: Vec<RemoteItem>,
}

impl RemoteItem {
    pub fn folder(id: &str, title: &str, items: Vec<RemoteItem>) -> Self {
        Self {
            id: id.to_string(),
            item_type: RemoteItemType::Folder,
            title: title.to_string(),
            items,
        }
    }

    pub fn notebook(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            item_type: RemoteItemType::Notebook,
            title: title.to_string(),
            items: Vec::new(),
        }
    }
}

/// Body of the list endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct NotebookListing {
    #[serde(rename = "itemsList", default)]
    pub items_list: Vec<RemoteItem>,
}

/// Per-notebook data from the open endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookMetadata {
    pub modification_time: i64,
    pub total_pages: u32,
    /// One-time credential for a single render request
    pub rendering_token: String,
}

impl NotebookMetadata {
    /// Last page index to render. An empty notebook still renders page 0.
    pub fn end_page(&self) -> u32 {
        self.total_pages.saturating_sub(1)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpenNotebookResponse {
    metadata: OpenNotebookMetadata,
    rendering_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenNotebookMetadata {
    #[serde(deserialize_with = "deserialize_epoch")]
    modification_time: i64,
    #[serde(default)]
    total_pages: u32,
}

impl From<OpenNotebookResponse> for NotebookMetadata {
    fn from(r: OpenNotebookResponse) -> Self {
        Self {
            modification_time: r.metadata.modification_time,
            total_pages: r.metadata.total_pages,
            rendering_token: r.rendering_token,
        }
    }
}

/// Accept integer or fractional epoch values
fn deserialize_epoch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Number::deserialize(deserializer)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| serde::de::Error::custom("modificationTime out of range"))
}

/// Remote notebook service as seen by the reconciler
#[async_trait]
pub trait NotebookSource: Send {
    /// The whole item hierarchy
    async fn list_items(&mut self) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Metadata and a fresh render token for one notebook
    async fn open_notebook(&mut self, id: &str) -> Result<NotebookMetadata, RemoteError>;

    /// Archive of rendered pages `0..=end_page`
    async fn render_pages(&mut self, token: &str, end_page: u32) -> Result<Vec<u8>, RemoteError>;

    /// Best-effort write of the current session for reuse
    fn persist_session(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let body = r#"{
            "itemsList": [
                {"id": "f1", "type": "folder", "title": "Work", "items": [
                    {"id": "n1", "type": "notebook", "title": "Standup"}
                ]},
                {"id": "n2", "type": "notebook", "title": "Diary"},
                {"id": "x1", "type": "template", "title": "Grid"}
            ]
        }"#;
        let listing: NotebookListing = serde_json::from_str(body).unwrap();
        assert_eq!(listing.items_list.len(), 3);
        assert_eq!(listing.items_list[0].items[0], RemoteItem::notebook("n1", "Standup"));
        assert_eq!(listing.items_list[2].item_type, RemoteItemType::Unknown);
        assert_eq!(listing.items_list[2].item_type.node_type(), None);
    }

    #[test]
    fn test_parse_open_notebook() {
        let body = r#"{
            "metadata": {"modificationTime": 1700000123.5, "totalPages": 4, "title": "x"},
            "renderingToken": "tok"
        }"#;
        let response: OpenNotebookResponse = serde_json::from_str(body).unwrap();
        let metadata = NotebookMetadata::from(response);
        assert_eq!(metadata.modification_time, 1_700_000_123);
        assert_eq!(metadata.total_pages, 4);
        assert_eq!(metadata.end_page(), 3);
        assert_eq!(metadata.rendering_token, "tok");
    }

    #[test]
    fn test_end_page_of_empty_notebook_is_zero() {
        let metadata = NotebookMetadata {
            modification_time: 1,
            total_pages: 0,
            rendering_token: String::new(),
        };
        assert_eq!(metadata.end_page(), 0);
    }
}
