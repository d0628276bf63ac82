//! Remote retrieval APIs and the bounded page loop that drives them.

pub mod drive;
pub mod gmail;
pub mod http;
mod pager;

pub use drive::{DriveFile, DriveSource};
pub use gmail::{GmailSource, MailMessage, MessagePart};
pub use http::HttpSettings;
pub use pager::{fetch_pages, PageLimits, DEFAULT_PAGE_SIZE, DEFAULT_RESULT_CAP};

use crate::platform::Platform;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors from the listing and detail calls of a remote API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status other than 401
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The access token was rejected
    #[error("Access token rejected by remote API")]
    Unauthorized,
    #[error("Request timed out")]
    Timeout,
    /// Still 429 Too Many Requests after the configured retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Payload was not the JSON shape the API documents
    #[error("Unexpected response payload: {0}")]
    Decode(String),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Reference to one remote item, as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<ItemRef>,
    /// Opaque continuation cursor; `None` on the last page
    pub next_cursor: Option<String>,
}

/// A full item payload as returned by a detail call.
#[derive(Debug, Clone)]
pub enum RawItem {
    Mail(MailMessage),
    File(DriveFile),
}

impl RawItem {
    pub fn id(&self) -> &str {
        match self {
            RawItem::Mail(m) => &m.id,
            RawItem::File(f) => &f.id,
        }
    }

    /// Remote ordering key in epoch ms (receive time for mail, modify time for files).
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            RawItem::Mail(m) => m.internal_date_ms(),
            RawItem::File(f) => f.modified_ms(),
        }
    }
}

/// A platform's listing and detail API.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Turn a user's keyword query into this API's filter syntax.
    fn keyword_filter(&self, raw_query: &str) -> String;

    /// Filter selecting items newer than `watermark_ms`, newest first.
    fn incremental_filter(&self, watermark_ms: i64) -> String;

    async fn list_page(
        &self,
        access_token: &str,
        query: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError>;

    /// Fetch one item. Bodies are only retrieved when `with_body` is set.
    async fn fetch_item(
        &self,
        access_token: &str,
        item: &ItemRef,
        with_body: bool,
    ) -> Result<RawItem, FetchError>;
}

/// One source per platform.
#[derive(Clone)]
pub struct Sources {
    pub gmail: Arc<dyn RemoteSource>,
    pub drive: Arc<dyn RemoteSource>,
}

impl Sources {
    /// Build the production sources against the given API base URLs.
    pub fn google(
        client: reqwest::Client,
        gmail_base_url: &str,
        drive_base_url: &str,
        settings: HttpSettings,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            gmail: Arc::new(GmailSource::new(client.clone(), gmail_base_url, settings.clone())?),
            drive: Arc::new(DriveSource::new(client, drive_base_url, settings)?),
        })
    }

    pub fn for_platform(&self, platform: Platform) -> &dyn RemoteSource {
        match platform {
            Platform::Gmail => self.gmail.as_ref(),
            Platform::Drive => self.drive.as_ref(),
        }
    }
}
