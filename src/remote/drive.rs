use super::http::{get_bytes, get_json, join_path, parse_base_url, HttpSettings};
use super::{FetchError, ItemRef, Page, RawItem, RemoteSource};
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use url::Url;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";

/// Drive refuses exports above 10MB.
const MAX_EXPORT_SIZE: usize = 10 * 1024 * 1024;

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,webViewLink,parents,owners(displayName,emailAddress)";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<FileRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

/// File metadata from `files.get`, plus its text when requested.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub owners: Vec<DriveOwner>,
    #[serde(skip)]
    pub content: Option<DriveContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveOwner {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// Downloaded or exported file text.
#[derive(Debug, Clone)]
pub struct DriveContent {
    pub mime_type: String,
    pub text: String,
}

impl DriveFile {
    pub fn modified_ms(&self) -> i64 {
        self.modified_time
            .map(|t| t.timestamp_millis())
            .unwrap_or(0)
    }
}

/// How to get readable text out of a file, by its MIME type.
enum ContentRoute {
    Export(&'static str),
    Download,
    None,
}

fn content_route(mime_type: &str) -> ContentRoute {
    match mime_type {
        "application/vnd.google-apps.document" | "application/vnd.google-apps.presentation" => {
            ContentRoute::Export("text/plain")
        }
        "application/vnd.google-apps.spreadsheet" => ContentRoute::Export("text/csv"),
        m if m.starts_with("text/") => ContentRoute::Download,
        _ => ContentRoute::None,
    }
}

/// Drive filter strings quote with `'` and escape with `\`.
fn escape_query_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Google Drive v3 files API.
pub struct DriveSource {
    client: reqwest::Client,
    base_url: Url,
    settings: HttpSettings,
}

impl DriveSource {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        settings: HttpSettings,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
            settings,
        })
    }

    async fn fetch_content(
        &self,
        access_token: &str,
        file: &DriveFile,
    ) -> Result<Option<DriveContent>, FetchError> {
        let (url, mime_type) = match content_route(&file.mime_type) {
            ContentRoute::Export(target) => {
                let mut url =
                    join_path(&self.base_url, &["drive", "v3", "files", file.id.as_str(), "export"])?;
                url.query_pairs_mut().append_pair("mimeType", target);
                (url, target.to_string())
            }
            ContentRoute::Download => {
                let mut url = join_path(&self.base_url, &["drive", "v3", "files", file.id.as_str()])?;
                url.query_pairs_mut().append_pair("alt", "media");
                (url, file.mime_type.clone())
            }
            ContentRoute::None => return Ok(None),
        };

        let bytes = get_bytes(&self.client, &url, access_token, &self.settings, MAX_EXPORT_SIZE)
            .await?;
        Ok(Some(DriveContent {
            mime_type,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        }))
    }
}

#[async_trait]
impl RemoteSource for DriveSource {
    fn platform(&self) -> Platform {
        Platform::Drive
    }

    fn keyword_filter(&self, raw_query: &str) -> String {
        format!(
            "fullText contains '{}' and trashed = false",
            escape_query_literal(raw_query)
        )
    }

    fn incremental_filter(&self, watermark_ms: i64) -> String {
        let since = DateTime::<Utc>::from_timestamp_millis(watermark_ms)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        format!("modifiedTime > '{since}' and trashed = false")
    }

    async fn list_page(
        &self,
        access_token: &str,
        query: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        let mut url = join_path(&self.base_url, &["drive", "v3", "files"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("pageSize", &page_size.to_string());
            pairs.append_pair("fields", "nextPageToken,files(id)");
            if !query.is_empty() {
                pairs.append_pair("q", query);
            }
            // Full-text results come back in relevance order
            if !query.contains("fullText") {
                pairs.append_pair("orderBy", "modifiedTime desc");
            }
            if let Some(cursor) = cursor {
                pairs.append_pair("pageToken", cursor);
            }
        }

        let response: ListResponse =
            get_json(&self.client, &url, access_token, &self.settings).await?;

        Ok(Page {
            items: response
                .files
                .into_iter()
                .map(|f| ItemRef { id: f.id })
                .collect(),
            next_cursor: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn fetch_item(
        &self,
        access_token: &str,
        item: &ItemRef,
        with_body: bool,
    ) -> Result<RawItem, FetchError> {
        let mut url = join_path(&self.base_url, &["drive", "v3", "files", item.id.as_str()])?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);

        let mut file: DriveFile =
            get_json(&self.client, &url, access_token, &self.settings).await?;
        if with_body {
            file.content = self.fetch_content(access_token, &file).await?;
        }
        Ok(RawItem::File(file))
    }
}
