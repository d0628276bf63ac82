use super::http::{get_json, join_path, parse_base_url, HttpSettings};
use super::{FetchError, ItemRef, Page, RawItem, RemoteSource};
use crate::platform::Platform;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

/// Headers requested when only metadata is needed.
const METADATA_HEADERS: [&str; 3] = ["Date", "From", "Subject"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// A message as returned by `users.messages.get`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Receive time in epoch ms, encoded as a decimal string
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

impl MailMessage {
    pub fn internal_date_ms(&self) -> i64 {
        self.internal_date
            .as_deref()
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// One node of the MIME tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    /// base64url-encoded content
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// Gmail REST API, messages only.
pub struct GmailSource {
    client: reqwest::Client,
    base_url: Url,
    settings: HttpSettings,
}

impl GmailSource {
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

    fn messages_url(&self, extra: &[&str]) -> Result<Url, FetchError> {
        let mut segments = vec!["gmail", "v1", "users", "me", "messages"];
        segments.extend_from_slice(extra);
        join_path(&self.base_url, &segments)
    }
}

#[async_trait]
impl RemoteSource for GmailSource {
    fn platform(&self) -> Platform {
        Platform::Gmail
    }

    fn keyword_filter(&self, raw_query: &str) -> String {
        raw_query.to_string()
    }

    fn incremental_filter(&self, watermark_ms: i64) -> String {
        format!("after:{} category:primary", watermark_ms.div_euclid(1000))
    }

    async fn list_page(
        &self,
        access_token: &str,
        query: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        let mut url = self.messages_url(&[])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("maxResults", &page_size.to_string());
            if !query.is_empty() {
                pairs.append_pair("q", query);
            }
            if let Some(cursor) = cursor {
                pairs.append_pair("pageToken", cursor);
            }
        }

        let response: ListResponse =
            get_json(&self.client, &url, access_token, &self.settings).await?;

        Ok(Page {
            items: response
                .messages
                .into_iter()
                .map(|m| ItemRef { id: m.id })
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
        let mut url = self.messages_url(&[item.id.as_str()])?;
        {
            let mut pairs = url.query_pairs_mut();
            if with_body {
                pairs.append_pair("format", "full");
            } else {
                pairs.append_pair("format", "metadata");
                for name in METADATA_HEADERS {
                    pairs.append_pair("metadataHeaders", name);
                }
            }
        }

        let message: MailMessage =
            get_json(&self.client, &url, access_token, &self.settings).await?;
        Ok(RawItem::Mail(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> GmailSource {
        GmailSource::new(
            reqwest::Client::new(),
            &server.uri(),
            HttpSettings {
                retry_base_delay: Duration::from_millis(1),
                ..HttpSettings::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_incremental_filter_uses_seconds() {
        let source = GmailSource::new(reqwest::Client::new(), GMAIL_API_BASE, HttpSettings::default()).unwrap();
        assert_eq!(
            source.incremental_filter(1_700_000_123_456),
            "after:1700000123 category:primary"
        );
        assert_eq!(source.keyword_filter("from:boss budget"), "from:boss budget");
    }

    #[tokio::test]
    async fn test_list_page_passes_query_size_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("q", "is:unread"))
            .and(query_param("maxResults", "50"))
            .and(query_param("pageToken", "cursor-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"messages":[{"id":"a1","threadId":"t1"},{"id":"a2","threadId":"t1"}],"nextPageToken":"cursor-3"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server)
            .list_page("tok", "is:unread", 50, Some("cursor-2"))
            .await
            .unwrap();
        assert_eq!(page.items, vec![ItemRef { id: "a1".into() }, ItemRef { id: "a2".into() }]);
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-3"));
    }

    #[tokio::test]
    async fn test_list_page_without_messages_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"resultSizeEstimate":0}"#))
            .mount(&server)
            .await;

        let page = source(&server).list_page("tok", "", 50, None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_fetch_item_metadata_only_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m42"))
            .and(query_param("format", "metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"id":"m42","labelIds":["INBOX"],"internalDate":"1700000000000",
                    "payload":{"mimeType":"text/plain","headers":[{"name":"Subject","value":"Hi"}]}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let item = source(&server)
            .fetch_item("tok", &ItemRef { id: "m42".into() }, false)
            .await
            .unwrap();
        assert_eq!(item.id(), "m42");
        assert_eq!(item.timestamp_ms(), 1_700_000_000_000);
        match item {
            RawItem::Mail(m) => {
                assert_eq!(m.label_ids, vec!["INBOX".to_string()]);
                assert_eq!(m.payload.unwrap().headers[0].value, "Hi");
            }
            other => panic!("Expected mail item, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_item_full_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"m1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let item = source(&server)
            .fetch_item("tok", &ItemRef { id: "m1".into() }, true)
            .await
            .unwrap();
        // Missing internalDate sorts as the epoch
        assert_eq!(item.timestamp_ms(), 0);
    }

    #[tokio::test]
    async fn test_fetch_item_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        match source(&server)
            .fetch_item("tok", &ItemRef { id: "gone".into() }, true)
            .await
        {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }
}
