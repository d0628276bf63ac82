use super::FetchError;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Gmail caps a message at 25MB; nothing we read should be larger.
pub(crate) const MAX_RESPONSE_SIZE: usize = 25 * 1024 * 1024;

/// Timeout and retry knobs shared by every remote source.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub retry_base_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl HttpSettings {
    fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(1u32 << retry_count.min(16))
    }
}

/// Parse an API base URL, requiring HTTPS except for loopback hosts.
pub fn parse_base_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim_end_matches('/'))
        .map_err(|e| FetchError::InvalidBaseUrl(format!("{raw}: {e}")))?;
    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(url),
        "http" if loopback => Ok(url),
        _ => Err(FetchError::InvalidBaseUrl(format!(
            "{raw}: HTTPS required"
        ))),
    }
}

/// Append `segments` to the path of `base`.
pub(crate) fn join_path(base: &Url, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Authorized GET with timeout, size limit, and backoff on 429/5xx.
///
/// # Errors
///
/// - [`FetchError::Unauthorized`] - 401, never retried here
/// - [`FetchError::RateLimited`] - still 429 after `max_retries`
/// - [`FetchError::HttpStatus`] - any other non-2xx (5xx after retries)
/// - [`FetchError::Timeout`] / [`FetchError::Network`] - transport failures
/// - [`FetchError::ResponseTooLarge`] - body over `limit`
pub(crate) async fn get_bytes(
    client: &reqwest::Client,
    url: &Url,
    access_token: &str,
    settings: &HttpSettings,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let mut retry_count = 0;

    loop {
        let response = tokio::time::timeout(
            settings.timeout,
            client.get(url.as_str()).bearer_auth(access_token).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            if retry_count >= settings.max_retries {
                return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    FetchError::RateLimited(settings.max_retries)
                } else {
                    FetchError::HttpStatus(status.as_u16())
                });
            }

            let delay = settings.backoff(retry_count);
            tracing::warn!(
                path = %url.path(),
                status = %status,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Remote API busy, backing off"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        match read_body(response, limit, settings.timeout).await {
            Ok(bytes) => return Ok(bytes),
            Err(FetchError::IncompleteResponse { expected, received })
                if retry_count < settings.max_retries =>
            {
                let delay = settings.backoff(retry_count);
                tracing::debug!(
                    path = %url.path(),
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    "Retrying incomplete download"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`get_bytes`] followed by JSON decoding.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    access_token: &str,
    settings: &HttpSettings,
) -> Result<T, FetchError> {
    let bytes = get_bytes(client, url, access_token, settings, MAX_RESPONSE_SIZE).await?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
}

/// [`read_limited_bytes`] with a deadline on the whole body, since the
/// request timeout only covers waiting for headers.
pub(crate) async fn read_body(
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    tokio::time::timeout(timeout, read_limited_bytes(response, limit))
        .await
        .map_err(|_| FetchError::Timeout)?
}

/// Read a response body, failing once it grows past `limit` bytes.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
