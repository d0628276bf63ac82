use crate::platform::Platform;
use crate::remote::http::read_body;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Token responses are tiny; anything bigger is not a token response.
const MAX_TOKEN_RESPONSE_SIZE: usize = 64 * 1024;

/// Error codes meaning the refresh token itself is no longer accepted.
const INVALID_GRANT_CODES: [&str; 2] = ["invalid_grant", "invalid_token"];

/// A successful renewal.
pub struct RenewedToken {
    pub access_token: SecretString,
    /// Lifetime of the new access token, if the endpoint reported one
    pub expires_in_secs: Option<u64>,
    /// Present when the endpoint rotated the refresh token
    pub refresh_token: Option<SecretString>,
}

#[derive(Debug, Error)]
pub enum RenewError {
    /// The endpoint rejected the refresh token; only a new consent fixes this
    #[error("Refresh token rejected: {0}")]
    InvalidGrant(String),
    /// Timeout, connection failure, server error or unreadable response
    #[error("Token renewal failed: {0}")]
    Transient(String),
}

/// The remote call that trades a refresh token for a new access token.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn renew(
        &self,
        platform: Platform,
        refresh_token: &SecretString,
    ) -> Result<RenewedToken, RenewError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 refresh-token grant over HTTPS.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    timeout: Duration,
}

impl HttpTokenEndpoint {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn renew(
        &self,
        platform: Platform,
        refresh_token: &SecretString,
    ) -> Result<RenewedToken, RenewError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", refresh_token.expose_secret())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", self.client_secret.expose_secret())
            .finish();

        let request = self
            .client
            .post(&self.token_url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                RenewError::Transient(format!(
                    "request timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| RenewError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        let bytes = read_body(response, MAX_TOKEN_RESPONSE_SIZE, self.timeout)
            .await
            .map_err(|e| RenewError::Transient(e.to_string()))?;

        if status.is_success() {
            let parsed: TokenResponse = serde_json::from_slice(&bytes)
                .map_err(|e| RenewError::Transient(format!("malformed token response: {e}")))?;
            if parsed.access_token.is_empty() {
                return Err(RenewError::Transient(
                    "token response had an empty access_token".to_string(),
                ));
            }
            tracing::debug!(
                platform = %platform,
                expires_in = ?parsed.expires_in,
                rotated = parsed.refresh_token.is_some(),
                "Access token renewed"
            );
            return Ok(RenewedToken {
                access_token: SecretString::from(parsed.access_token),
                expires_in_secs: parsed.expires_in,
                refresh_token: parsed
                    .refresh_token
                    .filter(|t| !t.is_empty())
                    .map(SecretString::from),
            });
        }

        if let Ok(body) = serde_json::from_slice::<TokenErrorBody>(&bytes) {
            if INVALID_GRANT_CODES.contains(&body.error.as_str()) {
                let detail = body.error_description.unwrap_or(body.error);
                tracing::warn!(platform = %platform, detail = %detail, "Refresh token rejected");
                return Err(RenewError::InvalidGrant(detail));
            }
            return Err(RenewError::Transient(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.error
            )));
        }

        Err(RenewError::Transient(format!("HTTP {}", status.as_u16())))
    }
}
