//! Credential records, their freshness rules, and the refresh machinery.
//!
//! The core never talks to persistence directly; it goes through
//! [`CredentialStore`], which `storage::Database` implements.

mod endpoint;
mod refresher;

pub use endpoint::{HttpTokenEndpoint, RenewError, RenewedToken, TokenEndpoint};
pub use refresher::{RefreshError, TokenRefresher, DEFAULT_REFRESH_SKEW_MS};

use crate::platform::Platform;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

// ============================================================================
// Credential
// ============================================================================

/// Stored access/refresh token pair for one user on one platform.
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Access token expiry, epoch milliseconds
    pub expires_at: i64,
    /// Account selector for multi-account sign-in (usually the account email)
    pub auth_user_hint: Option<String>,
    /// Newest item timestamp already processed in incremental mode, epoch ms
    pub last_sync_watermark: Option<i64>,
    /// When the account was linked, epoch ms
    pub connected_at: i64,
}

/// Result of checking whether a credential can be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Access token is good for longer than the refresh skew
    Valid,
    /// Access token is expired or about to be; refresh before use
    Expired,
    /// No refresh token on file; the platform must be reconnected
    Missing,
}

impl Freshness {
    /// Classify a token expiring at `expires_at` as seen at `now_ms`.
    ///
    /// Without a refresh token the result is `Missing` even when the access
    /// token is still good, because the credential cannot be maintained.
    pub fn classify(has_refresh_token: bool, expires_at: i64, now_ms: i64, skew_ms: i64) -> Self {
        if !has_refresh_token {
            return Freshness::Missing;
        }
        if expires_at.saturating_sub(now_ms) > skew_ms {
            Freshness::Valid
        } else {
            Freshness::Expired
        }
    }
}

impl Credential {
    /// Classify this credential at `now_ms` with the given skew.
    pub fn freshness(&self, now_ms: i64, skew_ms: i64) -> Freshness {
        Freshness::classify(
            !self.refresh_token.expose_secret().is_empty(),
            self.expires_at,
            now_ms,
            skew_ms,
        )
    }
}

// SecretString clones are explicit so every copy of a token is visible here.
impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            access_token: SecretString::from(self.access_token.expose_secret().to_owned()),
            refresh_token: SecretString::from(self.refresh_token.expose_secret().to_owned()),
            expires_at: self.expires_at,
            auth_user_hint: self.auth_user_hint.clone(),
            last_sync_watermark: self.last_sync_watermark,
            connected_at: self.connected_at,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("auth_user_hint", &self.auth_user_hint)
            .field("last_sync_watermark", &self.last_sync_watermark)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Partial update for a stored credential. `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct CredentialUpdate {
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<i64>,
    pub last_sync_watermark: Option<i64>,
}

impl CredentialUpdate {
    pub fn watermark(ts: i64) -> Self {
        Self {
            last_sync_watermark: Some(ts),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.expires_at.is_none()
            && self.last_sync_watermark.is_none()
    }
}

/// A credential whose access token was confirmed usable when it was handed out.
#[derive(Debug, Clone)]
pub struct ValidCredential {
    pub user_id: String,
    pub platform: Platform,
    pub credential: Credential,
}

impl ValidCredential {
    pub fn access_token(&self) -> &str {
        self.credential.access_token.expose_secret()
    }
}

// ============================================================================
// Store contract
// ============================================================================

/// Read/update access to persisted credentials, keyed by (user, platform).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, platform: Platform) -> anyhow::Result<Option<Credential>>;

    /// Apply a partial update. Fails if no credential exists for the key.
    ///
    /// A watermark lower than the stored one must be ignored.
    async fn update(
        &self,
        user_id: &str,
        platform: Platform,
        update: CredentialUpdate,
    ) -> anyhow::Result<()>;
}
