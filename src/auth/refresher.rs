use super::{
    Credential, CredentialStore, CredentialUpdate, Freshness, RenewError, TokenEndpoint,
    ValidCredential,
};
use crate::platform::Platform;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Refresh when the access token has this many milliseconds or fewer left.
pub const DEFAULT_REFRESH_SKEW_MS: i64 = 60_000;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("{platform} is not connected")]
    NotConnected { platform: Platform },
    #[error("{platform} access was revoked, reconnect required")]
    ReauthRequired { platform: Platform },
    #[error("Token refresh failed: {0}")]
    Transient(String),
    #[error("Failed to persist refreshed credential: {0}")]
    Persistence(String),
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Hands out credentials whose access token is safe to use, renewing when needed.
///
/// Renewals are serialized per (user, platform): the first caller renews and
/// persists, later callers wait on the same lock and then read the fresh
/// credential back from the store instead of renewing again.
pub struct TokenRefresher {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    skew_ms: i64,
    locks: Mutex<HashMap<(String, Platform), KeyLock>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn CredentialStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            store,
            endpoint,
            skew_ms: DEFAULT_REFRESH_SKEW_MS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_skew_ms(mut self, skew_ms: i64) -> Self {
        self.skew_ms = skew_ms.max(0);
        self
    }

    /// Clones are only taken under the registry mutex, so an entry nobody
    /// else holds can be dropped without splitting a key across two locks.
    fn key_lock(&self, user_id: &str, platform: Platform) -> KeyLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((user_id.to_string(), platform))
            .or_default()
            .clone()
    }

    async fn load(&self, user_id: &str, platform: Platform) -> Result<Credential, RefreshError> {
        self.store
            .get(user_id, platform)
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?
            .ok_or(RefreshError::NotConnected { platform })
    }

    /// Return a credential that is usable for at least the refresh skew.
    ///
    /// # Errors
    ///
    /// - [`RefreshError::NotConnected`] - no record or empty refresh token
    /// - [`RefreshError::ReauthRequired`] - the refresh token was rejected
    /// - [`RefreshError::Transient`] - renewal failed for any other reason;
    ///   the stored credential is unchanged
    /// - [`RefreshError::Persistence`] - the store could not be read, or the
    ///   renewed token could not be saved
    pub async fn ensure_valid(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<ValidCredential, RefreshError> {
        let lock = self.key_lock(user_id, platform);
        let _guard = lock.lock().await;

        let credential = self.load(user_id, platform).await?;
        match credential.freshness(now_ms(), self.skew_ms) {
            Freshness::Missing => Err(RefreshError::NotConnected { platform }),
            Freshness::Valid => Ok(ValidCredential {
                user_id: user_id.to_string(),
                platform,
                credential,
            }),
            Freshness::Expired => self.renew(user_id, platform, credential).await,
        }
    }

    /// Renew regardless of expiry, for when the remote rejected `stale_access_token`.
    ///
    /// If the stored token already differs from `stale_access_token`, another
    /// caller renewed it in the meantime and the stored one is returned.
    pub async fn force_refresh(
        &self,
        user_id: &str,
        platform: Platform,
        stale_access_token: &str,
    ) -> Result<ValidCredential, RefreshError> {
        let lock = self.key_lock(user_id, platform);
        let _guard = lock.lock().await;

        let credential = self.load(user_id, platform).await?;
        if credential.freshness(now_ms(), self.skew_ms) == Freshness::Missing {
            return Err(RefreshError::NotConnected { platform });
        }
        if credential.access_token.expose_secret() != stale_access_token {
            tracing::debug!(user = %user_id, platform = %platform, "Token already replaced by a concurrent refresh");
            return Ok(ValidCredential {
                user_id: user_id.to_string(),
                platform,
                credential,
            });
        }
        self.renew(user_id, platform, credential).await
    }

    async fn renew(
        &self,
        user_id: &str,
        platform: Platform,
        mut credential: Credential,
    ) -> Result<ValidCredential, RefreshError> {
        tracing::info!(
            user = %user_id,
            platform = %platform,
            expires_at = credential.expires_at,
            "Refreshing access token"
        );

        let renewed = match self
            .endpoint
            .renew(platform, &credential.refresh_token)
            .await
        {
            Ok(renewed) => renewed,
            Err(RenewError::InvalidGrant(detail)) => {
                tracing::warn!(user = %user_id, platform = %platform, detail = %detail, "Reauthorization required");
                return Err(RefreshError::ReauthRequired { platform });
            }
            Err(RenewError::Transient(msg)) => {
                tracing::warn!(user = %user_id, platform = %platform, error = %msg, "Token refresh failed");
                return Err(RefreshError::Transient(msg));
            }
        };

        let lifetime_ms = renewed
            .expires_in_secs
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .saturating_mul(1000)
            .min(i64::MAX as u64) as i64;
        let expires_at = now_ms().saturating_add(lifetime_ms);

        let update = CredentialUpdate {
            access_token: Some(SecretString::from(
                renewed.access_token.expose_secret().to_owned(),
            )),
            refresh_token: renewed
                .refresh_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_owned())),
            expires_at: Some(expires_at),
            last_sync_watermark: None,
        };

        // Persist before handing the token out; an unsaved token would be
        // renewed again on every call.
        self.store
            .update(user_id, platform, update)
            .await
            .map_err(|e| RefreshError::Persistence(e.to_string()))?;

        credential.access_token = renewed.access_token;
        if let Some(rotated) = renewed.refresh_token {
            credential.refresh_token = rotated;
        }
        credential.expires_at = expires_at;

        Ok(ValidCredential {
            user_id: user_id.to_string(),
            platform,
            credential,
        })
    }
}
