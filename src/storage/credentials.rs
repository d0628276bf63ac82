use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::schema::Database;
use super::types::{CredentialRow, LinkedAccount};
use crate::auth::{Credential, CredentialStore, CredentialUpdate};
use crate::platform::Platform;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CredentialRow {
    fn into_credential(self) -> Credential {
        Credential {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at: self.expires_at,
            auth_user_hint: self.auth_user_hint,
            last_sync_watermark: self.last_sync_watermark,
            connected_at: self.connected_at,
        }
    }
}

impl Database {
    // ========================================================================
    // Credential Operations
    // ========================================================================

    /// Link an account (UPSERT). Relinking replaces the whole record,
    /// including the watermark.
    pub async fn save_credential(
        &self,
        user_id: &str,
        platform: Platform,
        credential: &Credential,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (
                user_id, platform, access_token, refresh_token, expires_at,
                auth_user_hint, last_sync_watermark, connected_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                auth_user_hint = excluded.auth_user_hint,
                last_sync_watermark = excluded.last_sync_watermark,
                connected_at = excluded.connected_at,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(credential.access_token.expose_secret())
        .bind(credential.refresh_token.expose_secret())
        .bind(credential.expires_at)
        .bind(&credential.auth_user_hint)
        .bind(credential.last_sync_watermark)
        .bind(credential.connected_at)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .context("Failed to save credential")?;

        tracing::info!(user = %user_id, platform = %platform, "Saved credential");
        Ok(())
    }

    /// Remove a linked account. Returns false if nothing was stored.
    pub async fn delete_credential(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = ? AND platform = ?")
            .bind(user_id)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to delete credential")?;

        Ok(result.rows_affected() > 0)
    }

    /// All linked accounts for a user, ordered by platform name.
    ///
    /// Rows with a platform this build does not know are skipped.
    pub async fn list_credentials(&self, user_id: &str) -> Result<Vec<LinkedAccount>> {
        let rows: Vec<CredentialRow> = sqlx::query_as(
            r#"
            SELECT platform, access_token, refresh_token, expires_at,
                   auth_user_hint, last_sync_watermark, connected_at
            FROM credentials
            WHERE user_id = ?
            ORDER BY platform
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list credentials")?;

        let accounts = rows
            .into_iter()
            .filter_map(|row| match row.platform.parse::<Platform>() {
                Ok(platform) => Some(LinkedAccount {
                    platform,
                    auth_user_hint: row.auth_user_hint,
                    expires_at: row.expires_at,
                    last_sync_watermark: row.last_sync_watermark,
                    connected_at: row.connected_at,
                    has_refresh_token: !row.refresh_token.is_empty(),
                }),
                Err(e) => {
                    tracing::warn!(user = %user_id, error = %e, "Skipping credential row");
                    None
                }
            })
            .collect();

        Ok(accounts)
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn get(&self, user_id: &str, platform: Platform) -> Result<Option<Credential>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            r#"
            SELECT platform, access_token, refresh_token, expires_at,
                   auth_user_hint, last_sync_watermark, connected_at
            FROM credentials
            WHERE user_id = ? AND platform = ?
        "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load credential")?;

        Ok(row.map(CredentialRow::into_credential))
    }

    /// Apply only the fields the update carries, so a token refresh and a
    /// watermark advance never overwrite each other. The watermark only
    /// moves forward; an older value is ignored.
    async fn update(&self, user_id: &str, platform: Platform, update: CredentialUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE credentials SET
                access_token = COALESCE(?1, access_token),
                refresh_token = COALESCE(?2, refresh_token),
                expires_at = COALESCE(?3, expires_at),
                last_sync_watermark = CASE
                    WHEN ?4 IS NULL THEN last_sync_watermark
                    WHEN last_sync_watermark IS NULL OR ?4 > last_sync_watermark THEN ?4
                    ELSE last_sync_watermark
                END,
                updated_at = ?5
            WHERE user_id = ?6 AND platform = ?7
        "#,
        )
        .bind(update.access_token.as_ref().map(|t| t.expose_secret()))
        .bind(update.refresh_token.as_ref().map(|t| t.expose_secret()))
        .bind(update.expires_at)
        .bind(update.last_sync_watermark)
        .bind(now_ms())
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update credential")?;

        if result.rows_affected() == 0 {
            bail!("No stored credential for {platform}");
        }
        Ok(())
    }
}
