use crate::auth::Freshness;
use crate::platform::Platform;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("The credential database is locked by another workbridge process. Please wait and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for credential queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CredentialRow {
    pub platform: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub auth_user_hint: Option<String>,
    pub last_sync_watermark: Option<i64>,
    pub connected_at: i64,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Non-secret view of a linked account, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
    pub platform: Platform,
    pub auth_user_hint: Option<String>,
    pub expires_at: i64,
    pub last_sync_watermark: Option<i64>,
    pub connected_at: i64,
    /// False when the record has no refresh token and must be relinked
    pub has_refresh_token: bool,
}

impl LinkedAccount {
    pub fn freshness(&self, now_ms: i64, skew_ms: i64) -> Freshness {
        Freshness::classify(self.has_refresh_token, self.expires_at, now_ms, skew_ms)
    }
}
