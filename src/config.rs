//! Configuration file parser for ~/.config/workbridge/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::auth::DEFAULT_REFRESH_SKEW_MS;
use crate::redact::CustomPattern;
use crate::remote::drive::DRIVE_API_BASE;
use crate::remote::gmail::GMAIL_API_BASE;
use crate::remote::{HttpSettings, PageLimits, DEFAULT_PAGE_SIZE, DEFAULT_RESULT_CAP};

/// Env var that overrides `google.client_secret`.
pub const CLIENT_SECRET_ENV: &str = "WORKBRIDGE_GOOGLE_CLIENT_SECRET";

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Largest page size the remote APIs accept.
const MAX_PAGE_SIZE: usize = 500;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// Every section and key is optional; missing keys take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub auth: AuthConfig,
    pub google: GoogleConfig,
    pub redaction: RedactionConfig,
}

/// Paging and HTTP behaviour for remote listings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: usize,
    pub result_cap: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            result_cap: DEFAULT_RESULT_CAP,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl FetchConfig {
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            page_size: self.page_size,
            result_cap: self.result_cap,
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Tokens closer than this to expiry are refreshed before use.
    pub refresh_skew_ms: i64,
    pub token_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_skew_ms: DEFAULT_REFRESH_SKEW_MS,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// OAuth client and API endpoints. Custom Debug masks `client_secret`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    /// Env var `WORKBRIDGE_GOOGLE_CLIENT_SECRET` takes precedence.
    pub client_secret: Option<String>,
    pub gmail_base_url: String,
    pub drive_base_url: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            gmail_base_url: GMAIL_API_BASE.to_string(),
            drive_base_url: DRIVE_API_BASE.to_string(),
        }
    }
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gmail_base_url", &self.gmail_base_url)
            .field("drive_base_url", &self.drive_base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// Extra patterns applied after the built-in ones.
    pub patterns: Vec<CustomPattern>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [(&'static str, &'static [&'static str]); 4] = [
        (
            "fetch",
            &[
                "page_size",
                "result_cap",
                "request_timeout_secs",
                "max_retries",
                "retry_base_delay_ms",
            ],
        ),
        ("auth", &["refresh_skew_ms", "token_url"]),
        (
            "google",
            &["client_id", "client_secret", "gmail_base_url", "drive_base_url"],
        ),
        ("redaction", &["patterns"]),
    ];

    /// Load configuration from a TOML file, then apply env overrides.
    ///
    /// - Missing or empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            if !secret.trim().is_empty() {
                config.google.client_secret = Some(secret);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        // Size check before reading guards against a huge or corrupted file
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            Self::warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            extra_patterns = config.redaction.patterns.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn warn_unknown_keys(raw: &toml::Table) {
        for (section, value) in raw {
            let Some((_, keys)) = Self::KNOWN_KEYS.iter().find(|(name, _)| *name == section.as_str()) else {
                tracing::warn!(key = %section, "Unknown section in config file, ignoring");
                continue;
            };
            if let Some(table) = value.as_table() {
                for key in table.keys() {
                    if !keys.contains(&key.as_str()) {
                        tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
                    }
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.page_size == 0 || self.fetch.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "fetch.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.fetch.page_size
            )));
        }
        if self.fetch.result_cap == 0 {
            return Err(ConfigError::Invalid(
                "fetch.result_cap must be at least 1".to_string(),
            ));
        }
        if self.auth.refresh_skew_ms < 0 {
            return Err(ConfigError::Invalid(format!(
                "auth.refresh_skew_ms must not be negative, got {}",
                self.auth.refresh_skew_ms
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
