//! Entry point for retrieval: keeps the credential valid, walks the remote
//! listing, normalizes what came back and, for incremental runs, applies the
//! watermark and redaction before handing documents out.

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::auth::{CredentialStore, CredentialUpdate, RefreshError, TokenRefresher, ValidCredential};
use crate::normalize::{normalize, AccountContext, Document};
use crate::platform::Platform;
use crate::redact::RedactionPipeline;
use crate::remote::{fetch_pages, FetchError, PageLimits, RawItem, Sources};
use crate::util::has_control_chars;
use crate::watermark::WatermarkTracker;

/// Longest keyword query accepted, in characters.
pub const MAX_QUERY_CHARS: usize = 512;

/// How a search picks its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// The caller's query is the remote filter. No content, no watermark.
    Keyword,
    /// Everything newer than the stored watermark, with redacted content.
    Incremental,
}

impl FromStr for SearchMode {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "search" => Ok(SearchMode::Keyword),
            "incremental" | "digest" => Ok(SearchMode::Incremental),
            other => Err(AggregateError::Validation(format!(
                "Unknown search mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("{platform} is not connected")]
    NotConnected { platform: Platform },
    /// The refresh token was rejected; the user must link the account again.
    #[error("{platform} needs to be reconnected")]
    ReauthRequired { platform: Platform },
    #[error("Temporary failure: {0}")]
    Transient(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Credential storage failed: {0}")]
    Persistence(String),
}

impl AggregateError {
    /// The platform to send the user back through sign-in for, if any.
    pub fn reauth_platform(&self) -> Option<Platform> {
        match self {
            AggregateError::ReauthRequired { platform } => Some(*platform),
            _ => None,
        }
    }
}

impl From<RefreshError> for AggregateError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NotConnected { platform } => AggregateError::NotConnected { platform },
            RefreshError::ReauthRequired { platform } => AggregateError::ReauthRequired { platform },
            RefreshError::Transient(msg) => AggregateError::Transient(msg),
            RefreshError::Persistence(msg) => AggregateError::Persistence(msg),
        }
    }
}

impl From<FetchError> for AggregateError {
    fn from(err: FetchError) -> Self {
        AggregateError::Transient(err.to_string())
    }
}

/// Reject keyword queries that are empty, oversized, or carry control characters.
pub fn validate_query(raw_query: &str) -> Result<&str, AggregateError> {
    let query = raw_query.trim();
    if query.is_empty() {
        return Err(AggregateError::Validation("Query is empty".to_string()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(AggregateError::Validation(format!(
            "Query is {chars} characters (max {MAX_QUERY_CHARS})"
        )));
    }
    if has_control_chars(query) {
        return Err(AggregateError::Validation(
            "Query contains control characters".to_string(),
        ));
    }
    Ok(query)
}

pub struct Aggregator {
    store: Arc<dyn CredentialStore>,
    refresher: TokenRefresher,
    sources: Sources,
    redactor: RedactionPipeline,
    limits: PageLimits,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: TokenRefresher,
        sources: Sources,
        redactor: RedactionPipeline,
    ) -> Self {
        Self {
            store,
            refresher,
            sources,
            redactor,
            limits: PageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Retrieve up to `result_cap` documents for one linked account.
    ///
    /// Keyword mode passes `raw_query` through as the remote filter and
    /// leaves `content` empty. Incremental mode ignores `raw_query`, builds
    /// the filter from the stored watermark, drops items at or behind the
    /// watermark boundary, redacts what remains and advances the watermark.
    ///
    /// # Errors
    ///
    /// - [`AggregateError::Validation`] - bad keyword query; nothing was sent
    /// - [`AggregateError::NotConnected`] / [`AggregateError::ReauthRequired`] -
    ///   the account needs linking; no retrieval was attempted
    /// - [`AggregateError::Transient`] - refresh or listing failed
    /// - [`AggregateError::Persistence`] - a refreshed token could not be saved
    ///
    /// A failed watermark write is logged and does not fail the call.
    pub async fn search(
        &self,
        user_id: &str,
        platform: Platform,
        raw_query: &str,
        mode: SearchMode,
    ) -> Result<Vec<Document>, AggregateError> {
        let keyword = match mode {
            SearchMode::Keyword => Some(validate_query(raw_query)?),
            SearchMode::Incremental => None,
        };

        let valid = self.refresher.ensure_valid(user_id, platform).await?;
        let source = self.sources.for_platform(platform);

        let (filter, tracker) = match keyword {
            Some(query) => (source.keyword_filter(query), None),
            None => {
                let start = valid
                    .credential
                    .last_sync_watermark
                    .unwrap_or(valid.credential.connected_at);
                (source.incremental_filter(start), Some(WatermarkTracker::new(start)))
            }
        };
        let with_body = mode == SearchMode::Incremental;

        tracing::debug!(user = %user_id, platform = %platform, ?mode, "Starting retrieval");
        let (valid, items) = self.fetch_with_retry(valid, &filter, with_body).await?;

        let account = AccountContext {
            auth_user_hint: valid.credential.auth_user_hint.as_deref(),
        };

        let Some(mut tracker) = tracker else {
            let documents: Vec<Document> = items
                .iter()
                .map(|item| normalize(item, account, false))
                .collect();
            tracing::info!(user = %user_id, platform = %platform, count = documents.len(), "Keyword search complete");
            return Ok(documents);
        };

        let fetched = items.len();
        let documents: Vec<Document> = items
            .iter()
            .filter(|item| tracker.admit(item.timestamp_ms()))
            .map(|item| self.redact(normalize(item, account, true)))
            .collect();

        if let Some(next) = tracker.candidate() {
            if let Err(e) = self
                .store
                .update(user_id, platform, CredentialUpdate::watermark(next))
                .await
            {
                tracing::warn!(user = %user_id, platform = %platform, error = %e, "Failed to persist sync watermark");
            }
        }

        tracing::info!(
            user = %user_id,
            platform = %platform,
            fetched,
            kept = documents.len(),
            watermark = tracker.candidate().unwrap_or(tracker.current()),
            "Incremental sync complete"
        );
        Ok(documents)
    }

    /// Run the page loop; if the listing rejects the token, renew once and retry.
    async fn fetch_with_retry(
        &self,
        valid: ValidCredential,
        filter: &str,
        with_body: bool,
    ) -> Result<(ValidCredential, Vec<RawItem>), AggregateError> {
        let source = self.sources.for_platform(valid.platform);
        match fetch_pages(source, valid.access_token(), filter, self.limits, with_body).await {
            Ok(items) => Ok((valid, items)),
            Err(FetchError::Unauthorized) => {
                tracing::info!(user = %valid.user_id, platform = %valid.platform, "Access token rejected, forcing refresh");
                let renewed = self
                    .refresher
                    .force_refresh(&valid.user_id, valid.platform, valid.access_token())
                    .await?;
                let items = fetch_pages(source, renewed.access_token(), filter, self.limits, with_body).await?;
                Ok((renewed, items))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn redact(&self, mut doc: Document) -> Document {
        doc.title = self.redactor.redact(&doc.title).into_owned();
        doc.author = self.redactor.redact(&doc.author).into_owned();
        doc.content = self.redactor.redact(&doc.content).into_owned();
        doc
    }
}
