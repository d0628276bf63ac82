//! Credential maintenance, bounded retrieval, incremental sync and PII
//! redaction for linked Gmail and Google Drive accounts.

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod normalize;
pub mod platform;
pub mod redact;
pub mod remote;
pub mod storage;
pub mod util;
pub mod watermark;

pub use aggregate::{AggregateError, Aggregator, SearchMode};
pub use normalize::Document;
pub use platform::Platform;
