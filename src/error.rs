//! Error types for the collection pipeline.

use thiserror::Error;

use crate::model::{ArticleId, Warning};

/// Outcome of a single adapter attempt. Drives the retry decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: timeouts, connect failures, HTTP 429 and 5xx.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying cannot help: auth failures, bad requests, missing credentials.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: reqwest::StatusCode, what: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            FetchError::Transient(format!("{what}: HTTP {status}"))
        } else {
            FetchError::Permanent(format!("{what}: HTTP {status}"))
        }
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_reqwest(err: reqwest::Error, what: &str) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, what);
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            FetchError::Transient(format!("{what}: {err}"))
        } else {
            FetchError::Permanent(format!("{what}: {err}"))
        }
    }
}

/// A payload that could not be turned into an article.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("schema drift from {source_id}: {reason}")]
pub struct SchemaDrift {
    pub source_id: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache write failed for {identity}: {source}")]
    Write {
        identity: ArticleId,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file encode failed for {identity}: {source}")]
    Encode {
        identity: ArticleId,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a request was turned away at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("unknown sector: {0}")]
    UnknownSector(String),

    #[error("unknown insight type: {0}")]
    UnknownInsightType(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("source is disabled: {0}")]
    DisabledSource(String),

    #[error("date range is empty or inverted")]
    InvalidDateRange,
}

/// Errors surfaced by the pipeline to its callers.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error(transparent)]
    SchemaDrift(#[from] SchemaDrift),

    #[error("all {} sources failed", warnings.len())]
    AllSourcesFailed { warnings: Vec<Warning> },

    #[error(transparent)]
    CacheWriteFailure(#[from] CacheError),

    #[error("collection cancelled")]
    Cancelled,

    #[error("request selects no enabled source")]
    NoSources,
}

/// Convenience Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, CollectError>;
