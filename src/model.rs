//! Canonical corpus types shared by the resolver, the cache and the orchestrator.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content-derived article identity (hex SHA-256 of the fingerprint).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive publication window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Window of `days` ending at `now`.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            from: now - chrono::Duration::days(days.max(0)),
            to: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }
}

/// One generation run's input. Validated at the HTTP boundary, trusted afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub sector: String,
    pub date_range: DateRange,
    #[serde(default)]
    pub insight_types: Vec<String>,
    /// Source ids to query. Empty means every configured source that is enabled.
    #[serde(default)]
    pub enabled_sources: Vec<String>,
}

/// The canonical unit handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub identity: ArticleId,
    pub title: String,
    pub body_text: String,
    pub published_at: DateTime<Utc>,
    pub source_ids: BTreeSet<String>,
    pub url_set: BTreeSet<String>,
    pub sector_tags: BTreeSet<String>,
    pub insight_type_tags: BTreeSet<String>,
}

impl Article {
    /// Fold another sighting of the same identity into `self`.
    ///
    /// Every field choice is order-independent, so folding any permutation of
    /// sightings gives the same article:
    /// - earliest `published_at`
    /// - longest body (ties: lexicographically smallest)
    /// - lexicographically smallest title
    /// - union of all sets
    pub fn merge(&mut self, other: Article) {
        debug_assert_eq!(self.identity, other.identity);

        if other.published_at < self.published_at {
            self.published_at = other.published_at;
        }

        let longer = other.body_text.chars().count() > self.body_text.chars().count();
        let same_len = other.body_text.chars().count() == self.body_text.chars().count();
        if longer || (same_len && other.body_text < self.body_text) {
            self.body_text = other.body_text;
        }

        if other.title < self.title {
            self.title = other.title;
        }

        self.source_ids.extend(other.source_ids);
        self.url_set.extend(other.url_set);
        self.sector_tags.extend(other.sector_tags);
        self.insight_type_tags.extend(other.insight_type_tags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    SourceUnavailable,
    SchemaDrift,
    CacheWriteFailure,
}

/// Non-fatal problem surfaced alongside the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub source_id: Option<String>,
    pub detail: String,
}

impl Warning {
    pub fn source_unavailable(source_id: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SourceUnavailable,
            source_id: Some(source_id.to_string()),
            detail: detail.into(),
        }
    }

    pub fn schema_drift(source_id: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::SchemaDrift,
            source_id: Some(source_id.to_string()),
            detail: detail.into(),
        }
    }

    pub fn cache_write_failure(identity: &ArticleId, detail: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::CacheWriteFailure,
            source_id: None,
            detail: format!("{identity}: {}", detail.into()),
        }
    }
}
