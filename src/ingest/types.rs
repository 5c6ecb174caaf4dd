// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SourceKind;
use crate::error::FetchError;
use crate::model::DateRange;

/// One `<item>` of an RSS feed, as delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub pub_date: Option<String>,
    pub description: Option<String>,
}

/// Text pulled out of one scraped article page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
    /// Raw value of `article:published_time` (or similar) meta, if present.
    pub published: Option<String>,
}

/// Source-specific payload. Interpreted only by normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum RawPayload {
    /// One element of a news API's `articles` array.
    Api(serde_json::Value),
    Feed(FeedItem),
    Scrape(ScrapedPage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: RawPayload,
}

/// What an adapter is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub sector: String,
    pub date_range: DateRange,
}

/// One external source. Returns whatever it managed to retrieve; only a total
/// failure to reach the source is an error.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError>;
    fn source_id(&self) -> &str;
    fn kind(&self) -> SourceKind;
}
