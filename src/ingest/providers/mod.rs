// src/ingest/providers/mod.rs
//! One adapter per source kind: JSON news APIs, RSS/XBRL feeds, scraped sites.

pub mod api_news;
pub mod feed;
pub mod scrape;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::ingest::types::SourceAdapter;

const USER_AGENT: &str = "sector-corpus/0.1 (+news collection for sector newsletters)";

/// HTTP client honoring the source's timeout.
pub(crate) fn http_client(cfg: &SourceConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(cfg.timeout.min(Duration::from_secs(5)))
        .timeout(cfg.timeout)
        .build()
        .with_context(|| format!("building http client for {}", cfg.source_id))
}

/// GET a page body, mapping transport and status failures per source.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: &str,
    source_id: &str,
) -> Result<String, FetchError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(e, source_id))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status, source_id));
    }
    resp.text()
        .await
        .map_err(|e| FetchError::from_reqwest(e, source_id))
}

/// Build the adapter matching a source's kind.
pub fn build_adapter(cfg: &SourceConfig) -> Result<Arc<dyn SourceAdapter>> {
    let adapter: Arc<dyn SourceAdapter> = match cfg.kind {
        SourceKind::Api => Arc::new(api_news::NewsApiProvider::new(cfg.clone())?),
        SourceKind::Feed => Arc::new(feed::FeedProvider::new(cfg.clone())?),
        SourceKind::Scrape => Arc::new(scrape::ScrapeProvider::new(cfg.clone())?),
    };
    Ok(adapter)
}
