// src/ingest/providers/scrape.rs
//! Index-then-fetch scraper: collect article links from one page, then pull
//! each article. Pages that fail are skipped; only an unreachable index fails.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::counter;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::ingest::types::{FetchQuery, RawPayload, RawRecord, ScrapedPage, SourceAdapter};

const PAGE_CONCURRENCY: usize = 2;

pub struct ScrapeProvider {
    cfg: SourceConfig,
    client: reqwest::Client,
}

impl ScrapeProvider {
    pub fn new(cfg: SourceConfig) -> anyhow::Result<Self> {
        let client = super::http_client(&cfg)?;
        Ok(Self { cfg, client })
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        super::get_text(&self.client, url, &self.cfg.source_id).await
    }
}

/// Absolute, de-duplicated article links from an index page.
pub fn extract_links(
    html: &str,
    base: &str,
    selector: &str,
    max: usize,
) -> Result<Vec<String>, FetchError> {
    let base = Url::parse(base).map_err(|e| FetchError::Permanent(format!("bad base url: {e}")))?;
    let sel = Selector::parse(selector)
        .map_err(|e| FetchError::Permanent(format!("bad link selector {selector:?}: {e}")))?;
    let doc = Html::parse_document(html);

    let mut out: Vec<String> = Vec::new();
    for el in doc.select(&sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if let Ok(resolved) = base.join(href) {
            let s = resolved.to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
        if out.len() >= max {
            break;
        }
    }
    Ok(out)
}

/// Headline, paragraphs and publication meta from an article page.
pub fn extract_page(url: &str, html: &str) -> ScrapedPage {
    let doc = Html::parse_document(html);
    let first_text = |css: &str| -> Option<String> {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel)
            .next()
            .map(|e| e.text().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.trim().is_empty())
    };
    let first_attr = |css: &str, attr: &str| -> Option<String> {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel)
            .filter_map(|e| e.value().attr(attr).map(str::to_string))
            .find(|v| !v.trim().is_empty())
    };

    let title = first_text("h1").or_else(|| first_text("title"));

    let mut paragraphs = Vec::new();
    for css in ["article p", "p"] {
        if let Ok(sel) = Selector::parse(css) {
            paragraphs = doc
                .select(&sel)
                .map(|e| e.text().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.trim().is_empty())
                .collect();
        }
        if !paragraphs.is_empty() {
            break;
        }
    }

    let published = first_attr("meta[property='article:published_time']", "content")
        .or_else(|| first_attr("meta[name='pubdate']", "content"))
        .or_else(|| first_attr("time[datetime]", "datetime"));

    ScrapedPage {
        url: url.to_string(),
        title,
        paragraphs,
        published,
    }
}

#[async_trait]
impl SourceAdapter for ScrapeProvider {
    async fn fetch(&self, _query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        let selector = self.cfg.link_selector.as_deref().unwrap_or("a[href]");
        let index = self.get_text(&self.cfg.base_url).await?;
        let links = extract_links(
            &index,
            &self.cfg.base_url,
            selector,
            self.cfg.max_results as usize,
        )?;
        debug!(source = %self.cfg.source_id, links = links.len(), "indexed article links");

        let fetched_at = Utc::now();
        let pages: Vec<RawRecord> = stream::iter(links)
            .map(|url| async move {
                match self.get_text(&url).await {
                    Ok(html) => Some(extract_page(&url, &html)),
                    Err(e) => {
                        warn!(source = %self.cfg.source_id, %url, error = %e, "page fetch failed, skipping");
                        None
                    }
                }
            })
            .buffer_unordered(PAGE_CONCURRENCY)
            .filter_map(|page| async move { page })
            .map(|page| RawRecord {
                source_id: self.cfg.source_id.clone(),
                fetched_at,
                payload: RawPayload::Scrape(page),
            })
            .collect()
            .await;

        counter!("ingest_records_total", "source" => self.cfg.source_id.clone())
            .increment(pages.len() as u64);
        Ok(pages)
    }

    fn source_id(&self) -> &str {
        &self.cfg.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Scrape
    }
}
