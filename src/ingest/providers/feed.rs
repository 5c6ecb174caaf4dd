// src/ingest/providers/feed.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::config::{SourceConfig, SourceFlavor, SourceKind};
use crate::error::FetchError;
use crate::ingest::types::{FeedItem, FetchQuery, RawPayload, RawRecord, SourceAdapter};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// RSS 2.0 feed adapter. The `edgar` flavor reshapes SEC XBRL filing items.
pub struct FeedProvider {
    cfg: SourceConfig,
    client: reqwest::Client,
}

impl FeedProvider {
    pub fn new(cfg: SourceConfig) -> anyhow::Result<Self> {
        let client = super::http_client(&cfg)?;
        Ok(Self { cfg, client })
    }

    /// Parse feed XML into raw records, keeping at most `max` items.
    pub fn parse_feed(
        source_id: &str,
        flavor: SourceFlavor,
        xml: &str,
        fetched_at: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| FetchError::Permanent(format!("{source_id}: unparseable feed: {e}")))?;

        let out: Vec<RawRecord> = rss
            .channel
            .item
            .into_iter()
            .take(max)
            .map(|it| {
                let mut item = FeedItem {
                    title: it.title,
                    link: it.link,
                    pub_date: it.pub_date,
                    description: it.description,
                };
                if flavor == SourceFlavor::Edgar {
                    reshape_edgar(&mut item);
                }
                RawRecord {
                    source_id: source_id.to_string(),
                    fetched_at,
                    payload: RawPayload::Feed(item),
                }
            })
            .collect();

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

/// EDGAR titles read "COMPANY NAME: Filing Type"; the `-index.htm` link points
/// at an index page while the `.txt` is the filing itself.
fn reshape_edgar(item: &mut FeedItem) {
    let parts = item.title.as_deref().and_then(|title| {
        let (company, filing) = title.split_once(':')?;
        let (company, filing) = (company.trim(), filing.trim());
        (!company.is_empty() && !filing.is_empty())
            .then(|| (company.to_string(), filing.to_string()))
    });
    if let Some((company, filing)) = parts {
        item.title = Some(format!("{company} - {filing}"));
        if item.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
            item.description = Some(format!("{filing} filing from {company}"));
        }
    }
    if let Some(link) = item.link.as_mut() {
        if link.ends_with("-index.htm") {
            *link = link.replace("-index.htm", ".txt");
        }
    }
}

#[async_trait]
impl SourceAdapter for FeedProvider {
    async fn fetch(&self, _query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        let t0 = std::time::Instant::now();
        let resp = self
            .client
            .get(&self.cfg.base_url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, &self.cfg.source_id))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &self.cfg.source_id));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, &self.cfg.source_id))?;

        let out = Self::parse_feed(
            &self.cfg.source_id,
            self.cfg.flavor,
            &body,
            Utc::now(),
            self.cfg.max_results as usize,
        )?;

        histogram!("ingest_fetch_ms", "source" => self.cfg.source_id.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total", "source" => self.cfg.source_id.clone())
            .increment(out.len() as u64);
        Ok(out)
    }

    fn source_id(&self) -> &str {
        &self.cfg.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
