// src/ingest/providers/api_news.rs
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::scrape::extract_page;
use crate::config::{SourceConfig, SourceFlavor, SourceKind};
use crate::error::FetchError;
use crate::ingest::normalize::normalize_body;
use crate::ingest::types::{FetchQuery, RawPayload, RawRecord, ScrapedPage, SourceAdapter};

/// Bodies shorter than this (in chars) get the article page fetched.
pub const FULL_TEXT_MIN_CHARS: usize = 500;
const FULL_TEXT_CONCURRENCY: usize = 2;

/// Both NewsAPI and GNews wrap results in `{ "articles": [...] }`.
#[derive(Debug, Deserialize)]
struct ArticlesEnvelope {
    #[serde(default)]
    articles: Vec<serde_json::Value>,
}

/// REST news API adapter (`newsapi` or `gnews` flavor).
pub struct NewsApiProvider {
    cfg: SourceConfig,
    client: reqwest::Client,
}

impl NewsApiProvider {
    pub fn new(cfg: SourceConfig) -> anyhow::Result<Self> {
        let client = super::http_client(&cfg)?;
        Ok(Self { cfg, client })
    }

    fn iso(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Endpoint + query for one request. The key travels separately for NewsAPI.
    pub fn request_url(&self, q: &FetchQuery) -> Result<url::Url, FetchError> {
        let base = self.cfg.base_url.trim_end_matches('/');
        let page = self.cfg.max_results.min(100).to_string();
        let from = Self::iso(q.date_range.from);
        let to = Self::iso(q.date_range.to);

        let parsed = match self.cfg.flavor {
            SourceFlavor::GNews => {
                let token = self
                    .cfg
                    .api_key
                    .as_ref()
                    .map(|k| k.expose().to_string())
                    .unwrap_or_default();
                url::Url::parse_with_params(
                    &format!("{base}/search"),
                    &[
                        ("q", q.sector.as_str()),
                        ("lang", "en"),
                        ("from", from.as_str()),
                        ("to", to.as_str()),
                        ("max", page.as_str()),
                        ("sortby", "publishedAt"),
                        ("token", token.as_str()),
                    ],
                )
            }
            _ => url::Url::parse_with_params(
                &format!("{base}/everything"),
                &[
                    ("q", q.sector.as_str()),
                    ("language", "en"),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("sortBy", "publishedAt"),
                    ("pageSize", page.as_str()),
                ],
            ),
        };
        parsed.map_err(|e| FetchError::Permanent(format!("bad request url: {e}")))
    }

    /// Replace a short body with the article page text. A page that cannot
    /// be fetched leaves the record as it was.
    async fn fill_short_body(&self, mut record: RawRecord) -> RawRecord {
        let url = match &record.payload {
            RawPayload::Api(item) => short_body_url(item),
            _ => None,
        };
        let Some(url) = url else {
            return record;
        };

        match super::get_text(&self.client, &url, &self.cfg.source_id).await {
            Ok(html) => {
                let page = extract_page(&url, &html);
                if let RawPayload::Api(item) = &mut record.payload {
                    if apply_full_text(item, &page) {
                        counter!("ingest_full_text_total", "source" => self.cfg.source_id.clone())
                            .increment(1);
                        debug!(source = %self.cfg.source_id, %url, "full text extracted");
                    }
                }
            }
            Err(e) => {
                debug!(source = %self.cfg.source_id, %url, error = %e, "full text unavailable, keeping short body");
            }
        }
        record
    }

    /// Split a response body into one raw record per article.
    pub fn parse_body(
        source_id: &str,
        fetched_at: DateTime<Utc>,
        body: &str,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let env: ArticlesEnvelope = serde_json::from_str(body).map_err(|e| {
            FetchError::Permanent(format!("{source_id}: unexpected response shape: {e}"))
        })?;
        Ok(env
            .articles
            .into_iter()
            .map(|a| RawRecord {
                source_id: source_id.to_string(),
                fetched_at,
                payload: RawPayload::Api(a),
            })
            .collect())
    }
}

/// Body the normalizer would pick: `content`, else `description`.
fn payload_body(item: &Value) -> &str {
    ["content", "description"]
        .iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or("")
}

/// Article url when the item's body is too short to stand on its own.
pub fn short_body_url(item: &Value) -> Option<String> {
    let url = item.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }
    let len = normalize_body(payload_body(item)).chars().count();
    (len < FULL_TEXT_MIN_CHARS).then(|| url.to_string())
}

/// Put the page text into `content` when it is longer than the current body.
pub fn apply_full_text(item: &mut Value, page: &ScrapedPage) -> bool {
    let text = page.paragraphs.join(" ");
    let longer = normalize_body(&text).chars().count()
        > normalize_body(payload_body(item)).chars().count();
    match item.as_object_mut() {
        Some(obj) if longer => {
            obj.insert("content".into(), Value::String(text));
            true
        }
        _ => false,
    }
}

#[async_trait]
impl SourceAdapter for NewsApiProvider {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        let Some(key) = self.cfg.api_key.as_ref() else {
            return Err(FetchError::Permanent(format!(
                "missing credential {}",
                self.cfg.credential.as_deref().unwrap_or("(none configured)")
            )));
        };

        let t0 = std::time::Instant::now();
        let url = self.request_url(query)?;
        let mut req = self.client.get(url);
        if self.cfg.flavor == SourceFlavor::NewsApi {
            req = req.header("X-Api-Key", key.expose());
        }

        let resp = req
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

        let mut out = Self::parse_body(&self.cfg.source_id, Utc::now(), &body)?;
        out.truncate(self.cfg.max_results as usize);
        if self.cfg.full_text {
            out = stream::iter(out)
                .map(|record| self.fill_short_body(record))
                .buffered(FULL_TEXT_CONCURRENCY)
                .collect()
                .await;
        }

        histogram!("ingest_fetch_ms", "source" => self.cfg.source_id.clone())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total", "source" => self.cfg.source_id.clone())
            .increment(out.len() as u64);
        debug!(source = %self.cfg.source_id, records = out.len(), "api fetch ok");
        Ok(out)
    }

    fn source_id(&self) -> &str {
        &self.cfg.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }
}
