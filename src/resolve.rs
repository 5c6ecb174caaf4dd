//! Dedup & identity resolution.
//!
//! Identity = SHA-256 over `fingerprint_title \n YYYY-MM-DD \n domain`. Records
//! with the same identity fold into one [`Article`]; nothing else merges. The
//! fold uses [`Article::merge`], which is commutative and associative, and the
//! output is ordered by identity, so any ordering or batching of the same
//! records resolves to the same set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::SchemaDrift;
use crate::ingest::normalize::{domain_of, fingerprint_title, normalize_record, NormalizedRecord};
use crate::ingest::types::RawRecord;
use crate::model::{Article, ArticleId, CollectionRequest, DateRange};

/// Tags an article with an insight type when any keyword occurs as whole words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightRule {
    pub name: String,
    keywords: Vec<String>,
}

impl InsightRule {
    pub fn new<I, S>(name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            keywords: keywords
                .into_iter()
                .map(|k| words(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// `haystack` must already be in `words()` form.
    fn matches(&self, haystack: &str) -> bool {
        let padded = format!(" {haystack} ");
        self.keywords
            .iter()
            .any(|k| padded.contains(&format!(" {k} ")))
    }
}

/// Lowercase, alphanumeric words separated by single spaces.
fn words(s: &str) -> String {
    let folded: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn identity_for(title_fingerprint: &str, date: NaiveDate, domain: &str) -> ArticleId {
    let mut hasher = Sha256::new();
    hasher.update(title_fingerprint.as_bytes());
    hasher.update(b"\n");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    ArticleId::new(out)
}

pub fn identity_of(rec: &NormalizedRecord) -> ArticleId {
    let domain = rec.url.as_deref().map(domain_of).unwrap_or_default();
    identity_for(
        &fingerprint_title(&rec.title, &domain),
        rec.published_at.date_naive(),
        &domain,
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Canonical articles ordered by identity.
    pub articles: Vec<Article>,
    /// Records skipped because they could not be normalized.
    pub drift: Vec<SchemaDrift>,
    /// Records dropped for falling outside the requested window.
    pub out_of_range: usize,
    /// Records folded into an identity already seen in this batch.
    pub merged: usize,
}

/// Normalizes, identifies, tags and merges raw records.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    sector: Option<String>,
    insight_rules: Vec<InsightRule>,
    window: Option<DateRange>,
}

impl Resolver {
    /// Untagged resolver with no date window.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_insight_rules(mut self, rules: Vec<InsightRule>) -> Self {
        self.insight_rules = rules;
        self
    }

    pub fn with_window(mut self, window: DateRange) -> Self {
        self.window = Some(window);
        self
    }

    /// Resolver tagging with the request's sector and requested insight types.
    pub fn for_request(req: &CollectionRequest, cfg: &AppConfig) -> Self {
        let rules = req
            .insight_types
            .iter()
            .filter_map(|name| {
                cfg.insight_types
                    .get(name)
                    .map(|kws| InsightRule::new(name.clone(), kws))
            })
            .collect();
        Self::new()
            .with_sector(req.sector.clone())
            .with_insight_rules(rules)
            .with_window(req.date_range)
    }

    fn to_article(&self, rec: NormalizedRecord) -> Article {
        let identity = identity_of(&rec);
        let haystack = words(&format!("{} {}", rec.title, rec.body_text));
        let insight_type_tags = self
            .insight_rules
            .iter()
            .filter(|r| r.matches(&haystack))
            .map(|r| r.name.clone())
            .collect();

        Article {
            identity,
            title: rec.title,
            body_text: rec.body_text,
            published_at: rec.published_at,
            source_ids: BTreeSet::from([rec.source_id]),
            url_set: rec.url.into_iter().collect(),
            sector_tags: self.sector.iter().cloned().collect(),
            insight_type_tags,
        }
    }

    pub fn resolve(&self, records: &[RawRecord]) -> ResolveReport {
        let mut by_id: BTreeMap<ArticleId, Article> = BTreeMap::new();
        let mut report = ResolveReport::default();

        for raw in records {
            let rec = match normalize_record(raw) {
                Ok(r) => r,
                Err(drift) => {
                    warn!(source = %drift.source_id, reason = %drift.reason, "schema drift, record skipped");
                    counter!("ingest_schema_drift_total", "source" => drift.source_id.clone())
                        .increment(1);
                    report.drift.push(drift);
                    continue;
                }
            };

            if let Some(w) = &self.window {
                if !w.contains(rec.published_at) {
                    debug!(source = %rec.source_id, published_at = %rec.published_at, "outside requested window");
                    report.out_of_range += 1;
                    continue;
                }
            }

            let article = self.to_article(rec);
            match by_id.get_mut(&article.identity) {
                Some(existing) => {
                    existing.merge(article);
                    report.merged += 1;
                }
                None => {
                    by_id.insert(article.identity.clone(), article);
                }
            }
        }

        counter!("ingest_dedup_total").increment(report.merged as u64);
        report.articles = by_id.into_values().collect();
        report
    }
}

/// Resolve with no tagging and no window.
pub fn resolve(records: &[RawRecord]) -> Vec<Article> {
    Resolver::new().resolve(records).articles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{FeedItem, RawPayload, ScrapedPage};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn api(source: &str, title: &str, url: &str, when: &str) -> RawRecord {
        RawRecord {
            source_id: source.into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Api(json!({
                "title": title,
                "url": url,
                "publishedAt": when,
                "content": "Body text for the story.",
            })),
        }
    }

    #[test]
    fn identity_ignores_case_punct_and_time_of_day() {
        let a = api("newsapi", "Chipmaker Buys Rival!", "https://reuters.com/a", "2025-03-04T08:00:00Z");
        let b = api("gnews", "chipmaker buys rival - Reuters", "https://www.reuters.com/b", "2025-03-04T17:30:00Z");
        let out = resolve(&[a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_ids.len(), 2);
        assert_eq!(out[0].url_set.len(), 2);
    }

    #[test]
    fn different_day_or_domain_stays_separate() {
        let a = api("newsapi", "Chipmaker buys rival", "https://reuters.com/a", "2025-03-04T08:00:00Z");
        let b = api("newsapi", "Chipmaker buys rival", "https://reuters.com/a", "2025-03-05T08:00:00Z");
        let c = api("newsapi", "Chipmaker buys rival", "https://ft.com/a", "2025-03-04T08:00:00Z");
        assert_eq!(resolve(&[a, b, c]).len(), 3);
    }

    #[test]
    fn identity_is_stable_hex() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let id = identity_for("chipmaker buys rival", d, "reuters.com");
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(id, identity_for("chipmaker buys rival", d, "reuters.com"));
    }

    #[test]
    fn drift_is_reported_not_fatal() {
        let good = api("newsapi", "Grid deal", "https://a.test/x", "2025-03-04T08:00:00Z");
        let bad = RawRecord {
            source_id: "feed".into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Feed(FeedItem {
                title: Some("No date here".into()),
                ..FeedItem::default()
            }),
        };
        let rep = Resolver::new().resolve(&[good, bad]);
        assert_eq!(rep.articles.len(), 1);
        assert_eq!(rep.drift.len(), 1);
        assert_eq!(rep.drift[0].source_id, "feed");
    }

    #[test]
    fn window_and_tags_apply() {
        let inside = api("newsapi", "Utility announces acquisition of solar firm", "https://a.test/x", "2025-03-04T08:00:00Z");
        let outside = api("newsapi", "Old news", "https://a.test/y", "2024-01-01T08:00:00Z");
        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap();

        let rep = Resolver::new()
            .with_sector("Energy")
            .with_insight_rules(vec![
                InsightRule::new("Mergers & Acquisitions", &["acquisition", "merger"]),
                InsightRule::new("Regulation", &["fine"]),
            ])
            .with_window(DateRange::new(from, to))
            .resolve(&[inside, outside]);

        assert_eq!(rep.out_of_range, 1);
        assert_eq!(rep.articles.len(), 1);
        let a = &rep.articles[0];
        assert!(a.sector_tags.contains("Energy"));
        assert_eq!(
            a.insight_type_tags.iter().collect::<Vec<_>>(),
            vec!["Mergers & Acquisitions"]
        );
    }

    #[test]
    fn feed_and_page_records_carry_the_request_sector() {
        let filing = RawRecord {
            source_id: "sec_edgar".into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Feed(FeedItem {
                title: Some("ACME ROBOTICS INC - 10-Q".into()),
                link: Some("https://www.sec.gov/Archives/edgar/data/1/000001.txt".into()),
                pub_date: Some("Tue, 04 Mar 2025 16:05:00 EST".into()),
                description: Some("10-Q filing from ACME ROBOTICS INC".into()),
            }),
        };
        let page = RawRecord {
            source_id: "energy_blog".into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Scrape(ScrapedPage {
                url: "https://blog.test/grid-deal".into(),
                title: Some("Utility agrees grid deal".into()),
                paragraphs: vec!["The utility signed a grid deal.".into()],
                published: Some("2025-03-04T09:30:00Z".into()),
            }),
        };

        let rep = Resolver::new().with_sector("Technology").resolve(&[filing, page]);
        assert_eq!(rep.articles.len(), 2);
        for a in &rep.articles {
            assert_eq!(a.sector_tags.iter().collect::<Vec<_>>(), vec!["Technology"]);
        }
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let rule = InsightRule::new("Regulation", &["fine"]);
        assert!(!rule.matches(&words("Redefined outlook")));
        assert!(rule.matches(&words("Regulator issues fine.")));
    }
}
