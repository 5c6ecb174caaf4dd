// src/ingest/normalize.rs
//! Turns source-specific payloads into one plain-text shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::SchemaDrift;
use crate::ingest::types::{FeedItem, RawPayload, RawRecord, ScrapedPage};

const TITLE_CAP: usize = 1_500;
const BODY_CAP: usize = 20_000;

/// A raw record after text normalization, before identity is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub source_id: String,
    pub title: String,
    pub body_text: String,
    pub published_at: DateTime<Utc>,
    pub url: Option<String>,
}

fn regex(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Entity decode, tag strip, quote folding, whitespace collapse.
fn clean_markup(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    out = regex(&RE_TAGS, r"(?is)</?[^>]+>").replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    out = regex(&RE_WS, r"\s+").replace_all(&out, " ").to_string();
    out.trim().to_string()
}

fn cap_chars(mut s: String, cap: usize) -> String {
    if s.chars().count() > cap {
        s = s.chars().take(cap).collect();
    }
    s
}

/// Display form of a headline: plain text, single-spaced, no trailing sentence punctuation.
pub fn normalize_text(s: &str) -> String {
    let mut out = clean_markup(s);

    // Strip trailing sentence punctuation (keep quotes)
    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }
    cap_chars(out.trim_end().to_string(), TITLE_CAP)
}

/// Plain-text body with aggregator boilerplate removed.
pub fn normalize_body(s: &str) -> String {
    let mut out = clean_markup(s);

    // NewsAPI truncation marker: "... [+2345 chars]"
    static RE_TRUNC: OnceCell<Regex> = OnceCell::new();
    out = regex(&RE_TRUNC, r"\s*\[\+\d+ chars\]\s*$")
        .replace(&out, "")
        .to_string();

    static RE_MORE: OnceCell<Regex> = OnceCell::new();
    out = regex(
        &RE_MORE,
        r"(?i)\s*(read more|continue reading|click here to read more|read the full story)\W*$",
    )
    .replace(&out, "")
    .to_string();

    cap_chars(out.trim().to_string(), BODY_CAP)
}

/// Publisher host of an article URL: lowercased, `www.` removed. Empty when unparseable.
pub fn domain_of(url: &str) -> String {
    url::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|h| h.trim_start_matches("www.").to_string())
        .unwrap_or_default()
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Drop a trailing " - Reuters" / " | The Verge" when it names the publisher domain.
fn strip_publisher_suffix<'a>(title: &'a str, domain: &str) -> &'a str {
    if domain.is_empty() {
        return title;
    }
    let host = squash(domain);
    for sep in [" - ", " | ", " \u{2013} ", " \u{2014} "] {
        if let Some((head, tail)) = title.rsplit_once(sep) {
            let t = squash(tail);
            if !head.trim().is_empty() && t.len() >= 2 && host.contains(&t) {
                return head;
            }
        }
    }
    title
}

/// Comparison form of a title: publisher suffix removed, case-folded,
/// punctuation dropped, whitespace collapsed.
pub fn fingerprint_title(title: &str, domain: &str) -> String {
    let base = strip_publisher_suffix(title, domain);
    let folded: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let ts = raw.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(ts, &Rfc2822) {
        let secs = dt.to_offset(UtcOffset::UTC).unix_timestamp();
        return DateTime::from_timestamp(secs, 0);
    }
    // Obsolete zone names ("GMT", "EST") that the strict parser refuses.
    if let Ok(dt) = DateTime::parse_from_rfc2822(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(ts, fmt) {
            return Some(n.and_utc());
        }
    }
    NaiveDate::parse_from_str(ts, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Interpret one raw record. Anything that cannot yield a title and a
/// publication time is schema drift.
pub fn normalize_record(record: &RawRecord) -> Result<NormalizedRecord, SchemaDrift> {
    let drift = |reason: &str| SchemaDrift {
        source_id: record.source_id.clone(),
        reason: reason.to_string(),
    };

    let (title, body, published, url) = match &record.payload {
        RawPayload::Api(v) => from_api(v).map_err(|r| drift(r))?,
        RawPayload::Feed(item) => from_feed(item),
        RawPayload::Scrape(page) => from_page(page),
    };

    let title = normalize_text(title.as_deref().unwrap_or_default());
    if title.is_empty() {
        return Err(drift("missing title"));
    }
    let published_raw = published.ok_or_else(|| drift("missing publication date"))?;
    let published_at = parse_timestamp(&published_raw)
        .ok_or_else(|| drift(&format!("unparseable publication date {published_raw:?}")))?;

    Ok(NormalizedRecord {
        source_id: record.source_id.clone(),
        title,
        body_text: normalize_body(&body),
        published_at,
        url: url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
    })
}

type Fields = (Option<String>, String, Option<String>, Option<String>);

fn from_api(v: &serde_json::Value) -> Result<Fields, &'static str> {
    let obj = v.as_object().ok_or("api item is not an object")?;
    let text = |k: &str| obj.get(k).and_then(|x| x.as_str()).map(str::to_string);

    let title = text("title");
    // NewsAPI blanks out taken-down stories instead of omitting them.
    if title.as_deref() == Some("[Removed]") {
        return Err("article removed upstream");
    }
    let content = text("content").unwrap_or_default();
    let description = text("description").unwrap_or_default();
    let body = if content.trim().is_empty() {
        description
    } else {
        content
    };
    Ok((title, body, text("publishedAt"), text("url")))
}

fn from_feed(item: &FeedItem) -> Fields {
    (
        item.title.clone(),
        item.description.clone().unwrap_or_default(),
        item.pub_date.clone(),
        item.link.clone(),
    )
}

fn from_page(page: &ScrapedPage) -> Fields {
    (
        page.title.clone(),
        page.paragraphs.join(" "),
        page.published.clone(),
        Some(page.url.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_record(v: serde_json::Value) -> RawRecord {
        RawRecord {
            source_id: "newsapi".into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Api(v),
        }
    }

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        let s = "  Hello,&nbsp;&nbsp; world!!!  ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn body_drops_truncation_marker_and_read_more() {
        let s = "<p>Shares rose 4%.</p> Analysts expect more… [+2345 chars]";
        assert_eq!(normalize_body(s), "Shares rose 4%. Analysts expect more…");
        assert_eq!(normalize_body("Deal closes Friday. Read more..."), "Deal closes Friday.");
    }

    #[test]
    fn fingerprint_folds_case_punct_and_publisher() {
        let a = fingerprint_title("Chipmaker Buys Rival - Reuters", "reuters.com");
        let b = fingerprint_title("chipmaker buys  rival!", "reuters.com");
        assert_eq!(a, "chipmaker buys rival");
        assert_eq!(a, b);
        // Suffix kept when it does not name the publisher.
        assert_eq!(
            fingerprint_title("Q3 results - preliminary", "example.com"),
            "q3 results preliminary"
        );
    }

    #[test]
    fn domain_strips_www_and_case() {
        assert_eq!(domain_of("https://WWW.Reuters.com/markets/x"), "reuters.com");
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn timestamps_in_common_shapes() {
        let a = parse_timestamp("2025-03-04T10:00:00Z").unwrap();
        let b = parse_timestamp("Tue, 04 Mar 2025 10:00:00 +0000").unwrap();
        let c = parse_timestamp("2025-03-04 10:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("2025-03-04").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn api_item_without_date_is_drift() {
        let r = api_record(json!({"title": "Hello", "url": "https://a.test/x"}));
        let err = normalize_record(&r).unwrap_err();
        assert_eq!(err.source_id, "newsapi");
        assert!(err.reason.contains("publication date"));
    }

    #[test]
    fn api_item_falls_back_to_description() {
        let r = api_record(json!({
            "title": "Utility raises guidance",
            "description": "Guidance raised on demand.",
            "content": null,
            "publishedAt": "2025-03-04T10:00:00Z",
            "url": "https://news.test/a"
        }));
        let n = normalize_record(&r).unwrap();
        assert_eq!(n.body_text, "Guidance raised on demand.");
        assert_eq!(n.url.as_deref(), Some("https://news.test/a"));
    }

    #[test]
    fn removed_placeholder_is_drift() {
        let r = api_record(json!({"title": "[Removed]", "publishedAt": "2025-03-04T10:00:00Z"}));
        assert!(normalize_record(&r).is_err());
    }

    #[test]
    fn non_object_payload_is_drift() {
        assert!(normalize_record(&api_record(json!(["not", "an", "object"]))).is_err());
    }
}
