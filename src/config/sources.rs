// src/config/sources.rs
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Feed,
    Scrape,
}

/// Concrete wire shape within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFlavor {
    NewsApi,
    GNews,
    Rss,
    Edgar,
    Html,
}

impl SourceFlavor {
    pub fn default_for(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Api => SourceFlavor::NewsApi,
            SourceKind::Feed => SourceFlavor::Rss,
            SourceKind::Scrape => SourceFlavor::Html,
        }
    }

    pub fn kind(self) -> SourceKind {
        match self {
            SourceFlavor::NewsApi | SourceFlavor::GNews => SourceKind::Api,
            SourceFlavor::Rss | SourceFlavor::Edgar => SourceKind::Feed,
            SourceFlavor::Html => SourceKind::Scrape,
        }
    }
}

/// Secret value resolved from the environment. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

fn default_requests() -> u32 {
    5
}
fn default_interval_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per interval (also the burst size).
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_results() -> u32 {
    50
}
fn default_full_text() -> bool {
    true
}

/// Shape of one `[data_sources.<name>]` table as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SourceEntry {
    pub kind: SourceKind,
    #[serde(default)]
    pub flavor: Option<SourceFlavor>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub base_url: String,
    /// Credential reference: `"ENV"` (use `<NAME>_API_KEY`) or `"env:VAR_NAME"`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub link_selector: Option<String>,
    /// API sources only: fetch the article page when the payload body is short.
    #[serde(default = "default_full_text")]
    pub full_text: bool,
}

/// One configured source. Immutable after load.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    pub flavor: SourceFlavor,
    pub base_url: String,
    /// Name of the environment variable holding the key, if any.
    pub credential: Option<String>,
    /// Key value resolved at load time; `None` when the variable is unset.
    pub api_key: Option<ApiKey>,
    pub enabled: bool,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub timeout: Duration,
    pub max_results: u32,
    pub link_selector: Option<String>,
    pub full_text: bool,
}

impl SourceConfig {
    pub(crate) fn from_entry(source_id: &str, e: SourceEntry) -> Result<Self> {
        let flavor = e.flavor.unwrap_or_else(|| SourceFlavor::default_for(e.kind));
        if flavor.kind() != e.kind {
            bail!("source {source_id}: flavor {flavor:?} does not belong to kind {:?}", e.kind);
        }

        let base_url = e.base_url.trim().to_string();
        url::Url::parse(&base_url)
            .map_err(|err| anyhow!("source {source_id}: invalid base_url: {err}"))?;

        if e.rate_limit.requests == 0 || e.rate_limit.interval_secs == 0 {
            bail!("source {source_id}: rate_limit needs requests >= 1 and interval_secs >= 1");
        }
        if e.timeout_secs == 0 {
            bail!("source {source_id}: timeout_secs must be > 0");
        }
        if e.kind == SourceKind::Scrape
            && e.link_selector.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            bail!("source {source_id}: scrape sources need link_selector");
        }

        let credential = match e.api_key.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(r) if r.eq_ignore_ascii_case("env") => {
                Some(format!("{}_API_KEY", source_id.to_ascii_uppercase()))
            }
            Some(r) => match r.strip_prefix("env:") {
                Some(var) if !var.trim().is_empty() => Some(var.trim().to_string()),
                _ => bail!("source {source_id}: api_key must be \"ENV\" or \"env:VAR_NAME\""),
            },
        };
        let api_key = credential
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.trim().is_empty())
            .map(ApiKey::new);

        Ok(Self {
            source_id: source_id.to_string(),
            kind: e.kind,
            flavor,
            base_url,
            credential,
            api_key,
            enabled: e.enabled,
            rate_limit: e.rate_limit,
            retry: e.retry,
            timeout: Duration::from_secs(e.timeout_secs),
            max_results: e.max_results.max(1),
            link_selector: e.link_selector,
            full_text: e.full_text && e.kind == SourceKind::Api,
        })
    }
}
