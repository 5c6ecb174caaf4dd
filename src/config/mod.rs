// src/config/mod.rs
//! Process-wide configuration, loaded once and passed explicitly.

pub mod sources;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RequestError;
use crate::model::CollectionRequest;
pub use sources::{ApiKey, RateLimitConfig, RetryConfig, SourceConfig, SourceFlavor, SourceKind};
use sources::SourceEntry;

pub const ENV_CONFIG_PATH: &str = "CORPUS_CONFIG_PATH";
pub const DEFAULT_CONFIG_TOML: &str = "config/corpus.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/corpus.json";

fn default_ttl() -> u64 {
    24 * 3600
}
fn default_sweep_interval() -> u64 {
    600
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Write-through directory; in-memory only when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            dir: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    sectors: Vec<String>,
    #[serde(default)]
    insight_types: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    data_sources: BTreeMap<String, SourceEntry>,
}

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Allowed values for `CollectionRequest::sector`.
    pub sectors: Vec<String>,
    /// Allowed insight types and the keywords that tag an article with them.
    pub insight_types: BTreeMap<String, Vec<String>>,
    pub cache: CacheConfig,
    pub data_sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Load from an explicit path. TOML or JSON, picked by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let raw: FileConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing json config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("parsing toml config {}", path.display()))?,
        };
        Self::from_file_config(raw)
    }

    /// Load using env var + fallbacks:
    /// 1) $CORPUS_CONFIG_PATH
    /// 2) config/corpus.toml
    /// 3) config/corpus.json
    /// 4) built-in seed
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_JSON] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        tracing::info!("no config file found, using built-in seed");
        Self::from_toml_str(DEFAULT_SEED)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: FileConfig = toml::from_str(s).context("parsing toml config")?;
        Self::from_file_config(raw)
    }

    fn from_file_config(raw: FileConfig) -> Result<Self> {
        let sectors = clean_list(raw.sectors);
        if sectors.is_empty() {
            bail!("config must list at least one sector");
        }
        if raw.cache.ttl == 0 {
            bail!("cache.ttl must be > 0");
        }

        let insight_types = raw
            .insight_types
            .into_iter()
            .map(|(name, kws)| {
                let kws = kws
                    .into_iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect::<Vec<_>>();
                (name.trim().to_string(), kws)
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();

        let mut data_sources = Vec::with_capacity(raw.data_sources.len());
        for (id, entry) in raw.data_sources {
            data_sources.push(SourceConfig::from_entry(id.trim(), entry)?);
        }

        for s in &data_sources {
            tracing::debug!(
                source = %s.source_id,
                kind = ?s.kind,
                enabled = s.enabled,
                has_key = s.api_key.is_some(),
                "source configured"
            );
        }

        Ok(Self {
            sectors,
            insight_types,
            cache: raw.cache,
            data_sources,
        })
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.data_sources.iter().find(|s| s.source_id == id)
    }

    /// Boundary check for an incoming request. The core trusts what passes here.
    pub fn validate_request(&self, req: &CollectionRequest) -> Result<(), RequestError> {
        if !self.sectors.iter().any(|s| s.eq_ignore_ascii_case(&req.sector)) {
            return Err(RequestError::UnknownSector(req.sector.clone()));
        }
        for it in &req.insight_types {
            if !self.insight_types.keys().any(|k| k.eq_ignore_ascii_case(it)) {
                return Err(RequestError::UnknownInsightType(it.clone()));
            }
        }
        for id in &req.enabled_sources {
            match self.source(id) {
                None => return Err(RequestError::UnknownSource(id.clone())),
                Some(s) if !s.enabled => return Err(RequestError::DisabledSource(id.clone())),
                Some(_) => {}
            }
        }
        if !req.date_range.is_valid() {
            return Err(RequestError::InvalidDateRange);
        }
        Ok(())
    }

    /// Rewrite sector / insight type names to their configured spelling.
    pub fn canonicalize_request(&self, mut req: CollectionRequest) -> CollectionRequest {
        if let Some(s) = self.sectors.iter().find(|s| s.eq_ignore_ascii_case(&req.sector)) {
            req.sector = s.clone();
        }
        req.insight_types = req
            .insight_types
            .into_iter()
            .map(|it| {
                self.insight_types
                    .keys()
                    .find(|k| k.eq_ignore_ascii_case(&it))
                    .cloned()
                    .unwrap_or(it)
            })
            .collect();
        req
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

/// Built-in seed used when no config file exists.
pub const DEFAULT_SEED: &str = r#"
sectors = [
    "Technology", "Finance", "Healthcare", "Energy", "Consumer Goods",
    "Industrial", "Utilities", "Real Estate", "Materials", "Communication Services",
]

[insight_types]
"Mergers & Acquisitions" = ["merger", "acquisition", "acquire", "takeover", "buyout"]
"Partnerships" = ["partnership", "collaboration", "alliance", "joint venture", "team up"]
"Funding" = ["funding", "investment", "raise", "series a", "series b", "series c", "funding round"]
"Product Launches" = ["launch", "release", "new product", "announce", "introduce"]
"Leadership Changes" = ["appoint", "hire", "promote", "resign", "step down"]
"Financial Results" = ["revenue", "profit", "loss", "earnings", "financial results", "quarterly results"]
"Regulation" = ["regulation", "compliance", "lawsuit", "settlement", "fine", "investigation"]

[cache]
ttl = 86400
sweep_interval_secs = 600

[data_sources.newsapi]
kind = "api"
flavor = "newsapi"
base_url = "https://newsapi.org/v2"
api_key = "env:NEWS_API_KEY"

[data_sources.gnews]
kind = "api"
flavor = "gnews"
base_url = "https://gnews.io/api/v4"
api_key = "env:GNEWS_API_KEY"

[data_sources.sec_edgar]
kind = "feed"
flavor = "edgar"
base_url = "https://www.sec.gov/Archives/edgar/xbrlrss/all.xml"
max_results = 20

[data_sources.sec_edgar.rate_limit]
requests = 1
interval_secs = 1
"#;
