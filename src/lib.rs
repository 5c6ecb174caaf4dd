// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod resolve;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use chrono::Utc;
use tracing::info;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::cache::CorpusCache;
pub use crate::config::AppConfig;
pub use crate::error::{CollectError, Result};
pub use crate::model::{Article, ArticleId, CollectionRequest, DateRange, Warning, WarningKind};
pub use crate::orchestrator::{CollectionReport, Orchestrator, RunState, SourceState};
pub use crate::resolve::{resolve, Resolver};

/// In-memory cache, or a write-through one when `cache.dir` is configured.
pub fn open_cache(cfg: &AppConfig) -> anyhow::Result<CorpusCache> {
    match &cfg.cache.dir {
        Some(dir) => CorpusCache::open(dir, Utc::now())
            .with_context(|| format!("opening cache dir {}", dir.display())),
        None => Ok(CorpusCache::in_memory()),
    }
}

/// Shared state for the HTTP layer, built from config.
pub fn build_state(cfg: AppConfig) -> anyhow::Result<AppState> {
    let cfg = Arc::new(cfg);
    let cache = Arc::new(open_cache(&cfg)?);
    let orchestrator = Arc::new(Orchestrator::from_config(cfg.clone(), cache)?);
    Ok(AppState::new(cfg, orchestrator))
}

/// Full in-process app: API routes plus `/metrics`.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let metrics = crate::metrics::Metrics::init(state.cfg.cache.ttl())?;
    info!(sectors = state.cfg.sectors.len(), "app assembled");
    Ok(router(state).merge(metrics.router()))
}
