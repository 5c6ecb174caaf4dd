//! Collection run: PENDING → FETCHING → RESOLVING → CACHING → DONE.
//!
//! FAILED is reachable only from FETCHING, when every selected source failed.
//! CANCELLED is checked between states; fetches already in flight finish but
//! their records are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cache::CorpusCache;
use crate::config::AppConfig;
use crate::error::{CollectError, Result};
use crate::ingest::providers::build_adapter;
use crate::ingest::{FetchQuery, RawRecord, ThrottledSource};
use crate::model::{Article, CollectionRequest, Warning};
use crate::resolve::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Fetching,
    Resolving,
    Caching,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    fn label(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Fetching => "fetching",
            RunState::Resolving => "resolving",
            RunState::Caching => "caching",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one source's FETCHING sub-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceState {
    Succeeded { records: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub state: RunState,
    /// Every state entered, in order, starting with `Pending`.
    pub transitions: Vec<RunState>,
    pub sources: BTreeMap<String, SourceState>,
    pub articles: Vec<Article>,
    pub warnings: Vec<Warning>,
}

impl CollectionReport {
    fn new() -> Self {
        Self {
            state: RunState::Pending,
            transitions: vec![RunState::Pending],
            sources: BTreeMap::new(),
            articles: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, next: RunState) {
        info!(from = self.state.label(), to = next.label(), "collection state");
        self.state = next;
        self.transitions.push(next);
    }

    /// Corpus plus warnings for a finished run; the run's error otherwise.
    pub fn into_result(self) -> Result<(Vec<Article>, Vec<Warning>)> {
        match self.state {
            RunState::Done => Ok((self.articles, self.warnings)),
            RunState::Failed => Err(CollectError::AllSourcesFailed {
                warnings: self.warnings,
            }),
            _ => Err(CollectError::Cancelled),
        }
    }
}

pub struct Orchestrator {
    cfg: Arc<AppConfig>,
    sources: Vec<ThrottledSource>,
    cache: Arc<CorpusCache>,
}

impl Orchestrator {
    pub fn new(cfg: Arc<AppConfig>, sources: Vec<ThrottledSource>, cache: Arc<CorpusCache>) -> Self {
        Self { cfg, sources, cache }
    }

    /// One throttled adapter per enabled source in the config.
    pub fn from_config(cfg: Arc<AppConfig>, cache: Arc<CorpusCache>) -> anyhow::Result<Self> {
        let mut sources = Vec::new();
        for sc in cfg.data_sources.iter().filter(|s| s.enabled) {
            let adapter = build_adapter(sc)?;
            sources.push(ThrottledSource::from_config(adapter, sc));
        }
        info!(sources = sources.len(), "orchestrator ready");
        Ok(Self::new(cfg, sources, cache))
    }

    pub fn cache(&self) -> &Arc<CorpusCache> {
        &self.cache
    }

    pub async fn collect(&self, req: &CollectionRequest) -> Result<CollectionReport> {
        self.collect_with_cancel(req, CancellationToken::new()).await
    }

    /// Run a collection. `Err` only when the request selects no source; every
    /// other outcome, FAILED and CANCELLED included, is in the report.
    #[instrument(level = "info", skip_all, fields(sector = %req.sector))]
    pub async fn collect_with_cancel(
        &self,
        req: &CollectionRequest,
        cancel: CancellationToken,
    ) -> Result<CollectionReport> {
        let selected: Vec<&ThrottledSource> = self
            .sources
            .iter()
            .filter(|s| {
                req.enabled_sources.is_empty()
                    || req.enabled_sources.iter().any(|id| id == s.source_id())
            })
            .collect();
        if selected.is_empty() {
            return Err(CollectError::NoSources);
        }

        let mut report = CollectionReport::new();
        let finished = self.run(req, &selected, &cancel, &mut report).await;
        if !finished {
            report.articles.clear();
            report.enter(RunState::Cancelled);
        }

        counter!("collect_runs_total", "state" => report.state.label()).increment(1);
        gauge!("collect_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            state = report.state.label(),
            articles = report.articles.len(),
            warnings = report.warnings.len(),
            "collection finished"
        );
        Ok(report)
    }

    /// Drives the states. Returns false when cancelled between two of them.
    async fn run(
        &self,
        req: &CollectionRequest,
        selected: &[&ThrottledSource],
        cancel: &CancellationToken,
        report: &mut CollectionReport,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        // FETCHING: one concurrent sub-state per source, joined before moving on.
        report.enter(RunState::Fetching);
        let query = FetchQuery {
            sector: req.sector.clone(),
            date_range: req.date_range,
        };
        let outcomes = join_all(selected.iter().map(|s| {
            let query = &query;
            async move { (s.source_id().to_string(), s.fetch(query).await) }
        }))
        .await;

        let mut records: Vec<RawRecord> = Vec::new();
        for (source_id, outcome) in outcomes {
            match outcome {
                Ok(batch) => {
                    report
                        .sources
                        .insert(source_id, SourceState::Succeeded { records: batch.len() });
                    records.extend(batch);
                }
                Err(e) => {
                    let reason = match &e {
                        CollectError::SourceUnavailable { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    report.warnings.push(Warning::source_unavailable(&source_id, reason.clone()));
                    report.sources.insert(source_id, SourceState::Failed { reason });
                }
            }
        }

        if cancel.is_cancelled() {
            return false;
        }

        let any_succeeded = report
            .sources
            .values()
            .any(|s| matches!(s, SourceState::Succeeded { .. }));
        if !any_succeeded {
            warn!(sources = report.sources.len(), "every source failed");
            report.enter(RunState::Failed);
            return true;
        }

        // RESOLVING
        report.enter(RunState::Resolving);
        let resolved = Resolver::for_request(req, &self.cfg).resolve(&records);
        for drift in &resolved.drift {
            report
                .warnings
                .push(Warning::schema_drift(&drift.source_id, drift.reason.clone()));
        }
        if resolved.out_of_range > 0 {
            info!(dropped = resolved.out_of_range, "records outside the requested window");
        }

        if cancel.is_cancelled() {
            return false;
        }

        // CACHING: fold into any live cached copy, then write through.
        report.enter(RunState::Caching);
        let ttl = self.cfg.cache.ttl();
        let mut articles = Vec::with_capacity(resolved.articles.len());
        for article in resolved.articles {
            let merged = match self.cache.get(&article.identity) {
                Some(mut cached) => {
                    cached.merge(article);
                    cached
                }
                None => article,
            };
            if let Err(e) = self.cache.put(merged.clone(), ttl) {
                warn!(identity = %merged.identity, error = %e, "cache write failed");
                report
                    .warnings
                    .push(Warning::cache_write_failure(&merged.identity, e.to_string()));
            }
            articles.push(merged);
        }
        report.articles = articles;

        report.enter(RunState::Done);
        true
    }
}
