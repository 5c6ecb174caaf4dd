use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::cache::CorpusCache;
use crate::config::AppConfig;
use crate::error::CollectError;
use crate::model::{ArticleId, CollectionRequest, DateRange};
use crate::orchestrator::{Orchestrator, RunState};

/// Window used when a request gives no `from`.
const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<CorpusCache>,
}

impl AppState {
    pub fn new(cfg: Arc<AppConfig>, orchestrator: Arc<Orchestrator>) -> Self {
        let cache = orchestrator.cache().clone();
        Self {
            cfg,
            orchestrator,
            cache,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/collect", post(collect))
        .route("/cache/sweep", post(cache_sweep))
        .route("/cache/{identity}", get(cache_get))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CollectBody {
    sector: String,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
    #[serde(default)]
    insight_types: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
}

impl CollectBody {
    fn into_request(self, now: DateTime<Utc>) -> CollectionRequest {
        let to = self.to.unwrap_or(now);
        let from = self
            .from
            .unwrap_or_else(|| to - chrono::Duration::days(DEFAULT_WINDOW_DAYS));
        CollectionRequest {
            sector: self.sector,
            date_range: DateRange::new(from, to),
            insight_types: self.insight_types,
            enabled_sources: self.sources,
        }
    }
}

fn unprocessable(msg: impl std::fmt::Display) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": msg.to_string() })),
    )
        .into_response()
}

async fn collect(State(state): State<AppState>, Json(body): Json<CollectBody>) -> Response {
    let req = body.into_request(Utc::now());
    if let Err(e) = state.cfg.validate_request(&req) {
        warn!(error = %e, "collection request rejected");
        return unprocessable(e);
    }
    let req = state.cfg.canonicalize_request(req);

    match state.orchestrator.collect(&req).await {
        Ok(report) => {
            let status = match report.state {
                RunState::Done => StatusCode::OK,
                RunState::Failed => StatusCode::BAD_GATEWAY,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(report)).into_response()
        }
        Err(e @ CollectError::NoSources) => unprocessable(e),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn cache_get(State(state): State<AppState>, Path(identity): Path<String>) -> Response {
    match state.cache.get(&ArticleId::new(identity)) {
        Some(article) => Json(article).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn cache_sweep(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.cache.sweep();
    Json(json!({ "removed": removed }))
}
