// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /collect (done, failed, rejected at the boundary)
// - GET /cache/{identity}
// - POST /cache/sweep

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use sector_corpus::config::{RateLimitConfig, SourceKind};
use sector_corpus::error::FetchError;
use sector_corpus::ingest::{FetchQuery, RawPayload, RawRecord, RetryPolicy, SourceAdapter, ThrottledSource};
use sector_corpus::{api, AppConfig, AppState, CorpusCache, Orchestrator};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

const CONFIG: &str = r#"
sectors = ["Energy", "Technology"]

[insight_types]
"Regulation" = ["fine"]
"#;

struct Canned {
    id: &'static str,
    up: bool,
}

#[async_trait]
impl SourceAdapter for Canned {
    async fn fetch(&self, q: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        if !self.up {
            return Err(FetchError::Permanent("403 forbidden".into()));
        }
        // Published inside whatever window was requested.
        let when = q.date_range.to - chrono::Duration::hours(1);
        Ok(vec![RawRecord {
            source_id: self.id.into(),
            fetched_at: Utc::now(),
            payload: RawPayload::Api(json!({
                "title": "Solar maker hit with fine",
                "url": "https://apnews.com/solar-fine",
                "publishedAt": when.to_rfc3339(),
                "content": "Regulators issued a fine.",
            })),
        }])
    }
    fn source_id(&self) -> &str {
        self.id
    }
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }
}

/// Build the same Router the binary uses, over canned sources.
fn test_router(up: bool) -> Router {
    let cfg = Arc::new(AppConfig::from_toml_str(CONFIG).expect("config"));
    let cache = Arc::new(CorpusCache::in_memory());
    let policy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        jitter: Duration::ZERO,
        attempt_timeout: Duration::from_secs(2),
    };
    let rate = RateLimitConfig {
        requests: 100,
        interval_secs: 1,
    };
    let sources = vec![
        ThrottledSource::new(Arc::new(Canned { id: "newsapi", up }), &rate, policy),
        ThrottledSource::new(Arc::new(Canned { id: "gnews", up }), &rate, policy),
    ];
    let orch = Arc::new(Orchestrator::new(cfg.clone(), sources, cache));
    api::router(AppState::new(cfg, orch))
}

fn post_json(uri: &str, payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(payload).expect("serialize payload")))
        .expect("build POST")
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router(true);

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn collect_returns_corpus_and_fills_cache() {
    let app = test_router(true);

    let resp = app
        .clone()
        .oneshot(post_json(
            "/collect",
            &json!({ "sector": "energy", "insight_types": ["regulation"] }),
        ))
        .await
        .expect("oneshot /collect");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["state"], "DONE");
    assert_eq!(v["warnings"].as_array().unwrap().len(), 0);
    let articles = v["articles"].as_array().expect("articles array");
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0]["sector_tags"], json!(["Energy"]));
    assert_eq!(articles[0]["insight_type_tags"], json!(["Regulation"]));
    assert_eq!(articles[0]["source_ids"], json!(["gnews", "newsapi"]));

    let id = articles[0]["identity"].as_str().unwrap().to_string();
    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("/cache/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["identity"], id.as_str());

    let resp = app
        .oneshot(Request::post("/cache/sweep").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({ "removed": 0 }));
}

#[tokio::test]
async fn collect_with_every_source_down_is_bad_gateway() {
    let app = test_router(false);
    let resp = app
        .oneshot(post_json("/collect", &json!({ "sector": "Technology" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let v = json_body(resp).await;
    assert_eq!(v["state"], "FAILED");
    assert!(v["articles"].as_array().unwrap().is_empty());
    assert_eq!(v["warnings"].as_array().unwrap().len(), 2);
    assert_eq!(v["warnings"][0]["kind"], "source_unavailable");
}

#[tokio::test]
async fn unknown_sector_is_rejected_before_fetching() {
    let app = test_router(true);
    let resp = app
        .oneshot(post_json("/collect", &json!({ "sector": "Astrology" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = json_body(resp).await;
    assert!(v["error"].as_str().unwrap().contains("Astrology"));
}

#[tokio::test]
async fn unknown_insight_type_and_inverted_range_are_rejected() {
    let app = test_router(true);
    let resp = app
        .clone()
        .oneshot(post_json(
            "/collect",
            &json!({ "sector": "Energy", "insight_types": ["Gossip"] }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = app
        .oneshot(post_json(
            "/collect",
            &json!({
                "sector": "Energy",
                "from": "2025-03-08T00:00:00Z",
                "to": "2025-03-01T00:00:00Z"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn missing_cache_entry_is_404() {
    let app = test_router(true);
    let resp = app
        .oneshot(Request::get("/cache/deadbeef").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
