//! Sector corpus service: binary entrypoint.
//! Boots the Axum HTTP server, the shared cache and the periodic sweep.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sector_corpus::{app, build_state, AppConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// `RUST_LOG` filter (default `sector_corpus=info,warn`); JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sector_corpus=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default().context("loading corpus config")?;
    let sweep_every = Duration::from_secs(cfg.cache.sweep_interval_secs.max(1));
    let state = build_state(cfg)?;

    // Periodic sweep so expired entries do not linger until read.
    let cache = state.cache.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_every);
        tick.tick().await;
        loop {
            tick.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                info!(removed, "periodic cache sweep");
            }
        }
    });

    let router = app(state)?;

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, router).await {
        warn!(error = %e, "server stopped");
        return Err(e.into());
    }
    Ok(())
}
