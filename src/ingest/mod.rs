// src/ingest/mod.rs
pub mod normalize;
pub mod providers;
pub mod throttle;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use normalize::{normalize_body, normalize_record, normalize_text, NormalizedRecord};
pub use throttle::{RetryPolicy, ThrottledSource};
pub use types::{FetchQuery, RawPayload, RawRecord, SourceAdapter};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_records_total",
            "Raw records returned by source adapters."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Sources that ended a run unavailable."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Adapter attempts retried after a transient failure."
        );
        describe_counter!(
            "ingest_full_text_total",
            "API records whose short body was replaced by the article page text."
        );
        describe_counter!(
            "ingest_schema_drift_total",
            "Records skipped because they could not be normalized."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Records folded into an existing article identity."
        );
        describe_counter!("collect_runs_total", "Collection runs by final state.");
        describe_counter!("cache_hits_total", "Cache reads that found a live entry.");
        describe_counter!("cache_misses_total", "Cache reads that found nothing live.");
        describe_counter!("cache_expired_total", "Entries removed because their ttl passed.");
        describe_counter!(
            "cache_write_failures_total",
            "Articles whose write-through to disk failed."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("cache_ttl_seconds", "Configured absolute cache ttl.");
        describe_gauge!(
            "collect_last_run_ts",
            "Unix ts when a collection run last finished."
        );
    });
}
