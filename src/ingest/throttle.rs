// src/ingest/throttle.rs
//! Per-source token bucket plus bounded exponential backoff.
//!
//! Delay before retry `n` (1-based):
//! ```text
//! min(base_delay * 2^(n-1), max_delay) + uniform(0..=jitter)
//! ```
//! Transient failures are retried up to `max_retries`; anything else fails at once.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::counter;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::config::{RateLimitConfig, SourceConfig, SourceKind};
use crate::error::{CollectError, FetchError};
use crate::ingest::types::{FetchQuery, RawRecord, SourceAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        // Scrapes, and API sources filling short bodies, make one listing
        // request plus up to one request per article.
        let per_article = match cfg.kind {
            SourceKind::Scrape => true,
            SourceKind::Api => cfg.full_text,
            SourceKind::Feed => false,
        };
        let attempt_timeout = if per_article {
            cfg.timeout.saturating_mul(cfg.max_results.saturating_add(1))
        } else {
            cfg.timeout
        };
        Self {
            max_retries: cfg.retry.max_retries,
            base_delay: Duration::from_millis(cfg.retry.base_delay_ms),
            max_delay: Duration::from_millis(cfg.retry.max_delay_ms),
            jitter: Duration::from_millis(cfg.retry.jitter_ms),
            attempt_timeout,
        }
    }

    /// Capped exponential delay before retry `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.backoff(retry) + Duration::from_millis(extra)
    }
}

fn quota(rate: &RateLimitConfig) -> Quota {
    let burst = NonZeroU32::new(rate.requests).unwrap_or(NonZeroU32::MIN);
    let interval = Duration::from_secs(rate.interval_secs.max(1));
    let period = interval / burst.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// An adapter wrapped in its own limiter and retry policy.
pub struct ThrottledSource {
    inner: Arc<dyn SourceAdapter>,
    limiter: DefaultDirectRateLimiter,
    policy: RetryPolicy,
}

impl ThrottledSource {
    pub fn new(inner: Arc<dyn SourceAdapter>, rate: &RateLimitConfig, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter: RateLimiter::direct(quota(rate)),
            policy,
        }
    }

    pub fn from_config(inner: Arc<dyn SourceAdapter>, cfg: &SourceConfig) -> Self {
        Self::new(inner, &cfg.rate_limit, RetryPolicy::from_config(cfg))
    }

    pub fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with throttling and retries. Exhausted or permanent failures
    /// come back as `SourceUnavailable`.
    #[instrument(level = "debug", skip_all, fields(source = %self.inner.source_id()))]
    pub async fn fetch(&self, query: &FetchQuery) -> Result<Vec<RawRecord>, CollectError> {
        let source_id = self.inner.source_id();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.until_ready().await;

            let outcome = match tokio::time::timeout(self.policy.attempt_timeout, self.inner.fetch(query)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Transient(format!(
                    "timed out after {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            match outcome {
                Ok(records) => {
                    debug!(attempt, records = records.len(), "fetch succeeded");
                    return Ok(records);
                }
                Err(e) if e.is_transient() && attempt <= self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient fetch failure, backing off");
                    counter!("ingest_fetch_retries_total", "source" => source_id.to_string())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "source unavailable");
                    counter!("ingest_provider_errors_total", "source" => source_id.to_string())
                        .increment(1);
                    return Err(CollectError::SourceUnavailable {
                        source_id: source_id.to_string(),
                        reason: format!("{e} (after {attempt} attempt(s))"),
                    });
                }
            }
        }
    }
}
