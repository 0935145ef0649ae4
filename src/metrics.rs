//! Real-time dispatch counters, bucketed per minute and per hour.
//!
//! Counters live in the cache backend and are incremented fire-and-forget
//! from the dispatcher. Every family is mirrored to a `global` pseudo-tenant
//! so fleet-wide rates can be read without scanning tenants. Lost increments
//! on backend failure are tolerated.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::cache::CacheBackend;

/// TTL for per-minute buckets.
const MINUTE_BUCKET_TTL_SECS: u64 = 300;
/// TTL for per-hour buckets and latency samples.
const HOUR_BUCKET_TTL_SECS: u64 = 7200;

/// Which bucket family to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsWindow {
    /// The current minute bucket.
    Minute,
    /// The current hour bucket.
    Hour,
}

impl MetricsWindow {
    fn segment(self) -> &'static str {
        match self {
            Self::Minute => "min",
            Self::Hour => "hour",
        }
    }

    fn bucket(self, epoch_secs: i64) -> i64 {
        let width = match self {
            Self::Minute => 60,
            Self::Hour => 3600,
        };
        epoch_secs.div_euclid(width).saturating_mul(width)
    }

    fn ttl(self) -> u64 {
        match self {
            Self::Minute => MINUTE_BUCKET_TTL_SECS,
            Self::Hour => HOUR_BUCKET_TTL_SECS,
        }
    }
}

/// One dispatch observation.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSample {
    /// Whether the dispatch returned `Ok`.
    pub ok: bool,
    /// Whether the result came from cache.
    pub cache_hit: bool,
    /// Wall-clock execution time in milliseconds.
    pub latency_ms: u64,
}

/// Readback of the current counters for one tenant (or global) and window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RealtimeMetrics {
    /// Total dispatches observed in the bucket.
    pub calls: i64,
    /// Dispatches that returned an error.
    pub errors: i64,
    /// Dispatches served from cache.
    pub cache_hits: i64,
    /// Percentage of calls that succeeded.
    pub success_rate: f64,
    /// Percentage of calls served from cache.
    pub cache_hit_rate: f64,
}

/// Fire-and-forget metric accumulation over the cache backend.
pub struct MetricsAccumulator {
    backend: Arc<dyn CacheBackend>,
}

impl MetricsAccumulator {
    /// Wrap a counter backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Record one dispatch for a tenant (and the global mirror).
    ///
    /// Backend failures are logged at debug and swallowed; callers run this
    /// inside a spawned task.
    pub async fn record(&self, tenant: Uuid, tool: &str, sample: DispatchSample) {
        let now = Utc::now().timestamp();
        let tenant_part = tenant.to_string();
        for scope in [tenant_part.as_str(), "global"] {
            for window in [MetricsWindow::Minute, MetricsWindow::Hour] {
                let bucket = window.bucket(now);
                let segment = window.segment();
                let prefix = format!("braid:metrics:{scope}:{segment}:{bucket}");
                self.bump(&format!("{prefix}:calls"), window.ttl()).await;
                if !sample.ok {
                    self.bump(&format!("{prefix}:errors"), window.ttl()).await;
                }
                if sample.cache_hit {
                    self.bump(&format!("{prefix}:cache_hits"), window.ttl())
                        .await;
                }
            }

            // Per-tool counters only carry the hour family.
            let hour = MetricsWindow::Hour.bucket(now);
            let tool_prefix = format!("braid:metrics:{scope}:hour:{hour}:tool:{tool}");
            self.bump(&format!("{tool_prefix}:calls"), HOUR_BUCKET_TTL_SECS)
                .await;
            if !sample.ok {
                self.bump(&format!("{tool_prefix}:errors"), HOUR_BUCKET_TTL_SECS)
                    .await;
            }

            // Individual latency samples, keyed by the observation second.
            let latency_key = format!("braid:metrics:{scope}:hour:{hour}:latency:{now}");
            if let Err(e) = self
                .backend
                .set(
                    &latency_key,
                    serde_json::Value::from(sample.latency_ms),
                    HOUR_BUCKET_TTL_SECS,
                )
                .await
            {
                debug!(key = %latency_key, error = %e, "latency sample dropped");
            }
        }
    }

    /// Read the live counters for a tenant, or global when `tenant` is `None`.
    pub async fn realtime_metrics(
        &self,
        tenant: Option<Uuid>,
        window: MetricsWindow,
    ) -> RealtimeMetrics {
        let scope = tenant.map_or_else(|| "global".to_owned(), |t| t.to_string());
        let bucket = window.bucket(Utc::now().timestamp());
        let prefix = format!("braid:metrics:{scope}:{}:{bucket}", window.segment());

        let calls = self.read_counter(&format!("{prefix}:calls")).await;
        let errors = self.read_counter(&format!("{prefix}:errors")).await;
        let cache_hits = self.read_counter(&format!("{prefix}:cache_hits")).await;

        RealtimeMetrics {
            calls,
            errors,
            cache_hits,
            success_rate: percentage(calls.saturating_sub(errors), calls),
            cache_hit_rate: percentage(cache_hits, calls),
        }
    }

    async fn bump(&self, key: &str, ttl_secs: u64) {
        if let Err(e) = self.backend.increment(key, ttl_secs).await {
            debug!(key, error = %e, "metric increment dropped");
        }
    }

    async fn read_counter(&self, key: &str) -> i64 {
        match self.backend.get(key).await {
            Ok(value) => value.and_then(|v| v.as_i64()).unwrap_or(0),
            Err(e) => {
                debug!(key, error = %e, "metric read failed");
                0
            }
        }
    }
}

/// `part / whole` as a percentage; 0 when the denominator is empty.
fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    let part = f64::from(u32::try_from(part.max(0)).unwrap_or(u32::MAX));
    let whole = f64::from(u32::try_from(whole).unwrap_or(u32::MAX));
    part / whole * 100.0
}
