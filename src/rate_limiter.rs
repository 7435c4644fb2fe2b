//! Token-bucket rate limiting for outbound RPC and API calls.
//!
//! Each endpoint gets its own `governor` direct rate limiter plus an optional
//! concurrency semaphore; a process-wide global limiter caps aggregate load
//! across every chain. Call metrics are tracked per limiter and exposed via
//! `snapshot()` for logs and diagnostics.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};
use tracing::{debug, trace};

const DEFAULT_BURST: u32 = 5;

/// Running counters for one limiter. Averages are derived on demand.
#[derive(Debug, Clone, Default)]
pub struct CallMetrics {
    pub total_calls: u64,
    pub rate_limited_waits: u64,
    pub failed_calls: u64,
    pub total_wait_time_ms: u64,
}

/// Rate limiter guarding a single endpoint, layered under a shared global
/// limiter so one chain cannot starve the rest of the process.
#[derive(Debug)]
pub struct EndpointRateLimiter {
    label: String,
    local: DefaultDirectRateLimiter,
    global: Arc<DefaultDirectRateLimiter>,
    concurrency: Option<Semaphore>,
    metrics: RwLock<CallMetrics>,
}

impl EndpointRateLimiter {
    pub fn new(
        label: impl Into<String>,
        rps_limit: u32,
        max_concurrent: Option<u32>,
        global: Arc<DefaultDirectRateLimiter>,
    ) -> Self {
        let label = label.into();
        let rps = NonZeroU32::new(rps_limit.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(DEFAULT_BURST).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(burst);
        debug!(
            target: "rate_limiter",
            endpoint = %label,
            rps_limit = rps.get(),
            max_concurrent = ?max_concurrent,
            "Initialized endpoint rate limiter"
        );
        Self {
            label,
            local: GovernorRateLimiter::direct(quota),
            global,
            concurrency: max_concurrent
                .filter(|c| *c > 0)
                .map(|c| Semaphore::new(c as usize)),
            metrics: RwLock::new(CallMetrics::default()),
        }
    }

    /// Waits until both the global and endpoint buckets admit a call, then
    /// reserves a concurrency slot. The returned permit must be held for the
    /// duration of the call.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        let started = Instant::now();

        self.global.until_ready().await;
        self.local.until_ready().await;

        let permit = match &self.concurrency {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        let waited = started.elapsed();
        let mut metrics = self.metrics.write().await;
        metrics.total_calls += 1;
        if waited.as_millis() > 0 {
            metrics.rate_limited_waits += 1;
            metrics.total_wait_time_ms += waited.as_millis() as u64;
            trace!(
                target: "rate_limiter",
                endpoint = %self.label,
                waited_ms = waited.as_millis() as u64,
                "Throttled outbound call"
            );
        }
        permit
    }

    pub async fn record_failure(&self) {
        self.metrics.write().await.failed_calls += 1;
    }

    pub async fn snapshot(&self) -> CallMetrics {
        self.metrics.read().await.clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Builds the process-wide limiter shared by every endpoint limiter.
pub fn global_rate_limiter(global_rps: u32) -> Arc<DefaultDirectRateLimiter> {
    let rps = NonZeroU32::new(global_rps.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(global_rps.max(DEFAULT_BURST)).unwrap_or(NonZeroU32::MIN);
    Arc::new(GovernorRateLimiter::direct(
        Quota::per_second(rps).allow_burst(burst),
    ))
}
