//! Per-endpoint circuit breaker.
//!
//! Tracks consecutive failures for a single upstream (RPC endpoint or
//! aggregator API). After `failure_threshold` consecutive failures the
//! breaker opens and callers are rejected without touching the network.
//! Once the cooldown elapses the breaker moves to half-open and admits
//! exactly one trial call: success closes it, failure re-opens it for
//! another full cooldown.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial call is in flight.
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            label: label.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Asks permission to issue a call. Returns `false` when the breaker is
    /// open (or a half-open trial is already in flight); the caller must
    /// short-circuit without any network activity.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    debug!(target: "circuit_breaker", endpoint = %self.label, "Cooldown elapsed, admitting half-open trial");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != BreakerState::Closed {
            debug!(target: "circuit_breaker", endpoint = %self.label, "Trial succeeded, closing breaker");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.trial_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                // Failed trial re-opens for a full cooldown.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(target: "circuit_breaker", endpoint = %self.label, "Half-open trial failed, re-opening");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        target: "circuit_breaker",
                        endpoint = %self.label,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Breaker tripped"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
