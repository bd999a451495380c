//! Per-endpoint circuit breaker.
//!
//! Each CDN endpoint owns one breaker; state is never shared across
//! endpoints. Closed passes requests through and records outcomes in a
//! rolling window. Open fails fast until the reset timeout elapses. During
//! half-open a single probe decides between closing and re-opening, which
//! keeps a recovering endpoint from being hammered.

use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "breaker";

// Default values for breaker configuration
const DEFAULT_VOLUME_THRESHOLD: u32 = 1;
const DEFAULT_ERROR_THRESHOLD_PERCENTAGE: u8 = 50;
const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ROLLING_WINDOW_MS: u64 = 10_000;

/// Circuit breaker thresholds, one set per endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Minimum calls in the rolling window before the breaker may trip.
    pub volume_threshold: u32,
    /// Failure percentage at or above which the breaker opens.
    pub error_threshold_percentage: u8,
    /// How long the breaker stays open before allowing a probe.
    pub reset_timeout_ms: u64,
    /// Width of the rolling statistics window.
    pub rolling_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
            error_threshold_percentage: DEFAULT_ERROR_THRESHOLD_PERCENTAGE,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
            rolling_window_ms: DEFAULT_ROLLING_WINDOW_MS,
        }
    }
}

impl BreakerConfig {
    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

/// Breaker rejection. Short-circuited calls never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("circuit breaker has been shut down")]
    Shutdown,
}

impl BreakerError {
    /// Rejection code, kept compatible with the prior deployment's breaker
    /// so log-based alerting carries over.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open => "EOPENBREAKER",
            Self::Shutdown => "ESHUTDOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Stats {
    window_start: Instant,
    successes: u32,
    failures: u32,
}

impl Stats {
    fn fresh() -> Self {
        Self {
            window_start: Instant::now(),
            successes: 0,
            failures: 0,
        }
    }

    fn roll(&mut self, window: Duration) {
        if self.window_start.elapsed() >= window {
            *self = Self::fresh();
        }
    }

    fn total(&self) -> u32 {
        self.successes + self.failures
    }
}

#[derive(Debug)]
enum Inner {
    Closed { stats: Stats },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
    Shutdown,
}

pub struct CircuitBreaker {
    /// Endpoint label used in logs; breakers are per-endpoint by design.
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                stats: Stats::fresh(),
            }),
        }
    }

    /// Ask the breaker whether a call may proceed.
    ///
    /// Returns `Err` without any side effect on the network path: an open
    /// breaker fails fast, which is what allows rapid fallback to a mirror
    /// instead of waiting out a timeout against a dead endpoint.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "try_acquire");
        match &mut *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    debug!(endpoint = %self.endpoint, "Breaker half-open, allowing probe");
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                } else {
                    Err(BreakerError::Open)
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(BreakerError::Open)
                } else {
                    *probe_in_flight = true;
                    Ok(())
                }
            }
            Inner::Shutdown => Err(BreakerError::Shutdown),
        }
    }

    pub fn record_success(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_success");
        match &mut *inner {
            Inner::Closed { stats } => {
                stats.roll(self.config.rolling_window());
                stats.successes += 1;
            }
            Inner::HalfOpen { .. } => {
                debug!(endpoint = %self.endpoint, "Probe succeeded, closing breaker");
                *inner = Inner::Closed {
                    stats: Stats::fresh(),
                };
            }
            // Late completion of a call that started before the transition.
            Inner::Open { .. } | Inner::Shutdown => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_failure");
        match &mut *inner {
            Inner::Closed { stats } => {
                stats.roll(self.config.rolling_window());
                stats.failures += 1;
                let total = stats.total();
                let threshold = u64::from(self.config.error_threshold_percentage);
                if total >= self.config.volume_threshold.max(1)
                    && u64::from(stats.failures) * 100 >= u64::from(total) * threshold
                {
                    self.trip(&mut inner);
                }
            }
            Inner::HalfOpen { .. } => {
                self.trip(&mut inner);
            }
            Inner::Open { .. } | Inner::Shutdown => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        counter!("persisted_documents_breaker_open_total").increment(1);
        warn!(
            endpoint = %self.endpoint,
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit breaker opened"
        );
        *inner = Inner::Open {
            until: Instant::now() + self.config.reset_timeout(),
        };
    }

    /// Permanently disable the breaker. Part of resolver disposal at
    /// process shutdown; subsequent acquisitions fail fast.
    pub fn shutdown(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "shutdown");
        *inner = Inner::Shutdown;
    }

    pub fn state(&self) -> BreakerState {
        let inner = mutex_lock(&self.inner, SOURCE, "state");
        match &*inner {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } | Inner::Shutdown => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}
