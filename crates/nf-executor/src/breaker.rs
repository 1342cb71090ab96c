//! Circuit breaker guarding the sandbox.
//!
//! Closed -> Open after `failure_threshold` consecutive failures.
//! Open -> HalfOpen lazily, on the first `is_open()` after `timeout`.
//! HalfOpen admits `half_open_max_calls` probes; a probe failure reopens,
//! a probe success closes.

use crate::ExecutorError;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the last failure.
    pub timeout: Duration,
    /// Probes admitted while half-open.
    pub half_open_max_calls: u32,
    /// Open immediately on a connection error instead of counting it.
    pub trip_on_connection_error: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            trip_on_connection_error: false,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_probes: u32,
}

/// Point-in-time view of a breaker, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub half_open_probes: u32,
    pub since_last_failure_ms: Option<u64>,
}

/// One instance per downstream dependency, shared via `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_probes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // Counters stay meaningful after a panic elsewhere, so a poisoned lock
    // is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether calls must be rejected. May move Open -> HalfOpen, in which
    /// case this call is admitted as the first probe.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.timeout);
                if !elapsed {
                    return true;
                }
                inner.state = BreakerState::HalfOpen;
                inner.half_open_probes = 1;
                tracing::info!(breaker = %self.name, state = %BreakerState::HalfOpen, "circuit half-open, admitting probe");
                false
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_calls {
                    inner.half_open_probes += 1;
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_probes = 0;
                tracing::info!(breaker = %self.name, state = %BreakerState::Closed, "circuit closed");
            }
            BreakerState::Open => {
                tracing::debug!(breaker = %self.name, "success recorded while open, ignoring");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        state = %BreakerState::Open,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.half_open_probes = 0;
                tracing::warn!(breaker = %self.name, state = %BreakerState::Open, "probe failed, circuit reopened");
            }
            BreakerState::Open => inner.failure_count += 1,
        }
    }

    /// Feed an executor error into the breaker. Errors that say nothing
    /// about sandbox health are ignored.
    pub fn record_error(&self, error: &ExecutorError) {
        if !error.counts_against_breaker() {
            return;
        }
        if self.config.trip_on_connection_error && matches!(error, ExecutorError::ConnectionError(_)) {
            self.trip();
        } else {
            self.record_failure();
        }
    }

    /// Force the circuit open.
    pub fn trip(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Open;
        inner.half_open_probes = 0;
        inner.last_failure = Some(Instant::now());
        tracing::warn!(breaker = %self.name, state = %BreakerState::Open, "circuit tripped");
    }

    /// Current state without evaluating the open timeout.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_probes: inner.half_open_probes,
            since_last_failure_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_probes = 0;
    }
}
