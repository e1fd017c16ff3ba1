//! Circuit breaker to prevent hammering a failing upstream.
//!
//! When upstream calls fail repeatedly, the circuit opens and
//! subsequent requests go straight to the fallback bank.
//!
//! ```text
//! Closed → Open:     consecutive failures reach failure_threshold
//! Open → Half-Open:  permit() after recovery_timeout has elapsed
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open:  any failure
//! ```
//!
//! `permit()` hands out a [`Permit`] that the caller returns with the
//! outcome, so only the current half-open probe can close the circuit.
//!
//! All fields sit behind one mutex. The lock is held only for the
//! read/update itself, never across an upstream call or a backoff sleep.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::duration_serde;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before a probe is allowed through an open circuit
    #[serde(with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,

    /// Admit at most one in-flight probe while half-open
    pub single_probe: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            single_probe: false,
        }
    }
}

/// State of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Upstream assumed down, all calls bypass
    Open,

    /// Testing if upstream recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Source of monotonic time for the breaker.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced [`Clock`] for tests and simulations.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Admission ticket returned by [`CircuitBreaker::permit`].
///
/// The caller hands it back with the outcome. Only a probe ticket from
/// the current half-open window moves a half-open circuit, so a request
/// admitted before the circuit opened cannot close it or free the probe
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Admitted while closed
    Normal,

    /// Admitted as a recovery probe in half-open window `window`
    Probe { window: u64 },
}

impl Permit {
    /// Whether this ticket is a half-open probe.
    pub fn is_probe(&self) -> bool {
        matches!(self, Permit::Probe { .. })
    }
}

/// Point-in-time view of the breaker, read under one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes_in_half_open: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub probe_in_flight: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    // Bumped on every OPEN -> HALF_OPEN move, never reset.
    window: u64,
}

impl BreakerInner {
    fn closed(window: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            last_failure_at: None,
            probe_in_flight: false,
            window,
        }
    }

    fn mark_failure(&mut self, now: Instant) {
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());
    }

    fn is_current_probe(&self, permit: Permit) -> bool {
        self.state == CircuitState::HalfOpen
            && matches!(permit, Permit::Probe { window } if window == self.window)
    }
}

/// Circuit breaker guarding the upstream dependency.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker reading time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::closed(0)),
            config,
            clock,
        }
    }

    /// Ask to make an upstream attempt. `None` means go to the fallback.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to
    /// half-open here, and the caller that observes the move is granted
    /// the probe.
    pub fn permit(&self) -> Option<Permit> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed > self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.window += 1;
                    inner.probe_in_flight = self.config.single_probe;
                    tracing::info!(
                        elapsed = ?elapsed,
                        window = inner.window,
                        "Circuit transitioning to half-open for recovery test"
                    );
                    Some(Permit::Probe {
                        window: inner.window,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if self.config.single_probe {
                    if inner.probe_in_flight {
                        return None;
                    }
                    inner.probe_in_flight = true;
                }
                Some(Permit::Probe {
                    window: inner.window,
                })
            }
        }
    }

    /// Record a successful upstream call made under `permit`.
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if inner.is_current_probe(permit) => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    tracing::info!("Circuit closed after successful recovery");
                }
            }
            // Admitted before this half-open window; says nothing about recovery.
            CircuitState::HalfOpen => {
                tracing::debug!(?permit, "Stale success ignored while half-open");
            }
            // A late success from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a failed upstream call made under `permit`.
    pub fn record_failure(&self, permit: Permit) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.mark_failure(now);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "Circuit opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen if inner.is_current_probe(permit) => {
                inner.state = CircuitState::Open;
                inner.consecutive_successes = 0;
                inner.probe_in_flight = false;
                inner.mark_failure(now);
                tracing::warn!("Circuit reopened after failed recovery attempt");
            }
            CircuitState::HalfOpen => {
                tracing::debug!(?permit, "Stale failure ignored while half-open");
            }
            CircuitState::Open => {
                inner.mark_failure(now);
            }
        }
    }

    /// Give back a probe that ended without an outcome.
    pub fn release_probe(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if inner.is_current_probe(permit) && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!("Abandoned half-open probe released");
        }
    }

    /// Force the circuit closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let window = inner.window;
        *inner = BreakerInner::closed(window);
        tracing::info!("Circuit breaker reset to closed");
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consistent view of every field.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes_in_half_open: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            probe_in_flight: inner.probe_in_flight,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
        }
    }

    /// Breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
