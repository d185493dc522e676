//! Circuit breaker implementation for external service resilience.
//!
//! Prevents cascading failures when the broker API becomes unavailable or
//! unresponsive.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       (failure_threshold consecutive failures)
//! OPEN → HALF_OPEN    (recovery_timeout elapsed since last failure, checked lazily)
//! HALF_OPEN → CLOSED  (3 consecutive successes)
//! HALF_OPEN → OPEN    (any failure)
//! ```
//!
//! # Configuration
//!
//! - `failure_threshold`: Consecutive failures that open the circuit (default: 10)
//! - `recovery_timeout`: Time to stay open after the last failure (default: 60s)
//!
//! # Example
//!
//! ```rust
//! use alpaca_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("alpaca", CircuitBreakerConfig::default());
//!
//! if breaker.can_execute() {
//!     // make the call, then report the outcome
//!     breaker.on_success();
//! } else {
//!     // circuit is open, fail fast
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::observability;

/// Consecutive `HALF_OPEN` successes required to close the circuit.
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is probing for recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Current state.
    pub state: CircuitBreakerState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Consecutive `HALF_OPEN` successes.
    pub success_count: u32,
    /// Whether a call would be admitted right now.
    pub can_execute: bool,
}

/// Lifetime counters for a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Total recorded outcomes.
    pub total_calls: u64,
    /// Total recorded failures.
    pub total_failures: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitBreakerState,
    to: CircuitBreakerState,
    failure_count: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker for external service calls.
///
/// All state lives behind one mutex so concurrent callers never observe a
/// half-applied transition or lose a counter update.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging.
    name: String,
    /// Configuration.
    config: CircuitBreakerConfig,
    /// Guarded state machine.
    inner: Mutex<BreakerState>,
    /// Total calls counter (for metrics).
    total_calls: AtomicU64,
    /// Total failures counter (for metrics).
    total_failures: AtomicU64,
    /// State transitions counter (for metrics).
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the `CLOSED` state.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the stored state without evaluating the recovery timeout.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    /// Check if a call is permitted.
    ///
    /// An `OPEN` circuit whose recovery timeout has elapsed moves to
    /// `HALF_OPEN` here and admits the call.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        let (permitted, transition) = self.evaluate(&mut inner);
        drop(inner);

        self.announce(transition);
        permitted
    }

    fn evaluate(&self, inner: &mut BreakerState) -> (bool, Option<Transition>) {
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => (true, None),
            CircuitBreakerState::Open => {
                let recovered = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() > self.config.recovery_timeout);
                if recovered {
                    inner.success_count = 0;
                    (true, self.transition(inner, CircuitBreakerState::HalfOpen))
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Time left before an `OPEN` circuit admits a probe.
    #[must_use]
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitBreakerState::Open {
            return None;
        }
        let elapsed = inner.last_failure.map_or(Duration::MAX, |at| at.elapsed());
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        let transition = match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                inner.failure_count = 0;
                if inner.success_count >= HALF_OPEN_SUCCESS_THRESHOLD {
                    inner.success_count = 0;
                    self.transition(&mut inner, CircuitBreakerState::Closed)
                } else {
                    None
                }
            }
            CircuitBreakerState::Closed | CircuitBreakerState::Open => {
                inner.failure_count = 0;
                None
            }
        };
        drop(inner);

        self.announce(transition);
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let transition = match inner.state {
            CircuitBreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitBreakerState::Open)
                } else {
                    None
                }
            }
            CircuitBreakerState::HalfOpen => {
                // Any failure in HALF_OPEN → OPEN
                inner.success_count = 0;
                self.transition(&mut inner, CircuitBreakerState::Open)
            }
            // A call admitted before the circuit opened finished late
            CircuitBreakerState::Open => None,
        };
        drop(inner);

        self.announce(transition);
    }

    /// Snapshot of state and counters, including whether a call would be admitted.
    pub fn status(&self) -> CircuitBreakerStatus {
        let mut inner = self.lock();
        let (can_execute, transition) = self.evaluate(&mut inner);
        let status = CircuitBreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            can_execute,
        };
        drop(inner);

        self.announce(transition);
        status
    }

    /// Get lifetime metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit breaker to open (for testing or emergency).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        let transition = self.transition(&mut inner, CircuitBreakerState::Open);
        drop(inner);

        self.announce(transition);
    }

    /// Force the circuit breaker to close (for testing or recovery).
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        let transition = self.transition(&mut inner, CircuitBreakerState::Closed);
        drop(inner);

        self.announce(transition);
    }

    /// Apply a transition while the lock is held.
    fn transition(&self, inner: &mut BreakerState, to: CircuitBreakerState) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        self.state_transitions.fetch_add(1, Ordering::Relaxed);

        Some(Transition {
            from,
            to,
            failure_count: inner.failure_count,
        })
    }

    /// Log and export a transition once the lock is released.
    fn announce(&self, transition: Option<Transition>) {
        let Some(Transition {
            from,
            to,
            failure_count,
        }) = transition
        else {
            return;
        };

        observability::record_circuit_breaker_state(&self.name, to);

        match to {
            CircuitBreakerState::Open => tracing::warn!(
                name = %self.name,
                from = %from,
                to = %to,
                failure_count,
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => tracing::info!(
                name = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker testing"
            ),
            CircuitBreakerState::Closed => tracing::info!(
                name = %self.name,
                from = %from,
                to = %to,
                "Circuit breaker closed"
            ),
        }
    }
}
