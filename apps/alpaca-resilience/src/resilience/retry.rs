//! Retry engine combining rate limiting, circuit breaking and backoff.
//!
//! # Flow
//!
//! ```text
//! execute(op)
//!     → circuit breaker open?          → ServiceUnavailable (no attempt consumed)
//!     → loop attempt 1..=max_attempts
//!         → rate limiter token (bounded wait, then proceed regardless)
//!         → op()
//!         → Ok                          → breaker.on_success, return
//!         → Err non-retryable           → breaker.on_failure, return error
//!         → Err retryable, attempts left → sleep backoff (Retry-After aware)
//!     → attempts exhausted              → breaker.on_failure, return last error
//! ```
//!
//! The breaker is told about each `execute` call exactly once. The engine
//! never spawns tasks; all sleeping happens on the caller's task.
//!
//! # Example
//!
//! ```rust,ignore
//! use alpaca_resilience::resilience::{RetryConfig, RetryEngine};
//! use alpaca_resilience::resilience::RateLimitConfig;
//!
//! let engine = RetryEngine::new("alpaca", RetryConfig::default(), RateLimitConfig::default())?;
//! let account = engine.execute(|| fetch_account()).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::backoff::{JitterSource, ThreadRngJitter, backoff_delay};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus};
use super::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::config::ConfigError;
use crate::error::{Classify, ErrorCategory};
use crate::observability;

/// Tokens charged per attempt.
const TOKENS_PER_REQUEST: f64 = 1.0;

/// Retry policy configuration, fixed for an engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum invocations of the operation per `execute` call (default: 5).
    pub max_attempts: u32,
    /// Delay before the first retry (default: 100ms).
    pub base_delay: Duration,
    /// Maximum backoff duration (default: 30s).
    pub max_delay: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter fraction; delays vary by ±half of it (default: 0.1).
    pub jitter_fraction: f64,
    /// Whether the engine owns a circuit breaker (default: true).
    pub circuit_enabled: bool,
    /// Consecutive failures that open the circuit (default: 10).
    pub circuit_failure_threshold: u32,
    /// Time the circuit stays open after the last failure (default: 60s).
    pub circuit_recovery_timeout: Duration,
    /// Longest the engine will sleep waiting for a rate-limit token (default: 5s).
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            circuit_enabled: true,
            circuit_failure_threshold: 10,
            circuit_recovery_timeout: Duration::from_secs(60),
            max_rate_limit_wait: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Circuit breaker settings carried by this config.
    #[must_use]
    pub const fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: self.circuit_recovery_timeout,
        }
    }

    /// Check numeric invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_multiplier must be greater than 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::ValidationError(
                "retry.jitter_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::ValidationError(
                "retry.base_delay must not exceed retry.max_delay".to_string(),
            ));
        }
        if self.circuit_enabled && self.circuit_failure_threshold < 1 {
            return Err(ConfigError::ValidationError(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors returned by [`RetryEngine::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Circuit is open; the operation was not attempted.
    #[error("Service unavailable: circuit breaker '{service}' is open")]
    ServiceUnavailable {
        /// Breaker name.
        service: String,
        /// Time until the breaker admits a probe.
        retry_in: Option<Duration>,
    },

    /// Cancellation was requested before the call finished.
    #[error("Cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made before cancelling.
        attempts: u32,
    },

    /// The last error returned by the operation.
    #[error(transparent)]
    Operation(E),
}

impl<E> RetryError<E> {
    /// Whether the engine refused to try because the circuit is open.
    #[must_use]
    pub const fn is_fail_fast(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// Borrow the operation's error, if that is what ended the call.
    #[must_use]
    pub const fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Take the operation's error, if that is what ended the call.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

/// Retry engine shared by all workers talking to one service.
///
/// The rate limiter and circuit breaker are the only shared mutable state;
/// per-call state lives in a [`RetrySession`].
#[derive(Debug)]
pub struct RetryEngine {
    name: String,
    config: RetryConfig,
    rate_limiter: RateLimiter,
    circuit_breaker: Option<CircuitBreaker>,
    jitter: Box<dyn JitterSource>,
}

impl RetryEngine {
    /// Create an engine; a circuit breaker is built iff `config.circuit_enabled`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `config` fails [`RetryConfig::validate`].
    pub fn new(
        name: impl Into<String>,
        config: RetryConfig,
        rate_limit: RateLimitConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let name = name.into();
        let circuit_breaker = config
            .circuit_enabled
            .then(|| CircuitBreaker::new(name.clone(), config.circuit_breaker_config()));

        Ok(Self {
            name,
            config,
            rate_limiter: RateLimiter::new(rate_limit),
            circuit_breaker,
            jitter: Box::new(ThreadRngJitter),
        })
    }

    /// Replace the jitter source.
    #[must_use]
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    /// Service name used for the breaker, logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the retry configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Get the rate limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Get the circuit breaker, if enabled.
    #[must_use]
    pub const fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    /// Snapshot of the rate limiter.
    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status()
    }

    /// Snapshot of the circuit breaker, `None` when disabled.
    pub fn circuit_breaker_status(&self) -> Option<CircuitBreakerStatus> {
        self.circuit_breaker.as_ref().map(CircuitBreaker::status)
    }

    /// Start a session for one logical call.
    ///
    /// Use this directly when the operation needs `&mut` access to something
    /// the caller owns, such as an exclusive transport.
    #[must_use]
    pub const fn session<'a>(&'a self, cancel: Option<&'a CancellationToken>) -> RetrySession<'a> {
        RetrySession {
            engine: self,
            cancel,
            attempts: 0,
        }
    }

    /// Run `operation` under the retry policy.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.run(operation, None).await
    }

    /// Run `operation` under the retry policy, stopping early on cancellation.
    ///
    /// The token is checked before each attempt and raced against every
    /// sleep. Cancellation does not update the circuit breaker.
    pub async fn execute_with_cancel<T, E, F, Fut>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.run(operation, Some(cancel)).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let mut session = self.session(cancel);
        session.check_circuit()?;

        loop {
            session.admit().await?;
            match operation().await {
                Ok(value) => {
                    session.record_success();
                    return Ok(value);
                }
                Err(error) => session.record_failure(error).await?,
            }
        }
    }
}

/// Per-call retry state: the attempt counter and the cancellation token.
///
/// Drive it as
///
/// ```rust,ignore
/// let mut session = engine.session(None);
/// session.check_circuit()?;
/// loop {
///     session.admit().await?;
///     match transport.execute(&request).await {
///         Ok(response) => {
///             session.record_success();
///             return Ok(response);
///         }
///         Err(error) => session.record_failure(error).await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct RetrySession<'a> {
    engine: &'a RetryEngine,
    cancel: Option<&'a CancellationToken>,
    attempts: u32,
}

impl RetrySession<'_> {
    /// Attempts admitted so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Fail fast if the circuit is open. Consumes no attempt.
    pub fn check_circuit<E>(&self) -> Result<(), RetryError<E>> {
        let Some(breaker) = self.engine.circuit_breaker.as_ref() else {
            return Ok(());
        };
        if breaker.can_execute() {
            return Ok(());
        }

        let retry_in = breaker.remaining_open_time();
        observability::record_circuit_breaker_rejected(&self.engine.name);
        tracing::debug!(
            service = %self.engine.name,
            retry_in_ms = retry_in.map(|d| d.as_millis()),
            "Circuit open, failing fast"
        );

        Err(RetryError::ServiceUnavailable {
            service: self.engine.name.clone(),
            retry_in,
        })
    }

    /// Admit the next attempt: check cancellation, then take a rate-limit token.
    ///
    /// Waits for a token only while the wait is under
    /// `max_rate_limit_wait`; otherwise proceeds without one.
    pub async fn admit<E>(&mut self) -> Result<(), RetryError<E>> {
        self.ensure_not_cancelled()?;

        let limiter = &self.engine.rate_limiter;
        if !limiter.try_acquire(TOKENS_PER_REQUEST) {
            let wait = limiter.wait_time(TOKENS_PER_REQUEST);
            if wait < self.engine.config.max_rate_limit_wait {
                tracing::debug!(
                    service = %self.engine.name,
                    wait_ms = wait.as_millis(),
                    "Rate limit reached, waiting for token"
                );
                observability::record_rate_limit_wait(&self.engine.name, wait);
                self.sleep(wait).await?;
                if !limiter.try_acquire(TOKENS_PER_REQUEST) {
                    tracing::debug!(
                        service = %self.engine.name,
                        "Rate limit token taken by another worker, proceeding without token"
                    );
                }
            } else {
                tracing::warn!(
                    service = %self.engine.name,
                    wait_ms = wait.as_millis(),
                    ceiling_ms = self.engine.config.max_rate_limit_wait.as_millis(),
                    "Rate limit wait exceeds ceiling, proceeding without token"
                );
            }
        }

        self.attempts += 1;
        Ok(())
    }

    /// Report a successful attempt; ends the session.
    pub fn record_success(self) {
        if let Some(breaker) = self.engine.circuit_breaker.as_ref() {
            breaker.on_success();
        }
        if self.attempts > 1 {
            tracing::info!(
                service = %self.engine.name,
                attempts = self.attempts,
                "Request succeeded after retry"
            );
        }
    }

    /// Report a failed attempt.
    ///
    /// Returns `Ok(())` after sleeping the backoff when another attempt should
    /// follow, or the terminal error.
    pub async fn record_failure<E>(&mut self, error: E) -> Result<(), RetryError<E>>
    where
        E: Classify + fmt::Display,
    {
        let category = error.category();
        observability::record_retry_attempt(&self.engine.name, category);

        if !category.is_retryable() {
            tracing::debug!(
                service = %self.engine.name,
                error = %error,
                attempt = self.attempts,
                "Non-retryable error"
            );
            self.trip();
            return Err(RetryError::Operation(error));
        }

        if self.attempts >= self.engine.config.max_attempts {
            tracing::warn!(
                service = %self.engine.name,
                error = %error,
                attempts = self.attempts,
                "Max retries exceeded"
            );
            observability::record_retry_exhausted(&self.engine.name);
            self.trip();
            return Err(RetryError::Operation(error));
        }

        let delay = self.next_delay(category, error.retry_after());
        tracing::warn!(
            service = %self.engine.name,
            error = %error,
            category = category.as_str(),
            delay_ms = delay.as_millis(),
            attempt = self.attempts,
            "Retryable error, retrying"
        );

        self.sleep(delay).await
    }

    fn next_delay(&self, category: ErrorCategory, retry_after: Option<Duration>) -> Duration {
        let config = &self.engine.config;
        let backoff = backoff_delay(self.attempts, config, self.engine.jitter.sample());

        match (category, retry_after) {
            (ErrorCategory::RateLimited, Some(hint)) => backoff.max(hint.min(config.max_delay)),
            _ => backoff,
        }
    }

    fn trip(&self) {
        if let Some(breaker) = self.engine.circuit_breaker.as_ref() {
            breaker.on_failure();
        }
    }

    fn ensure_not_cancelled<E>(&self) -> Result<(), RetryError<E>> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(RetryError::Cancelled {
                attempts: self.attempts,
            });
        }
        Ok(())
    }

    async fn sleep<E>(&self, duration: Duration) -> Result<(), RetryError<E>> {
        let Some(cancel) = self.cancel else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };

        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = cancel.cancelled() => Err(RetryError::Cancelled {
                attempts: self.attempts,
            }),
        }
    }
}
