//! Retry, circuit breaker and rate limit settings.
//!
//! Durations are plain integers in the unit named by the field suffix and
//! are converted to the runtime types in [`crate::resilience`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{ALPACA_REQUESTS_PER_MINUTE, RateLimitConfig, RetryConfig};

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts per call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter fraction.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Longest wait for a rate-limit token (milliseconds).
    #[serde(default = "default_max_rate_limit_wait_ms")]
    pub max_rate_limit_wait_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_fraction: default_jitter_fraction(),
            max_rate_limit_wait_ms: default_max_rate_limit_wait_ms(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Whether the retry engine uses a breaker.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open after the last failure (seconds).
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

/// Rate limit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Request quota per minute; also the burst size.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl RateLimitSettings {
    /// Convert to the rate limiter's configuration.
    #[must_use]
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.requests_per_minute)
    }
}

/// Combine retry and breaker settings into the engine's configuration.
#[must_use]
pub fn to_retry_config(retry: &RetrySettings, breaker: &CircuitBreakerSettings) -> RetryConfig {
    RetryConfig {
        max_attempts: retry.max_attempts,
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        backoff_multiplier: retry.backoff_multiplier,
        jitter_fraction: retry.jitter_fraction,
        circuit_enabled: breaker.enabled,
        circuit_failure_threshold: breaker.failure_threshold,
        circuit_recovery_timeout: Duration::from_secs(breaker.recovery_timeout_secs),
        max_rate_limit_wait: Duration::from_millis(retry.max_rate_limit_wait_ms),
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    100
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_jitter_fraction() -> f64 {
    0.1
}

const fn default_max_rate_limit_wait_ms() -> u64 {
    5_000
}

const fn default_true() -> bool {
    true
}

const fn default_failure_threshold() -> u32 {
    10
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_requests_per_minute() -> u32 {
    ALPACA_REQUESTS_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = to_retry_config(&RetrySettings::default(), &CircuitBreakerSettings::default());
        assert_eq!(config, RetryConfig::default());
        assert_eq!(
            RateLimitSettings::default().to_rate_limit_config(),
            RateLimitConfig::default()
        );
    }

    #[test]
    fn test_disabled_breaker_carries_through() {
        let breaker = CircuitBreakerSettings {
            enabled: false,
            ..CircuitBreakerSettings::default()
        };
        assert!(!to_retry_config(&RetrySettings::default(), &breaker).circuit_enabled);
    }
}
