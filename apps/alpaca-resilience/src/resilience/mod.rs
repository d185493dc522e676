//! Resilience patterns for broker API calls.
//!
//! This module provides the token-bucket rate limiter, circuit breaker,
//! backoff calculator and the retry engine that composes them.

mod backoff;
mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use backoff::{FixedJitter, JitterSource, ThreadRngJitter, backoff_delay};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
    CircuitBreakerStatus, HALF_OPEN_SUCCESS_THRESHOLD,
};
pub use rate_limiter::{ALPACA_REQUESTS_PER_MINUTE, RateLimitConfig, RateLimitStatus, RateLimiter};
pub use retry::{RetryConfig, RetryEngine, RetryError, RetrySession};
