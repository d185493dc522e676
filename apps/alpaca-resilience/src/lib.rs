// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::items_after_statements
    )
)]

//! Alpaca Resilience - Rust Core Library
//!
//! The layer between broker API callers and the network: it decides whether
//! a request may go out now, how long to wait before retrying a failure, and
//! when to stop calling a service that is down.
//!
//! # Components (leaf-first)
//!
//! - `resilience::RateLimiter`: token bucket matched to the Alpaca quota
//! - `resilience::CircuitBreaker`: `CLOSED` / `OPEN` / `HALF_OPEN` fail-fast gate
//! - `resilience::backoff_delay`: exponential backoff with symmetric jitter
//! - `resilience::RetryEngine`: composes the three around an async operation
//! - `transport::TransportPool`: one exclusive transport per worker
//! - `worker::ResilientWorker`: a shared engine plus an owned transport
//!
//! The rate limiter and circuit breaker are the only state shared between
//! workers. Transports are never shared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Configuration loading and validation.
pub mod config;

/// Error taxonomy and retry classification.
pub mod error;

/// Metrics recorders and exporter.
pub mod observability;

/// Rate limiting, circuit breaking, backoff and retry.
pub mod resilience;

/// Tracing subscriber setup.
pub mod telemetry;

/// Transports, transport pool and leases.
pub mod transport;

/// Retrying worker over an exclusive transport.
pub mod worker;

pub use error::{Classify, ErrorCategory, NetworkErrorKind, TransportError};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, RateLimitConfig, RateLimiter,
    RetryConfig, RetryEngine, RetryError,
};
pub use transport::{PoolError, Transport, TransportLease, TransportPool};
pub use worker::ResilientWorker;
