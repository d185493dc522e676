//! Observability module for metrics.
//!
//! Counters and gauges for the retry engine, rate limiter, circuit breaker
//! and transport pool, plus an optional Prometheus exporter.

mod metrics;

pub use metrics::{
    MetricsConfig, MetricsError, circuit_breaker_state, init_metrics,
    record_circuit_breaker_rejected, record_circuit_breaker_state, record_rate_limit_wait,
    record_retry_attempt, record_retry_exhausted, update_active_leases,
};
