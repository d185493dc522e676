//! Prometheus metrics for the resilience layer.
//!
//! Every recorder is a no-op until a recorder is installed, so library users
//! who never call [`init_metrics`] pay only for the label allocation.
//!
//! # Example
//!
//! ```ignore
//! use alpaca_resilience::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;
use crate::resilience::CircuitBreakerState;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to start the exporter at all.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter if enabled.
///
/// Starts an HTTP listener that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

// ============================================================================
// Retry Metrics
// ============================================================================

/// Record a failed attempt seen by the retry engine.
///
/// # Arguments
///
/// * `service` - Engine name (e.g., "alpaca")
/// * `category` - Retry category of the error
pub fn record_retry_attempt(service: &str, category: ErrorCategory) {
    counter!(
        "retry_attempts_total",
        "service" => service.to_string(),
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a call that used every attempt and still failed.
pub fn record_retry_exhausted(service: &str) {
    counter!(
        "retry_exhausted_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Rate Limit Metrics
// ============================================================================

/// Record a sleep spent waiting for a rate-limit token.
pub fn record_rate_limit_wait(service: &str, wait: Duration) {
    counter!(
        "rate_limit_waits_total",
        "service" => service.to_string()
    )
    .increment(1);

    histogram!(
        "rate_limit_wait_seconds",
        "service" => service.to_string()
    )
    .record(wait.as_secs_f64());
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update circuit breaker state gauge.
///
/// # Arguments
///
/// * `service` - Breaker name
/// * `state` - New state, exported as 0=closed, 1=open, 2=`half_open`
pub fn record_circuit_breaker_state(service: &str, state: CircuitBreakerState) {
    let value = match state {
        CircuitBreakerState::Closed => circuit_breaker_state::CLOSED,
        CircuitBreakerState::Open => circuit_breaker_state::OPEN,
        CircuitBreakerState::HalfOpen => circuit_breaker_state::HALF_OPEN,
    };

    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(value);
}

/// Record a call rejected because the circuit was open.
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Transport Pool Metrics
// ============================================================================

/// Update the number of transports currently leased from a pool.
pub fn update_active_leases(pool: &str, count: usize) {
    gauge!(
        "transport_leases_active",
        "pool" => pool.to_string()
    )
    .set(count as f64);
}
