//! Configuration loading for the resilience layer.
//!
//! Provides YAML loading, environment variable interpolation and validation,
//! plus conversion into the runtime types used by [`crate::resilience`] and
//! [`crate::transport`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use alpaca_resilience::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! let engine = RetryEngine::new("alpaca", config.retry_config(), config.rate_limit_config())?;
//! let factory = HttpTransportFactory::new(config.http_transport_config()?);
//! ```

mod observability;
mod resilience;
mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use observability::{LOG_FORMATS, LoggingConfig};
pub use resilience::{CircuitBreakerSettings, RateLimitSettings, RetrySettings};
pub use transport::TransportSettings;

use crate::observability::MetricsConfig;
use crate::resilience::{RateLimitConfig, RetryConfig};
use crate::transport::HttpTransportConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Circuit breaker.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Rate limiter.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Alpaca transport.
    #[serde(default)]
    pub transport: TransportSettings,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Retry engine configuration.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        resilience::to_retry_config(&self.retry, &self.circuit_breaker)
    }

    /// Rate limiter configuration.
    #[must_use]
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        self.rate_limit.to_rate_limit_config()
    }

    /// HTTP transport configuration.
    pub fn http_transport_config(&self) -> Result<HttpTransportConfig, ConfigError> {
        self.transport
            .to_http_config()
            .map_err(ConfigError::ValidationError)
    }

    /// Fail unless both Alpaca credentials are set.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.transport.api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("transport.api_key".to_string()));
        }
        if self.transport.api_secret.is_empty() {
            return Err(ConfigError::MissingEnvVar("transport.api_secret".to_string()));
        }
        Ok(())
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. A variable that is
/// unset or empty takes the default, or the empty string without one.
#[allow(clippy::expect_used)] // Regex is compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config.retry_config().validate()?;

    if config.rate_limit.requests_per_minute == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.requests_per_minute must be positive".to_string(),
        ));
    }

    if let Err(e) = config.transport.environment() {
        return Err(ConfigError::ValidationError(format!(
            "transport.environment: {e} (expected PAPER or LIVE)"
        )));
    }

    if config.transport.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "transport.timeout_secs must be positive".to_string(),
        ));
    }

    if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "logging.format must be one of: {LOG_FORMATS:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert!(config.circuit_breaker.enabled);
        assert_eq!(config.rate_limit.requests_per_minute, 200);
        assert_eq!(config.transport.environment, "PAPER");
        assert_eq!(config.logging.format, "json");
        assert!(!config.metrics.enabled);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_empty_config_uses_defaults() {
        let config = match load_config_from_string("{}") {
            Ok(c) => c,
            Err(e) => panic!("should load empty config: {e}"),
        };
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r"
retry:
  max_attempts: 3
  base_delay_ms: 10
  max_delay_ms: 1000
  backoff_multiplier: 3.0
  jitter_fraction: 0.2
  max_rate_limit_wait_ms: 250
circuit_breaker:
  enabled: false
  failure_threshold: 4
  recovery_timeout_secs: 15
rate_limit:
  requests_per_minute: 120
transport:
  environment: LIVE
  api_key: key
  api_secret: secret
  timeout_secs: 5
logging:
  level: debug
  format: pretty
";

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(10));
        assert_eq!(retry.max_delay, Duration::from_secs(1));
        assert!(!retry.circuit_enabled);
        assert_eq!(retry.circuit_failure_threshold, 4);
        assert_eq!(retry.circuit_recovery_timeout, Duration::from_secs(15));
        assert_eq!(retry.max_rate_limit_wait, Duration::from_millis(250));

        let rate = config.rate_limit_config();
        assert!((rate.max_tokens - 120.0).abs() < f64::EPSILON);
        assert!((rate.refill_rate - 2.0).abs() < f64::EPSILON);

        let http = match config.http_transport_config() {
            Ok(h) => h,
            Err(e) => panic!("should build transport config: {e}"),
        };
        assert!(http.environment.is_live());
        assert_eq!(http.timeout, Duration::from_secs(5));
        assert!(config.require_credentials().is_ok());
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "environment: ${ALPACA_RESILIENCE_TEST_NONEXISTENT_VAR:-PAPER}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "environment: PAPER");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn test_env_var_with_default_uses_existing() {
        // PATH should always exist
        let input = "path: ${PATH:-default}";
        let result = interpolate_env_vars(input);

        assert_ne!(result, "path: default");
        assert!(result.starts_with("path: "));
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "api_key: ${ALPACA_RESILIENCE_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "api_key: ");
    }

    #[test]
    fn test_missing_credentials() {
        let config = Config::default();
        let Err(err) = config.require_credentials() else {
            panic!("expected missing credentials");
        };
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn test_validation_zero_attempts() {
        let yaml = r"
retry:
  max_attempts: 0
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero attempts");
        };
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validation_multiplier() {
        let yaml = r"
retry:
  backoff_multiplier: 0.5
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for shrinking backoff");
        };
        assert!(err.to_string().contains("backoff_multiplier"));
    }

    #[test]
    fn test_validation_zero_rate() {
        let yaml = r"
rate_limit:
  requests_per_minute: 0
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for zero rate");
        };
        assert!(err.to_string().contains("requests_per_minute"));
    }

    #[test]
    fn test_validation_invalid_environment() {
        let yaml = r"
transport:
  environment: SANDBOX
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for invalid environment");
        };
        assert!(err.to_string().contains("transport.environment"));
    }

    #[test]
    fn test_validation_invalid_log_format() {
        let yaml = r"
logging:
  format: xml
";
        let Err(err) = load_config_from_string(yaml) else {
            panic!("expected error for invalid log format");
        };
        assert!(err.to_string().contains("logging.format"));
    }

    #[test]
    fn test_parse_error() {
        let Err(err) = load_config_from_string("retry: [unclosed") else {
            panic!("expected parse error");
        };
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let Err(err) = load_config(Some("/nonexistent/alpaca-resilience.yaml")) else {
            panic!("expected read error");
        };
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
