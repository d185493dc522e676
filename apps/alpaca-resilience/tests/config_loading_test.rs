//! Config file loading tests.

#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::time::Duration;

use alpaca_resilience::config::{ConfigError, load_config};
use alpaca_resilience::resilience::RetryEngine;
use alpaca_resilience::transport::HttpTransportFactory;

#[test]
fn loads_file_and_builds_runtime_types() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r"
retry:
  max_attempts: 4
  base_delay_ms: 50
circuit_breaker:
  failure_threshold: 6
rate_limit:
  requests_per_minute: 60
transport:
  environment: ${{ALPACA_RESILIENCE_TEST_ENV_UNSET:-PAPER}}
  api_key: key-from-file
  api_secret: secret-from-file
"
    )
    .unwrap();

    let config = load_config(Some(file.path().to_str().unwrap())).unwrap();

    let engine = RetryEngine::new("alpaca", config.retry_config(), config.rate_limit_config()).unwrap();
    assert_eq!(engine.config().max_attempts, 4);
    assert_eq!(engine.config().base_delay, Duration::from_millis(50));
    assert_eq!(
        engine.circuit_breaker().unwrap().config().failure_threshold,
        6
    );
    assert!((engine.rate_limit_status().max_tokens - 60.0).abs() < f64::EPSILON);

    let factory = HttpTransportFactory::new(config.http_transport_config().unwrap());
    assert_eq!(factory.config().base_url(), "https://paper-api.alpaca.markets");
}

#[test]
fn invalid_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "retry:\n  jitter_fraction: 2.5").unwrap();

    let err = load_config(Some(file.path().to_str().unwrap())).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
    assert!(err.to_string().contains("jitter_fraction"));
}
