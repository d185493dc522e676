//! Alpaca HTTP transport built on reqwest.
//!
//! Sends one authenticated request per call and maps every outcome into
//! [`TransportError`]. Retrying is left to the retry engine.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use super::{Transport, TransportFactory, TransportRequest, TransportResponse};
use crate::error::{NetworkErrorKind, TransportError, parse_retry_after};

const API_KEY_HEADER: &str = "APCA-API-KEY-ID";
const API_SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// Environment for Alpaca API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlpacaEnvironment {
    /// Paper trading (simulated).
    Paper,
    /// Live trading (real money).
    Live,
}

impl AlpacaEnvironment {
    /// Get the base URL for the trading API.
    #[must_use]
    pub const fn trading_base_url(&self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }

    /// Check if this is live trading.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for AlpacaEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

impl FromStr for AlpacaEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PAPER" => Ok(Self::Paper),
            "LIVE" => Ok(Self::Live),
            other => Err(format!("unknown Alpaca environment '{other}'")),
        }
    }
}

/// Connection settings shared by every transport a factory builds.
#[derive(Clone)]
pub struct HttpTransportConfig {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Trading environment.
    pub environment: AlpacaEnvironment,
    /// Overrides the environment's base URL (proxies, tests).
    pub base_url: Option<String>,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for HttpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransportConfig {
    /// Create a new configuration with a 30s timeout.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        environment: AlpacaEnvironment,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            environment,
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send requests to `base_url` instead of the environment's URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Effective base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.trading_base_url())
            .trim_end_matches('/')
    }
}

/// Error body returned by the Alpaca API.
#[derive(Debug, Deserialize)]
struct AlpacaErrorResponse {
    #[serde(default, deserialize_with = "code_as_string")]
    code: Option<String>,
    message: String,
}

/// Alpaca sends numeric codes; accept strings too.
fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One worker's HTTP connection to the Alpaca trading API.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    identity: String,
    config: Arc<HttpTransportConfig>,
}

impl HttpTransport {
    /// Create a transport with its own connection pool.
    pub fn new(
        identity: impl Into<String>,
        config: Arc<HttpTransportConfig>,
    ) -> Result<Self, TransportError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(TransportError::MissingCredentials(
                "Alpaca API key and secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::network(NetworkErrorKind::Other, e.to_string()))?;

        Ok(Self {
            client,
            identity: identity.into(),
            config,
        })
    }

    /// Worker identity this transport belongs to.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &mut self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.config.base_url(), request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(API_SECRET_HEADER, &self.config.api_secret);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(network_error)?;

        if status.is_success() {
            return Ok(TransportResponse {
                status: status.as_u16(),
                body,
            });
        }

        let (code, message) = match serde_json::from_str::<AlpacaErrorResponse>(&body) {
            Ok(err) => (err.code, err.message),
            Err(_) if body.trim().is_empty() => (
                None,
                status.canonical_reason().unwrap_or("unknown").to_string(),
            ),
            Err(_) => (None, body),
        };

        tracing::debug!(
            identity = %self.identity,
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            code = code.as_deref().unwrap_or(""),
            "Alpaca request failed"
        );

        Err(TransportError::from_status(
            status.as_u16(),
            code,
            message,
            retry_after,
        ))
    }
}

/// Map a reqwest failure to a network error kind.
fn network_error(err: reqwest::Error) -> TransportError {
    let message = error_chain(&err);
    let lowered = message.to_lowercase();

    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if lowered.contains("dns") || lowered.contains("lookup") {
        NetworkErrorKind::Dns
    } else if lowered.contains("certificate") || lowered.contains("tls") {
        NetworkErrorKind::Tls
    } else if err.is_connect() {
        NetworkErrorKind::Connect
    } else if err.is_request() || err.is_body() {
        NetworkErrorKind::Reset
    } else {
        NetworkErrorKind::Other
    };

    TransportError::network(kind, message)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Builds an [`HttpTransport`] per worker from shared settings.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    config: Arc<HttpTransportConfig>,
}

impl HttpTransportFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Get the shared configuration.
    #[must_use]
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

impl TransportFactory for HttpTransportFactory {
    type Transport = HttpTransport;

    fn create(&self, identity: &str) -> Result<HttpTransport, TransportError> {
        HttpTransport::new(identity, Arc::clone(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Classify;
    use crate::transport::{PoolError, TransportPool};

    #[test]
    fn test_environment_urls() {
        assert_eq!(
            AlpacaEnvironment::Paper.trading_base_url(),
            "https://paper-api.alpaca.markets"
        );
        assert_eq!(
            AlpacaEnvironment::Live.trading_base_url(),
            "https://api.alpaca.markets"
        );
        assert!(AlpacaEnvironment::Live.is_live());
        assert!(!AlpacaEnvironment::Paper.is_live());
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("paper".parse::<AlpacaEnvironment>(), Ok(AlpacaEnvironment::Paper));
        assert_eq!("LIVE".parse::<AlpacaEnvironment>(), Ok(AlpacaEnvironment::Live));
        assert!("sandbox".parse::<AlpacaEnvironment>().is_err());
        assert_eq!(AlpacaEnvironment::Paper.to_string(), "PAPER");
    }

    #[test]
    fn test_base_url_override() {
        let config = HttpTransportConfig::new("key", "secret", AlpacaEnvironment::Paper);
        assert_eq!(config.base_url(), "https://paper-api.alpaca.markets");

        let config = config.with_base_url("http://127.0.0.1:8080/");
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = HttpTransportConfig::new("PKTEST", "s3cr3t", AlpacaEnvironment::Paper);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("PKTEST"));
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let factory = HttpTransportFactory::new(HttpTransportConfig::new(
            "",
            "",
            AlpacaEnvironment::Paper,
        ));
        let err = factory.create("worker-1").unwrap_err();
        assert!(matches!(err, TransportError::MissingCredentials(_)));
        assert!(!err.category().is_retryable());

        let pool = TransportPool::new("alpaca", factory);
        assert!(matches!(
            pool.acquire("worker-1"),
            Err(PoolError::Creation(TransportError::MissingCredentials(_)))
        ));
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_error_body_codes() {
        let numeric: AlpacaErrorResponse =
            serde_json::from_str(r#"{"code":40310000,"message":"insufficient buying power"}"#)
                .unwrap();
        assert_eq!(numeric.code.as_deref(), Some("40310000"));

        let missing: AlpacaErrorResponse =
            serde_json::from_str(r#"{"message":"not found"}"#).unwrap();
        assert!(missing.code.is_none());
    }
}
