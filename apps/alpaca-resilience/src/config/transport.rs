//! Alpaca transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{AlpacaEnvironment, HttpTransportConfig};

/// Alpaca connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Trading environment, `PAPER` or `LIVE`.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// API secret.
    #[serde(default)]
    pub api_secret: String,
    /// Overrides the environment's trading URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// HTTP request timeout (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSettings")
            .field("environment", &self.environment)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TransportSettings {
    /// Parsed trading environment.
    pub fn environment(&self) -> Result<AlpacaEnvironment, String> {
        self.environment.parse()
    }

    /// Convert to the HTTP transport's configuration.
    pub fn to_http_config(&self) -> Result<HttpTransportConfig, String> {
        let mut config =
            HttpTransportConfig::new(&self.api_key, &self.api_secret, self.environment()?)
                .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }
}

fn default_environment() -> String {
    "PAPER".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}
