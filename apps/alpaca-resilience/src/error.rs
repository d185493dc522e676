//! Error taxonomy and retry classification for broker API calls.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | HTTP 429 (Rate Limited) | HTTP 400 (Bad Request) |
//! | HTTP 408 (Request Timeout) | HTTP 401/403 (Auth Errors) |
//! | HTTP 5xx (Server / Gateway) | HTTP 404 (Not Found) |
//! | HTTP 503 maintenance window | HTTP 422 (Validation Error) |
//! | Network timeouts | Other 4xx |
//! | Connection reset / refused | Malformed response body |
//! | DNS / TLS failures | Missing credentials |

use std::time::Duration;

use thiserror::Error;

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Error is retryable (transient failure).
    Retryable,
    /// Rate limited - retryable, honouring Retry-After if available.
    RateLimited,
    /// Error is not retryable (permanent failure).
    NonRetryable,
}

impl ErrorCategory {
    /// Whether the retry loop may try again after this category.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::RateLimited)
    }

    /// Label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::RateLimited => "rate_limited",
            Self::NonRetryable => "non_retryable",
        }
    }
}

/// Errors that know how the retry loop should treat them.
pub trait Classify {
    /// Retry category for this error.
    fn category(&self) -> ErrorCategory;

    /// Server-suggested delay before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Network failure kinds reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused or could not be established.
    Connect,
    /// Connection reset or closed mid-request.
    Reset,
    /// Request or connect timeout.
    Timeout,
    /// DNS resolution failed.
    Dns,
    /// TLS handshake failed.
    Tls,
    /// Anything else at the socket level.
    Other,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connect => "connect",
            Self::Reset => "reset",
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by a transport for a single request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network error (retryable).
    #[error("Network error ({kind}): {message}")]
    Network {
        /// Failure kind.
        kind: NetworkErrorKind,
        /// Underlying error text.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Parsed Retry-After header.
        retry_after: Option<Duration>,
        /// Error message from the API.
        message: String,
    },

    /// Server-side failure (5xx).
    #[error("Service error {status}: {message}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Provider is in a maintenance window.
    #[error("Service under maintenance: {message}")]
    Maintenance {
        /// Error message from the API.
        message: String,
    },

    /// Client error (4xx): validation, auth, not found.
    #[error("Client error {status}: {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Provider error code, when the body carried one.
        code: Option<String>,
        /// Error message from the API.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// API key or secret is empty; no request was sent.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl TransportError {
    /// Build an error from a non-success HTTP status.
    ///
    /// `code` and `message` come from the provider's error body when present.
    #[must_use]
    pub fn from_status(
        status: u16,
        code: Option<String>,
        message: String,
        retry_after: Option<Duration>,
    ) -> Self {
        match classify_status(status) {
            ErrorCategory::RateLimited => Self::RateLimited {
                retry_after,
                message,
            },
            ErrorCategory::Retryable => {
                if status == 503 && message.to_lowercase().contains("maintenance") {
                    Self::Maintenance { message }
                } else {
                    Self::Service { status, message }
                }
            }
            ErrorCategory::NonRetryable => Self::Client {
                status,
                code,
                message,
            },
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }
}

impl Classify for TransportError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::Service { .. } | Self::Maintenance { .. } => {
                ErrorCategory::Retryable
            }
            Self::RateLimited { .. } => ErrorCategory::RateLimited,
            Self::Client { .. } | Self::Decode(_) | Self::MissingCredentials(_) => {
                ErrorCategory::NonRetryable
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl Classify for std::io::Error {
    fn category(&self) -> ErrorCategory {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::UnexpectedEof => ErrorCategory::Retryable,
            _ => ErrorCategory::NonRetryable,
        }
    }
}

/// Categorize an HTTP response status for retry decision.
#[must_use]
pub const fn classify_status(status_code: u16) -> ErrorCategory {
    match status_code {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Parse a Retry-After header value.
///
/// Only the delta-seconds form is supported; Alpaca does not send HTTP dates.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
