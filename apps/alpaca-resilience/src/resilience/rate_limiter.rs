//! Token-bucket rate limiter for outbound broker requests.
//!
//! Tokens refill continuously at `refill_rate` per second up to `max_tokens`.
//! Refill is lazy: it is computed from the elapsed time at the start of every
//! access under the limiter's lock, so no background timer is needed.
//!
//! # Configuration
//!
//! - `max_tokens`: Bucket capacity (default: 200)
//! - `refill_rate`: Tokens per second (default: 200/60, Alpaca's 200 req/min quota)
//!
//! # Example
//!
//! ```rust
//! use alpaca_resilience::resilience::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::per_minute(200));
//! if limiter.try_acquire(1.0) {
//!     // send request
//! } else {
//!     let wait = limiter.wait_time(1.0);
//!     assert!(wait.as_secs_f64() >= 0.0);
//! }
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Alpaca's published request quota per minute.
pub const ALPACA_REQUESTS_PER_MINUTE: u32 = 200;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity.
    pub max_tokens: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(ALPACA_REQUESTS_PER_MINUTE)
    }
}

impl RateLimitConfig {
    /// Bucket sized for `requests` per minute, refilling evenly across the minute.
    #[must_use]
    pub fn per_minute(requests: u32) -> Self {
        Self {
            max_tokens: f64::from(requests),
            refill_rate: f64::from(requests) / 60.0,
        }
    }

    /// Bucket with explicit capacity and refill rate.
    #[must_use]
    pub const fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
        }
    }
}

/// Read-only snapshot of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Tokens currently available.
    pub tokens: f64,
    /// Bucket capacity.
    pub max_tokens: f64,
    /// Refill rate in tokens per second.
    pub refill_rate: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, config: &RateLimitConfig) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.max_tokens);
        self.last_refill = now;
    }
}

/// Token-bucket rate limiter, safe to share across workers.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take `cost` tokens if available.
    ///
    /// Returns `false` without deducting anything when the bucket is short.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(&self.config);

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Time until `cost` tokens will be available, zero if they already are.
    ///
    /// Only refills; never deducts. A bucket that never refills reports
    /// `Duration::MAX`.
    #[must_use]
    pub fn wait_time(&self, cost: f64) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(&self.config);

        if bucket.tokens >= cost {
            return Duration::ZERO;
        }
        if self.config.refill_rate <= 0.0 {
            return Duration::MAX;
        }

        let seconds = (cost - bucket.tokens) / self.config.refill_rate;
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Snapshot of current tokens and configuration.
    #[must_use]
    pub fn status(&self) -> RateLimitStatus {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(&self.config);

        RateLimitStatus {
            tokens: bucket.tokens,
            max_tokens: self.config.max_tokens,
            refill_rate: self.config.refill_rate,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
