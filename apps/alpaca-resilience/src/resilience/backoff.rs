//! Exponential backoff with symmetric jitter.
//!
//! ```text
//! delay  = min(max_delay, base_delay * multiplier^(n - 1))
//! delay += delay * jitter_fraction * (U - 0.5)      U ~ uniform [0, 1)
//! delay  = max(delay, 1ms)
//! ```
//!
//! `n` is the 1-indexed retry number, so the first retry waits about
//! `base_delay`. Jitter spreads concurrent retriers by up to
//! ±`jitter_fraction / 2` of the computed delay.
//!
//! The calculation is a pure function of `(attempt, config, sample)`; the
//! random sample comes from an injected [`JitterSource`] so tests can pin it.
//!
//! # Example
//!
//! ```rust
//! use alpaca_resilience::resilience::{RetryConfig, backoff_delay};
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! // U = 0.5 means no jitter
//! assert_eq!(backoff_delay(1, &config, 0.5), Duration::from_millis(100));
//! assert_eq!(backoff_delay(2, &config, 0.5), Duration::from_millis(200));
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;

use super::retry::RetryConfig;

/// Smallest delay ever returned, in milliseconds.
const MIN_DELAY_MS: f64 = 1.0;

/// Source of uniform samples in `[0, 1)` for jitter.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Draw one sample in `[0, 1)`.
    fn sample(&self) -> f64;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Jitter that always returns the same sample.
///
/// `FixedJitter(0.5)` yields the un-jittered delay.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Delay before retry number `attempt` (1-indexed).
///
/// `sample` is clamped into `[0, 1)`.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig, sample: f64) -> Duration {
    let base_ms = config.base_delay.as_secs_f64() * 1000.0;
    let max_ms = config.max_delay.as_secs_f64() * 1000.0;

    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let exponential_ms = base_ms * config.backoff_multiplier.powi(exponent);
    let capped_ms = if exponential_ms.is_finite() {
        exponential_ms.min(max_ms)
    } else {
        max_ms
    };

    let sample = if sample.is_nan() {
        0.5
    } else {
        sample.clamp(0.0, 1.0 - f64::EPSILON)
    };
    let jittered_ms = capped_ms + capped_ms * config.jitter_fraction * (sample - 0.5);

    // f64 -> u64 casts saturate
    Duration::from_nanos((jittered_ms.max(MIN_DELAY_MS) * 1_000_000.0).round() as u64)
}
