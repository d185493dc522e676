//! Integration tests for the retry engine's documented scenarios.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alpaca_resilience::resilience::{
    CircuitBreakerState, FixedJitter, RateLimitConfig, RetryConfig, RetryEngine, RetryError,
};
use alpaca_resilience::{NetworkErrorKind, TransportError};

fn reset() -> TransportError {
    TransportError::network(NetworkErrorKind::Reset, "connection reset by peer")
}

#[tokio::test]
async fn two_failures_then_success_sleeps_10ms_then_20ms() {
    let config = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        ..RetryConfig::default()
    };
    let engine = RetryEngine::new("scenario", config, RateLimitConfig::default())
        .unwrap()
        .with_jitter(FixedJitter(0.5));

    let calls = Mutex::new(Vec::new());
    let result: Result<&str, RetryError<TransportError>> = engine
        .execute(|| {
            let mut calls = calls.lock().unwrap();
            calls.push(Instant::now());
            let n = calls.len();
            async move { if n < 3 { Err(reset()) } else { Ok("filled") } }
        })
        .await;

    assert_eq!(result.unwrap(), "filled");

    let calls = calls.into_inner().unwrap();
    assert_eq!(calls.len(), 3);

    let first_gap = calls[1] - calls[0];
    let second_gap = calls[2] - calls[1];
    assert!(first_gap >= Duration::from_millis(10), "{first_gap:?}");
    assert!(second_gap >= Duration::from_millis(20), "{second_gap:?}");
    assert!(first_gap < Duration::from_millis(200), "{first_gap:?}");
    assert!(second_gap < Duration::from_millis(200), "{second_gap:?}");

    let breaker = engine.circuit_breaker_status().unwrap();
    assert_eq!(breaker.state, CircuitBreakerState::Closed);
    assert_eq!(breaker.failure_count, 0);
}

#[tokio::test]
async fn eleventh_call_fails_fast_after_ten_failures() {
    let config = RetryConfig {
        max_attempts: 1,
        circuit_failure_threshold: 10,
        ..RetryConfig::default()
    };
    let engine = RetryEngine::new("scenario", config, RateLimitConfig::default()).unwrap();
    let invocations = AtomicU32::new(0);

    for _ in 0..10 {
        let result: Result<(), _> = engine
            .execute(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async { Err(reset()) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Operation(_))));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 10);

    let result: Result<(), RetryError<TransportError>> = engine
        .execute(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert!(matches!(
        result,
        Err(RetryError::ServiceUnavailable { ref service, retry_in: Some(_) }) if service == "scenario"
    ));
    assert_eq!(invocations.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn recovers_through_half_open() {
    let config = RetryConfig {
        max_attempts: 1,
        circuit_failure_threshold: 2,
        circuit_recovery_timeout: Duration::from_millis(30),
        ..RetryConfig::default()
    };
    let engine = RetryEngine::new("recovery", config, RateLimitConfig::default()).unwrap();

    for _ in 0..2 {
        let _: Result<(), _> = engine.execute(|| async { Err(reset()) }).await;
    }
    assert_eq!(
        engine.circuit_breaker_status().unwrap().state,
        CircuitBreakerState::Open
    );

    tokio::time::sleep(Duration::from_millis(50)).await;

    for _ in 0..3 {
        let result: Result<(), RetryError<TransportError>> =
            engine.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
    }
    assert_eq!(
        engine.circuit_breaker_status().unwrap().state,
        CircuitBreakerState::Closed
    );
}

#[tokio::test]
async fn rate_limited_error_is_retried() {
    let config = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        ..RetryConfig::default()
    };
    let engine = RetryEngine::new("rate", config, RateLimitConfig::default()).unwrap();
    let calls = AtomicU32::new(0);

    let result: Result<u32, _> = engine
        .execute(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TransportError::RateLimited {
                        retry_after: None,
                        message: "too many requests".to_string(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
}

#[tokio::test]
async fn shared_engine_across_tasks() {
    let config = RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryConfig::default()
    };
    let engine = Arc::new(
        RetryEngine::new("shared", config, RateLimitConfig::new(80.0, 0.0)).unwrap(),
    );
    let total_calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let total_calls = Arc::clone(&total_calls);
            tokio::spawn(async move {
                for _ in 0..5 {
                    let attempt = AtomicU32::new(0);
                    let result: Result<u32, RetryError<TransportError>> = engine
                        .execute(|| {
                            total_calls.fetch_add(1, Ordering::SeqCst);
                            let n = attempt.fetch_add(1, Ordering::SeqCst);
                            async move { if n == 0 { Err(reset()) } else { Ok(worker) } }
                        })
                        .await;
                    assert_eq!(result.unwrap(), worker);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    // 8 workers x 5 calls x 2 attempts, one token each
    assert_eq!(total_calls.load(Ordering::SeqCst), 80);
    let tokens = engine.rate_limit_status().tokens;
    assert!(tokens.abs() < 1e-6, "tokens = {tokens}");
    assert_eq!(engine.circuit_breaker_status().unwrap().failure_count, 0);
}
