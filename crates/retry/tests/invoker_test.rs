//! Integration tests for the retry invoker and its wait primitives.
//!
//! # Test Strategy
//!
//! 1. **Backoff properties**: exponential growth and capping for arbitrary inputs
//! 2. **Give-up bounds**: max_tries, max_time, exhausted sequences
//! 3. **Shared waiter**: concurrent invokers resume once any caller succeeds

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use retry::{constant, exponential, HealthGatedWaiter, RetryInvoker};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
struct Unavailable;

// ============================================================================
// Backoff Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_exponential_nth_value_is_capped_power(
        base_ms in 1u64..5_000,
        multiplier in 1.0f64..4.0,
        max_ms in 1u64..120_000,
        n in 1usize..20,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_millis(max_ms);
        let value = exponential(base, multiplier, Some(max)).nth(n - 1).unwrap();

        let expected = (base.as_secs_f64() * multiplier.powi(n as i32 - 1)).min(max.as_secs_f64());
        prop_assert!(value <= max);
        prop_assert!((value.as_secs_f64() - expected).abs() <= expected * 1e-4 + 1e-6);
    }

    #[test]
    fn prop_exponential_without_cap_is_non_decreasing(
        base_ms in 1u64..5_000,
        multiplier in 1.5f64..3.0,
    ) {
        let values: Vec<_> = exponential(Duration::from_millis(base_ms), multiplier, None)
            .take(16)
            .collect();
        prop_assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

// ============================================================================
// Give-up Bounds
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_max_time_gives_up_with_original_error() {
    let invoker = RetryInvoker::new(
        || constant(Duration::from_secs(1)),
        |_: &Unavailable| true,
        None,
        Some(Duration::from_secs(5)),
    )
    .jitter(None);

    let start = Instant::now();
    let result: Result<(), _> = invoker
        .invoke("Unreachable", || async { Err(Unavailable) })
        .await;

    assert_eq!(result, Err(Unavailable));
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_full_jitter_never_exceeds_raw_backoff() {
    let invoker = RetryInvoker::new(
        || constant(Duration::from_secs(2)),
        |_: &Unavailable| true,
        Some(20),
        None,
    )
    .on_backoff(|state| {
        let wait = state.actual_wait.unwrap();
        assert!(wait <= Duration::from_secs(2));
    });

    let start = Instant::now();
    let result: Result<(), _> = invoker.invoke("Jittered", || async { Err(Unavailable) }).await;
    assert!(result.is_err());
    // 19 jittered waits of at most 2s each.
    assert!(start.elapsed() <= Duration::from_secs(38));
}

// ============================================================================
// Shared Health-Gated Waiter
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_releases_concurrent_waiters_early() {
    let waiter = Arc::new(HealthGatedWaiter::new());
    let invoker = waiter.attach(
        RetryInvoker::new(
            || constant(Duration::from_secs(100)),
            |_: &Unavailable| true,
            None,
            None,
        )
        .jitter(None),
    );

    // The endpoint is down until `endpoint_up` flips.
    let endpoint_up = Arc::new(AtomicBool::new(false));
    let attempts = Arc::new(AtomicU32::new(0));

    let mut callers = Vec::new();
    for _ in 0..3 {
        let invoker = invoker.clone();
        let endpoint_up = Arc::clone(&endpoint_up);
        let attempts = Arc::clone(&attempts);
        callers.push(tokio::spawn(async move {
            invoker
                .invoke("PullMessages", || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let up = endpoint_up.load(Ordering::SeqCst);
                    async move {
                        if up {
                            Ok(())
                        } else {
                            Err(Unavailable)
                        }
                    }
                })
                .await
        }));
    }

    // Let every caller fail once and start backing off.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!waiter.is_healthy());
    endpoint_up.store(true, Ordering::SeqCst);

    // A fresh call succeeds and marks the endpoint healthy.
    let start = Instant::now();
    invoker
        .invoke("SendNodeHeartbeat", || async { Ok::<_, Unavailable>(()) })
        .await
        .unwrap();
    assert!(waiter.is_healthy());

    for caller in callers {
        caller.await.unwrap().unwrap();
    }
    // Nobody slept out the 100s backoff.
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_giveup_clears_health_signal() {
    let waiter = Arc::new(HealthGatedWaiter::new());
    let invoker = waiter.attach(
        RetryInvoker::new(|| constant(Duration::from_secs(1)), |_: &Unavailable| true, Some(1), None),
    );

    let result: Result<(), _> = invoker.invoke("CreateNode", || async { Err(Unavailable) }).await;
    assert_eq!(result, Err(Unavailable));
    assert!(!waiter.is_healthy());
}
