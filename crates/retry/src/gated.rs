//! Health-gated waiting for retries against a shared endpoint.
//!
//! When an endpoint goes down, every in-flight call starts its own retry loop.
//! Without coordination each loop sleeps out its own backoff even after the
//! endpoint is back. The [`HealthGatedWaiter`] ties those loops together:
//!
//! - One shared lock serializes the waiters, so only one of them at a time
//!   is parked on the health signal
//! - One shared "healthy" signal is set by any successful call and cleared by
//!   any backoff or give-up
//! - A waiter parked on the signal returns as soon as it is set; a waiter
//!   queued on the lock returns once it gets the lock and sees the signal set
//!
//! Every waiter returns no later than its own requested duration. A waiter
//! woken by the signal returns at once rather than sleeping out the rest of
//! its duration (see "Decisions on open questions" in DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant};

use crate::invoker::{Callback, RetryInvoker};
use crate::state::RetryState;
use crate::wait::Wait;

/// Wait primitive shared by every invoker talking to the same endpoint.
#[derive(Debug)]
pub struct HealthGatedWaiter {
    lock: Mutex<()>,
    healthy: watch::Sender<bool>,
}

impl Default for HealthGatedWaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthGatedWaiter {
    /// A waiter whose signal starts out healthy.
    pub fn new() -> Self {
        let (healthy, _) = watch::channel(true);
        Self {
            lock: Mutex::new(()),
            healthy,
        }
    }

    pub fn mark_healthy(&self) {
        self.healthy.send_replace(true);
    }

    pub fn mark_unhealthy(&self) {
        self.healthy.send_replace(false);
    }

    pub fn is_healthy(&self) -> bool {
        *self.healthy.borrow()
    }

    /// Wire this waiter into `invoker`.
    ///
    /// Installs the waiter as the wait primitive and chains its signal
    /// updates in front of the invoker's existing callbacks: success marks
    /// the endpoint healthy, backoff and give-up clear it.
    pub fn attach<E>(self: &Arc<Self>, invoker: RetryInvoker<E>) -> RetryInvoker<E>
    where
        E: Send + Sync + 'static,
    {
        let mut invoker = invoker.wait_with(Arc::clone(self) as Arc<dyn Wait>);

        let waiter = Arc::clone(self);
        invoker.on_success = Some(chain(invoker.on_success.take(), move || waiter.mark_healthy()));
        let waiter = Arc::clone(self);
        invoker.on_backoff = Some(chain(invoker.on_backoff.take(), move || waiter.mark_unhealthy()));
        let waiter = Arc::clone(self);
        invoker.on_giveup = Some(chain(invoker.on_giveup.take(), move || waiter.mark_unhealthy()));

        invoker
    }
}

fn chain<E, F>(previous: Option<Callback<E>>, signal: F) -> Callback<E>
where
    E: 'static,
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(move |state: &RetryState<'_, E>| {
        signal();
        if let Some(previous) = &previous {
            previous(state);
        }
    })
}

#[async_trait]
impl Wait for HealthGatedWaiter {
    async fn wait(&self, duration: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(duration).unwrap_or_else(|| far_future(now));
        let mut healthy = self.healthy.subscribe();

        // Queue behind the waiter currently parked on the signal, but never
        // past our own deadline.
        let Ok(guard) = time::timeout_at(deadline, self.lock.lock()).await else {
            return;
        };
        tracing::warn!(
            "Connection attempt failed, retrying in {:.2} seconds",
            duration.as_secs_f64()
        );
        let woke_healthy = matches!(
            time::timeout_at(deadline, healthy.wait_for(|healthy| *healthy)).await,
            Ok(Ok(_))
        );
        drop(guard);

        if !woke_healthy {
            time::sleep_until(deadline).await;
        }
    }
}

/// Stand-in deadline for durations that overflow the clock.
fn far_future(now: Instant) -> Instant {
    // About thirty years.
    now + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_immediately_when_healthy() {
        let waiter = HealthGatedWaiter::new();
        let start = Instant::now();
        waiter.wait(Duration::from_secs(30)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_full_duration_when_unhealthy() {
        let waiter = HealthGatedWaiter::new();
        waiter.mark_unhealthy();
        let start = Instant::now();
        waiter.wait(Duration::from_secs(3)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_healthy_wakes_parked_waiter() {
        let waiter = Arc::new(HealthGatedWaiter::new());
        waiter.mark_unhealthy();

        let parked = Arc::clone(&waiter);
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            parked.wait(Duration::from_secs(60)).await;
            start.elapsed()
        });

        time::sleep(Duration::from_secs(5)).await;
        waiter.mark_healthy();

        let waited = handle.await.unwrap();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_backoff_does_not_overflow_clock() {
        let waiter = HealthGatedWaiter::new();
        let start = Instant::now();
        waiter.wait(Duration::MAX).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
