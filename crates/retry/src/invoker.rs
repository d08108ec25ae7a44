//! The retry invocation engine.
//!
//! # Algorithm
//!
//! For every [`RetryInvoker::invoke`] call:
//!
//! 1. Build a fresh backoff sequence, start a monotonic timer, `tries = 1`
//! 2. Run the call. On success fire `on_success` and return the value
//! 3. On a recoverable failure evaluate, in order: the `should_giveup`
//!    predicate (which may substitute a distinct fatal error, returned as-is),
//!    `tries == max_tries`, `elapsed >= max_time`. Any hit fires `on_giveup`
//!    and returns the original failure
//! 4. Otherwise take the next backoff value (an exhausted sequence is a
//!    give-up), jitter it, clamp it to the time left under `max_time`, fire
//!    `on_backoff`, wait, bump `tries` and go to 2
//! 5. A non-recoverable failure is returned immediately, no callback fires
//!
//! Both bounds are soft: a call or a wait already in progress is never
//! interrupted because `max_time` passed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::jitter::{full_jitter, Jitter};
use crate::state::RetryState;
use crate::wait::{Sleep, Wait};

/// Lifecycle callback receiving the current [`RetryState`].
pub type Callback<E> = Arc<dyn Fn(&RetryState<'_, E>) + Send + Sync>;

/// Give-up predicate. `Ok(true)` stops retrying and returns the original
/// failure; `Err(e)` aborts immediately with `e` instead.
pub type GiveupPredicate<E> = Arc<dyn Fn(&E) -> Result<bool, E> + Send + Sync>;

type WaitGenFactory = Arc<dyn Fn() -> Box<dyn Backoff> + Send + Sync>;
type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Wraps fallible async calls with retries and backoff.
///
/// Configuration is immutable once built; cloning is cheap (every strategy is
/// reference counted), so one invoker can serve any number of concurrent
/// calls. Per-call state lives on the stack of [`invoke`](Self::invoke).
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use retry::{exponential, RetryInvoker};
///
/// # async fn run() -> Result<(), std::io::Error> {
/// let invoker = RetryInvoker::<std::io::Error>::new(
///     || exponential(Duration::from_secs(1), 2.0, Some(Duration::from_secs(20))),
///     |err| err.kind() == std::io::ErrorKind::ConnectionRefused,
///     Some(3),
///     None,
/// );
/// invoker.invoke("Ping", || async { Ok::<_, std::io::Error>(()) }).await?;
/// # Ok(())
/// # }
/// ```
pub struct RetryInvoker<E> {
    pub(crate) wait_gen_factory: WaitGenFactory,
    pub(crate) recoverable: Classifier<E>,
    pub(crate) max_tries: Option<u32>,
    pub(crate) max_time: Option<Duration>,
    pub(crate) on_success: Option<Callback<E>>,
    pub(crate) on_backoff: Option<Callback<E>>,
    pub(crate) on_giveup: Option<Callback<E>>,
    pub(crate) jitter: Option<Jitter>,
    pub(crate) should_giveup: Option<GiveupPredicate<E>>,
    pub(crate) wait: Arc<dyn Wait>,
}

impl<E> Clone for RetryInvoker<E> {
    fn clone(&self) -> Self {
        Self {
            wait_gen_factory: Arc::clone(&self.wait_gen_factory),
            recoverable: Arc::clone(&self.recoverable),
            max_tries: self.max_tries,
            max_time: self.max_time,
            on_success: self.on_success.clone(),
            on_backoff: self.on_backoff.clone(),
            on_giveup: self.on_giveup.clone(),
            jitter: self.jitter.clone(),
            should_giveup: self.should_giveup.clone(),
            wait: Arc::clone(&self.wait),
        }
    }
}

impl<E> fmt::Debug for RetryInvoker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryInvoker")
            .field("max_tries", &self.max_tries)
            .field("max_time", &self.max_time)
            .field("jitter", &self.jitter.is_some())
            .field("should_giveup", &self.should_giveup.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> RetryInvoker<E>
where
    E: Send + Sync + 'static,
{
    /// Create an invoker with full jitter, plain sleeping and no callbacks.
    ///
    /// # Arguments
    /// * `wait_gen_factory` - Builds a fresh backoff sequence per invocation
    /// * `recoverable` - Classifies which failures are retried
    /// * `max_tries` - Attempt bound, `None` for unbounded
    /// * `max_time` - Elapsed-time bound, `None` for unbounded
    pub fn new<G, B, R>(
        wait_gen_factory: G,
        recoverable: R,
        max_tries: Option<u32>,
        max_time: Option<Duration>,
    ) -> Self
    where
        G: Fn() -> B + Send + Sync + 'static,
        B: Backoff + 'static,
        R: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            wait_gen_factory: Arc::new(move || Box::new(wait_gen_factory()) as Box<dyn Backoff>),
            recoverable: Arc::new(recoverable),
            max_tries,
            max_time,
            on_success: None,
            on_backoff: None,
            on_giveup: None,
            jitter: Some(Arc::new(full_jitter)),
            should_giveup: None,
            wait: Arc::new(Sleep),
        }
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RetryState<'_, E>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_backoff<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RetryState<'_, E>) + Send + Sync + 'static,
    {
        self.on_backoff = Some(Arc::new(callback));
        self
    }

    pub fn on_giveup<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RetryState<'_, E>) + Send + Sync + 'static,
    {
        self.on_giveup = Some(Arc::new(callback));
        self
    }

    /// Replace the jitter function. `None` waits the raw backoff value.
    pub fn jitter(mut self, jitter: Option<Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_giveup<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> Result<bool, E> + Send + Sync + 'static,
    {
        self.should_giveup = Some(Arc::new(predicate));
        self
    }

    pub fn wait_with(mut self, wait: Arc<dyn Wait>) -> Self {
        self.wait = wait;
        self
    }

    /// Copy of this invoker with a different attempt bound.
    ///
    /// `with_max_tries(Some(1))` turns retries off entirely.
    pub fn with_max_tries(&self, max_tries: Option<u32>) -> Self {
        let mut invoker = self.clone();
        invoker.max_tries = max_tries;
        invoker
    }

    /// Copy of this invoker with a different elapsed-time bound.
    pub fn with_max_time(&self, max_time: Option<Duration>) -> Self {
        let mut invoker = self.clone();
        invoker.max_time = max_time;
        invoker
    }

    pub fn max_tries(&self) -> Option<u32> {
        self.max_tries
    }

    pub fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    /// Run `call`, retrying recoverable failures under backoff.
    ///
    /// `target` names the call in callbacks, logs and metrics. `call` is
    /// invoked once per attempt and must build a new future each time.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempt when a give-up condition
    /// triggers, a non-recoverable failure as soon as it happens, or the
    /// error substituted by the `should_giveup` predicate.
    pub async fn invoke<T, F, Fut>(&self, target: &'static str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut wait_gen = (self.wait_gen_factory)();
        let start = Instant::now();
        let mut tries: u32 = 0;

        loop {
            tries += 1;
            let elapsed = start.elapsed();
            metrics::counter!("retry_attempts_total", "target" => target).increment(1);

            let err = match call().await {
                Ok(value) => {
                    fire(&self.on_success, &RetryState::new(target, tries, elapsed));
                    return Ok(value);
                }
                Err(err) if (self.recoverable)(&err) => err,
                Err(err) => return Err(err),
            };

            let mut state = RetryState::new(target, tries, elapsed);
            state.error = Some(&err);

            if self.should_stop(&err, tries, elapsed)? {
                metrics::counter!("retry_giveups_total", "target" => target).increment(1);
                fire(&self.on_giveup, &state);
                return Err(err);
            }

            let Some(raw_wait) = wait_gen.next() else {
                metrics::counter!("retry_giveups_total", "target" => target).increment(1);
                fire(&self.on_giveup, &state);
                return Err(err);
            };

            let mut wait = match &self.jitter {
                Some(jitter) => jitter(raw_wait),
                None => raw_wait,
            };
            if let Some(max_time) = self.max_time {
                wait = wait.min(max_time.saturating_sub(elapsed));
            }
            state.actual_wait = Some(wait);

            metrics::counter!("retry_backoffs_total", "target" => target).increment(1);
            metrics::histogram!("retry_backoff_seconds").record(wait.as_secs_f64());
            fire(&self.on_backoff, &state);
            tracing::debug!(target_call = target, tries, ?wait, "backing off before retry");

            drop(state);
            drop(err);
            self.wait.wait(wait).await;
        }
    }

    /// Give-up conditions, evaluated in order. The predicate runs first and
    /// may abort with its own error.
    fn should_stop(&self, err: &E, tries: u32, elapsed: Duration) -> Result<bool, E> {
        if let Some(predicate) = &self.should_giveup {
            if predicate(err)? {
                return Ok(true);
            }
        }
        if self.max_tries == Some(tries) {
            return Ok(true);
        }
        Ok(matches!(self.max_time, Some(max_time) if elapsed >= max_time))
    }
}

fn fire<E>(callback: &Option<Callback<E>>, state: &RetryState<'_, E>) {
    if let Some(callback) = callback {
        callback(state);
    }
}
