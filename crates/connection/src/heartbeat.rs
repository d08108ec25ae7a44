//! Periodic liveness reports.
//!
//! A [`HeartbeatSender`] owns one background task that calls a liveness
//! function every interval. The function reports `Ok(true)` for an
//! acknowledged heartbeat, `Ok(false)` for a transient miss, and `Err` for a
//! protocol violation that ends the task.
//!
//! Misses are retried under exponential backoff capped at the interval. The
//! backoff waits on the stop signal, so [`HeartbeatSender::stop`] never has
//! to sit out a pending backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use retry::{exponential, RetryInvoker, Wait};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error};

use crate::error::FleetError;

type HeartbeatFn = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, FleetError>> + Send + Sync>;

/// Background liveness task for one node.
pub struct HeartbeatSender {
    heartbeat_fn: HeartbeatFn,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Why one heartbeat cycle did not succeed.
#[derive(Debug)]
enum Beat {
    Missed,
    Stopped,
    Fatal(FleetError),
}

impl HeartbeatSender {
    pub fn new<F, Fut>(heartbeat_fn: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, FleetError>> + Send + 'static,
    {
        Self {
            heartbeat_fn: Arc::new(move || heartbeat_fn().boxed()),
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the background task. No-op while already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&self.heartbeat_fn), self.interval, stop_rx));
        *running = Some(Running { stop, handle });
    }

    /// Signal the task and wait for it to finish.
    ///
    /// Idempotent. Once this returns no further heartbeat is sent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.stop.send_replace(true);
        if let Err(err) = running.handle.await {
            if err.is_panic() {
                error!("heartbeat task panicked");
            }
        }
    }

    /// Whether the background task was started and not stopped.
    ///
    /// Still true after the task ended on its own with a fatal error.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

async fn run(heartbeat_fn: HeartbeatFn, interval: Duration, mut stop: watch::Receiver<bool>) {
    let invoker = RetryInvoker::new(
        move || exponential(Duration::from_secs(1), 2.0, Some(interval)),
        |beat: &Beat| matches!(beat, Beat::Missed),
        None,
        None,
    )
    .wait_with(Arc::new(StopAwareSleep { stop: stop.clone() }));

    loop {
        let outcome = invoker
            .invoke("Heartbeat", || {
                let heartbeat_fn = Arc::clone(&heartbeat_fn);
                let stopped = *stop.borrow();
                async move {
                    if stopped {
                        return Err(Beat::Stopped);
                    }
                    match heartbeat_fn().await {
                        Ok(true) => Ok(()),
                        Ok(false) => {
                            metrics::counter!("heartbeat_failures_total").increment(1);
                            Err(Beat::Missed)
                        }
                        Err(err) => Err(Beat::Fatal(err)),
                    }
                }
            })
            .await;

        match outcome {
            Ok(()) | Err(Beat::Missed) => {}
            Err(Beat::Stopped) => break,
            Err(Beat::Fatal(err)) => {
                error!(%err, "heartbeat failed fatally, stopping heartbeat sender");
                break;
            }
        }

        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = time::sleep(interval) => {}
        }
    }
    debug!("heartbeat sender stopped");
}

/// Resolves once stop is requested or the sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Sleep that ends early when stop is requested.
struct StopAwareSleep {
    stop: watch::Receiver<bool>,
}

#[async_trait]
impl Wait for StopAwareSleep {
    async fn wait(&self, duration: Duration) {
        let mut stop = self.stop.clone();
        tokio::select! {
            _ = stopped(&mut stop) => {}
            _ = time::sleep(duration) => {}
        }
    }
}
