//! Retry decorator over any [`FleetApi`] client.
//!
//! [`RetryingFleet`] implements the same capability trait as the client it
//! wraps, forwarding each call through one shared [`RetryInvoker`]. The call
//! surface stays statically checked; nothing is wrapped at runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use retry::{exponential, HealthGatedWaiter, RetryInvoker};
use tokio::time;
use tonic::{Code, Status};
use tracing::{info, warn};

use crate::api::*;
use crate::error::{FleetError, Result};

/// Build the retry invoker used for every Fleet API call.
///
/// Exponential backoff from 1s doubling up to `max_delay`, full jitter,
/// transport failures recoverable, `waiter` as the shared wait primitive.
/// A `PermissionDenied` status is converted into [`FleetError::RunNotRunning`]
/// on the spot; `Unavailable` keeps retrying; any other status gives up.
pub fn fleet_retry_invoker(
    max_delay: Duration,
    max_tries: Option<u32>,
    max_time: Option<Duration>,
    waiter: &Arc<HealthGatedWaiter>,
) -> RetryInvoker<FleetError> {
    let invoker = RetryInvoker::new(
        move || exponential(Duration::from_secs(1), 2.0, Some(max_delay)),
        FleetError::is_transport,
        max_tries,
        max_time,
    )
    .should_giveup(|err: &FleetError| match err.code() {
        Some(Code::PermissionDenied) => Err(FleetError::RunNotRunning),
        Some(Code::Unavailable) => Ok(false),
        _ => Ok(true),
    })
    .on_success(|state| {
        if state.tries > 1 {
            info!(
                "Connection successful after {:.2} seconds and {} tries.",
                state.elapsed.as_secs_f64(),
                state.tries
            );
        }
    })
    .on_giveup(|state| {
        if state.tries > 1 {
            warn!(
                target_call = state.target,
                "Giving up reconnection after {:.2} seconds and {} tries.",
                state.elapsed.as_secs_f64(),
                state.tries
            );
        }
    });
    waiter.attach(invoker)
}

/// A [`FleetApi`] client whose calls are all retried.
pub struct RetryingFleet<C> {
    inner: Arc<C>,
    invoker: RetryInvoker<FleetError>,
    heartbeat_timeout: Option<Duration>,
}

impl<C> Clone for RetryingFleet<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            invoker: self.invoker.clone(),
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }
}

impl<C: FleetApi> RetryingFleet<C> {
    pub fn new(inner: Arc<C>, invoker: RetryInvoker<FleetError>) -> Self {
        Self {
            inner,
            invoker,
            heartbeat_timeout: None,
        }
    }

    /// Bound each heartbeat attempt; an attempt running past it fails with
    /// `DeadlineExceeded`.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Same client, different retry policy.
    pub fn with_invoker(&self, invoker: RetryInvoker<FleetError>) -> Self {
        Self {
            invoker,
            ..self.clone()
        }
    }

    pub fn invoker(&self) -> &RetryInvoker<FleetError> {
        &self.invoker
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }
}

#[async_trait]
impl<C: FleetApi> FleetApi for RetryingFleet<C> {
    async fn create_node(&self, request: CreateNodeRequest) -> Result<CreateNodeResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("CreateNode", || inner.create_node(request.clone()))
            .await
    }

    async fn delete_node(&self, request: DeleteNodeRequest) -> Result<()> {
        let inner = &self.inner;
        self.invoker
            .invoke("DeleteNode", || inner.delete_node(request.clone()))
            .await
    }

    async fn send_node_heartbeat(
        &self,
        request: SendNodeHeartbeatRequest,
    ) -> Result<SendNodeHeartbeatResponse> {
        let inner = &self.inner;
        let timeout = self.heartbeat_timeout;
        self.invoker
            .invoke("SendNodeHeartbeat", || {
                let call = inner.send_node_heartbeat(request.clone());
                async move {
                    match timeout {
                        Some(timeout) => match time::timeout(timeout, call).await {
                            Ok(result) => result,
                            Err(_) => Err(Status::deadline_exceeded("heartbeat timed out").into()),
                        },
                        None => call.await,
                    }
                }
            })
            .await
    }

    async fn pull_messages(&self, request: PullMessagesRequest) -> Result<PullMessagesResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("PullMessages", || inner.pull_messages(request.clone()))
            .await
    }

    async fn push_messages(&self, request: PushMessagesRequest) -> Result<PushMessagesResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("PushMessages", || inner.push_messages(request.clone()))
            .await
    }

    async fn get_run(&self, request: GetRunRequest) -> Result<GetRunResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("GetRun", || inner.get_run(request.clone()))
            .await
    }

    async fn get_fab(&self, request: GetFabRequest) -> Result<GetFabResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("GetFab", || inner.get_fab(request.clone()))
            .await
    }

    async fn pull_object(&self, request: PullObjectRequest) -> Result<PullObjectResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("PullObject", || inner.pull_object(request.clone()))
            .await
    }

    async fn push_object(&self, request: PushObjectRequest) -> Result<PushObjectResponse> {
        let inner = &self.inner;
        self.invoker
            .invoke("PushObject", || inner.push_object(request.clone()))
            .await
    }

    async fn confirm_message_received(&self, request: ConfirmMessageReceivedRequest) -> Result<()> {
        let inner = &self.inner;
        self.invoker
            .invoke("ConfirmMessageReceived", || {
                inner.confirm_message_received(request.clone())
            })
            .await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryFleet;

    fn retrying(fleet: &Arc<InMemoryFleet>) -> RetryingFleet<InMemoryFleet> {
        let waiter = Arc::new(HealthGatedWaiter::new());
        let invoker = fleet_retry_invoker(Duration::from_secs(20), None, None, &waiter);
        RetryingFleet::new(Arc::clone(fleet), invoker)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_is_retried_until_success() {
        let fleet = Arc::new(InMemoryFleet::new());
        fleet.fail_next(3, Code::Unavailable);

        let response = retrying(&fleet)
            .create_node(CreateNodeRequest {
                heartbeat_interval: Duration::from_secs(30),
            })
            .await
            .unwrap();

        assert_eq!(response.node_id.get(), 1);
        assert_eq!(fleet.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_becomes_run_not_running_once() {
        let fleet = Arc::new(InMemoryFleet::new());
        fleet.fail_next(5, Code::PermissionDenied);

        let result = retrying(&fleet)
            .get_run(GetRunRequest {
                node_id: None,
                run_id: 7,
            })
            .await;

        assert!(matches!(result, Err(FleetError::RunNotRunning)));
        assert_eq!(fleet.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_status_gives_up_with_original() {
        let fleet = Arc::new(InMemoryFleet::new());
        fleet.fail_next(5, Code::Internal);

        let result = retrying(&fleet)
            .get_run(GetRunRequest {
                node_id: None,
                run_id: 7,
            })
            .await;

        assert_eq!(result.unwrap_err().code(), Some(Code::Internal));
        assert_eq!(fleet.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_tries_give_up_on_unavailable() {
        let fleet = Arc::new(InMemoryFleet::new());
        fleet.fail_next(10, Code::Unavailable);
        let single = retrying(&fleet);
        let single = single.with_invoker(single.invoker().with_max_tries(Some(1)));

        let result = single
            .delete_node(DeleteNodeRequest { node_id: 1.into() })
            .await;

        assert_eq!(result.unwrap_err().code(), Some(Code::Unavailable));
        assert_eq!(fleet.call_count(), 1);
    }
}
