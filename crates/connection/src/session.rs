//! The node's session with the coordinator.
//!
//! # Lifecycle
//!
//! 1. [`Connection::create_node`] registers the node and starts its heartbeat
//! 2. Node-scoped calls (`receive`, `send`, object transfer) use the identity
//! 3. [`Connection::delete_node`] stops the heartbeat, then deregisters
//! 4. [`Connection::close`] tears the session down: stop heartbeat,
//!    deregister once without retries if still registered, close the client
//!
//! [`Connection::scoped`] runs a body between construction and teardown and
//! guarantees step 4 on every exit path, panics included.
//!
//! Every remote call goes through a [`RetryingFleet`], so transient transport
//! failures never reach the caller unless the retry policy gives up. Heartbeat
//! RPCs are the exception: each is a single attempt, and a miss is left to
//! the heartbeat sender's own backoff, which stops with the session.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use corelib::constants::{HEARTBEAT_CALL_TIMEOUT, HEARTBEAT_DEFAULT_INTERVAL};
use corelib::{Fab, Message, NodeId, ObjectTree, Run};
use futures::FutureExt;
use parking_lot::Mutex;
use retry::RetryInvoker;
use tonic::Code;
use tracing::{debug, error, info, warn};

use crate::api::*;
use crate::error::{FleetError, Result};
use crate::heartbeat::HeartbeatSender;
use crate::retrying::RetryingFleet;

/// Heartbeat timing for a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    /// Deadline of a single heartbeat attempt.
    pub heartbeat_call_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_DEFAULT_INTERVAL,
            heartbeat_call_timeout: HEARTBEAT_CALL_TIMEOUT,
        }
    }
}

/// State shared with the heartbeat task.
struct Shared<C> {
    fleet: RetryingFleet<C>,
    /// Single-attempt view of `fleet`; the heartbeat sender does its own
    /// stop-aware backoff.
    heartbeat_fleet: RetryingFleet<C>,
    node: Mutex<Option<NodeId>>,
    heartbeat_interval: Duration,
}

impl<C: FleetApi> Shared<C> {
    fn node_id(&self) -> Option<NodeId> {
        *self.node.lock()
    }

    /// Report liveness once. Transient transport failures yield `Ok(false)`.
    async fn send_heartbeat(&self) -> Result<bool> {
        let Some(node_id) = self.node_id() else {
            error!("Node instance missing");
            return Ok(false);
        };
        let request = SendNodeHeartbeatRequest {
            node_id,
            heartbeat_interval: self.heartbeat_interval,
        };
        match self.heartbeat_fleet.send_node_heartbeat(request).await {
            Ok(response) if response.success => Ok(true),
            Ok(_) => Err(FleetError::UnknownNode),
            Err(err) if matches!(err.code(), Some(Code::Unavailable | Code::DeadlineExceeded)) => {
                debug!(%err, "heartbeat missed");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_node(&self, fleet: &RetryingFleet<C>) -> Result<()> {
        let Some(node_id) = self.node_id() else {
            warn!("Node instance missing, nothing to delete");
            return Ok(());
        };
        fleet.delete_node(DeleteNodeRequest { node_id }).await?;
        *self.node.lock() = None;
        Ok(())
    }
}

/// One node's session with the coordinator.
///
/// All operations take `&self`; the node identity lives behind a short
/// mutex shared with the heartbeat task.
pub struct Connection<C: FleetApi> {
    shared: Arc<Shared<C>>,
    heartbeat: HeartbeatSender,
    closed: AtomicBool,
}

impl<C: FleetApi> Connection<C> {
    /// Wrap `client` into a session. No remote call is made.
    pub fn new(client: Arc<C>, invoker: RetryInvoker<FleetError>, settings: SessionSettings) -> Self {
        let fleet = RetryingFleet::new(client, invoker)
            .with_heartbeat_timeout(settings.heartbeat_call_timeout);
        let heartbeat_fleet = fleet.with_invoker(fleet.invoker().with_max_tries(Some(1)));
        let shared = Arc::new(Shared {
            fleet,
            heartbeat_fleet,
            node: Mutex::new(None),
            heartbeat_interval: settings.heartbeat_interval,
        });

        let beat = Arc::clone(&shared);
        let heartbeat = HeartbeatSender::new(
            move || {
                let shared = Arc::clone(&beat);
                async move { shared.send_heartbeat().await }
            },
            settings.heartbeat_interval,
        );

        Self {
            shared,
            heartbeat,
            closed: AtomicBool::new(false),
        }
    }

    /// Run `body` against a fresh session, then tear it down.
    ///
    /// The body's output is returned unchanged; teardown problems are only
    /// logged. A panic in the body is resumed after teardown.
    pub async fn scoped<F, Fut, T>(
        client: Arc<C>,
        invoker: RetryInvoker<FleetError>,
        settings: SessionSettings,
        body: F,
    ) -> T
    where
        F: FnOnce(Arc<Connection<C>>) -> Fut,
        Fut: Future<Output = T>,
    {
        let connection = Arc::new(Connection::new(client, invoker, settings));
        let outcome = AssertUnwindSafe(body(Arc::clone(&connection)))
            .catch_unwind()
            .await;
        connection.close().await;
        match outcome {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.shared.node_id()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register with the coordinator and start the heartbeat.
    ///
    /// Already registered sessions keep their identity; no call is made.
    pub async fn create_node(&self) -> Result<NodeId> {
        if let Some(node_id) = self.node_id() {
            warn!(%node_id, "Node already registered");
            return Ok(node_id);
        }
        let response = self
            .shared
            .fleet
            .create_node(CreateNodeRequest {
                heartbeat_interval: self.shared.heartbeat_interval,
            })
            .await?;
        *self.shared.node.lock() = Some(response.node_id);
        self.heartbeat.start();
        info!(node_id = %response.node_id, "Node registered");
        Ok(response.node_id)
    }

    /// Stop the heartbeat, then deregister. No-op without an identity.
    pub async fn delete_node(&self) -> Result<()> {
        if self.node_id().is_none() {
            warn!("Node instance missing, nothing to delete");
            return Ok(());
        }
        self.heartbeat.stop().await;
        self.shared.delete_node(&self.shared.fleet).await
    }

    /// Report liveness once.
    ///
    /// Returns `Ok(false)` on transient transport failures and fails with
    /// [`FleetError::UnknownNode`] if the coordinator does not know the node.
    pub async fn send_heartbeat(&self) -> Result<bool> {
        self.shared.send_heartbeat().await
    }

    /// Pull the next pending message and its object tree, if any.
    pub async fn receive(&self) -> Result<Option<(Message, ObjectTree)>> {
        let Some(node_id) = self.node_id() else {
            error!("Node instance missing");
            return Ok(None);
        };
        let response = self
            .shared
            .fleet
            .pull_messages(PullMessagesRequest { node_id })
            .await?;

        let message = response.messages.into_iter().next();
        let tree = response.object_trees.into_iter().next();
        match (message, tree) {
            (Some(message), Some(tree)) => Ok(Some((message, tree))),
            (Some(_), None) => Err(FleetError::MalformedResponse("message without object tree")),
            (None, _) => Ok(None),
        }
    }

    /// Push a message's metadata and tree; content travels as objects.
    ///
    /// Returns the ids the coordinator still needs pushed.
    pub async fn send(&self, message: Message, object_tree: ObjectTree) -> Result<HashSet<String>> {
        let Some(node_id) = self.node_id() else {
            error!("Node instance missing");
            return Ok(HashSet::new());
        };
        let message = if message.has_content() {
            message.remove_content()
        } else {
            message
        };
        let response = self
            .shared
            .fleet
            .push_messages(PushMessagesRequest {
                node_id,
                messages: vec![message],
                object_trees: vec![object_tree],
            })
            .await?;
        Ok(response.objects_to_push.into_iter().collect())
    }

    pub async fn get_run(&self, run_id: u64) -> Result<Run> {
        let response = self
            .shared
            .fleet
            .get_run(GetRunRequest {
                node_id: self.node_id(),
                run_id,
            })
            .await?;
        Ok(response.run)
    }

    pub async fn get_fab(&self, fab_hash: &str, run_id: u64) -> Result<Fab> {
        let response = self
            .shared
            .fleet
            .get_fab(GetFabRequest {
                node_id: self.node_id(),
                hash_str: fab_hash.to_string(),
                run_id,
            })
            .await?;
        Ok(response.fab)
    }

    pub async fn pull_object(&self, run_id: u64, object_id: &str) -> Result<Bytes> {
        let node_id = self.require_node()?;
        let response = self
            .shared
            .fleet
            .pull_object(PullObjectRequest {
                node_id,
                run_id,
                object_id: object_id.to_string(),
            })
            .await?;
        if !response.object_found {
            return Err(FleetError::ObjectNotPreregistered(object_id.to_string()));
        }
        if !response.object_available {
            return Err(FleetError::ObjectUnavailable(object_id.to_string()));
        }
        Ok(response.object_content)
    }

    pub async fn push_object(&self, run_id: u64, object_id: &str, content: Bytes) -> Result<()> {
        let node_id = self.require_node()?;
        let response = self
            .shared
            .fleet
            .push_object(PushObjectRequest {
                node_id,
                run_id,
                object_id: object_id.to_string(),
                object_content: content,
            })
            .await?;
        if !response.stored {
            return Err(FleetError::ObjectNotPreregistered(object_id.to_string()));
        }
        Ok(())
    }

    /// Tell the coordinator the message rooted at `object_id` arrived.
    pub async fn confirm_message_received(&self, run_id: u64, object_id: &str) -> Result<()> {
        let node_id = self.require_node()?;
        self.shared
            .fleet
            .confirm_message_received(ConfirmMessageReceivedRequest {
                node_id,
                run_id,
                message_object_id: object_id.to_string(),
            })
            .await
    }

    /// Tear the session down. Idempotent.
    ///
    /// Stops the heartbeat, makes a single deregistration attempt if a node
    /// is still registered, and closes the client last in any case.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.heartbeat.stop().await;

        if self.node_id().is_some() {
            let fleet = &self.shared.fleet;
            let single_attempt = fleet.with_invoker(fleet.invoker().with_max_tries(Some(1)));
            match self.shared.delete_node(&single_attempt).await {
                Ok(()) => {}
                Err(err) if err.is_transport() => {
                    debug!(%err, "deregistration failed during teardown");
                }
                Err(err) => warn!(%err, "deregistration failed during teardown"),
            }
        }

        self.shared.fleet.close().await;
    }

    fn require_node(&self) -> Result<NodeId> {
        self.node_id().ok_or_else(|| {
            error!("Node instance missing");
            FleetError::NodeMissing
        })
    }
}

impl<C: FleetApi> Drop for Connection<C> {
    fn drop(&mut self) {
        if !self.is_closed() && self.node_id().is_some() {
            warn!("Connection dropped without close, node stays registered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryFleet;
    use crate::retrying::fleet_retry_invoker;
    use retry::HealthGatedWaiter;

    fn connection(fleet: &Arc<InMemoryFleet>) -> Connection<InMemoryFleet> {
        let waiter = Arc::new(HealthGatedWaiter::new());
        let invoker = fleet_retry_invoker(Duration::from_secs(20), None, None, &waiter);
        Connection::new(Arc::clone(fleet), invoker, SessionSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_node_starts_heartbeat() {
        let fleet = Arc::new(InMemoryFleet::new());
        let conn = connection(&fleet);

        let node_id = conn.create_node().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(conn.node_id(), Some(node_id));
        assert_eq!(fleet.heartbeats(), vec![node_id]);
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_node_twice_keeps_identity() {
        let fleet = Arc::new(InMemoryFleet::new());
        let conn = connection(&fleet);

        let first = conn.create_node().await.unwrap();
        let second = conn.create_node().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fleet.registered_nodes(), vec![first]);
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_without_node_is_noop() {
        let fleet = Arc::new(InMemoryFleet::new());
        let conn = connection(&fleet);

        conn.delete_node().await.unwrap();
        assert_eq!(fleet.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_deadline_is_non_fatal() {
        let fleet = Arc::new(InMemoryFleet::new());
        let conn = connection(&fleet);
        conn.create_node().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        fleet.fail_next(1, Code::DeadlineExceeded);
        assert!(!conn.send_heartbeat().await.unwrap());
        assert!(conn.send_heartbeat().await.unwrap());
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_unavailable_is_single_non_fatal_attempt() {
        let fleet = Arc::new(InMemoryFleet::new());
        let conn = connection(&fleet);
        conn.create_node().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = fleet.call_count();

        fleet.fail_next(100_000, Code::Unavailable);
        let beat = tokio::time::timeout(Duration::from_secs(60), conn.send_heartbeat()).await;

        assert!(matches!(beat, Ok(Ok(false))));
        assert_eq!(fleet.call_count(), before + 1);
    }
}
