//! Loopback coordinator backed by in-process tables.
//!
//! [`InMemoryFleet`] implements [`FleetApi`] with the coordinator-side
//! semantics a node relies on: sequential node ids, exactly-once message
//! delivery, object pre-registration from pushed trees, and run/fab lookup.
//! Faults can be injected per call to exercise retry paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use corelib::constants::HEARTBEAT_PATIENCE;
use corelib::{Fab, Message, NodeId, ObjectTree, Run};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tonic::{Code, Status};

use crate::api::*;
use crate::error::Result;

#[derive(Clone, Copy, Debug)]
struct NodeRecord {
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
}

/// A message pushed by a node, as stored by the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct PushedMessage {
    pub node_id: NodeId,
    pub message: Message,
    pub object_tree: ObjectTree,
}

#[derive(Default)]
pub struct InMemoryFleet {
    next_node_id: AtomicU64,
    nodes: Mutex<HashMap<NodeId, NodeRecord>>,
    inbox: DashMap<NodeId, VecDeque<(Message, ObjectTree)>>,
    /// Registered object ids; `None` until the content is pushed.
    objects: Mutex<HashMap<String, Option<Bytes>>>,
    /// Trees by root id, for cleanup on confirmation.
    trees: Mutex<HashMap<String, ObjectTree>>,
    runs: Mutex<HashMap<u64, Run>>,
    fabs: Mutex<HashMap<String, Fab>>,
    pushed: Mutex<Vec<PushedMessage>>,
    confirmed: Mutex<Vec<(u64, String)>>,
    heartbeats: Mutex<Vec<NodeId>>,
    faults: Mutex<VecDeque<Code>>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Coordinator-side setup
    // ------------------------------------------------------------------

    /// Queue `message` for delivery to `node_id` and pre-register its objects.
    pub fn enqueue(&self, node_id: NodeId, message: Message, object_tree: ObjectTree) {
        self.register_tree(&object_tree);
        self.inbox
            .entry(node_id)
            .or_default()
            .push_back((message, object_tree));
    }

    /// Store content for an object, registering it if needed.
    pub fn put_object(&self, object_id: impl Into<String>, content: impl Into<Bytes>) {
        self.objects
            .lock()
            .insert(object_id.into(), Some(content.into()));
    }

    pub fn add_run(&self, run: Run) {
        self.runs.lock().insert(run.run_id, run);
    }

    pub fn add_fab(&self, fab: Fab) {
        self.fabs.lock().insert(fab.hash_str.clone(), fab);
    }

    /// Fail the next `n` calls, whatever they are, with `code`.
    pub fn fail_next(&self, n: usize, code: Code) {
        let mut faults = self.faults.lock();
        faults.extend(std::iter::repeat(code).take(n));
    }

    /// Forget a node without the node knowing, as after an eviction.
    pub fn evict(&self, node_id: NodeId) {
        self.nodes.lock().remove(&node_id);
        self.inbox.remove(&node_id);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Calls received so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn registered_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.nodes.lock().keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// A node is online while its last heartbeat is younger than
    /// `HEARTBEAT_PATIENCE` intervals.
    pub fn is_online(&self, node_id: NodeId) -> bool {
        self.nodes.lock().get(&node_id).is_some_and(|record| {
            record.last_heartbeat.elapsed() < record.heartbeat_interval * HEARTBEAT_PATIENCE
        })
    }

    /// Every acknowledged heartbeat, in order.
    pub fn heartbeats(&self) -> Vec<NodeId> {
        self.heartbeats.lock().clone()
    }

    pub fn pushed_messages(&self) -> Vec<PushedMessage> {
        self.pushed.lock().clone()
    }

    pub fn confirmed(&self) -> Vec<(u64, String)> {
        self.confirmed.lock().clone()
    }

    /// Stored content of an object, if registered and pushed.
    pub fn object(&self, object_id: &str) -> Option<Bytes> {
        self.objects.lock().get(object_id).cloned().flatten()
    }

    pub fn is_registered(&self, object_id: &str) -> bool {
        self.objects.lock().contains_key(object_id)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.faults.lock().pop_front() {
            Some(code) => Err(Status::new(code, "injected fault").into()),
            None => Ok(()),
        }
    }

    fn require_node(&self, node_id: NodeId) -> Result<()> {
        if self.nodes.lock().contains_key(&node_id) {
            Ok(())
        } else {
            Err(Status::not_found(format!("node {node_id} is not registered")).into())
        }
    }

    fn register_tree(&self, tree: &ObjectTree) {
        {
            let mut objects = self.objects.lock();
            for id in tree.object_ids() {
                objects.entry(id).or_insert(None);
            }
        }
        self.trees
            .lock()
            .insert(tree.object_id.clone(), tree.clone());
    }
}

#[async_trait]
impl FleetApi for InMemoryFleet {
    async fn create_node(&self, request: CreateNodeRequest) -> Result<CreateNodeResponse> {
        self.begin_call()?;
        let node_id = NodeId(self.next_node_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.nodes.lock().insert(
            node_id,
            NodeRecord {
                heartbeat_interval: request.heartbeat_interval,
                last_heartbeat: Instant::now(),
            },
        );
        Ok(CreateNodeResponse { node_id })
    }

    async fn delete_node(&self, request: DeleteNodeRequest) -> Result<()> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        self.evict(request.node_id);
        Ok(())
    }

    async fn send_node_heartbeat(
        &self,
        request: SendNodeHeartbeatRequest,
    ) -> Result<SendNodeHeartbeatResponse> {
        self.begin_call()?;
        let mut nodes = self.nodes.lock();
        let Some(record) = nodes.get_mut(&request.node_id) else {
            return Ok(SendNodeHeartbeatResponse { success: false });
        };
        record.heartbeat_interval = request.heartbeat_interval;
        record.last_heartbeat = Instant::now();
        drop(nodes);

        self.heartbeats.lock().push(request.node_id);
        Ok(SendNodeHeartbeatResponse { success: true })
    }

    async fn pull_messages(&self, request: PullMessagesRequest) -> Result<PullMessagesResponse> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        let next = self
            .inbox
            .get_mut(&request.node_id)
            .and_then(|mut queue| queue.pop_front());
        Ok(match next {
            Some((message, tree)) => PullMessagesResponse {
                messages: vec![message],
                object_trees: vec![tree],
            },
            None => PullMessagesResponse::default(),
        })
    }

    async fn push_messages(&self, request: PushMessagesRequest) -> Result<PushMessagesResponse> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        if request.messages.len() != request.object_trees.len() {
            return Err(Status::invalid_argument("one object tree per message").into());
        }

        let mut objects_to_push = Vec::new();
        for (message, object_tree) in request.messages.into_iter().zip(request.object_trees) {
            self.register_tree(&object_tree);
            let objects = self.objects.lock();
            objects_to_push.extend(
                object_tree
                    .object_ids()
                    .into_iter()
                    .filter(|id| matches!(objects.get(id), Some(None))),
            );
            drop(objects);
            self.pushed.lock().push(PushedMessage {
                node_id: request.node_id,
                message,
                object_tree,
            });
        }
        Ok(PushMessagesResponse { objects_to_push })
    }

    async fn get_run(&self, request: GetRunRequest) -> Result<GetRunResponse> {
        self.begin_call()?;
        match self.runs.lock().get(&request.run_id) {
            Some(run) => Ok(GetRunResponse { run: run.clone() }),
            None => Err(Status::not_found(format!("run {} not found", request.run_id)).into()),
        }
    }

    async fn get_fab(&self, request: GetFabRequest) -> Result<GetFabResponse> {
        self.begin_call()?;
        match self.fabs.lock().get(&request.hash_str) {
            Some(fab) => Ok(GetFabResponse { fab: fab.clone() }),
            None => Err(Status::not_found(format!("fab {} not found", request.hash_str)).into()),
        }
    }

    async fn pull_object(&self, request: PullObjectRequest) -> Result<PullObjectResponse> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        Ok(match self.objects.lock().get(&request.object_id) {
            None => PullObjectResponse::default(),
            Some(None) => PullObjectResponse {
                object_found: true,
                ..Default::default()
            },
            Some(Some(content)) => PullObjectResponse {
                object_found: true,
                object_available: true,
                object_content: content.clone(),
            },
        })
    }

    async fn push_object(&self, request: PushObjectRequest) -> Result<PushObjectResponse> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        let mut objects = self.objects.lock();
        let stored = match objects.get_mut(&request.object_id) {
            Some(slot) => {
                *slot = Some(request.object_content);
                true
            }
            None => false,
        };
        Ok(PushObjectResponse { stored })
    }

    async fn confirm_message_received(&self, request: ConfirmMessageReceivedRequest) -> Result<()> {
        self.begin_call()?;
        self.require_node(request.node_id)?;
        // Delivered objects are no longer needed.
        let tree = self.trees.lock().remove(&request.message_object_id);
        if let Some(tree) = tree {
            let mut objects = self.objects.lock();
            for id in tree.object_ids() {
                objects.remove(&id);
            }
        }
        self.confirmed
            .lock()
            .push((request.run_id, request.message_object_id));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
