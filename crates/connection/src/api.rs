//! The Fleet API capability surface.
//!
//! Request and response types mirror the coordinator's node-facing RPCs.
//! Their wire encoding belongs to whichever client implements [`FleetApi`];
//! a generated gRPC stub plugs in by mapping its messages onto these types.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{Fab, Message, NodeId, ObjectTree, Run};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub heartbeat_interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeResponse {
    pub node_id: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteNodeRequest {
    pub node_id: NodeId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendNodeHeartbeatRequest {
    pub node_id: NodeId,
    pub heartbeat_interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendNodeHeartbeatResponse {
    /// `false` when the coordinator does not know the node.
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullMessagesRequest {
    pub node_id: NodeId,
}

/// At most one message per pull, paired positionally with its tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PullMessagesResponse {
    pub messages: Vec<Message>,
    pub object_trees: Vec<ObjectTree>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushMessagesRequest {
    pub node_id: NodeId,
    pub messages: Vec<Message>,
    pub object_trees: Vec<ObjectTree>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessagesResponse {
    /// Ids the coordinator has registered but holds no content for yet.
    pub objects_to_push: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetRunRequest {
    pub node_id: Option<NodeId>,
    pub run_id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetRunResponse {
    pub run: Run,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetFabRequest {
    pub node_id: Option<NodeId>,
    pub hash_str: String,
    pub run_id: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetFabResponse {
    pub fab: Fab,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PullObjectRequest {
    pub node_id: NodeId,
    pub run_id: u64,
    pub object_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PullObjectResponse {
    pub object_found: bool,
    pub object_available: bool,
    pub object_content: Bytes,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushObjectRequest {
    pub node_id: NodeId,
    pub run_id: u64,
    pub object_id: String,
    pub object_content: Bytes,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushObjectResponse {
    pub stored: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmMessageReceivedRequest {
    pub node_id: NodeId,
    pub run_id: u64,
    /// Root object id of the received message.
    pub message_object_id: String,
}

/// The coordinator's node-facing RPC surface.
///
/// Transport failures surface as [`FleetError::Transport`] carrying a
/// `tonic::Status`.
///
/// [`FleetError::Transport`]: crate::FleetError::Transport
#[async_trait]
pub trait FleetApi: Send + Sync + 'static {
    async fn create_node(&self, request: CreateNodeRequest) -> Result<CreateNodeResponse>;

    async fn delete_node(&self, request: DeleteNodeRequest) -> Result<()>;

    async fn send_node_heartbeat(
        &self,
        request: SendNodeHeartbeatRequest,
    ) -> Result<SendNodeHeartbeatResponse>;

    async fn pull_messages(&self, request: PullMessagesRequest) -> Result<PullMessagesResponse>;

    async fn push_messages(&self, request: PushMessagesRequest) -> Result<PushMessagesResponse>;

    async fn get_run(&self, request: GetRunRequest) -> Result<GetRunResponse>;

    async fn get_fab(&self, request: GetFabRequest) -> Result<GetFabResponse>;

    async fn pull_object(&self, request: PullObjectRequest) -> Result<PullObjectResponse>;

    async fn push_object(&self, request: PushObjectRequest) -> Result<PushObjectResponse>;

    async fn confirm_message_received(&self, request: ConfirmMessageReceivedRequest) -> Result<()>;

    /// Release the underlying channel. Never retried.
    async fn close(&self) {}
}
