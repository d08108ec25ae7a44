//! Error types for the connection layer.

use tonic::{Code, Status};

use crate::config::ConfigError;

/// Result type alias for the connection layer.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors surfaced by a connection session.
///
/// Only [`FleetError::Transport`] is recoverable; the retry layer never
/// retries any other variant.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// The RPC failed at the transport layer (unavailable, deadline, ...).
    #[error("transport failure: {0}")]
    Transport(#[from] Status),

    /// The coordinator denied the call because the run is no longer active.
    #[error("run is not running")]
    RunNotRunning,

    /// A node-scoped call was attempted without a registered node.
    #[error("node instance missing")]
    NodeMissing,

    /// The coordinator does not recognize this node. Retrying cannot help.
    #[error("heartbeat failed unexpectedly: the coordinator does not recognize this node")]
    UnknownNode,

    /// The object is registered but its content has not been pushed yet.
    #[error("object with id '{0}' is not yet available")]
    ObjectUnavailable(String),

    /// The object id was never registered with the coordinator.
    #[error("object with id '{0}' could not be found")]
    ObjectNotPreregistered(String),

    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FleetError {
    /// Transport status code, if this is a transport failure.
    pub fn code(&self) -> Option<Code> {
        match self {
            FleetError::Transport(status) => Some(status.code()),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, FleetError::Transport(_))
    }
}
