//! Node identity.
//!
//! A node is a worker instance registered with the coordinator. The
//! coordinator assigns the identifier on registration; until then (and after
//! deregistration) a node has no identity at all.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator-assigned identifier of a registered node.
///
/// Newtype over `u64` so it is `Copy`, cheap to compare and hash, and cannot
/// be confused with a run id.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Raw numeric value as sent on the wire.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
