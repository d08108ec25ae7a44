//! Messages exchanged between a node and the coordinator.
//!
//! The transfer layer treats message payloads as opaque. A [`Message`] is its
//! [`Metadata`] plus optional bulk content; the content is never sent inline.
//! It travels as separately pushed/pulled objects described by the message's
//! [`ObjectTree`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Routing and bookkeeping information attached to every message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub run_id: u64,
    pub message_id: String,
    pub src_node_id: NodeId,
    pub dst_node_id: NodeId,
    /// Id of the message this one replies to; empty for instructions.
    pub reply_to_message_id: String,
    pub group_id: String,
    /// Creation time, seconds since the unix epoch.
    pub created_at: f64,
    /// Time-to-live in seconds.
    pub ttl: f64,
    pub message_type: String,
}

/// Opaque application payload plus its metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub metadata: Metadata,
    /// Bulk content. `None` once stripped for transmission.
    pub content: Option<Bytes>,
}

impl Message {
    pub fn new(metadata: Metadata, content: impl Into<Bytes>) -> Self {
        Self {
            metadata,
            content: Some(content.into()),
        }
    }

    /// A message carrying metadata only.
    pub fn metadata_only(metadata: Metadata) -> Self {
        Self {
            metadata,
            content: None,
        }
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Drop the bulk content, keeping metadata untouched.
    pub fn remove_content(mut self) -> Self {
        self.content = None;
        self
    }
}

/// Manifest of the objects making up a message's payload.
///
/// The root's `object_id` identifies the message itself; descendants are the
/// objects its content was decomposed into. Ids are opaque strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTree {
    pub object_id: String,
    #[serde(default)]
    pub children: Vec<ObjectTree>,
}

impl ObjectTree {
    pub fn new(object_id: impl Into<String>, children: Vec<ObjectTree>) -> Self {
        Self {
            object_id: object_id.into(),
            children,
        }
    }

    pub fn leaf(object_id: impl Into<String>) -> Self {
        Self::new(object_id, Vec::new())
    }

    /// Iterate over every node of the tree in pre-order (root first).
    pub fn iter(&self) -> ObjectTreeIter<'_> {
        ObjectTreeIter { stack: vec![self] }
    }

    /// Ids of every object in the tree, pre-order.
    pub fn object_ids(&self) -> Vec<String> {
        self.iter().map(|tree| tree.object_id.clone()).collect()
    }

    /// Number of objects in the tree, including the root.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'a> IntoIterator for &'a ObjectTree {
    type Item = &'a ObjectTree;
    type IntoIter = ObjectTreeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Pre-order iterator over an [`ObjectTree`].
pub struct ObjectTreeIter<'a> {
    stack: Vec<&'a ObjectTree>,
}

impl<'a> Iterator for ObjectTreeIter<'a> {
    type Item = &'a ObjectTree;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Reverse so the leftmost child is visited first.
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
