//! Core library for the node <-> coordinator communication layer.
//!
//! This crate provides the domain types shared by every other crate in the
//! workspace:
//! - Node identity assigned by the coordinator
//! - Messages and their object-reference manifests
//! - Run and application bundle (Fab) metadata
//! - Protocol constants (intervals, timeouts, transfer limits)

pub mod constants;
pub mod message;
pub mod node;
pub mod run;

pub use message::{Message, Metadata, ObjectTree};
pub use node::NodeId;
pub use run::{Fab, Run};
