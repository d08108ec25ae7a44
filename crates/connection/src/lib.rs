//! Node-side connection to the coordinator.
//!
//! This crate provides everything a node needs to talk to the coordinator's
//! Fleet API reliably:
//! - The [`FleetApi`] capability trait and its request/response types
//! - [`RetryingFleet`], a decorator forwarding every call through a retry invoker
//! - The [`HeartbeatSender`] background liveness task
//! - The [`Connection`] session owning the node identity
//! - Bounded-concurrency bulk object transfer
//! - [`ConnectionConfig`] and an in-memory coordinator for loopback use

pub mod api;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod memory;
pub mod retrying;
pub mod session;
pub mod transfer;

pub use api::FleetApi;
pub use config::{ConfigError, ConnectionConfig};
pub use error::{FleetError, Result};
pub use heartbeat::HeartbeatSender;
pub use memory::InMemoryFleet;
pub use retrying::{fleet_retry_invoker, RetryingFleet};
pub use session::{Connection, SessionSettings};
pub use transfer::{pull_object_tree, pull_objects, push_objects, PullOptions};
