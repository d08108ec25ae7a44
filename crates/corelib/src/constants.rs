//! Protocol-wide defaults shared by the node and coordinator sides.

use std::time::Duration;

/// Cap on the exponential backoff between two retries of a remote call.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(20);

/// Interval between two liveness reports of a node.
pub const HEARTBEAT_DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for a single heartbeat RPC.
pub const HEARTBEAT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of missed intervals after which the coordinator considers a node dead.
pub const HEARTBEAT_PATIENCE: u32 = 2;

/// Object transfer limits.
pub const MAX_CONCURRENT_PULLS: usize = 8;
pub const MAX_CONCURRENT_PUSHES: usize = 8;
pub const PULL_MAX_TIME: Duration = Duration::from_secs(7200);
pub const PULL_MAX_TRIES_PER_OBJECT: u32 = 500;
pub const PULL_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const PULL_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Metadata keys carrying the bearer token pair of the privileged API.
pub const ACCESS_TOKEN_KEY: &str = "flwr-oidc-access-token";
pub const REFRESH_TOKEN_KEY: &str = "flwr-oidc-refresh-token";
