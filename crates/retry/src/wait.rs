//! Wait primitives used between two attempts.

use std::time::Duration;

use async_trait::async_trait;

/// How the invoker waits between attempts.
///
/// Implementations must not hold any lock belonging to the caller while
/// waiting.
#[async_trait]
pub trait Wait: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Plain timed sleep on the tokio timer. The default wait primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sleep;

#[async_trait]
impl Wait for Sleep {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
