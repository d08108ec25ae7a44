//! Bounded-concurrency bulk object transfer.
//!
//! Message content never travels inline; it is pushed and pulled as separate
//! objects named by the message's [`ObjectTree`]. A pulled object may not be
//! available yet (the sender is still pushing it), so pulls retry
//! [`FleetError::ObjectUnavailable`] under their own backoff, independent of
//! the transport-level retries already applied to each RPC.
//!
//! The first error that is not retried stops all remaining work: in-flight
//! transfers are dropped and nothing new is started.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use corelib::constants::*;
use corelib::ObjectTree;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use retry::{exponential, RetryInvoker};
use tokio::time::Instant;
use tracing::debug;

use crate::api::FleetApi;
use crate::error::{FleetError, Result};
use crate::session::Connection;

/// Limits applied by [`pull_objects`].
#[derive(Clone, Debug, PartialEq)]
pub struct PullOptions {
    pub max_concurrent: usize,
    /// Budget for the whole batch; `None` is unbounded.
    pub max_time: Option<Duration>,
    pub max_tries_per_object: Option<u32>,
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_PULLS,
            max_time: Some(PULL_MAX_TIME),
            max_tries_per_object: Some(PULL_MAX_TRIES_PER_OBJECT),
            initial_backoff: PULL_INITIAL_BACKOFF,
            backoff_cap: PULL_BACKOFF_CAP,
        }
    }
}

/// Scale `wait` by a uniform factor in [0.8, 1.2].
fn twenty_percent_jitter(wait: Duration) -> Duration {
    wait.mul_f64(rand::rng().random_range(0.8..=1.2))
}

/// Pull every id in `object_ids` through `pull_fn`.
///
/// # Errors
///
/// Returns the first error that ends a pull: an object still unavailable
/// after `max_tries_per_object` attempts or past `max_time`, or any other
/// error from `pull_fn`.
pub async fn pull_objects<F, Fut>(
    object_ids: Vec<String>,
    pull_fn: F,
    options: &PullOptions,
) -> Result<HashMap<String, Bytes>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Bytes>>,
{
    let start = Instant::now();
    let factory_options = options.clone();
    let base = RetryInvoker::new(
        move || {
            exponential(
                factory_options.initial_backoff,
                2.0,
                Some(factory_options.backoff_cap),
            )
        },
        |err: &FleetError| matches!(err, FleetError::ObjectUnavailable(_)),
        options.max_tries_per_object,
        None,
    )
    .jitter(Some(Arc::new(twenty_percent_jitter)));

    let pull_fn = &pull_fn;
    let base = &base;
    stream::iter(object_ids)
        .map(|object_id| async move {
            // The time budget covers the batch, not each object.
            let remaining = options.max_time.map(|max| max.saturating_sub(start.elapsed()));
            let invoker = base.with_max_time(remaining);
            let content = invoker
                .invoke("PullObject", || pull_fn(object_id.clone()))
                .await?;
            debug!(%object_id, bytes = content.len(), "object pulled");
            Ok::<_, FleetError>((object_id, content))
        })
        .buffer_unordered(options.max_concurrent.max(1))
        .try_collect()
        .await
}

/// Push `objects` through `push_fn`, at most `max_concurrent` at a time.
///
/// With `only_ids`, objects outside the set are skipped.
pub async fn push_objects<F, Fut>(
    objects: HashMap<String, Bytes>,
    push_fn: F,
    only_ids: Option<&HashSet<String>>,
    max_concurrent: usize,
) -> Result<()>
where
    F: Fn(String, Bytes) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let pending = objects
        .into_iter()
        .filter(|(object_id, _)| only_ids.map_or(true, |ids| ids.contains(object_id)));
    stream::iter(pending)
        .map(|(object_id, content)| push_fn(object_id, content))
        .buffer_unordered(max_concurrent.max(1))
        .try_collect()
        .await
}

/// Pull every object of `tree` through `connection`, then confirm receipt
/// of the message rooted at the tree.
pub async fn pull_object_tree<C: FleetApi>(
    connection: &Connection<C>,
    run_id: u64,
    tree: &ObjectTree,
    options: &PullOptions,
) -> Result<HashMap<String, Bytes>> {
    let objects = pull_objects(
        tree.object_ids(),
        |object_id| async move { connection.pull_object(run_id, &object_id).await },
        options,
    )
    .await?;
    connection
        .confirm_message_received(run_id, &tree.object_id)
        .await?;
    Ok(objects)
}
