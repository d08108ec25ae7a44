//! Integration tests for the connection session against the in-memory
//! coordinator.
//!
//! # Test Strategy
//!
//! 1. **Message flow**: empty receive, exactly-once delivery, content stripping
//! 2. **Node-scoped guards**: object calls without a node make no network call
//! 3. **Failure taxonomy**: unknown node, permission denied, retried outages
//! 4. **Teardown**: ordering, idempotence, body result preserved, bounded during outages
//! 5. **Object transfer**: pull a delivered tree, push what the coordinator asks for

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use connection::transfer::{pull_object_tree, push_objects, PullOptions};
use connection::{fleet_retry_invoker, Connection, FleetError, InMemoryFleet, SessionSettings};
use corelib::{Fab, Message, Metadata, NodeId, ObjectTree, Run};
use retry::HealthGatedWaiter;
use tonic::Code;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session(fleet: &Arc<InMemoryFleet>) -> Connection<InMemoryFleet> {
    init_tracing();
    let waiter = Arc::new(HealthGatedWaiter::new());
    let invoker = fleet_retry_invoker(Duration::from_secs(20), None, None, &waiter);
    Connection::new(Arc::clone(fleet), invoker, SessionSettings::default())
}

fn instruction(run_id: u64, dst: NodeId) -> Message {
    Message::new(
        Metadata {
            run_id,
            message_id: "instruction-1".into(),
            dst_node_id: dst,
            message_type: "train".into(),
            ..Default::default()
        },
        Bytes::from_static(b"weights"),
    )
}

fn tree() -> ObjectTree {
    ObjectTree::new("root", vec![ObjectTree::leaf("part-1"), ObjectTree::leaf("part-2")])
}

// ============================================================================
// Message Flow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_receive_is_empty_then_exactly_once() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    let node_id = conn.create_node().await?;

    assert!(conn.receive().await?.is_none());

    let message = instruction(1, node_id);
    fleet.enqueue(node_id, message.clone(), tree());

    let (received, received_tree) = conn.receive().await?.expect("one message queued");
    assert_eq!(received, message);
    assert_eq!(received_tree, tree());

    // Not redelivered.
    assert!(conn.receive().await?.is_none());

    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_strips_content_and_reports_missing_objects() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    let node_id = conn.create_node().await?;
    fleet.put_object("part-2", Bytes::from_static(b"already here"));

    let reply = instruction(1, NodeId(0));
    let to_push = conn.send(reply.clone(), tree()).await?;

    let pushed = fleet.pushed_messages();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].node_id, node_id);
    assert!(!pushed[0].message.has_content());
    assert_eq!(pushed[0].message.metadata, reply.metadata);

    let mut to_push: Vec<_> = to_push.into_iter().collect();
    to_push.sort();
    assert_eq!(to_push, vec!["part-1", "root"]);

    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_receive_and_send_without_node_make_no_call() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);

    assert!(conn.receive().await?.is_none());
    assert!(conn.send(instruction(1, NodeId(0)), tree()).await?.is_empty());
    assert_eq!(fleet.call_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_and_fab_lookup_without_node() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let run = Run {
        run_id: 9,
        fab_id: "demo/app".into(),
        fab_version: "1.0.0".into(),
        fab_hash: "abc123".into(),
        ..Default::default()
    };
    fleet.add_run(run.clone());
    fleet.add_fab(Fab::new("abc123", Bytes::from_static(b"bundle")));
    let conn = session(&fleet);

    assert_eq!(conn.get_run(9).await?, run);
    assert_eq!(conn.get_fab("abc123", 9).await?.content, Bytes::from_static(b"bundle"));
    Ok(())
}

// ============================================================================
// Node-scoped Guards
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_object_calls_without_node_fail_locally() {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);

    assert!(matches!(
        conn.pull_object(1, "root").await,
        Err(FleetError::NodeMissing)
    ));
    assert!(matches!(
        conn.push_object(1, "root", Bytes::new()).await,
        Err(FleetError::NodeMissing)
    ));
    assert!(matches!(
        conn.confirm_message_received(1, "root").await,
        Err(FleetError::NodeMissing)
    ));
    assert_eq!(fleet.call_count(), 0);
}

// ============================================================================
// Failure Taxonomy
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_node_heartbeat_is_fatal() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    let node_id = conn.create_node().await?;

    fleet.evict(node_id);
    assert!(matches!(conn.send_heartbeat().await, Err(FleetError::UnknownNode)));

    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_surfaces_run_not_running_without_retry() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;
    // Let the first heartbeat go out before injecting faults.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = fleet.call_count();

    fleet.fail_next(3, Code::PermissionDenied);
    let result = conn.receive().await;

    assert!(matches!(result, Err(FleetError::RunNotRunning)));
    assert_eq!(fleet.call_count(), before + 1);

    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_outage_is_retried_transparently() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    fleet.fail_next(4, Code::Unavailable);
    let conn = session(&fleet);

    let node_id = conn.create_node().await?;

    assert_eq!(node_id, NodeId(1));
    assert_eq!(fleet.registered_nodes(), vec![node_id]);
    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_reports_miss_while_unavailable() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    fleet.fail_next(100_000, Code::Unavailable);
    let beat = tokio::time::timeout(Duration::from_secs(60), conn.send_heartbeat()).await?;
    assert!(!beat?);

    conn.close().await;
    Ok(())
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_deregisters_and_closes_client() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    conn.close().await;
    assert!(fleet.registered_nodes().is_empty());
    assert!(fleet.is_closed());
    assert_eq!(conn.node_id(), None);

    // Idempotent, and no heartbeat after teardown.
    let calls = fleet.call_count();
    conn.close().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fleet.call_count(), calls);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_teardown_makes_single_deregistration_attempt() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = fleet.call_count();

    fleet.fail_next(10, Code::Unavailable);
    conn.close().await;

    assert_eq!(fleet.call_count(), before + 1);
    assert!(fleet.is_closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_during_outage_is_bounded() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;

    fleet.fail_next(100_000, Code::Unavailable);
    // The heartbeat due at 30s is now missing and backing off.
    tokio::time::sleep(Duration::from_secs(40)).await;

    let closed = tokio::time::timeout(Duration::from_secs(600), conn.close()).await;

    assert!(closed.is_ok());
    assert!(fleet.is_closed());
    // Deregistration failed, so the coordinator still lists the node.
    assert_eq!(fleet.registered_nodes().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_scoped_returns_body_error_and_tears_down() {
    let fleet = Arc::new(InMemoryFleet::new());
    let waiter = Arc::new(HealthGatedWaiter::new());
    let invoker = fleet_retry_invoker(Duration::from_secs(20), None, None, &waiter);

    let result: Result<(), FleetError> = Connection::scoped(
        Arc::clone(&fleet),
        invoker,
        SessionSettings::default(),
        |conn| async move {
            conn.create_node().await?;
            Err::<(), _>(FleetError::MalformedResponse("body failed"))
        },
    )
    .await;

    assert!(matches!(result, Err(FleetError::MalformedResponse("body failed"))));
    assert!(fleet.registered_nodes().is_empty());
    assert!(fleet.is_closed());
}

// ============================================================================
// Object Transfer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pull_object_tree_then_confirm() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    let node_id = conn.create_node().await?;

    fleet.enqueue(node_id, instruction(3, node_id).remove_content(), tree());
    for id in ["root", "part-1", "part-2"] {
        fleet.put_object(id, Bytes::from(id.as_bytes().to_vec()));
    }

    let (_, received_tree) = conn.receive().await?.expect("message queued");
    let objects = pull_object_tree(&conn, 3, &received_tree, &PullOptions::default()).await?;

    assert_eq!(objects.len(), 3);
    assert_eq!(objects["part-1"], Bytes::from_static(b"part-1"));
    assert_eq!(fleet.confirmed(), vec![(3, "root".to_string())]);
    // Confirmed objects are released by the coordinator.
    assert!(!fleet.is_registered("part-1"));

    conn.close().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_push_only_requested_objects() -> anyhow::Result<()> {
    let fleet = Arc::new(InMemoryFleet::new());
    let conn = session(&fleet);
    conn.create_node().await?;
    fleet.put_object("part-2", Bytes::from_static(b"cached"));

    let to_push = conn.send(instruction(5, NodeId(0)), tree()).await?;
    let objects: HashMap<String, Bytes> = ["root", "part-1", "part-2"]
        .into_iter()
        .map(|id| (id.to_string(), Bytes::from(format!("{id}-content"))))
        .collect();

    push_objects(
        objects,
        |object_id, content| {
            let conn = &conn;
            async move { conn.push_object(5, &object_id, content).await }
        },
        Some(&to_push),
        2,
    )
    .await?;

    assert_eq!(fleet.object("part-1"), Some(Bytes::from_static(b"part-1-content")));
    assert_eq!(fleet.object("part-2"), Some(Bytes::from_static(b"cached")));

    conn.close().await;
    Ok(())
}
