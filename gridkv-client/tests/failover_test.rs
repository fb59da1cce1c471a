//! Integration tests for failover and reconnection.

mod common;

use std::time::{Duration, Instant};

use common::MockCluster;
use gridkv_client::{CacheHandle, ClientConfig, GridClient, GridError, RouterState, Value};

async fn connect_client(cluster: &MockCluster) -> GridClient {
    let config = ClientConfig::builder()
        .endpoints(cluster.endpoints())
        .partition_awareness(true)
        .build()
        .unwrap();
    GridClient::connect(config).await.unwrap()
}

async fn warm_up(cluster: &MockCluster, client: &GridClient, cache: &CacheHandle, key: Value) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(
            Instant::now() < deadline,
            "client did not reach affinity routing in time"
        );

        cache.put(key.clone(), 0i32).await.unwrap();

        if client.router().session_count() == cluster.endpoints().len() {
            let expected = cluster.primary_for_key(&key).unwrap();
            if cluster.ops().last().map(|r| r.node) == Some(expected) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_put_succeeds_after_primary_dies() {
    let mut cluster = MockCluster::start(3).await;
    let client = connect_client(&cluster).await;
    let cache = client.get_or_create_cache("test-cache").await.unwrap();

    warm_up(&cluster, &client, &cache, Value::I32(1)).await;

    let primary = cluster.primary_for_key(&Value::I32(1)).unwrap();
    let index = cluster
        .node_ids()
        .iter()
        .position(|id| *id == primary)
        .unwrap();
    cluster.kill(index);

    // the very next operation must be absorbed by failover
    cache.put(1i32, 1i32).await.unwrap();

    for _ in 0..5 {
        cache.put(1i32, 1i32).await.unwrap();
    }
    assert_eq!(cache.get(1i32).await.unwrap(), Some(Value::I32(1)));

    client.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_cluster_loss() {
    let mut cluster = MockCluster::start(3).await;
    let client = connect_client(&cluster).await;
    let cache = client.get_or_create_cache("test-cache").await.unwrap();

    warm_up(&cluster, &client, &cache, Value::I32(1)).await;

    for index in 0..3 {
        cluster.kill(index);
    }

    // the first operation after total loss surfaces the cluster loss; it may
    // also observe the reconnect sweep already in progress
    match cache.put(1i32, 1i32).await.unwrap_err() {
        GridError::LostConnection(message) => {
            assert!(
                message.contains("Cluster is unavailable"),
                "unexpected message: {}",
                message
            );
        }
        GridError::IllegalState(_) => {}
        other => panic!("expected lost connection or illegal state, got {:?}", other),
    }

    // the reconnect sweep fails against dead listeners and the router ends
    // up disconnected
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.state() != RouterState::Disconnected {
        assert!(Instant::now() < deadline, "router never became disconnected");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let err = cache.put(1i32, 1i32).await.unwrap_err();
    match err {
        GridError::IllegalState(state) => assert!(state.contains("Disconnected")),
        other => panic!("expected illegal state, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restarted_node_receives_traffic_again() {
    let mut cluster = MockCluster::start(3).await;
    let client = connect_client(&cluster).await;
    let cache = client.get_or_create_cache("test-cache").await.unwrap();

    warm_up(&cluster, &client, &cache, Value::I32(1)).await;

    let primary = cluster.primary_for_key(&Value::I32(1)).unwrap();
    let index = cluster
        .node_ids()
        .iter()
        .position(|id| *id == primary)
        .unwrap();

    cluster.kill(index);
    cache.put(1i32, 1i32).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    cluster.restart(index).await;

    // poll until the topology stabilizes: two consecutive reads that do not
    // bump the observed version, with every session re-established
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(
            Instant::now() < deadline,
            "topology never stabilized after restart"
        );
        let before = client.router().topology_version();
        cache.get(1i32).await.unwrap();
        let after = client.router().topology_version();
        if before.is_some() && before == after && client.router().session_count() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    cluster.clear_ops();
    let restarted = cluster.node_ids()[index];
    let mut reached = false;
    for i in 1..=1000i32 {
        cache.put(i * 1433, i).await.unwrap();
        if cluster.ops().iter().any(|r| r.node == restarted) {
            reached = true;
            break;
        }
    }
    assert!(reached, "no request reached the restarted node");

    client.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_awareness_deactivates_below_two_sessions() {
    let mut cluster = MockCluster::start(2).await;
    let client = connect_client(&cluster).await;
    let cache = client.get_or_create_cache("test-cache").await.unwrap();

    warm_up(&cluster, &client, &cache, Value::I32(1)).await;
    assert!(client.router().partition_awareness_active());

    let primary = cluster.primary_for_key(&Value::I32(1)).unwrap();
    let index = cluster
        .node_ids()
        .iter()
        .position(|id| *id == primary)
        .unwrap();
    cluster.kill(index);

    cache.put(1i32, 1i32).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.router().session_count() > 1 {
        assert!(Instant::now() < deadline, "dead session never removed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!client.router().partition_awareness_active());

    client.disconnect().await;
}
