//! End-to-end tests over a three-node cluster of loopback fake nodes.
//!
//! Run tests:
//! ```bash
//! cargo test --test fake_cluster --features test-utils
//! ```

#![cfg(feature = "test-utils")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use slotwise::testing::FakeNode;
use slotwise::{ClusterClient, Cmd, Error, Frame, NodeAddress};

type SlotTable = Arc<Mutex<Vec<(u16, u16, NodeAddress)>>>;

fn slots_reply(table: &SlotTable) -> Frame {
    let ranges = table
        .lock()
        .unwrap()
        .iter()
        .map(|(start, end, node)| {
            Frame::Array(vec![
                Frame::Integer(*start as i64),
                Frame::Integer(*end as i64),
                Frame::Array(vec![
                    Frame::bulk(node.host().to_string()),
                    Frame::Integer(node.port() as i64),
                ]),
            ])
        })
        .collect();
    Frame::Array(ranges)
}

/// A node that answers `GET` with its own port.
async fn node(table: SlotTable) -> FakeNode {
    FakeNode::spawn(move |me, args| match args[0].as_ref() {
        b"CLUSTER" => slots_reply(&table),
        b"PING" => Frame::simple("PONG"),
        b"GET" => Frame::bulk(me.port().to_string()),
        b"DBSIZE" => Frame::Integer(me.port() as i64),
        _ => Frame::simple("OK"),
    })
    .await
}

struct Cluster {
    nodes: Vec<FakeNode>,
    table: SlotTable,
}

async fn three_node_cluster() -> Cluster {
    let table: SlotTable = Arc::default();
    let mut nodes = Vec::new();
    for _ in 0..3 {
        nodes.push(node(table.clone()).await);
    }
    *table.lock().unwrap() = vec![
        (0, 5460, nodes[0].address().clone()),
        (5461, 10922, nodes[1].address().clone()),
        (10923, 16383, nodes[2].address().clone()),
    ];
    Cluster { nodes, table }
}

fn port_bytes(node: &FakeNode) -> Option<Bytes> {
    Some(Bytes::from(node.address().port().to_string()))
}

#[tokio::test]
async fn test_keys_route_to_slot_owner() {
    let cluster = three_node_cluster().await;
    let client = ClusterClient::connect(&cluster.nodes[0].address().to_string())
        .await
        .unwrap();

    assert_eq!(client.node_count().await, 3);
    assert!(client.is_fully_covered().await);

    // bar -> 5061, c -> 7365, foo -> 12182
    assert_eq!(client.get("bar").await.unwrap(), port_bytes(&cluster.nodes[0]));
    assert_eq!(client.get("c").await.unwrap(), port_bytes(&cluster.nodes[1]));
    assert_eq!(client.get("foo").await.unwrap(), port_bytes(&cluster.nodes[2]));
}

#[tokio::test]
async fn test_broadcast_agreement_and_disagreement() {
    let cluster = three_node_cluster().await;
    let client = ClusterClient::connect(&cluster.nodes[1].address().to_string())
        .await
        .unwrap();

    client.flushall().await.unwrap();

    match client.broadcast(&Cmd::new("DBSIZE")).await {
        Err(Error::Broadcast { replies }) => {
            assert_eq!(replies.len(), 3);
            assert!(replies.iter().all(|(_, r)| r.is_ok()));
        }
        other => panic!("expected Broadcast error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_keyless_commands_rotate_over_primaries() {
    let cluster = three_node_cluster().await;
    let client = ClusterClient::connect(&cluster.nodes[0].address().to_string())
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..6 {
        match client.execute(&Cmd::new("DBSIZE")).await.unwrap() {
            Frame::Integer(port) => seen.push(port as u16),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    let mut ports: Vec<u16> = cluster.nodes.iter().map(|n| n.address().port()).collect();
    ports.sort_unstable();
    let expected: Vec<u16> = ports.iter().cycle().take(6).copied().collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_failover_is_picked_up_after_renewal() {
    let mut cluster = three_node_cluster().await;
    let seed = cluster.nodes[0].address().clone();
    let client = ClusterClient::builder()
        .seed(&seed)
        .max_total_retries_duration(Duration::from_secs(2))
        .connect_timeout(Duration::from_millis(200))
        .build()
        .await
        .unwrap();

    assert_eq!(client.get("foo").await.unwrap(), port_bytes(&cluster.nodes[2]));

    // The third node dies and the first takes over its slots.
    {
        let mut table = cluster.table.lock().unwrap();
        table.truncate(2);
        table.push((10923, 16383, seed.clone()));
    }
    drop(cluster.nodes.pop());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.get("foo").await.unwrap(), port_bytes(&cluster.nodes[0]));
    assert_eq!(client.node_count().await, 2);
}

#[tokio::test]
async fn test_unreachable_cluster_gives_up() {
    let cluster = three_node_cluster().await;
    let client = ClusterClient::builder()
        .seed(cluster.nodes[0].address())
        .max_attempts(3)
        .max_total_retries_duration(Duration::from_secs(2))
        .connect_timeout(Duration::from_millis(200))
        .build()
        .await
        .unwrap();
    drop(cluster);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.get("foo").await.unwrap_err();
    assert!(matches!(err, Error::ClusterOperation { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_periodic_refresh_picks_up_new_owner() {
    let cluster = three_node_cluster().await;
    let client = ClusterClient::builder()
        .seed(cluster.nodes[0].address())
        .topology_refresh_period(Duration::from_millis(20))
        .build()
        .await
        .unwrap();
    assert_eq!(client.get("foo").await.unwrap(), port_bytes(&cluster.nodes[2]));

    // Slots move without any redirect; only the background refresh sees it.
    {
        let mut table = cluster.table.lock().unwrap();
        table.truncate(2);
        table.push((10923, 16383, cluster.nodes[1].address().clone()));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client.get("foo").await.unwrap(), port_bytes(&cluster.nodes[1]));
}
