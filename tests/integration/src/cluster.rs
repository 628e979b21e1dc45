//! End-to-end routing over TCP against fake nodes.

use std::time::Duration;

use bytes::Bytes;
use ember_cluster_client::{
    key_slot, ClusterClient, ClusterConfig, ClusterError, NodeError, SeedError,
};
use ember_protocol::Frame;

use crate::helpers::{cmd, dead_port, master_line, replica_line, FakeNode, SLOW_REPLY_DELAY};

fn config(seeds: Vec<String>) -> ClusterConfig {
    ClusterConfig {
        seeds,
        min_discovery_interval_ms: 200,
        seed_retry_delay_ms: 10,
        connect_timeout_ms: 500,
        ..ClusterConfig::default()
    }
}

/// Two masters splitting the slots in half, plus a replica of the first.
/// "bar" hashes into the first half and "foo" into the second.
async fn two_masters() -> (FakeNode, FakeNode, FakeNode) {
    let a = FakeNode::start().await;
    let b = FakeNode::start().await;
    let r = FakeNode::start().await;
    let topology = [
        master_line("aaaa", &a, "0-8191"),
        master_line("bbbb", &b, "8192-16383"),
        replica_line("rrrr", &r, "aaaa"),
    ]
    .join("\n");
    for node in [&a, &b, &r] {
        node.set_topology(&topology);
    }
    (a, b, r)
}

#[tokio::test]
async fn routes_keys_to_their_masters() {
    assert!(key_slot(b"bar") < 8192);
    assert!(key_slot(b"foo") >= 8192);

    let (a, b, r) = two_masters().await;
    let client = ClusterClient::connect(config(vec![a.addr()])).await.unwrap();

    let reply = client.query(&["bar"], &cmd(&["SET", "bar", "1"])).await.unwrap();
    assert_eq!(reply, Frame::Simple("OK".into()));
    let reply = client.query(&["foo"], &cmd(&["SET", "foo", "2"])).await.unwrap();
    assert_eq!(reply, Frame::Simple("OK".into()));

    let reply = client.query(&["foo"], &cmd(&["GET", "foo"])).await.unwrap();
    assert_eq!(reply, Frame::Bulk(Bytes::from_static(b"2")));

    assert_eq!(a.commands(), 1);
    assert_eq!(b.commands(), 2);
    assert_eq!(r.commands(), 0);
    assert_eq!(client.masters().len(), 2);
    assert_eq!(client.nodes().len(), 3);
    assert!(client.coverage().is_complete());

    client.shutdown().await;
}

#[tokio::test]
async fn seeds_become_the_discovered_masters() {
    let (a, b, r) = two_masters().await;
    // discovery through the replica
    let client = ClusterClient::connect(config(vec![r.addr()])).await.unwrap();

    let seeds: Vec<String> = client.seeds().await.iter().map(|s| s.addr()).collect();
    assert_eq!(seeds.len(), 2);
    assert!(seeds.contains(&a.addr()));
    assert!(seeds.contains(&b.addr()));
    assert!(!seeds.contains(&r.addr()));
}

#[tokio::test]
async fn falls_back_to_the_next_seed() {
    let (a, _b, _r) = two_masters().await;
    let dead = format!("127.0.0.1:{}", dead_port());

    let client = ClusterClient::connect(config(vec![dead, a.addr()])).await.unwrap();
    assert_eq!(a.topology_queries(), 1);
    assert!(client.last_discovery().is_some());
}

#[tokio::test]
async fn unreachable_seeds_exhaust_discovery() {
    let first = format!("127.0.0.1:{}", dead_port());
    let last = format!("127.0.0.1:{}", dead_port());

    match ClusterClient::connect(config(vec![first, last.clone()])).await {
        Err(ClusterError::DiscoveryExhausted { endpoint, reason }) => {
            assert_eq!(endpoint, last);
            assert!(matches!(reason, SeedError::Node(NodeError::Io(_))));
        }
        Err(other) => panic!("expected DiscoveryExhausted, got {other:?}"),
        Ok(_) => panic!("expected discovery to fail"),
    }
}

#[tokio::test]
async fn failover_refreshes_and_retries() {
    let (a, b, _r) = two_masters().await;
    let c = FakeNode::start().await;
    let client = ClusterClient::connect(config(vec![a.addr()])).await.unwrap();

    // leaves an idle pooled connection to b
    client.query(&["foo"], &cmd(&["SET", "foo", "1"])).await.unwrap();
    assert_eq!(b.commands(), 1);

    // c takes over b's slots
    b.stop();
    let topology = [
        master_line("aaaa", &a, "0-8191"),
        master_line("cccc", &c, "8192-16383"),
    ]
    .join("\n");
    a.set_topology(&topology);
    c.set_topology(&topology);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = client.query(&["foo"], &cmd(&["GET", "foo"])).await.unwrap();
    assert_eq!(reply, Frame::Null);
    assert_eq!(c.commands(), 1);
    assert!(a.topology_queries() >= 2);
    assert_eq!(client.slot_owner(key_slot(b"foo")).map(|e| e.addr()), Some(c.addr()));

    client.shutdown().await;
}

#[tokio::test]
async fn error_reply_is_retried_once() {
    let (a, _b, _r) = two_masters().await;
    let cfg = ClusterConfig {
        min_discovery_interval_ms: 5000,
        ..config(vec![a.addr()])
    };
    let client = ClusterClient::connect(cfg).await.unwrap();
    a.set_error_reply(Some("CLUSTERDOWN the cluster is down"));

    match client.query(&["bar"], &cmd(&["GET", "bar"])).await {
        Err(ClusterError::Node {
            endpoint,
            source: NodeError::Server(msg),
        }) => {
            assert_eq!(endpoint, a.addr());
            assert!(msg.starts_with("CLUSTERDOWN"));
        }
        other => panic!("expected a server error, got {other:?}"),
    }
    // first attempt plus one retry; the refresh in between is skipped
    // because the topology is still fresh
    assert_eq!(a.commands(), 2);
    assert_eq!(a.topology_queries(), 1);
}

#[tokio::test]
async fn cancelled_query_does_not_leak_its_reply() {
    let (a, _b, _r) = two_masters().await;
    let mut cfg = config(vec![a.addr()]);
    // one connection, so the next query would reuse the cancelled one
    cfg.pool.max_size = 1;
    let client = ClusterClient::connect(cfg).await.unwrap();
    client.query(&["bar"], &cmd(&["SET", "bar", "FAST"])).await.unwrap();

    let cancelled = tokio::time::timeout(
        SLOW_REPLY_DELAY / 4,
        client.query(&["bar"], &cmd(&["SLOW"])),
    )
    .await;
    assert!(cancelled.is_err());

    let reply = client.query(&["bar"], &cmd(&["GET", "bar"])).await.unwrap();
    assert_eq!(reply, Frame::Bulk(Bytes::from_static(b"FAST")));
    assert_eq!(a.commands(), 3);
}

#[tokio::test]
async fn cross_slot_keys_never_reach_a_node() {
    let (a, b, _r) = two_masters().await;
    let client = ClusterClient::connect(config(vec![a.addr()])).await.unwrap();

    let err = client
        .query(&["foo", "bar"], &cmd(&["MGET", "foo", "bar"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::CrossSlot { .. }));
    assert_eq!(a.commands() + b.commands(), 0);

    // hash tags keep related keys together
    let reply = client
        .query(
            &["{user:1}:name", "{user:1}:email"],
            &cmd(&["SET", "{user:1}:name", "x"]),
        )
        .await
        .unwrap();
    assert_eq!(reply, Frame::Simple("OK".into()));
}

#[tokio::test]
async fn authenticates_discovered_masters() {
    let a = FakeNode::start_with_password("secret").await;
    let b = FakeNode::start_with_password("secret").await;
    let topology = [
        master_line("aaaa", &a, "0-8191"),
        master_line("bbbb", &b, "8192-16383"),
    ]
    .join("\n");
    a.set_topology(&topology);
    b.set_topology(&topology);

    let seed = format!("secret@{}", a.addr());
    let client = ClusterClient::connect(config(vec![seed])).await.unwrap();

    // b was never a seed, so the password must come from the seed list
    let reply = client.query(&["foo"], &cmd(&["SET", "foo", "1"])).await.unwrap();
    assert_eq!(reply, Frame::Simple("OK".into()));
    assert_eq!(b.commands(), 1);
}

#[tokio::test]
async fn wrong_password_fails_discovery() {
    let a = FakeNode::start_with_password("secret").await;
    a.set_topology(&master_line("aaaa", &a, "0-16383"));

    let seed = format!("wrong@{}", a.addr());
    match ClusterClient::connect(config(vec![seed])).await {
        Err(ClusterError::DiscoveryExhausted { reason, .. }) => {
            assert!(matches!(reason, SeedError::Node(NodeError::Auth(_))));
        }
        Err(other) => panic!("expected DiscoveryExhausted, got {other:?}"),
        Ok(_) => panic!("expected discovery to fail"),
    }
    assert_eq!(a.topology_queries(), 0);
}

#[tokio::test]
async fn fan_out_to_every_master() {
    let (a, b, r) = two_masters().await;
    let client = ClusterClient::connect(config(vec![a.addr()])).await.unwrap();
    client.query(&["bar"], &cmd(&["SET", "bar", "1"])).await.unwrap();

    let args = cmd(&["DBSIZE"]);
    let results = client
        .execute_on_masters(|conn| {
            let args = args.clone();
            Box::pin(async move { conn.send_command(&args).await })
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for (endpoint, frame) in &results {
        let expected = if endpoint.addr() == a.addr() { 1 } else { 0 };
        assert_eq!(frame, &Frame::Integer(expected));
    }
    assert_eq!(b.commands(), 1);
    assert_eq!(r.commands(), 0);

    match client.query_on_node(&r.addr().parse().unwrap(), &cmd(&["PING"])).await {
        Err(ClusterError::NotMaster(addr)) => assert_eq!(addr, r.addr()),
        other => panic!("expected NotMaster, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_closes_the_client() {
    let (a, _b, _r) = two_masters().await;
    let client = ClusterClient::connect(config(vec![a.addr()])).await.unwrap();
    let other = client.clone();

    client.shutdown().await;
    other.shutdown().await;

    let err = other.query(&["bar"], &cmd(&["GET", "bar"])).await.unwrap_err();
    assert!(matches!(err, ClusterError::Closed));
    assert!(matches!(client.refresh().await, Err(ClusterError::Closed)));
}
