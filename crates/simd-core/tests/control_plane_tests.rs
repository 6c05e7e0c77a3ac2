//! End-to-end tests for the control plane over a real Unix socket.

use simd_core::error::rpc_codes;
use simd_core::{ControlClient, LocalSim, LogLevel, PortAllocator, SimError};
use std::time::Duration;

/// A valid simnet pay-to-pubkey-hash address.
const SIMNET_ADDRESS: &str = "SMPL7pCX7q6pEkTyoipdVgHvk9tE5D6XNW";

/// A valid simnet pay-to-witness-pubkey-hash address.
const SIMNET_SEGWIT_ADDRESS: &str = "sb1qqypqxpq9qcrsszg2pvxq6rs0zqg3yyc5xezrea";

async fn start() -> LocalSim {
    LocalSim::start(&PortAllocator::new(), LogLevel::Off)
        .await
        .expect("Failed to start simnet")
}

#[tokio::test]
async fn test_mine_send_stop_scenario() {
    let sim = start().await;
    let client = sim.client();

    client.ping().await.unwrap();

    let initial = client.best_block().await.unwrap().height;
    let blocks = client.mine(3).await.unwrap();
    assert_eq!(blocks.len(), 3);

    let tip = client.best_block().await.unwrap();
    assert_eq!(tip.height, initial + 3);
    assert_eq!(tip.hash, blocks[2]);

    let txid = client.send(SIMNET_ADDRESS, 1000).await.unwrap();
    assert_ne!(txid.as_bytes(), &[0u8; 32]);

    client.stop().await.unwrap();
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn test_send_to_segwit_address() {
    let sim = start().await;
    let client = sim.client();

    client.mine(1).await.unwrap();
    client.send(SIMNET_SEGWIT_ADDRESS, 50_000).await.unwrap();

    // The send waits in the mempool until the next block.
    assert_eq!(sim.server().handler().node().mempool_len().unwrap(), 1);
    client.mine(1).await.unwrap();
    assert_eq!(sim.server().handler().node().mempool_len().unwrap(), 0);

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_address_leaves_height_unchanged() {
    let sim = start().await;
    let client = sim.client();

    client.mine(2).await.unwrap();
    let before = client.best_block().await.unwrap();

    let err = client.send("not-an-address", 1000).await.unwrap_err();
    assert_eq!(err.to_rpc_error_code(), rpc_codes::INVALID_ADDRESS);

    // A mainnet address is well formed but belongs to another network.
    let err = client
        .send("16L5yRNPTuciSgXGHqYwn9N6NeoKqopAu", 1000)
        .await
        .unwrap_err();
    assert_eq!(err.to_rpc_error_code(), rpc_codes::INVALID_ADDRESS);

    assert_eq!(client.best_block().await.unwrap(), before);
    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_without_funds_is_upstream_error() {
    let sim = start().await;

    let err = sim.client().send(SIMNET_ADDRESS, 1000).await.unwrap_err();
    assert_eq!(err.to_rpc_error_code(), rpc_codes::UPSTREAM_ERROR);

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_of_max_amount_leaves_node_usable() {
    let sim = start().await;
    sim.client().mine(1).await.unwrap();

    let err = sim.client().send(SIMNET_ADDRESS, i64::MAX).await.unwrap_err();
    assert_eq!(err.to_rpc_error_code(), rpc_codes::UPSTREAM_ERROR);
    assert!(err.to_string().contains("insufficient funds"));

    // Both the original and a fresh connection still reach the node.
    assert_eq!(sim.client().best_block().await.unwrap().height, 1);
    let fresh = sim.connect().await.unwrap();
    assert_eq!(fresh.best_block().await.unwrap().height, 1);
    fresh.send(SIMNET_ADDRESS, 1000).await.unwrap();

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sync_waits_for_concurrent_miner() {
    let sim = start().await;
    let target = sim.client().best_block().await.unwrap().height + 5;

    let miner = sim.connect().await.unwrap();
    let mining = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        miner.mine(5).await
    });

    let polls = sim
        .client()
        .sync_every(target, Duration::from_millis(20))
        .await
        .unwrap();
    assert!(polls >= 1);
    assert!(sim.client().best_block().await.unwrap().height >= target);

    mining.await.unwrap().unwrap();
    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sync_returns_at_once_when_already_there() {
    let sim = start().await;
    let client = sim.client();

    client.mine(2).await.unwrap();
    let height = client.best_block().await.unwrap().height;

    let polls = client
        .sync_every(height, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(polls, 1);

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_calls_after_stop_fail_with_transport_error() {
    let sim = start().await;
    let other = sim.connect().await.unwrap();
    let path = sim.socket_path().to_path_buf();

    sim.client().stop().await.unwrap();

    // Same connection.
    let err = sim.client().ping().await.unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {err}");

    // Connection opened before the stop.
    let err = tokio::time::timeout(Duration::from_secs(2), other.mine(1))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection_closed(), "unexpected error: {err}");

    // New connection, once the accept loop has released the socket.
    let mut released = false;
    for _ in 0..100 {
        if !path.exists() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released);
    assert!(matches!(
        ControlClient::dial(&path).await,
        Err(SimError::SocketUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_stop_twice_is_harmless() {
    let sim = start().await;
    let second = sim.connect().await.unwrap();

    sim.client().stop().await.unwrap();
    // The other connection is closed by now, which stop tolerates.
    second.stop().await.unwrap();

    sim.server().close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_all_served() {
    let sim = start().await;
    let initial = sim.client().best_block().await.unwrap().height;

    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(sim.connect().await.unwrap());
    }

    let results = futures::future::try_join_all(clients.iter().map(|client| async move {
        client.ping().await?;
        client.mine(2).await
    }))
    .await
    .unwrap();

    let mut all_blocks: Vec<_> = results.into_iter().flatten().collect();
    all_blocks.sort_by_key(|h| *h.as_bytes());
    all_blocks.dedup();
    assert_eq!(all_blocks.len(), 8);

    assert_eq!(
        sim.client().best_block().await.unwrap().height,
        initial + 8
    );

    sim.client().stop().await.unwrap();
}

#[tokio::test]
async fn test_address_reports_node_port() {
    let ports = PortAllocator::new();
    let sim = LocalSim::start(&ports, LogLevel::Off).await.unwrap();

    let address = sim.client().address().await.unwrap();
    let port: u16 = address.trim_start_matches(':').parse().unwrap();
    assert!(ports.allocated().contains(&port));

    sim.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_node_log_written_when_enabled() {
    let sim = LocalSim::start(&PortAllocator::new(), LogLevel::Info)
        .await
        .unwrap();
    sim.client().mine(1).await.unwrap();

    let log_path = sim
        .server()
        .handler()
        .node()
        .log_path()
        .unwrap()
        .expect("log enabled");
    assert!(log_path.starts_with(sim.server().log_dir()));

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("[INF] CHAN: Connected block"));

    sim.shutdown().await.unwrap();
}
