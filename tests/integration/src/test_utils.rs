//! Shared fixtures for multi-node mesh tests.

use std::time::Duration;

use tokio::sync::mpsc;

use ipv7_core::types::{Endpoint, TransportKind};
use ipv7_identity::KeyPair;
use ipv7_mesh::{Delivery, Node, NodeConfig, NodeHandle};
use ipv7_transport::{MemoryTransport, TransportManager};

/// Lower Manhattan; geohash area "dr5r".
pub const NYC: (f64, f64) = (40.689247, -74.044502);

/// Skagen, Denmark; geohash area "u4pr".
pub const SKAGEN: (f64, f64) = (57.64911, 10.40744);

/// Install the test logging subscriber. Safe to call from every test; only
/// the first call in the process wins.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Endpoint for a named in-memory node.
pub fn memory_endpoint(name: &str) -> Endpoint {
    Endpoint::new(TransportKind::Memory, name, 0, 0)
}

/// Start a node on the in-memory transport.
///
/// Intervals are shortened so formation and eviction behavior is observable
/// within test time.
pub async fn spawn_node(
    name: &str,
    location: (f64, f64),
    bootstrap: Vec<Endpoint>,
) -> (NodeHandle, mpsc::Receiver<Delivery>) {
    init_logging();
    let keypair = KeyPair::generate();
    let config = NodeConfig {
        location: Some(location),
        bootstrap,
        heartbeat_interval: Duration::from_millis(200),
        announce_interval: Duration::from_millis(300),
        peer_timeout: Duration::from_secs(5),
        discovery_timeout: Duration::from_secs(2),
        ..NodeConfig::default()
    };

    let mut transports = TransportManager::new();
    transports.register(Box::new(MemoryTransport::new(name)));

    let (delivery_tx, delivery_rx) = mpsc::channel(32);
    let node = Node::new(keypair, config, transports, delivery_tx).expect("node construction");
    let handle = node.start().await.expect("node start");
    (handle, delivery_rx)
}

/// Poll a node until it knows at least `count` peers.
pub async fn wait_for_peers(handle: &NodeHandle, count: usize) {
    for _ in 0..300 {
        if handle.status().await.expect("status").peers >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "node {} never reached {count} peers",
        handle.address()
    );
}

/// Receive one delivery or panic after two seconds.
pub async fn expect_delivery(rx: &mut mpsc::Receiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("delivery channel closed")
}
