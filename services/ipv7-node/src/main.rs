//! Standalone mesh node daemon.
//!
//! Loads a TOML config (`--config <path>`, defaults otherwise), brings up
//! the configured transports, and runs the node until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use ipv7_core::logging;
use ipv7_core::types::Capabilities;
use ipv7_core::Config;
use ipv7_identity::KeyPair;
use ipv7_mesh::{Delivery, Node, NodeConfig};
use ipv7_transport::{TcpTransport, TransportManager, UdpTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = match parse_config_path(&std::env::args().collect::<Vec<_>>())? {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default_config(),
    };

    let keypair = KeyPair::generate();
    let node_config = NodeConfig {
        location: match (config.identity.latitude, config.identity.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        },
        port: config.identity.port,
        relay: config.network.relay,
        capabilities: if config.network.relay {
            Capabilities::relay_node()
        } else {
            Capabilities::default()
        },
        bootstrap: config.network.bootstrap.clone(),
        heartbeat_interval: Duration::from_secs(config.network.heartbeat_interval_secs),
        announce_interval: Duration::from_secs(config.network.announce_interval_secs),
        peer_timeout: Duration::from_secs(config.network.peer_timeout_secs),
        ..NodeConfig::default()
    };

    let mut transports = TransportManager::new();
    if let Some(listen) = &config.transport.tcp_listen {
        let addr = listen.parse().with_context(|| format!("bad tcp_listen {listen}"))?;
        transports.register(Box::new(TcpTransport::new(addr)));
    }
    if let Some(listen) = &config.transport.udp_listen {
        let addr = listen.parse().with_context(|| format!("bad udp_listen {listen}"))?;
        transports.register(Box::new(UdpTransport::new(addr)));
    }

    let (delivery_tx, mut delivery_rx) = tokio::sync::mpsc::channel::<Delivery>(64);
    let node = Node::new(keypair, node_config, transports, delivery_tx)?;
    info!(address = %node.address(), "identity generated");

    let handle = node.start().await?;

    // The daemon has no application on top; just surface what arrives.
    let sink = tokio::spawn(async move {
        while let Some(delivery) = delivery_rx.recv().await {
            info!(
                source = %delivery.source,
                bytes = delivery.payload.len(),
                "data delivered"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.stop().await?;
    sink.abort();
    Ok(())
}

fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter
                .next()
                .context("--config was provided without a path")?;
            return Ok(Some(PathBuf::from(path)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_requires_a_path() {
        let args = vec!["ipv7-node".to_string(), "--config".to_string()];
        assert!(parse_config_path(&args).is_err());
    }

    #[test]
    fn missing_flag_means_defaults() {
        let args = vec!["ipv7-node".to_string()];
        assert!(parse_config_path(&args).unwrap().is_none());
    }
}
