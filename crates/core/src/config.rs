//! Configuration for an ipv7 node daemon.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::Endpoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub identity: NodeIdentityConfig,
    pub network: NetworkConfig,
    pub transport: TransportConfig,
}

/// Identity and location of the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentityConfig {
    /// Latitude used to derive the address geohash; omit for the sentinel.
    pub latitude: Option<f64>,
    /// Longitude used to derive the address geohash; omit for the sentinel.
    pub longitude: Option<f64>,
    /// Port advertised in the node address, 0 for unset.
    pub port: u16,
}

/// Mesh behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Forward packets for other nodes.
    pub relay: bool,
    /// Bootstrap endpoints contacted at startup.
    pub bootstrap: Vec<Endpoint>,
    /// Seconds between heartbeats to known peers.
    pub heartbeat_interval_secs: u64,
    /// Seconds between capability announcements.
    pub announce_interval_secs: u64,
    /// Seconds of silence after which a peer is evicted.
    pub peer_timeout_secs: u64,
}

/// Listener addresses for the concrete transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// TCP listen address, e.g. "0.0.0.0:4807"; omit to disable.
    pub tcp_listen: Option<String>,
    /// UDP bind address, e.g. "0.0.0.0:4807"; omit to disable.
    pub udp_listen: Option<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            identity: NodeIdentityConfig {
                latitude: None,
                longitude: None,
                port: 4807,
            },
            network: NetworkConfig {
                relay: true,
                bootstrap: Vec::new(),
                heartbeat_interval_secs: 30,
                announce_interval_secs: 60,
                peer_timeout_secs: 90,
            },
            transport: TransportConfig {
                tcp_listen: Some("0.0.0.0:4807".to_string()),
                udp_listen: Some("0.0.0.0:4807".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = Config::default_config();
        assert!(config.network.relay);
        assert_eq!(config.network.heartbeat_interval_secs, 30);
        assert!(config.network.peer_timeout_secs > config.network.heartbeat_interval_secs);
    }

    #[test]
    fn config_parses_from_toml() {
        let toml_str = r#"
            [identity]
            latitude = 40.69
            longitude = -74.04
            port = 4807

            [network]
            relay = false
            bootstrap = []
            heartbeat_interval_secs = 15
            announce_interval_secs = 45
            peer_timeout_secs = 60

            [transport]
            udp_listen = "127.0.0.1:4807"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.network.relay);
        assert_eq!(config.identity.latitude, Some(40.69));
        assert!(config.transport.tcp_listen.is_none());
    }
}
