//! Shared protocol types and constants.

use serde::{Deserialize, Serialize};

/// Protocol version carried in every address and packet header.
pub const PROTOCOL_VERSION: u8 = 7;

/// Length of the binary node identifier in bytes (128-bit key space).
pub const NODE_ID_LEN: usize = 16;

/// Length of the geohash proximity code embedded in addresses.
pub const GEOHASH_LEN: usize = 4;

/// Geohash sentinel used when a node has no known location.
pub const GEOHASH_SENTINEL: &str = "s000";

/// Maximum size of a serialized packet, header included.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Transport flavor an endpoint is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent byte-stream connection (TCP), length-prefixed framing.
    Stream,
    /// Connectionless datagrams (UDP), one packet per datagram.
    Datagram,
    /// In-process registry transport used for deterministic tests.
    Memory,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stream => write!(f, "stream"),
            TransportKind::Datagram => write!(f, "datagram"),
            TransportKind::Memory => write!(f, "memory"),
        }
    }
}

/// A reachable network endpoint for a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Transport to use when sending to this endpoint.
    pub kind: TransportKind,
    /// Transport-specific address (host, socket address, or instance name).
    pub address: String,
    /// Port number; 0 when the transport has no port concept.
    pub port: u16,
    /// Selection priority, lower is preferred.
    pub priority: u8,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(kind: TransportKind, address: impl Into<String>, port: u16, priority: u8) -> Self {
        Self {
            kind,
            address: address.into(),
            port,
            priority,
        }
    }
}

/// Capabilities a node advertises in its announce messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Willing to forward packets for other nodes.
    pub relay: bool,
    /// Supports multiple simultaneous routes to the same destination.
    pub multipath: bool,
    /// Accepts DHT storage entries.
    pub storage: bool,
    /// Bridges into another network.
    pub gateway: bool,
}

impl Capabilities {
    /// Default capability set for a relaying mesh node.
    pub fn relay_node() -> Self {
        Self {
            relay: true,
            multipath: false,
            storage: true,
            gateway: false,
        }
    }
}
