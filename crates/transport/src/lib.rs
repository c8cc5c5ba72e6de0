//! Pluggable transports beneath the mesh.
//!
//! A [`Transport`] moves opaque frames (serialized packets) between
//! endpoints. Three flavors exist: a length-prefixed TCP stream transport, a
//! UDP datagram transport, and an in-process transport backed by a named
//! registry for deterministic multi-node tests. The [`TransportManager`]
//! fans all of their inbound frames into one channel and dispatches outbound
//! sends by the endpoint's declared kind.

pub mod error;
pub mod manager;
pub mod memory;
pub mod tcp;
pub mod udp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ipv7_core::types::{Endpoint, TransportKind, MAX_PACKET_SIZE};

pub use error::TransportError;
pub use manager::TransportManager;
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Largest frame any transport will carry.
pub const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE;

/// A frame received from the network, tagged with where it came from.
#[derive(Debug)]
pub struct Inbound {
    pub frame: Vec<u8>,
    pub from: Endpoint,
}

/// A single transport flavor.
///
/// `start` hands the transport the channel all inbound frames flow into;
/// `send` must not assume any ordering across endpoints. Both lifecycle
/// methods are idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which endpoint kind this transport serves.
    fn kind(&self) -> TransportKind;

    /// The endpoint remote peers can reach this transport at.
    fn local_endpoint(&self) -> Endpoint;

    /// Open sockets and begin delivering inbound frames.
    async fn start(&mut self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError>;

    /// Close sockets and stop all background tasks.
    async fn stop(&mut self) -> Result<(), TransportError>;

    /// Send one frame to an endpoint. Best-effort; a failure affects only
    /// this send.
    async fn send(&self, frame: &[u8], endpoint: &Endpoint) -> Result<(), TransportError>;
}
