//! Error types for mesh operations.

use thiserror::Error;

use ipv7_transport::TransportError;
use ipv7_wire::WireError;

/// Errors surfaced to callers of the mesh layer.
///
/// Forwarding failures are deliberately absent: mid-relay errors are
/// swallowed because no end-to-end acknowledgment exists at this layer.
#[derive(Debug, Error)]
pub enum MeshError {
    /// No route to the destination; discovery has not been invoked or found
    /// nothing.
    #[error("no route to destination {destination}")]
    NoRoute { destination: String },

    /// The next hop is known but no reachable endpoint is recorded for it.
    #[error("no endpoint known for peer {peer}")]
    NoEndpoint { peer: String },

    /// Route discovery did not produce a reply in time.
    #[error("route discovery timed out for {destination}")]
    DiscoveryTimeout { destination: String },

    /// Operation not valid in the node's current lifecycle state.
    #[error("invalid node state: {0}")]
    InvalidState(String),

    /// Wire codec failure.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Transport failure on the caller's own send.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Announce payload could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
