//! Transport error types.

use thiserror::Error;

use ipv7_core::types::TransportKind;

/// Errors from transport startup, shutdown, and per-send operations.
///
/// Per-send failures are not fatal to a node; callers in the mesh layer
/// swallow them and keep forwarding.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No transport registered for the endpoint's declared kind.
    #[error("no transport registered for kind '{0}'")]
    NoTransport(TransportKind),

    /// Transport used before `start` or after `stop`.
    #[error("transport '{0}' is not running")]
    NotStarted(TransportKind),

    /// Endpoint address could not be resolved for this transport.
    #[error("invalid endpoint '{address}:{port}': {reason}")]
    InvalidEndpoint {
        address: String,
        port: u16,
        reason: String,
    },

    /// Named in-process instance is not registered.
    #[error("unknown memory transport instance '{0}'")]
    UnknownInstance(String),

    /// Frame exceeds the maximum packet size.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Remote side went away mid-send.
    #[error("connection closed")]
    ConnectionClosed,

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
