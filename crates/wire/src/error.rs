//! Wire format error types.

use thiserror::Error;

/// Errors from encoding or decoding addresses and packets.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    /// Text address did not start with the `ipv7:` prefix.
    #[error("invalid address prefix: expected 'ipv7:', got '{0}'")]
    InvalidPrefix(String),

    /// Geohash field had the wrong length or characters.
    #[error("invalid geohash '{0}': must be 4 characters")]
    InvalidGeohash(String),

    /// Node id field was not 32 hex characters.
    #[error("invalid node id '{0}': must be 32 hex characters")]
    InvalidNodeId(String),

    /// Port suffix was not a valid u16.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Address version did not match the protocol version.
    #[error("unsupported protocol version {0}, expected 7")]
    UnsupportedVersion(u8),

    /// Unknown address flags nibble.
    #[error("unknown address flags value {0}")]
    UnknownFlags(u8),

    /// Unknown packet type byte.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    /// Checksum did not match recomputation.
    #[error("address checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    /// Buffer too short for the fixed layout being decoded.
    #[error("buffer too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },

    /// Payload larger than a packet can carry.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Declared payload length inconsistent with the buffer.
    #[error("truncated packet: declared payload {declared} bytes, {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    /// Extension block did not parse cleanly.
    #[error("malformed extension at offset {0}")]
    MalformedExtension(usize),
}
