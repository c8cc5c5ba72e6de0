//! Core functionality for the ipv7 mesh networking stack.
//!
//! This crate provides the fundamental shared types, configuration, and
//! logging infrastructure used across the ipv7 workspace.

pub mod config;
pub mod logging;
pub mod types;

pub use config::{Config, NetworkConfig, NodeIdentityConfig, TransportConfig};
pub use types::{
    Capabilities, Endpoint, TransportKind, GEOHASH_LEN, GEOHASH_SENTINEL, MAX_PACKET_SIZE,
    NODE_ID_LEN, PROTOCOL_VERSION,
};
