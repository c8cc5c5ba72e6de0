//! Mesh layer: proximity-aware routing and the node orchestrator.
//!
//! The [`Router`] decides, the [`Node`] acts. Routing state is plain data
//! behind synchronous methods; the node's reactor task owns it together with
//! the DHT and transports, and is driven entirely through a [`NodeHandle`].

pub mod error;
pub mod node;
pub mod router;

pub use error::{MeshError, MeshResult};
pub use node::{
    AnnouncePayload, Delivery, Node, NodeConfig, NodeHandle, NodeState, NodeStatus,
    DEFAULT_DISCOVERY_TIMEOUT, DISCOVERY_FANOUT,
};
pub use router::{RouteEntry, RouteRequestAction, Router, RouterSweep, ROUTE_TTL};
