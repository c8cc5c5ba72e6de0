//! Peer bookkeeping records.

use serde::{Deserialize, Serialize};

use ipv7_core::types::{Capabilities, Endpoint};
use ipv7_wire::{now_millis, Address};

/// Everything the mesh knows about another node.
///
/// Created on first contact (announce or route reply), refreshed on any
/// packet received from the peer, removed on timeout or explicit disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's mesh address.
    pub address: Address,
    /// Raw public key; verification of announcements against it is a
    /// caller-pluggable step, not enforced here.
    pub public_key: Vec<u8>,
    /// Last time any packet arrived from this peer, epoch milliseconds.
    pub last_seen: u64,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// Reachable endpoints, unordered; pick by priority.
    pub endpoints: Vec<Endpoint>,
    /// Local reputation score, 0.0..=1.0.
    pub reputation: f64,
}

impl PeerInfo {
    /// Record a newly contacted peer.
    pub fn new(address: Address, public_key: Vec<u8>) -> Self {
        Self {
            address,
            public_key,
            last_seen: now_millis(),
            capabilities: Capabilities::default(),
            endpoints: Vec::new(),
            reputation: 0.5,
        }
    }

    /// Refresh the liveness timestamp.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }

    /// The endpoint with the lowest priority number, if any.
    pub fn best_endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.iter().min_by_key(|e| e.priority)
    }

    /// Merge a newly announced endpoint, replacing any same-target duplicate.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoints.retain(|e| !same_target(e, &endpoint));
        self.endpoints.push(endpoint);
    }

    /// Record the endpoint a frame was observed to arrive from.
    ///
    /// An observed stream endpoint carries the peer's ephemeral source port,
    /// not its listener, so it must never displace an announced endpoint.
    /// Skipped when an announced endpoint already covers the same target;
    /// otherwise stored behind every announced one.
    pub fn add_observed_endpoint(&mut self, endpoint: Endpoint) {
        if self.endpoints.iter().any(|e| same_target(e, &endpoint)) {
            return;
        }
        let worst = self.endpoints.iter().map(|e| e.priority).max().unwrap_or(0);
        let mut endpoint = endpoint;
        endpoint.priority = worst.saturating_add(1);
        self.endpoints.push(endpoint);
    }
}

fn same_target(a: &Endpoint, b: &Endpoint) -> bool {
    a.kind == b.kind && a.address == b.address && a.port == b.port
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipv7_core::types::TransportKind;
    use ipv7_identity::KeyPair;
    use ipv7_wire::AddressFlags;

    fn peer() -> PeerInfo {
        let keypair = KeyPair::from_seed([9u8; 32]);
        let address = Address::generate(&keypair, None, AddressFlags::Unicast).unwrap();
        PeerInfo::new(address, keypair.public_key().to_vec())
    }

    #[test]
    fn best_endpoint_prefers_lowest_priority_number() {
        let mut p = peer();
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4807, 2));
        p.add_endpoint(Endpoint::new(TransportKind::Datagram, "10.0.0.1", 4807, 1));
        assert_eq!(p.best_endpoint().unwrap().kind, TransportKind::Datagram);
    }

    #[test]
    fn add_endpoint_replaces_duplicates() {
        let mut p = peer();
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4807, 2));
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4807, 1));
        assert_eq!(p.endpoints.len(), 1);
        assert_eq!(p.endpoints[0].priority, 1);
    }

    #[test]
    fn add_endpoint_keeps_same_host_different_ports() {
        let mut p = peer();
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4807, 0));
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4808, 0));
        assert_eq!(p.endpoints.len(), 2);
    }

    #[test]
    fn observed_endpoint_never_displaces_the_listener() {
        let mut p = peer();
        p.add_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 4807, 0));
        // The ephemeral source port of the peer's outbound connection.
        p.add_observed_endpoint(Endpoint::new(TransportKind::Stream, "10.0.0.1", 54321, 0));

        assert_eq!(p.endpoints.len(), 2);
        let best = p.best_endpoint().unwrap();
        assert_eq!(best.port, 4807, "listener endpoint was evicted");
    }

    #[test]
    fn observed_endpoint_matching_an_announced_one_is_skipped() {
        let mut p = peer();
        p.add_endpoint(Endpoint::new(TransportKind::Datagram, "10.0.0.1", 4807, 0));
        p.add_observed_endpoint(Endpoint::new(TransportKind::Datagram, "10.0.0.1", 4807, 0));
        assert_eq!(p.endpoints.len(), 1);
        assert_eq!(p.endpoints[0].priority, 0);
    }

    #[test]
    fn observed_endpoint_alone_is_still_usable() {
        let mut p = peer();
        p.add_observed_endpoint(Endpoint::new(TransportKind::Datagram, "10.0.0.1", 4807, 0));
        assert_eq!(p.best_endpoint().unwrap().port, 4807);
    }
}
