//! Node orchestrator: one reactor task owning the DHT, the router, and the
//! transport manager.
//!
//! All state lives inside the loop. Inbound frames, handle commands, and the
//! periodic timers are drained by a single `select!`, so no lock protects the
//! tables. Outbound sends are spawned as detached tasks against the shared
//! [`TransportManager`] and never block packet processing; their failures are
//! logged and swallowed because the mesh has no per-hop acknowledgment.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use ipv7_core::types::{Capabilities, Endpoint, NODE_ID_LEN};
use ipv7_dht::{Dht, PeerInfo};
use ipv7_identity::KeyPair;
use ipv7_transport::{Inbound, TransportManager};
use ipv7_wire::{
    encode_hops, now_millis, Address, AddressFlags, Packet, PacketFactory, PacketType,
    ANNOUNCE_TTL, DEFAULT_MAX_AGE,
};

use crate::error::{MeshError, MeshResult};
use crate::router::{RouteEntry, RouteRequestAction, Router};

/// How many closest peers a route request fans out to.
pub const DISCOVERY_FANOUT: usize = 3;

/// Default wait for a discovery reply before giving up.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound frame channel depth between the transports and the loop.
const INBOUND_DEPTH: usize = 256;

/// Behavior knobs for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Location used to derive the address geohash; `None` for the sentinel.
    pub location: Option<(f64, f64)>,
    /// Port advertised in the node address, 0 for unset.
    pub port: u16,
    /// Forward data packets for other nodes.
    pub relay: bool,
    /// Capabilities advertised in announces.
    pub capabilities: Capabilities,
    /// Endpoints announced to at startup.
    pub bootstrap: Vec<Endpoint>,
    pub heartbeat_interval: Duration,
    pub announce_interval: Duration,
    /// Silence after which a peer is evicted.
    pub peer_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            location: None,
            port: 0,
            relay: true,
            capabilities: Capabilities::relay_node(),
            bootstrap: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            announce_interval: Duration::from_secs(60),
            peer_timeout: Duration::from_secs(90),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Application data handed up from the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: Address,
    pub payload: Vec<u8>,
}

/// JSON body of an announce packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub public_key: Vec<u8>,
    pub capabilities: Capabilities,
    pub endpoints: Vec<Endpoint>,
}

/// Snapshot returned by [`NodeHandle::status`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub state: NodeState,
    pub address: Address,
    pub peers: usize,
    pub routes: usize,
    pub stored_entries: usize,
}

enum Command {
    Send {
        destination: Address,
        payload: Vec<u8>,
        reply: oneshot::Sender<MeshResult<()>>,
    },
    Discover {
        destination: Address,
        reply: oneshot::Sender<oneshot::Receiver<RouteEntry>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable command surface for a running node.
#[derive(Clone)]
pub struct NodeHandle {
    address: Address,
    commands: mpsc::Sender<Command>,
    discovery_timeout: Duration,
}

impl NodeHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Send application data to a destination.
    ///
    /// Resolves a route from the table only; returns
    /// [`MeshError::NoRoute`] when none exists, leaving discovery to an
    /// explicit [`discover`](Self::discover) call. Sending to the node's own
    /// address loops the payload back without touching the network.
    pub async fn send(&self, destination: Address, payload: Vec<u8>) -> MeshResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                destination,
                payload,
                reply: tx,
            })
            .await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))?;
        rx.await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))?
    }

    /// Find or discover a route to a destination.
    ///
    /// Returns immediately when a fresh route is cached; otherwise a route
    /// request fans out and this waits until a reply installs a route or the
    /// discovery deadline passes.
    pub async fn discover(&self, destination: Address) -> MeshResult<RouteEntry> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Discover {
                destination: destination.clone(),
                reply: tx,
            })
            .await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))?;
        let waiter = rx
            .await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))?;
        match tokio::time::timeout(self.discovery_timeout, waiter).await {
            Ok(Ok(route)) => Ok(route),
            // Elapsed, or the pending entry was swept out from under us.
            _ => Err(MeshError::DiscoveryTimeout {
                destination: destination.to_string(),
            }),
        }
    }

    pub async fn status(&self) -> MeshResult<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status { reply: tx })
            .await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))?;
        rx.await
            .map_err(|_| MeshError::InvalidState("node is stopped".to_string()))
    }

    /// Stop the node. Stopping an already stopped node is a no-op.
    pub async fn stop(&self) -> MeshResult<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Stop { reply: tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// A mesh node before it is started.
pub struct Node {
    address: Address,
    keypair: KeyPair,
    config: NodeConfig,
    state: NodeState,
    dht: Dht,
    router: Router,
    transports: Arc<TransportManager>,
    factory: PacketFactory,
    deliveries: mpsc::Sender<Delivery>,
}

impl Node {
    pub fn new(
        keypair: KeyPair,
        config: NodeConfig,
        transports: TransportManager,
        deliveries: mpsc::Sender<Delivery>,
    ) -> MeshResult<Self> {
        let mut address = Address::generate(&keypair, config.location, AddressFlags::Unicast)?;
        if config.port != 0 {
            address.port = Some(config.port);
        }
        Ok(Self {
            dht: Dht::new(address.clone()),
            router: Router::new(address.clone()),
            address,
            keypair,
            config,
            state: NodeState::Stopped,
            transports: Arc::new(transports),
            factory: PacketFactory::new(),
            deliveries,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Start the transports and spawn the reactor loop.
    pub async fn start(mut self) -> MeshResult<NodeHandle> {
        self.state = NodeState::Starting;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        self.transports.start_all(inbound_tx).await?;
        info!(address = %self.address, "node starting");

        let (command_tx, command_rx) = mpsc::channel(64);
        let handle = NodeHandle {
            address: self.address.clone(),
            commands: command_tx,
            discovery_timeout: self.config.discovery_timeout,
        };
        tokio::spawn(self.run(inbound_rx, command_rx));
        Ok(handle)
    }

    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        self.state = NodeState::Running;
        self.announce_to_bootstrap().await;

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut announce = interval(self.config.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance = interval(Duration::from_secs(60));
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(frame) = inbound.recv() => self.handle_inbound(frame).await,
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => self.heartbeat_tick(),
                _ = announce.tick() => self.announce_tick().await,
                _ = maintenance.tick() => self.maintenance_tick(),
                else => break,
            }
        }

        self.state = NodeState::Stopping;
        if let Err(e) = self.transports.stop_all().await {
            warn!(error = %e, "transport shutdown failed");
        }
        self.state = NodeState::Stopped;
        info!(address = %self.address, "node stopped");
    }

    /// Returns `true` when the loop should exit.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send {
                destination,
                payload,
                reply,
            } => {
                let result = self.handle_send(destination, payload).await;
                let _ = reply.send(result);
                false
            }
            Command::Discover { destination, reply } => {
                let _ = reply.send(self.handle_discover(destination));
                false
            }
            Command::Status { reply } => {
                let _ = reply.send(NodeStatus {
                    state: self.state,
                    address: self.address.clone(),
                    peers: self.dht.peer_count(),
                    routes: self.router.route_count(),
                    stored_entries: self.dht.entry_count(),
                });
                false
            }
            Command::Stop { reply } => {
                let _ = reply.send(());
                true
            }
        }
    }

    async fn handle_send(&mut self, destination: Address, payload: Vec<u8>) -> MeshResult<()> {
        if destination.node_id == self.address.node_id {
            // Loopback: no serialization, no transports, no route table.
            let _ = self
                .deliveries
                .send(Delivery {
                    source: self.address.clone(),
                    payload,
                })
                .await;
            return Ok(());
        }

        let route = self
            .router
            .use_route(&destination.node_id)
            .ok_or_else(|| MeshError::NoRoute {
                destination: destination.to_string(),
            })?;
        let endpoint =
            self.endpoint_for(&route.next_hop.node_id)
                .ok_or_else(|| MeshError::NoEndpoint {
                    peer: route.next_hop.to_string(),
                })?;
        let packet = self
            .factory
            .data(self.address.clone(), destination, payload)?;
        self.send_detached(packet.serialize(), endpoint);
        Ok(())
    }

    fn handle_discover(&mut self, destination: Address) -> oneshot::Receiver<RouteEntry> {
        if let Some(route) = self.router.use_route(&destination.node_id) {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(route);
            return rx;
        }

        let (waiter, is_new) = self
            .router
            .begin_discovery(destination.node_id, self.config.discovery_timeout);
        if is_new {
            match self
                .factory
                .route_request(self.address.clone(), destination.clone())
            {
                Ok(request) => {
                    let frame = request.serialize();
                    debug!(destination = %destination, "route discovery started");
                    for peer in self.dht.find_closest_peers(&destination, DISCOVERY_FANOUT) {
                        if let Some(endpoint) = peer.best_endpoint() {
                            self.send_detached(frame.clone(), endpoint.clone());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "route request construction failed"),
            }
        }
        waiter
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        let packet = match Packet::deserialize(&inbound.frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, from = %inbound.from.address, "dropping malformed frame");
                return;
            }
        };
        self.handle_packet(packet, inbound.from).await;
    }

    async fn handle_packet(&mut self, packet: Packet, from: Endpoint) {
        // Our own traffic reflected back, e.g. by a flooding relay.
        if packet.header.source.node_id == self.address.node_id {
            return;
        }

        // The peer that physically handed us the frame; falls back to the
        // declared source for first contact over a direct link.
        let sender = self
            .peer_by_endpoint(&from)
            .unwrap_or_else(|| packet.header.source.clone());

        self.dht.touch_peer(&sender.node_id);
        self.router
            .learn_route(&packet.header.source, &sender, from.kind);

        match packet.header.packet_type {
            PacketType::RouteRequest => self.handle_route_request(packet, &sender, &from),
            PacketType::RouteReply => self.handle_route_reply(packet, &sender, &from),
            _ => self.handle_addressed(packet, &sender, &from).await,
        }
    }

    fn handle_route_request(&mut self, mut packet: Packet, sender: &Address, from: &Endpoint) {
        if packet.is_expired(DEFAULT_MAX_AGE) {
            trace!("stale route request dropped");
            return;
        }
        let action = match self.router.process_route_request(&packet) {
            Ok(action) => action,
            Err(e) => {
                debug!(error = %e, "malformed route request dropped");
                return;
            }
        };
        match action {
            RouteRequestAction::Reply { hops } => {
                let reply = match self.factory.route_reply(
                    self.address.clone(),
                    packet.header.source.clone(),
                    &hops,
                ) {
                    Ok(reply) => reply,
                    Err(e) => {
                        debug!(error = %e, "route reply construction failed");
                        return;
                    }
                };
                // Straight back over the link the request arrived on.
                self.send_detached(reply.serialize(), from.clone());
            }
            RouteRequestAction::Forward { hops } => {
                if !packet.header.decrement_ttl() {
                    trace!("route request ttl exhausted");
                    return;
                }
                packet.payload = encode_hops(&hops);
                packet.header.payload_length = packet.payload.len() as u32;
                let frame = packet.serialize();
                for peer in self
                    .dht
                    .find_closest_peers(&packet.header.destination, DISCOVERY_FANOUT)
                {
                    if peer.address.node_id == sender.node_id
                        || peer.address.node_id == packet.header.source.node_id
                    {
                        continue;
                    }
                    if let Some(endpoint) = peer.best_endpoint() {
                        self.send_detached(frame.clone(), endpoint.clone());
                    }
                }
            }
        }
    }

    fn handle_route_reply(&mut self, mut packet: Packet, sender: &Address, from: &Endpoint) {
        if packet.is_expired(DEFAULT_MAX_AGE) {
            trace!("stale route reply dropped");
            return;
        }
        if let Err(e) = self.router.process_route_reply(&packet, sender, from.kind) {
            debug!(error = %e, "malformed route reply dropped");
            return;
        }
        if packet.header.destination.node_id == self.address.node_id {
            return;
        }
        // Pass the reply along the reverse path toward the requester.
        if !packet.header.decrement_ttl() {
            return;
        }
        let requester = packet.header.destination.node_id;
        let Some(route) = self.router.use_route(&requester) else {
            debug!("no reverse path for route reply");
            return;
        };
        let Some(endpoint) = self.endpoint_for(&route.next_hop.node_id) else {
            return;
        };
        self.send_detached(packet.serialize(), endpoint);
    }

    async fn handle_addressed(&mut self, packet: Packet, sender: &Address, from: &Endpoint) {
        let destination = &packet.header.destination;
        let for_me = destination.node_id == self.address.node_id;
        let broadcast = self.address.matches_broadcast(destination);

        // Announces are processed wherever they land. A bootstrap node
        // outside the announced area still has to learn the newcomer.
        if packet.header.packet_type == PacketType::Announce {
            if let Err(e) = self.handle_announce(&packet, from).await {
                debug!(error = %e, "malformed announce dropped");
            }
            if for_me {
                return;
            }
            if broadcast {
                self.flood(packet, sender);
            } else {
                // A unicast introduction passing through; keep it moving.
                self.relay(packet);
            }
            return;
        }

        if for_me || broadcast {
            match packet.header.packet_type {
                PacketType::Data => {
                    let _ = self
                        .deliveries
                        .send(Delivery {
                            source: packet.header.source.clone(),
                            payload: packet.payload.clone(),
                        })
                        .await;
                }
                PacketType::Heartbeat => {
                    // Liveness already recorded by the learn step.
                }
                other => {
                    trace!(packet_type = ?other, "unhandled packet type");
                }
            }
            if broadcast && !for_me {
                self.flood(packet, sender);
            }
            return;
        }

        self.relay(packet);
    }

    /// Forward a unicast packet one hop toward its destination.
    ///
    /// Every failure short of a local bug is a silent (logged) drop: relaying
    /// disabled, TTL exhausted, no route, no endpoint.
    fn relay(&mut self, mut packet: Packet) {
        if !self.config.relay {
            return;
        }
        if !packet.header.decrement_ttl() {
            trace!(destination = %packet.header.destination, "relay ttl exhausted");
            return;
        }
        let destination = packet.header.destination.node_id;
        let Some(route) = self.router.use_route(&destination) else {
            debug!(destination = %packet.header.destination, "no route, dropping relay");
            return;
        };
        let Some(endpoint) = self.endpoint_for(&route.next_hop.node_id) else {
            return;
        };
        self.send_detached(packet.serialize(), endpoint);
    }

    /// Re-flood a broadcast packet, excluding where it came from and any
    /// peer outside the broadcast area.
    fn flood(&mut self, mut packet: Packet, sender: &Address) {
        if !self.config.relay {
            return;
        }
        if !packet.header.decrement_ttl() {
            return;
        }
        let frame = packet.serialize();
        for peer in self.dht.all_peers() {
            if peer.address.node_id == sender.node_id
                || peer.address.node_id == packet.header.source.node_id
                || !peer.address.matches_broadcast(&packet.header.destination)
            {
                continue;
            }
            if let Some(endpoint) = peer.best_endpoint() {
                self.send_detached(frame.clone(), endpoint.clone());
            }
        }
    }

    async fn handle_announce(&mut self, packet: &Packet, from: &Endpoint) -> MeshResult<()> {
        let payload: AnnouncePayload = serde_json::from_slice(&packet.payload)?;
        let source = &packet.header.source;
        // An undecremented TTL means the announce arrived over a direct link,
        // so the observed endpoint really belongs to the source.
        let direct = packet.header.ttl == ANNOUNCE_TTL;

        let is_new = self.dht.get_peer(&source.node_id).is_none();
        match self.dht.get_peer_mut(&source.node_id) {
            Some(peer) => {
                peer.capabilities = payload.capabilities;
                for endpoint in payload.endpoints {
                    peer.add_endpoint(endpoint);
                }
                if direct {
                    peer.add_observed_endpoint(from.clone());
                }
                peer.touch();
            }
            None => {
                let mut peer = PeerInfo::new(source.clone(), payload.public_key);
                peer.capabilities = payload.capabilities;
                peer.endpoints = payload.endpoints;
                if direct {
                    peer.add_observed_endpoint(from.clone());
                }
                if self.dht.add_peer(peer) {
                    info!(peer = %source, "new peer");
                }
            }
        }

        // Introduce ourselves to a newcomer so the link becomes mutual.
        if is_new {
            let body = AnnouncePayload {
                public_key: self.keypair.public_key().to_vec(),
                capabilities: self.config.capabilities,
                endpoints: self.transports.local_endpoints().await,
            };
            let reply = self.factory.announce(
                self.address.clone(),
                source.clone(),
                serde_json::to_vec(&body)?,
            )?;
            self.send_detached(reply.serialize(), from.clone());
        }
        Ok(())
    }

    fn heartbeat_tick(&mut self) {
        let now = now_millis();
        let timeout = self.config.peer_timeout.as_millis() as u64;
        let stale: Vec<[u8; NODE_ID_LEN]> = self
            .dht
            .all_peers()
            .filter(|p| now.saturating_sub(p.last_seen) > timeout)
            .map(|p| p.address.node_id)
            .collect();
        for node_id in stale {
            if let Some(peer) = self.dht.remove_peer(&node_id) {
                info!(peer = %peer.address, "peer timed out");
            }
            self.router.handle_peer_disconnect(&node_id);
        }

        let probes: Vec<(Address, Endpoint)> = self
            .dht
            .all_peers()
            .filter_map(|p| p.best_endpoint().map(|e| (p.address.clone(), e.clone())))
            .collect();
        for (peer, endpoint) in probes {
            match self.factory.heartbeat(self.address.clone(), peer) {
                Ok(packet) => self.send_detached(packet.serialize(), endpoint),
                Err(e) => debug!(error = %e, "heartbeat construction failed"),
            }
        }
    }

    async fn announce_tick(&mut self) {
        let packet = match self.broadcast_announce().await {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "announce construction failed");
                return;
            }
        };
        let frame = packet.serialize();
        let targets: Vec<Endpoint> = self
            .dht
            .all_peers()
            .filter_map(|p| p.best_endpoint().cloned())
            .collect();
        trace!(peers = targets.len(), "announcing");
        for endpoint in targets {
            self.send_detached(frame.clone(), endpoint);
        }
    }

    fn maintenance_tick(&mut self) {
        self.dht.sweep();
        self.router.sweep();
    }

    /// Announce to the configured bootstrap endpoints. Failures are logged
    /// and ignored; the node runs fine alone.
    async fn announce_to_bootstrap(&mut self) {
        if self.config.bootstrap.is_empty() {
            return;
        }
        let packet = match self.broadcast_announce().await {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "bootstrap announce construction failed");
                return;
            }
        };
        let frame = packet.serialize();
        for endpoint in self.config.bootstrap.clone() {
            if let Err(e) = self.transports.send(&frame, &endpoint).await {
                warn!(
                    endpoint = %endpoint.address,
                    error = %e,
                    "bootstrap announce failed"
                );
            }
        }
    }

    async fn broadcast_announce(&self) -> MeshResult<Packet> {
        let payload = AnnouncePayload {
            public_key: self.keypair.public_key().to_vec(),
            capabilities: self.config.capabilities,
            endpoints: self.transports.local_endpoints().await,
        };
        let destination = Address::broadcast(&self.address.geohash)?;
        let packet = self.factory.announce(
            self.address.clone(),
            destination,
            serde_json::to_vec(&payload)?,
        )?;
        Ok(packet)
    }

    fn endpoint_for(&self, node_id: &[u8; NODE_ID_LEN]) -> Option<Endpoint> {
        self.dht
            .get_peer(node_id)
            .and_then(|p| p.best_endpoint())
            .cloned()
    }

    fn peer_by_endpoint(&self, endpoint: &Endpoint) -> Option<Address> {
        self.dht
            .all_peers()
            .find(|p| {
                p.endpoints.iter().any(|e| {
                    e.kind == endpoint.kind
                        && e.address == endpoint.address
                        && (e.port == endpoint.port || endpoint.port == 0)
                })
            })
            .map(|p| p.address.clone())
    }

    /// Fire-and-forget transmission; a failure affects only this frame.
    fn send_detached(&self, frame: Vec<u8>, endpoint: Endpoint) {
        let transports = Arc::clone(&self.transports);
        tokio::spawn(async move {
            if let Err(e) = transports.send(&frame, &endpoint).await {
                debug!(
                    endpoint = %endpoint.address,
                    error = %e,
                    "send failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipv7_core::types::TransportKind;
    use ipv7_transport::{MemoryTransport, Transport};
    use ipv7_wire::MAX_TTL;

    async fn spawn_node(
        name: &str,
        bootstrap: Vec<Endpoint>,
    ) -> (NodeHandle, mpsc::Receiver<Delivery>) {
        let keypair = KeyPair::generate();
        let config = NodeConfig {
            location: Some((40.6892, -74.0445)),
            bootstrap,
            discovery_timeout: Duration::from_millis(300),
            ..NodeConfig::default()
        };
        let mut transports = TransportManager::new();
        transports.register(Box::new(MemoryTransport::new(name)));
        let (tx, rx) = mpsc::channel(16);
        let node = Node::new(keypair, config, transports, tx).unwrap();
        let handle = node.start().await.unwrap();
        (handle, rx)
    }

    async fn wait_for_peers(handle: &NodeHandle, count: usize) {
        for _ in 0..200 {
            if handle.status().await.unwrap().peers >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peer count never reached {count}");
    }

    fn memory_endpoint(name: &str) -> Endpoint {
        Endpoint::new(TransportKind::Memory, name, 0, 0)
    }

    fn stranger() -> Address {
        Address::from_parts(AddressFlags::Unicast, "dr5r", [9u8; NODE_ID_LEN], None).unwrap()
    }

    #[tokio::test]
    async fn loopback_delivery_never_touches_the_network() {
        let (handle, mut deliveries) = spawn_node("node-loop", Vec::new()).await;

        handle
            .send(handle.address().clone(), b"to myself".to_vec())
            .await
            .unwrap();

        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(delivery.payload, b"to myself");
        assert_eq!(delivery.source.node_id, handle.address().node_id);

        // No route was consulted or created for the loopback.
        let status = handle.status().await.unwrap();
        assert_eq!(status.routes, 0);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_handshake_makes_the_link_mutual() {
        let (b, _b_rx) = spawn_node("node-hs-b", Vec::new()).await;
        let (a, _a_rx) = spawn_node("node-hs-a", vec![memory_endpoint("node-hs-b")]).await;

        wait_for_peers(&a, 1).await;
        wait_for_peers(&b, 1).await;

        let a_status = a.status().await.unwrap();
        assert_eq!(a_status.state, NodeState::Running);
        assert!(a_status.routes >= 1);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn data_flows_after_bootstrap() {
        let (b, mut b_rx) = spawn_node("node-data-b", Vec::new()).await;
        let (a, _a_rx) = spawn_node("node-data-a", vec![memory_endpoint("node-data-b")]).await;

        wait_for_peers(&a, 1).await;
        a.send(b.address().clone(), b"across the mesh".to_vec())
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .expect("delivery timed out")
            .unwrap();
        assert_eq!(delivery.payload, b"across the mesh");
        assert_eq!(delivery.source.node_id, a.address().node_id);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn send_without_route_is_no_route() {
        let (handle, _rx) = spawn_node("node-noroute", Vec::new()).await;
        let err = handle.send(stranger(), b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, MeshError::NoRoute { .. }));
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn discovery_with_no_peers_times_out() {
        let (handle, _rx) = spawn_node("node-disc-alone", Vec::new()).await;
        let err = handle.discover(stranger()).await.unwrap_err();
        assert!(matches!(err, MeshError::DiscoveryTimeout { .. }));
        handle.stop().await.unwrap();
    }

    /// Register a raw transport with a node by sending it a hand-built
    /// announce, standing in for a full neighbor.
    async fn introduce(
        transport: &MemoryTransport,
        factory: &PacketFactory,
        keypair: &KeyPair,
        address: &Address,
        name: &str,
        node: &NodeHandle,
    ) {
        let body = AnnouncePayload {
            public_key: keypair.public_key().to_vec(),
            capabilities: Capabilities::default(),
            endpoints: vec![memory_endpoint(name)],
        };
        let announce = factory
            .announce(
                address.clone(),
                node.address().clone(),
                serde_json::to_vec(&body).unwrap(),
            )
            .unwrap();
        transport
            .send(&announce.serialize(), &memory_endpoint("node-ttl-hub"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exhausted_route_request_is_dropped_not_rebroadcast() {
        let (hub, _hub_rx) = spawn_node("node-ttl-hub", Vec::new()).await;
        let factory = PacketFactory::new();

        // Two raw transports stand in for the hub's neighbors: one injects
        // the request, the other watches for a re-broadcast.
        let src_key = KeyPair::from_seed([21u8; 32]);
        let src_addr =
            Address::generate(&src_key, Some((40.6892, -74.0445)), AddressFlags::Unicast).unwrap();
        let (src_tx, _src_rx) = mpsc::channel(16);
        let mut src = MemoryTransport::new("node-ttl-src");
        src.start(src_tx).await.unwrap();

        let watch_key = KeyPair::from_seed([22u8; 32]);
        let watch_addr =
            Address::generate(&watch_key, Some((40.6892, -74.0445)), AddressFlags::Unicast)
                .unwrap();
        let (watch_tx, mut watch_rx) = mpsc::channel(16);
        let mut watch = MemoryTransport::new("node-ttl-watch");
        watch.start(watch_tx).await.unwrap();

        introduce(&src, &factory, &src_key, &src_addr, "node-ttl-src", &hub).await;
        introduce(&watch, &factory, &watch_key, &watch_addr, "node-ttl-watch", &hub).await;
        wait_for_peers(&hub, 2).await;

        // A last-hop request for an unknown destination must die at the hub.
        let ghost = stranger();
        let mut request = factory.route_request(src_addr.clone(), ghost.clone()).unwrap();
        request.header.ttl = 1;
        src.send(&request.serialize(), &memory_endpoint("node-ttl-hub"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        while let Ok(inbound) = watch_rx.try_recv() {
            let packet = Packet::deserialize(&inbound.frame).unwrap();
            assert_ne!(
                packet.header.packet_type,
                PacketType::RouteRequest,
                "exhausted request was re-broadcast"
            );
        }

        // With hop budget left the same request does reach the watcher.
        let request = factory.route_request(src_addr.clone(), ghost.clone()).unwrap();
        src.send(&request.serialize(), &memory_endpoint("node-ttl-hub"))
            .await
            .unwrap();
        let forwarded = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let inbound = watch_rx.recv().await.expect("watch channel closed");
                let packet = Packet::deserialize(&inbound.frame).unwrap();
                if packet.header.packet_type == PacketType::RouteRequest {
                    return packet;
                }
            }
        })
        .await
        .expect("request with budget left was not forwarded");
        assert_eq!(forwarded.header.destination.node_id, ghost.node_id);
        assert!(forwarded.header.ttl < MAX_TTL);

        src.stop().await.unwrap();
        watch.stop().await.unwrap();
        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_commands_fail_after() {
        let (handle, _rx) = spawn_node("node-stop", Vec::new()).await;
        handle.stop().await.unwrap();
        handle.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = handle
            .send(stranger(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::InvalidState(_)));
    }
}
