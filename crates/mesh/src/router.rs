//! Proximity-aware route table with passive learning and on-demand discovery.
//!
//! The router holds state only. Route-request and route-reply processing
//! return actions describing what to transmit; the node owns the sockets and
//! executes them. Discovery waiters are `oneshot` senders resolved when a
//! reply installs a usable route, or dropped by the sweep when the deadline
//! passes.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};

use ipv7_core::types::{TransportKind, NODE_ID_LEN};
use ipv7_wire::{decode_hops, now_millis, Address, Packet, WireError};

/// Routes unused for this long fall out of the table.
pub const ROUTE_TTL: Duration = Duration::from_secs(300);

/// One learned or discovered path to a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: Address,
    pub next_hop: Address,
    /// Path cost; hop count for discovered routes, 1.0 for direct neighbors.
    pub metric: f64,
    pub hop_count: u8,
    pub interface: TransportKind,
    /// Expiry instant, milliseconds since the Unix epoch.
    pub expires_at: u64,
}

impl RouteEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// What to do with an inbound route request.
#[derive(Debug)]
pub enum RouteRequestAction {
    /// This node can answer: send a route reply carrying `hops` back to the
    /// requester.
    Reply { hops: Vec<Address> },
    /// No answer here: append self to `hops` and re-broadcast with a
    /// decremented TTL.
    Forward { hops: Vec<Address> },
}

#[derive(Debug)]
struct PendingDiscovery {
    waiters: Vec<oneshot::Sender<RouteEntry>>,
    deadline: u64,
}

/// Result of a maintenance sweep.
#[derive(Debug, Default)]
pub struct RouterSweep {
    pub expired_routes: usize,
    /// Destinations whose discovery deadline passed this sweep. Their
    /// waiters were dropped, which the requester observes as a timeout.
    pub timed_out: Vec<[u8; NODE_ID_LEN]>,
}

/// Per-destination candidate routes plus the pending-discovery table.
#[derive(Debug)]
pub struct Router {
    local: Address,
    routes: HashMap<[u8; NODE_ID_LEN], Vec<RouteEntry>>,
    pending: HashMap<[u8; NODE_ID_LEN], PendingDiscovery>,
}

impl Router {
    pub fn new(local: Address) -> Self {
        Self {
            local,
            routes: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Install or refresh a candidate route. A candidate with the same next
    /// hop is replaced; others are kept as alternatives.
    pub fn install(&mut self, entry: RouteEntry) {
        if entry.destination.node_id == self.local.node_id {
            return;
        }
        let candidates = self.routes.entry(entry.destination.node_id).or_default();
        if let Some(existing) = candidates
            .iter_mut()
            .find(|c| c.next_hop.node_id == entry.next_hop.node_id)
        {
            *existing = entry;
        } else {
            candidates.push(entry);
        }
    }

    /// Passive learning: every inbound packet proves a one-hop path to its
    /// declared source via whoever handed it to us.
    pub fn learn_route(&mut self, source: &Address, received_from: &Address, interface: TransportKind) {
        trace!(
            source = %source,
            via = %received_from,
            "learning route"
        );
        self.install(RouteEntry {
            destination: source.clone(),
            next_hop: received_from.clone(),
            metric: 1.0,
            hop_count: 1,
            interface,
            expires_at: now_millis() + ROUTE_TTL.as_millis() as u64,
        });
    }

    /// Best non-expired route to a destination, if any.
    pub fn find_route(&self, destination: &[u8; NODE_ID_LEN]) -> Option<&RouteEntry> {
        let now = now_millis();
        self.routes
            .get(destination)?
            .iter()
            .filter(|r| !r.is_expired(now))
            .min_by(|a, b| {
                a.metric
                    .partial_cmp(&b.metric)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Like [`find_route`](Self::find_route) but refreshes the winner's
    /// expiry, so routes in active use never age out.
    pub fn use_route(&mut self, destination: &[u8; NODE_ID_LEN]) -> Option<RouteEntry> {
        let now = now_millis();
        let candidates = self.routes.get_mut(destination)?;
        let best = candidates
            .iter_mut()
            .filter(|r| !r.is_expired(now))
            .min_by(|a, b| {
                a.metric
                    .partial_cmp(&b.metric)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        best.expires_at = now + ROUTE_TTL.as_millis() as u64;
        Some(best.clone())
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(|c| c.len()).sum()
    }

    /// Every candidate route in the table, expired ones included.
    pub fn all_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values().flat_map(|c| c.iter())
    }

    /// Purge every route whose next hop is the vanished peer.
    pub fn handle_peer_disconnect(&mut self, peer: &[u8; NODE_ID_LEN]) {
        self.routes.retain(|_, candidates| {
            candidates.retain(|r| r.next_hop.node_id != *peer);
            !candidates.is_empty()
        });
    }

    /// Register interest in a route to `destination`.
    ///
    /// Returns the waiter and whether this created a new pending entry. The
    /// caller broadcasts route requests only when the entry is new; joiners
    /// piggyback on the request already in flight.
    pub fn begin_discovery(
        &mut self,
        destination: [u8; NODE_ID_LEN],
        timeout: Duration,
    ) -> (oneshot::Receiver<RouteEntry>, bool) {
        let (tx, rx) = oneshot::channel();
        let deadline = now_millis() + timeout.as_millis() as u64;
        match self.pending.get_mut(&destination) {
            Some(pending) => {
                pending.waiters.push(tx);
                pending.deadline = pending.deadline.max(deadline);
                (rx, false)
            }
            None => {
                self.pending.insert(
                    destination,
                    PendingDiscovery {
                        waiters: vec![tx],
                        deadline,
                    },
                );
                (rx, true)
            }
        }
    }

    /// Decide how to handle an inbound route request.
    ///
    /// The request payload carries the hop list accumulated so far. The
    /// destination answers with that list as-is; a node holding a fresh
    /// route answers with itself and the destination appended, so the
    /// requester still learns a complete path. Anyone else forwards.
    pub fn process_route_request(&self, packet: &Packet) -> Result<RouteRequestAction, WireError> {
        let hops = decode_hops(&packet.payload)?;
        let destination = &packet.header.destination;

        if destination.node_id == self.local.node_id {
            return Ok(RouteRequestAction::Reply { hops });
        }

        if self.find_route(&destination.node_id).is_some() {
            let mut hops = hops;
            hops.push(self.local.clone());
            hops.push(destination.clone());
            return Ok(RouteRequestAction::Reply { hops });
        }

        let mut hops = hops;
        hops.push(self.local.clone());
        Ok(RouteRequestAction::Forward { hops })
    }

    /// Install routes from a route reply and resolve matching discoveries.
    ///
    /// Reverse-path learning: every node the reply passes through runs this,
    /// so the whole return path caches routes to each listed hop and to the
    /// replier, all via the peer that delivered the reply.
    pub fn process_route_reply(
        &mut self,
        packet: &Packet,
        received_from: &Address,
        interface: TransportKind,
    ) -> Result<(), WireError> {
        let mut hops = decode_hops(&packet.payload)?;
        let replier = &packet.header.source;
        if !hops.iter().any(|h| h.node_id == replier.node_id) {
            hops.push(replier.clone());
        }

        let now = now_millis();
        for (index, hop) in hops.iter().enumerate() {
            if hop.node_id == self.local.node_id {
                continue;
            }
            let metric = (index + 1) as f64;
            self.install(RouteEntry {
                destination: hop.clone(),
                next_hop: received_from.clone(),
                metric,
                hop_count: (index + 1).min(u8::MAX as usize) as u8,
                interface,
                expires_at: now + ROUTE_TTL.as_millis() as u64,
            });
        }

        self.resolve_pending();
        Ok(())
    }

    /// Wake every waiter whose destination now has a usable route.
    fn resolve_pending(&mut self) {
        let ready: Vec<[u8; NODE_ID_LEN]> = self
            .pending
            .keys()
            .filter(|dest| self.find_route(dest).is_some())
            .copied()
            .collect();
        for destination in ready {
            if let Some(pending) = self.pending.remove(&destination) {
                if let Some(route) = self.use_route(&destination) {
                    debug!(destination = %route.destination, "route discovery resolved");
                    for waiter in pending.waiters {
                        // A waiter that gave up is not an error.
                        let _ = waiter.send(route.clone());
                    }
                }
            }
        }
    }

    /// Prune expired routes and expire overdue discoveries.
    pub fn sweep(&mut self) -> RouterSweep {
        let now = now_millis();
        let before = self.route_count();
        self.routes.retain(|_, candidates| {
            candidates.retain(|r| !r.is_expired(now));
            !candidates.is_empty()
        });
        let expired_routes = before - self.route_count();

        let mut timed_out = Vec::new();
        self.pending.retain(|destination, pending| {
            if now >= pending.deadline {
                timed_out.push(*destination);
                false
            } else {
                true
            }
        });

        if expired_routes > 0 || !timed_out.is_empty() {
            debug!(
                expired = expired_routes,
                timed_out = timed_out.len(),
                "router sweep"
            );
        }

        RouterSweep {
            expired_routes,
            timed_out,
        }
    }
}
