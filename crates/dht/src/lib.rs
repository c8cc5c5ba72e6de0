//! Kademlia-inspired DHT with a geo-weighted distance metric.
//!
//! The routing table keeps 128 k-buckets indexed by the XOR distance between
//! the local node id and the peer's, matching the 128-bit id space. Lookups,
//! however, sort by the locality-aware [`routing_distance`], where geography
//! dominates and cryptographic distance breaks ties. That is what makes the
//! mesh prefer nearby relays over numerically close strangers.

pub mod peer;
pub mod storage;

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use ipv7_core::types::{GEOHASH_SENTINEL, NODE_ID_LEN};
use ipv7_identity::{leading_zeros, xor_distance};
use ipv7_wire::{now_millis, routing_distance, Address, AddressFlags};

pub use peer::PeerInfo;
pub use storage::{StorageEntry, DEFAULT_STORAGE_TTL};

/// Maximum peers per bucket.
pub const K: usize = 20;

/// One bucket per possible leading-zero count of the XOR distance.
const NUM_BUCKETS: usize = 128;

/// Peers unseen for this long are reported by the sweep.
pub const PEER_STALE_AFTER: Duration = Duration::from_secs(300);

/// Number of peers that "own" a storage key.
pub const STORAGE_REPLICAS: usize = 3;

/// What a maintenance sweep found.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Storage entries purged because their TTL lapsed.
    pub expired_entries: usize,
    /// Peers unseen past the staleness window. The DHT does not evict them;
    /// liveness eviction belongs to the node's heartbeat bookkeeping.
    pub stale_peers: Vec<Address>,
}

#[derive(Debug, Default)]
struct Bucket {
    /// Ordered oldest-seen first; the tail is most recently seen.
    peers: Vec<PeerInfo>,
}

/// K-bucket peer table plus ephemeral storage.
#[derive(Debug)]
pub struct Dht {
    local: Address,
    buckets: Vec<Bucket>,
    entries: HashMap<Vec<u8>, StorageEntry>,
}

impl Dht {
    pub fn new(local: Address) -> Self {
        Self {
            local,
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::default()).collect(),
            entries: HashMap::new(),
        }
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Bucket index for a node id: leading zeros of the XOR distance,
    /// clamped to the last bucket.
    fn bucket_index(&self, node_id: &[u8; NODE_ID_LEN]) -> usize {
        let distance = xor_distance(&self.local.node_id, node_id);
        (leading_zeros(&distance) as usize).min(NUM_BUCKETS - 1)
    }

    /// Add or refresh a peer.
    ///
    /// An existing peer is updated in place and moved to the
    /// most-recently-seen position. A new peer is appended if the bucket has
    /// room; a full bucket rejects it and returns `false`. No eviction
    /// happens here.
    pub fn add_peer(&mut self, peer: PeerInfo) -> bool {
        if peer.address.node_id == self.local.node_id {
            return false;
        }
        let index = self.bucket_index(&peer.address.node_id);
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket
            .peers
            .iter()
            .position(|p| p.address.node_id == peer.address.node_id)
        {
            bucket.peers.remove(pos);
            bucket.peers.push(peer);
            return true;
        }

        if bucket.peers.len() < K {
            bucket.peers.push(peer);
            return true;
        }

        debug!(bucket = index, "bucket full, rejecting peer");
        false
    }

    /// Refresh a peer's liveness and MRU position. No-op for unknown peers.
    pub fn touch_peer(&mut self, node_id: &[u8; NODE_ID_LEN]) {
        let index = self.bucket_index(node_id);
        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket
            .peers
            .iter()
            .position(|p| p.address.node_id == *node_id)
        {
            let mut peer = bucket.peers.remove(pos);
            peer.touch();
            bucket.peers.push(peer);
        }
    }

    pub fn get_peer(&self, node_id: &[u8; NODE_ID_LEN]) -> Option<&PeerInfo> {
        let index = self.bucket_index(node_id);
        self.buckets[index]
            .peers
            .iter()
            .find(|p| p.address.node_id == *node_id)
    }

    pub fn get_peer_mut(&mut self, node_id: &[u8; NODE_ID_LEN]) -> Option<&mut PeerInfo> {
        let index = self.bucket_index(node_id);
        self.buckets[index]
            .peers
            .iter_mut()
            .find(|p| p.address.node_id == *node_id)
    }

    pub fn remove_peer(&mut self, node_id: &[u8; NODE_ID_LEN]) -> Option<PeerInfo> {
        let index = self.bucket_index(node_id);
        let bucket = &mut self.buckets[index];
        let pos = bucket
            .peers
            .iter()
            .position(|p| p.address.node_id == *node_id)?;
        Some(bucket.peers.remove(pos))
    }

    /// All known peers, bucket order.
    pub fn all_peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.buckets.iter().flat_map(|b| b.peers.iter())
    }

    pub fn peer_count(&self) -> usize {
        self.buckets.iter().map(|b| b.peers.len()).sum()
    }

    /// The `count` peers closest to `target` by the geo-weighted metric.
    ///
    /// Deliberately not a pure Kademlia XOR sort: geographic proximity
    /// dominates, node-id distance breaks ties.
    pub fn find_closest_peers(&self, target: &Address, count: usize) -> Vec<PeerInfo> {
        let mut peers: Vec<(f64, &PeerInfo)> = self
            .all_peers()
            .map(|p| (routing_distance(&p.address, target), p))
            .collect();
        peers.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        peers.into_iter().take(count).map(|(_, p)| p.clone()).collect()
    }

    /// Peers whose geohash starts with `prefix`.
    pub fn find_peers_by_geohash(&self, prefix: &str) -> Vec<PeerInfo> {
        self.all_peers()
            .filter(|p| p.address.geohash.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Store a value under a key with the default TTL.
    pub fn store(&mut self, key: Vec<u8>, value: Vec<u8>, publisher: Address, signature: Vec<u8>) {
        self.store_with_ttl(key, value, publisher, signature, DEFAULT_STORAGE_TTL);
    }

    /// Store a value under a key with an explicit TTL.
    pub fn store_with_ttl(
        &mut self,
        key: Vec<u8>,
        value: Vec<u8>,
        publisher: Address,
        signature: Vec<u8>,
        ttl: Duration,
    ) {
        let entry = StorageEntry {
            key: key.clone(),
            value,
            publisher,
            signature,
            stored_at: now_millis(),
            ttl_ms: ttl.as_millis() as u64,
        };
        self.entries.insert(key, entry);
    }

    /// Fetch a stored entry; expired entries read as absent.
    pub fn get(&self, key: &[u8]) -> Option<&StorageEntry> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(now_millis()))
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The peers that own a storage key, following the store-at-closest
    /// model: the first 16 bytes of the key act as a synthetic node id.
    pub fn storage_nodes(&self, key: &[u8]) -> Vec<PeerInfo> {
        let mut node_id = [0u8; NODE_ID_LEN];
        let take = key.len().min(NODE_ID_LEN);
        node_id[..take].copy_from_slice(&key[..take]);
        // from_parts only fails on a bad geohash; the sentinel is valid.
        let synthetic =
            Address::from_parts(AddressFlags::Unicast, GEOHASH_SENTINEL, node_id, None)
                .expect("sentinel geohash is always valid");
        self.find_closest_peers(&synthetic, STORAGE_REPLICAS)
    }

    /// Periodic maintenance: purge expired storage entries and report (but
    /// do not evict) peers that have gone quiet.
    pub fn sweep(&mut self) -> SweepReport {
        let now = now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let expired_entries = before - self.entries.len();

        let stale_ms = PEER_STALE_AFTER.as_millis() as u64;
        let stale_peers: Vec<Address> = self
            .all_peers()
            .filter(|p| now.saturating_sub(p.last_seen) > stale_ms)
            .map(|p| p.address.clone())
            .collect();

        if expired_entries > 0 || !stale_peers.is_empty() {
            debug!(
                expired = expired_entries,
                stale = stale_peers.len(),
                "dht sweep"
            );
        }

        SweepReport {
            expired_entries,
            stale_peers,
        }
    }
}
