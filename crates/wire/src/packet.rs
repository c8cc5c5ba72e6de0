//! Packet header, extensions, and payload codec.
//!
//! Header layout (big-endian multi-byte fields):
//!
//! ```text
//! byte  0       version
//! byte  1       packet type
//! bytes 2-3     flags
//! byte  4       ttl
//! bytes 5-7     flow label
//! bytes 8-11    payload length
//! bytes 12-43   source address
//! bytes 44-75   destination address
//! bytes 76-79   sequence number
//! bytes 80-87   timestamp, milliseconds
//! ```
//!
//! Extension TLVs sit between the header and the payload; the payload
//! occupies the trailing `payload_length` bytes of the buffer.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ipv7_core::types::{MAX_PACKET_SIZE, PROTOCOL_VERSION};

use crate::address::{Address, ADDRESS_SIZE};
use crate::error::WireError;

/// Fixed header size in bytes, derived from the field layout.
pub const HEADER_SIZE: usize = 12 + 2 * ADDRESS_SIZE + 4 + 8;

/// Largest payload a single packet can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Default hop budget for data packets.
pub const DEFAULT_TTL: u8 = 32;

/// Hop budget ceiling, used by route discovery.
pub const MAX_TTL: u8 = 64;

/// Hop budget for announce floods, deliberately small.
pub const ANNOUNCE_TTL: u8 = 4;

/// Default freshness window for [`Packet::is_expired`].
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

/// Packet type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    Data = 0,
    Control = 1,
    RouteRequest = 2,
    RouteReply = 3,
    Announce = 4,
    Heartbeat = 5,
    Error = 6,
    Ack = 7,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Control),
            2 => Ok(PacketType::RouteRequest),
            3 => Ok(PacketType::RouteReply),
            4 => Ok(PacketType::Announce),
            5 => Ok(PacketType::Heartbeat),
            6 => Ok(PacketType::Error),
            7 => Ok(PacketType::Ack),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

/// Fixed packet header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub flags: u16,
    pub ttl: u8,
    pub flow_label: [u8; 3],
    pub payload_length: u32,
    pub source: Address,
    pub destination: Address,
    pub sequence: u32,
    pub timestamp: u64,
}

impl PacketHeader {
    /// Spend one hop of the TTL budget.
    ///
    /// Returns `false` when the budget is exhausted and the packet must be
    /// dropped instead of forwarded. This is the sole loop and flood
    /// prevention mechanism in the mesh.
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl <= 1 {
            return false;
        }
        self.ttl -= 1;
        true
    }
}

/// Extension TLV carried between header and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub ext_type: u8,
    pub data: Vec<u8>,
}

/// A complete packet: header, extensions, payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub extensions: Vec<Extension>,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialize header, extensions, and payload into one buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let ext_len: usize = self.extensions.iter().map(|e| 4 + e.data.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_SIZE + ext_len + self.payload.len());

        let h = &self.header;
        buf.push(h.version);
        buf.push(h.packet_type as u8);
        buf.extend_from_slice(&h.flags.to_be_bytes());
        buf.push(h.ttl);
        buf.extend_from_slice(&h.flow_label);
        buf.extend_from_slice(&h.payload_length.to_be_bytes());
        buf.extend_from_slice(&h.source.serialize());
        buf.extend_from_slice(&h.destination.serialize());
        buf.extend_from_slice(&h.sequence.to_be_bytes());
        buf.extend_from_slice(&h.timestamp.to_be_bytes());

        for ext in &self.extensions {
            buf.push(ext.ext_type);
            buf.push(0); // reserved
            buf.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
            buf.extend_from_slice(&ext.data);
        }

        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialize a packet from a buffer.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::BufferTooShort {
                need: HEADER_SIZE,
                have: buf.len(),
            });
        }

        let version = buf[0];
        let packet_type = PacketType::try_from(buf[1])?;
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let ttl = buf[4];
        let flow_label = [buf[5], buf[6], buf[7]];
        let payload_length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let source = Address::deserialize(&buf[12..12 + ADDRESS_SIZE])?;
        source.verify()?;
        let destination = Address::deserialize(&buf[12 + ADDRESS_SIZE..12 + 2 * ADDRESS_SIZE])?;
        destination.verify()?;
        let seq_off = 12 + 2 * ADDRESS_SIZE;
        let sequence = u32::from_be_bytes([
            buf[seq_off],
            buf[seq_off + 1],
            buf[seq_off + 2],
            buf[seq_off + 3],
        ]);
        let ts_off = seq_off + 4;
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&buf[ts_off..ts_off + 8]);
        let timestamp = u64::from_be_bytes(ts_bytes);

        let declared = payload_length as usize;
        let available = buf.len() - HEADER_SIZE;
        if declared > available {
            return Err(WireError::TruncatedPayload {
                declared,
                available,
            });
        }

        // Extensions run from the end of the header to the payload boundary.
        let payload_start = buf.len() - declared;
        let mut extensions = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < payload_start {
            if payload_start - offset < 4 {
                return Err(WireError::MalformedExtension(offset));
            }
            let ext_type = buf[offset];
            let len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            if offset + 4 + len > payload_start {
                return Err(WireError::MalformedExtension(offset));
            }
            extensions.push(Extension {
                ext_type,
                data: buf[offset + 4..offset + 4 + len].to_vec(),
            });
            offset += 4 + len;
        }

        Ok(Self {
            header: PacketHeader {
                version,
                packet_type,
                flags,
                ttl,
                flow_label,
                payload_length,
                source,
                destination,
                sequence,
                timestamp,
            },
            extensions,
            payload: buf[payload_start..].to_vec(),
        })
    }

    /// True when the embedded timestamp is older than `max_age`.
    ///
    /// Used to discard stale discovery traffic replayed or delayed in the
    /// mesh.
    pub fn is_expired(&self, max_age: Duration) -> bool {
        let now = now_millis();
        now.saturating_sub(self.header.timestamp) > max_age.as_millis() as u64
    }
}

/// Encode a hop list as concatenated serialized addresses.
pub fn encode_hops(hops: &[Address]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(hops.len() * ADDRESS_SIZE);
    for hop in hops {
        buf.extend_from_slice(&hop.serialize());
    }
    buf
}

/// Decode a hop list from a route-request or route-reply payload.
pub fn decode_hops(payload: &[u8]) -> Result<Vec<Address>, WireError> {
    if payload.len() % ADDRESS_SIZE != 0 {
        return Err(WireError::BufferTooShort {
            need: (payload.len() / ADDRESS_SIZE + 1) * ADDRESS_SIZE,
            have: payload.len(),
        });
    }
    payload
        .chunks_exact(ADDRESS_SIZE)
        .map(Address::deserialize)
        .collect()
}

/// Monotonically increasing sequence number source.
///
/// Owned by each node's [`PacketFactory`] rather than being process-global,
/// so multi-node harnesses in one process cannot collide.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Per-node packet constructor holding the sequence counter.
#[derive(Debug, Default)]
pub struct PacketFactory {
    sequence: SequenceCounter,
}

impl PacketFactory {
    pub fn new() -> Self {
        Self {
            sequence: SequenceCounter::new(),
        }
    }

    fn build(
        &self,
        packet_type: PacketType,
        source: Address,
        destination: Address,
        payload: Vec<u8>,
        ttl: u8,
    ) -> Result<Packet, WireError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Packet {
            header: PacketHeader {
                version: PROTOCOL_VERSION,
                packet_type,
                flags: 0,
                ttl,
                flow_label: [0; 3],
                payload_length: payload.len() as u32,
                source,
                destination,
                sequence: self.sequence.next(),
                timestamp: now_millis(),
            },
            extensions: Vec::new(),
            payload,
        })
    }

    /// Application data packet, default TTL.
    pub fn data(
        &self,
        source: Address,
        destination: Address,
        payload: Vec<u8>,
    ) -> Result<Packet, WireError> {
        self.build(PacketType::Data, source, destination, payload, DEFAULT_TTL)
    }

    /// Route request: empty hop list, maximum TTL so discovery can reach far.
    pub fn route_request(&self, source: Address, destination: Address) -> Result<Packet, WireError> {
        self.build(
            PacketType::RouteRequest,
            source,
            destination,
            Vec::new(),
            MAX_TTL,
        )
    }

    /// Route reply carrying the traversed hop list back to the requester.
    pub fn route_reply(
        &self,
        source: Address,
        destination: Address,
        hops: &[Address],
    ) -> Result<Packet, WireError> {
        self.build(
            PacketType::RouteReply,
            source,
            destination,
            encode_hops(hops),
            MAX_TTL,
        )
    }

    /// Capability announcement to a broadcast address, flood-limited.
    pub fn announce(
        &self,
        source: Address,
        broadcast: Address,
        payload: Vec<u8>,
    ) -> Result<Packet, WireError> {
        self.build(PacketType::Announce, source, broadcast, payload, ANNOUNCE_TTL)
    }

    /// Point-to-point liveness probe; never forwarded.
    pub fn heartbeat(&self, source: Address, destination: Address) -> Result<Packet, WireError> {
        self.build(PacketType::Heartbeat, source, destination, Vec::new(), 1)
    }

    /// Acknowledgment of a received sequence number. Reserved for future use.
    pub fn ack(
        &self,
        source: Address,
        destination: Address,
        acked_sequence: u32,
    ) -> Result<Packet, WireError> {
        self.build(
            PacketType::Ack,
            source,
            destination,
            acked_sequence.to_be_bytes().to_vec(),
            DEFAULT_TTL,
        )
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
