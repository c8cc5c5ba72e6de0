//! Binary wire formats for the ipv7 mesh.
//!
//! Two codecs live here: the 32-byte geographically-aware address and the
//! variable-length packet (fixed header, TLV extensions, payload). Both are
//! hand-packed fixed layouts; nothing on the wire is produced by a generic
//! serializer.

pub mod address;
pub mod error;
pub mod packet;

pub use address::{routing_distance, Address, AddressFlags, ADDRESS_SIZE};
pub use error::WireError;
pub use packet::{
    decode_hops, encode_hops, now_millis, Extension, Packet, PacketFactory, PacketHeader,
    PacketType, SequenceCounter, ANNOUNCE_TTL, DEFAULT_MAX_AGE, DEFAULT_TTL, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, MAX_TTL,
};
