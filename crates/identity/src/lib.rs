//! Identity and metric primitives for the ipv7 mesh.
//!
//! Keypairs and node-id derivation, the CRC-16 address checksum, XOR distance
//! helpers for the k-bucket space, and the geohash proximity encoding. All of
//! these are pure building blocks consumed by the wire codecs and the DHT.

pub mod checksum;
pub mod distance;
pub mod geohash;
pub mod keys;

pub use checksum::crc16;
pub use distance::{leading_zeros, mean_byte_xor, xor_distance};
pub use geohash::{common_prefix_length, encode, GeohashError};
pub use keys::{derive_node_id, verify, KeyPair, PublicKeyBytes};
