//! The 32-byte geographically-aware address and its codecs.
//!
//! Binary layout:
//!
//! ```text
//! byte  0      version (high nibble) | flags (low nibble)
//! bytes 1-4    geohash, ASCII
//! bytes 5-20   node id (16 bytes)
//! bytes 21-22  CRC-16 checksum, big-endian
//! bytes 23-24  port, big-endian, 0 = unset
//! bytes 25-31  reserved, zero
//! ```
//!
//! Text form: `ipv7:<4-char-geohash>:<32-hex-char-nodeId>[:port]`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use ipv7_core::types::{GEOHASH_LEN, GEOHASH_SENTINEL, NODE_ID_LEN, PROTOCOL_VERSION};
use ipv7_identity::{common_prefix_length, crc16, encode, mean_byte_xor, KeyPair};

use crate::error::WireError;

/// Serialized address size in bytes.
pub const ADDRESS_SIZE: usize = 32;

const TEXT_PREFIX: &str = "ipv7:";

/// Delivery semantics encoded in the address flags nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFlags {
    Unicast = 0,
    Multicast = 1,
    Anycast = 2,
    Broadcast = 3,
    Reserved = 4,
}

impl TryFrom<u8> for AddressFlags {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(AddressFlags::Unicast),
            1 => Ok(AddressFlags::Multicast),
            2 => Ok(AddressFlags::Anycast),
            3 => Ok(AddressFlags::Broadcast),
            4 => Ok(AddressFlags::Reserved),
            other => Err(WireError::UnknownFlags(other)),
        }
    }
}

/// A node address: cryptographically derived identity plus coarse location.
///
/// Created once at startup from the node's keypair and optional location,
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub version: u8,
    pub flags: AddressFlags,
    pub geohash: String,
    pub node_id: [u8; NODE_ID_LEN],
    pub checksum: u16,
    pub port: Option<u16>,
}

impl Address {
    /// Derive an address from a keypair and optional location.
    pub fn generate(
        keypair: &KeyPair,
        location: Option<(f64, f64)>,
        flags: AddressFlags,
    ) -> Result<Self, WireError> {
        let geohash = match location {
            Some((lat, lon)) => encode(lat, lon, GEOHASH_LEN)
                .map_err(|e| WireError::InvalidGeohash(e.to_string()))?,
            None => GEOHASH_SENTINEL.to_string(),
        };
        Ok(Self::assemble(flags, geohash, keypair.node_id(), None))
    }

    /// Build an address from parts, computing the checksum.
    fn assemble(
        flags: AddressFlags,
        geohash: String,
        node_id: [u8; NODE_ID_LEN],
        port: Option<u16>,
    ) -> Self {
        let checksum = compute_checksum(PROTOCOL_VERSION, flags, &geohash, &node_id);
        Self {
            version: PROTOCOL_VERSION,
            flags,
            geohash,
            node_id,
            checksum,
            port,
        }
    }

    /// Build an address from explicit parts, computing the checksum.
    ///
    /// Used for synthetic lookup keys and test fixtures; `generate` is the
    /// path for real node identities.
    pub fn from_parts(
        flags: AddressFlags,
        geohash: &str,
        node_id: [u8; NODE_ID_LEN],
        port: Option<u16>,
    ) -> Result<Self, WireError> {
        if geohash.len() != GEOHASH_LEN || !geohash.is_ascii() {
            return Err(WireError::InvalidGeohash(geohash.to_string()));
        }
        Ok(Self::assemble(flags, geohash.to_string(), node_id, port))
    }

    /// Broadcast address covering a geographic area.
    ///
    /// The area may be shorter than four characters; it is padded with `'0'`
    /// and the padding is stripped again when matching.
    pub fn broadcast(geo_area: &str) -> Result<Self, WireError> {
        if geo_area.len() > GEOHASH_LEN || !geo_area.is_ascii() {
            return Err(WireError::InvalidGeohash(geo_area.to_string()));
        }
        let mut geohash = geo_area.to_string();
        while geohash.len() < GEOHASH_LEN {
            geohash.push('0');
        }
        Ok(Self::assemble(
            AddressFlags::Broadcast,
            geohash,
            [0xFF; NODE_ID_LEN],
            None,
        ))
    }

    /// True when this address falls inside the broadcast address's area.
    pub fn matches_broadcast(&self, broadcast: &Address) -> bool {
        if broadcast.flags != AddressFlags::Broadcast {
            return false;
        }
        let area = broadcast.geohash.trim_end_matches('0');
        self.geohash.starts_with(area)
    }

    /// Validate structure and checksum.
    ///
    /// The checksum is always recomputed; a stored checksum is never trusted.
    pub fn validate(&self) -> bool {
        self.verify().is_ok()
    }

    /// Like [`Address::validate`] but reports what failed. Called on both
    /// addresses of every deserialized packet.
    pub fn verify(&self) -> Result<(), WireError> {
        if self.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        if self.geohash.len() != GEOHASH_LEN {
            return Err(WireError::InvalidGeohash(self.geohash.clone()));
        }
        let computed = compute_checksum(self.version, self.flags, &self.geohash, &self.node_id);
        if self.checksum != computed {
            return Err(WireError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Serialize into the fixed 32-byte layout.
    pub fn serialize(&self) -> [u8; ADDRESS_SIZE] {
        let mut buf = [0u8; ADDRESS_SIZE];
        buf[0] = (self.version << 4) | (self.flags as u8);
        buf[1..5].copy_from_slice(self.geohash.as_bytes());
        buf[5..21].copy_from_slice(&self.node_id);
        buf[21..23].copy_from_slice(&self.checksum.to_be_bytes());
        buf[23..25].copy_from_slice(&self.port.unwrap_or(0).to_be_bytes());
        buf
    }

    /// Deserialize from the fixed 32-byte layout.
    ///
    /// Checks structure only; callers that care about integrity follow up
    /// with [`Address::verify`].
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < ADDRESS_SIZE {
            return Err(WireError::BufferTooShort {
                need: ADDRESS_SIZE,
                have: buf.len(),
            });
        }
        let version = buf[0] >> 4;
        let flags = AddressFlags::try_from(buf[0] & 0x0F)?;
        let geohash = std::str::from_utf8(&buf[1..5])
            .map_err(|_| WireError::InvalidGeohash(hex::encode(&buf[1..5])))?
            .to_string();
        let mut node_id = [0u8; NODE_ID_LEN];
        node_id.copy_from_slice(&buf[5..21]);
        let checksum = u16::from_be_bytes([buf[21], buf[22]]);
        let port = match u16::from_be_bytes([buf[23], buf[24]]) {
            0 => None,
            p => Some(p),
        };
        Ok(Self {
            version,
            flags,
            geohash,
            node_id,
            checksum,
            port,
        })
    }

    /// Parse the `ipv7:` text form.
    ///
    /// The checksum is recomputed from the parsed fields, never taken from
    /// the string.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        let rest = s
            .strip_prefix(TEXT_PREFIX)
            .ok_or_else(|| WireError::InvalidPrefix(s.chars().take(8).collect()))?;

        let mut parts = rest.split(':');
        let geohash = parts.next().unwrap_or("");
        if geohash.len() != GEOHASH_LEN {
            return Err(WireError::InvalidGeohash(geohash.to_string()));
        }

        let node_id_hex = parts
            .next()
            .ok_or_else(|| WireError::InvalidNodeId(String::new()))?;
        if node_id_hex.len() != NODE_ID_LEN * 2 {
            return Err(WireError::InvalidNodeId(node_id_hex.to_string()));
        }
        let node_id_bytes = hex::decode(node_id_hex)
            .map_err(|_| WireError::InvalidNodeId(node_id_hex.to_string()))?;
        let mut node_id = [0u8; NODE_ID_LEN];
        node_id.copy_from_slice(&node_id_bytes);

        let port = match parts.next() {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| WireError::InvalidPort(p.to_string()))?,
            ),
            None => None,
        };

        Ok(Self::assemble(
            AddressFlags::Unicast,
            geohash.to_string(),
            node_id,
            port,
        ))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}:{}", TEXT_PREFIX, self.geohash, hex::encode(self.node_id))?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, WireError> {
        Address::parse(s)
    }
}

/// Checksum over version, flags, geohash, and node id.
fn compute_checksum(
    version: u8,
    flags: AddressFlags,
    geohash: &str,
    node_id: &[u8; NODE_ID_LEN],
) -> u16 {
    let mut data = Vec::with_capacity(2 + GEOHASH_LEN + NODE_ID_LEN);
    data.push(version);
    data.push(flags as u8);
    data.extend_from_slice(geohash.as_bytes());
    data.extend_from_slice(node_id);
    crc16(&data)
}

/// Locality-aware distance between two addresses, 0.0..=1.0.
///
/// Geographic proximity dominates (weight 0.7); the mean byte XOR of the two
/// node ids is only the tiebreaker (weight 0.3). This is what turns the
/// lookup into a geo-first search instead of pure XOR-metric Kademlia.
pub fn routing_distance(a: &Address, b: &Address) -> f64 {
    let prefix = common_prefix_length(&a.geohash, &b.geohash).min(GEOHASH_LEN);
    let geo = 1.0 - prefix as f64 / GEOHASH_LEN as f64;
    let id = mean_byte_xor(&a.node_id, &b.node_id);
    geo * 0.7 + id * 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_address() -> Address {
        let keypair = KeyPair::from_seed([3u8; 32]);
        Address::generate(&keypair, Some((40.6892, -74.0445)), AddressFlags::Unicast).unwrap()
    }

    #[test]
    fn generated_address_validates() {
        let addr = test_address();
        assert_eq!(addr.version, PROTOCOL_VERSION);
        assert_eq!(addr.geohash.len(), GEOHASH_LEN);
        assert!(addr.validate());
    }

    #[test]
    fn no_location_uses_sentinel() {
        let keypair = KeyPair::from_seed([4u8; 32]);
        let addr = Address::generate(&keypair, None, AddressFlags::Unicast).unwrap();
        assert_eq!(addr.geohash, GEOHASH_SENTINEL);
        assert!(addr.validate());
    }

    #[test]
    fn serialize_roundtrip() {
        let mut addr = test_address();
        addr.port = Some(4807);
        let buf = addr.serialize();
        assert_eq!(buf.len(), ADDRESS_SIZE);
        let back = Address::deserialize(&buf).unwrap();
        assert_eq!(addr, back);
        assert!(back.validate());
    }

    #[test]
    fn reserved_tail_is_zero() {
        let buf = test_address().serialize();
        assert!(buf[25..].iter().all(|&b| b == 0));
    }

    #[test]
    fn deserialize_rejects_short_buffer() {
        let err = Address::deserialize(&[0u8; 16]).unwrap_err();
        assert_eq!(err, WireError::BufferTooShort { need: 32, have: 16 });
    }

    #[test]
    fn checksum_flip_fails_validation() {
        let mut addr = test_address();
        addr.checksum ^= 0x0100; // flip one bit in the high byte
        assert!(!addr.validate());
        let mut addr = test_address();
        addr.checksum ^= 0x0001; // and the low byte
        assert!(!addr.validate());
    }

    #[test]
    fn verify_reports_checksum_mismatch() {
        let mut addr = test_address();
        addr.checksum ^= 0x0100;
        let err = addr.verify().unwrap_err();
        assert!(matches!(err, WireError::ChecksumMismatch { .. }));
    }

    #[test]
    fn verify_rejects_wrong_version() {
        let mut buf = test_address().serialize();
        buf[0] = (6 << 4) | (buf[0] & 0x0F);
        let addr = Address::deserialize(&buf).unwrap();
        assert_eq!(addr.verify().unwrap_err(), WireError::UnsupportedVersion(6));
        assert!(!addr.validate());
    }

    #[test]
    fn text_roundtrip_recovers_fields() {
        let mut addr = test_address();
        addr.port = Some(9000);
        let text = addr.to_string();
        assert!(text.starts_with("ipv7:"));
        let parsed: Address = text.parse().unwrap();
        assert_eq!(parsed.geohash, addr.geohash);
        assert_eq!(parsed.node_id, addr.node_id);
        assert_eq!(parsed.port, Some(9000));
        assert!(parsed.validate());
    }

    #[test]
    fn parse_rejects_bad_prefix() {
        assert!(matches!(
            Address::parse("ipv6:dr5r:00000000000000000000000000000000"),
            Err(WireError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_geohash_length() {
        assert!(matches!(
            Address::parse("ipv7:dr5:00000000000000000000000000000000"),
            Err(WireError::InvalidGeohash(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_node_id() {
        assert!(matches!(
            Address::parse("ipv7:dr5r:0000"),
            Err(WireError::InvalidNodeId(_))
        ));
        assert!(matches!(
            Address::parse("ipv7:dr5r:zz000000000000000000000000000000"),
            Err(WireError::InvalidNodeId(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_port() {
        assert!(matches!(
            Address::parse("ipv7:dr5r:00000000000000000000000000000000:70000"),
            Err(WireError::InvalidPort(_))
        ));
    }

    #[test]
    fn distance_to_self_is_zero() {
        let addr = test_address();
        assert_eq!(routing_distance(&addr, &addr), 0.0);
    }

    #[test]
    fn one_bit_id_difference_beats_many_bits() {
        let base = test_address();
        let mut close = base.clone();
        close.node_id[15] ^= 0x01;
        let mut far = base.clone();
        for byte in far.node_id.iter_mut() {
            *byte ^= 0xA5;
        }
        assert!(routing_distance(&base, &close) < routing_distance(&base, &far));
    }

    #[test]
    fn geography_dominates_node_id() {
        let base = test_address();
        // Same geohash, completely different id.
        let mut same_area = base.clone();
        for byte in same_area.node_id.iter_mut() {
            *byte = !*byte;
        }
        // Different geohash, identical id.
        let mut far_area = base.clone();
        far_area.geohash = "u4pr".to_string();
        assert!(
            routing_distance(&base, &same_area) < routing_distance(&base, &far_area),
            "a far-away node with a similar id must not beat a local one"
        );
    }

    #[test]
    fn broadcast_matching() {
        let broadcast = Address::broadcast("dp3w").unwrap();
        assert_eq!(broadcast.node_id, [0xFF; NODE_ID_LEN]);
        assert_eq!(broadcast.flags, AddressFlags::Broadcast);

        let mut in_area = test_address();
        in_area.geohash = "dp3w".to_string();
        assert!(in_area.matches_broadcast(&broadcast));

        let mut outside = test_address();
        outside.geohash = "dp2x".to_string();
        assert!(!outside.matches_broadcast(&broadcast));
    }

    #[test]
    fn short_broadcast_area_pads_and_strips() {
        let broadcast = Address::broadcast("dp").unwrap();
        assert_eq!(broadcast.geohash, "dp00");

        let mut in_area = test_address();
        in_area.geohash = "dp3w".to_string();
        assert!(in_area.matches_broadcast(&broadcast));
    }

    #[test]
    fn unicast_address_never_matches_as_broadcast() {
        let plain = test_address();
        let other = test_address();
        assert!(!plain.matches_broadcast(&other));
    }

    proptest! {
        #[test]
        fn serialize_roundtrip_any_fields(
            node_id in prop::array::uniform16(any::<u8>()),
            port in any::<u16>(),
            flags in 0u8..=4,
        ) {
            let addr = Address::assemble(
                AddressFlags::try_from(flags).unwrap(),
                "dr5r".to_string(),
                node_id,
                if port == 0 { None } else { Some(port) },
            );
            let back = Address::deserialize(&addr.serialize()).unwrap();
            prop_assert_eq!(addr, back);
        }
    }
}
