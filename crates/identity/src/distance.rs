//! XOR distance helpers over the 128-bit node-id space.

use ipv7_core::types::NODE_ID_LEN;

/// Byte-wise XOR of two node ids.
pub fn xor_distance(a: &[u8; NODE_ID_LEN], b: &[u8; NODE_ID_LEN]) -> [u8; NODE_ID_LEN] {
    let mut out = [0u8; NODE_ID_LEN];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = a[i] ^ b[i];
    }
    out
}

/// Number of leading zero bits in a distance, 0..=128.
///
/// 128 means the two ids were identical.
pub fn leading_zeros(distance: &[u8; NODE_ID_LEN]) -> u32 {
    let mut zeros = 0u32;
    for &byte in distance {
        if byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Mean of the per-byte XOR values, normalized into 0.0..=1.0.
///
/// Used as the cryptographic tiebreaker component of the routing distance.
pub fn mean_byte_xor(a: &[u8; NODE_ID_LEN], b: &[u8; NODE_ID_LEN]) -> f64 {
    let sum: u32 = a.iter().zip(b.iter()).map(|(x, y)| (x ^ y) as u32).sum();
    sum as f64 / NODE_ID_LEN as f64 / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_of_identical_ids_is_zero() {
        let id = [0xAB; NODE_ID_LEN];
        assert_eq!(xor_distance(&id, &id), [0u8; NODE_ID_LEN]);
    }

    #[test]
    fn leading_zeros_spans_full_range() {
        assert_eq!(leading_zeros(&[0u8; NODE_ID_LEN]), 128);

        let mut high = [0u8; NODE_ID_LEN];
        high[0] = 0x80;
        assert_eq!(leading_zeros(&high), 0);

        let mut low = [0u8; NODE_ID_LEN];
        low[NODE_ID_LEN - 1] = 1;
        assert_eq!(leading_zeros(&low), 127);
    }

    #[test]
    fn mean_byte_xor_is_normalized() {
        let zero = [0u8; NODE_ID_LEN];
        let ones = [0xFF; NODE_ID_LEN];
        assert_eq!(mean_byte_xor(&zero, &zero), 0.0);
        assert!((mean_byte_xor(&zero, &ones) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn one_bit_difference_is_small() {
        let a = [0u8; NODE_ID_LEN];
        let mut b = a;
        b[NODE_ID_LEN - 1] = 1;
        assert!(mean_byte_xor(&a, &b) < 0.001);
    }
}
