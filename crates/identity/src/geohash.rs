//! Geohash proximity encoding.
//!
//! Standard base-32 geohash: interleaved longitude/latitude bisection, five
//! bits per output character. Four characters give roughly 40 km cells, which
//! is the locality granularity the routing distance works with.

use thiserror::Error;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Errors from geohash encoding.
#[derive(Debug, Error, PartialEq)]
pub enum GeohashError {
    #[error("latitude {0} out of range -90..=90")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} out of range -180..=180")]
    LongitudeOutOfRange(f64),
}

/// Encode a coordinate into a geohash of `precision` characters.
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String, GeohashError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GeohashError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GeohashError::LongitudeOutOfRange(longitude));
    }

    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut even_bit = true;
    let mut bit = 0u8;
    let mut index = 0usize;
    let mut hash = String::with_capacity(precision);

    while hash.len() < precision {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if longitude >= mid {
                index = (index << 1) | 1;
                lon_range.0 = mid;
            } else {
                index <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if latitude >= mid {
                index = (index << 1) | 1;
                lat_range.0 = mid;
            } else {
                index <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;
        bit += 1;
        if bit == 5 {
            hash.push(BASE32[index] as char);
            bit = 0;
            index = 0;
        }
    }

    Ok(hash)
}

/// Length of the shared leading prefix of two geohashes.
pub fn common_prefix_length(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count()
}
