//! Geohash encoding
//!
//! Interval-halving encoder producing a fixed-length base32 cell name for a
//! coordinate. Used as the spatial half of a trip group identity key.

/// Geohash base32 alphabet (no `a`, `i`, `l`, `o`)
pub const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Default number of output characters
pub const DEFAULT_GEOHASH_PRECISION: usize = 5;

/// Longest precision accepted by configuration (~3.7cm x 1.9cm cells)
pub const MAX_GEOHASH_PRECISION: usize = 12;

/// Encode `(lat, lng)` as a geohash of exactly `precision` characters.
///
/// Bits alternate longitude/latitude starting with longitude. A bit is set
/// when the value lies strictly above the interval midpoint, in which case
/// the interval narrows to its upper half.
pub fn encode_geohash(lat: f64, lng: f64, precision: usize) -> String {
    let mut lat_interval = (-90.0_f64, 90.0_f64);
    let mut lng_interval = (-180.0_f64, 180.0_f64);
    let mut geohash = String::with_capacity(precision);

    let mut bit = 0u8;
    let mut ch = 0usize;
    let mut even = true;

    while geohash.len() < precision {
        let (interval, value) = if even {
            (&mut lng_interval, lng)
        } else {
            (&mut lat_interval, lat)
        };

        let mid = (interval.0 + interval.1) / 2.0;
        if value > mid {
            ch |= 1 << (4 - bit);
            interval.0 = mid;
        } else {
            interval.1 = mid;
        }
        even = !even;

        if bit < 4 {
            bit += 1;
        } else {
            geohash.push(GEOHASH_ALPHABET[ch] as char);
            bit = 0;
            ch = 0;
        }
    }

    geohash
}
