//! # Bloom Filter
//!
//! Space-efficient probabilistic set-membership primitives.
//!
//! A bloom filter can say with certainty that a key is **not** in a set
//! (no false negatives), but may occasionally claim that a key **is** in
//! the set when it isn't (false positives). The false positive rate is a
//! function of the bits spent per key and the number of hash probes.
//!
//! ## Usage in shoal
//!
//! Table files embed one filter string per range of data blocks. During a
//! point lookup the reader consults the filter first -- if it says "not
//! present", the data block is never read from disk.
//!
//! Unlike an in-memory set, a table file needs *frozen* filters: the key
//! set is complete when the filter is built and never grows afterwards.
//! This crate therefore works on flat byte strings rather than a mutable
//! filter object:
//!
//! ```rust
//! let keys: Vec<&[u8]> = vec![b"hello", b"world"];
//! let filter = bloom::create_filter(&keys, 10);
//! assert!(bloom::key_may_match(b"hello", &filter));
//! ```
//!
//! ## Filter string format
//!
//! ```text
//! [bit array: ceil(n * bits_per_key / 8) bytes, min 8][num_probes: u8]
//! ```
//!
//! The probe count is stored in the final byte so a reader can interpret
//! filters built with a different `bits_per_key` setting.

/// Probe counts above this value are reserved for future filter
/// encodings; readers treat them as "always match".
const MAX_PROBES: u32 = 30;

/// Returns the number of hash probes to use for a given `bits_per_key`.
///
/// The optimum is `bits_per_key * ln(2)`; rounding down costs a little
/// accuracy but cuts probe cost.
fn num_probes(bits_per_key: usize) -> u32 {
    let k = (bits_per_key as f64 * std::f64::consts::LN_2) as u32;
    k.clamp(1, MAX_PROBES)
}

/// Builds a filter string covering `keys`.
///
/// `bits_per_key` trades space for accuracy; 10 bits per key yields a
/// false positive rate of roughly 1%. The result is self-describing (see
/// the crate docs) and matched against by [`key_may_match`].
pub fn create_filter(keys: &[&[u8]], bits_per_key: usize) -> Vec<u8> {
    let k = num_probes(bits_per_key);

    // Round up to a byte boundary, with a floor of 64 bits for very
    // small key counts.
    let bits = (keys.len() * bits_per_key).max(64);
    let bytes = (bits + 7) / 8;
    let bits = (bytes * 8) as u64;

    let mut filter = vec![0u8; bytes + 1];
    filter[bytes] = k as u8;

    for key in keys {
        let (h1, h2) = hash_pair(key);
        for i in 0..k {
            let bit_idx = bit_index(h1, h2, i, bits);
            set_bit(&mut filter[..bytes], bit_idx);
        }
    }
    filter
}

/// Returns `true` if `key` **might** have been in the set `filter` was
/// built from, `false` if it definitely was not.
///
/// Malformed or foreign filters degrade safely: anything too short to
/// carry a bit array, or carrying a reserved probe count, matches every
/// key rather than producing false negatives.
#[must_use]
pub fn key_may_match(key: &[u8], filter: &[u8]) -> bool {
    if filter.len() < 2 {
        // Too short to carry a bit array; treat as a match.
        return true;
    }
    let bytes = filter.len() - 1;
    let bits = (bytes * 8) as u64;

    let k = u32::from(filter[bytes]);
    if k > MAX_PROBES {
        // Reserved encoding from a newer writer; err on the side of a match.
        return true;
    }

    let (h1, h2) = hash_pair(key);
    for i in 0..k {
        let bit_idx = bit_index(h1, h2, i, bits);
        if !get_bit(&filter[..bytes], bit_idx) {
            return false;
        }
    }
    true
}

// ---- Internal helpers ----

/// Computes two independent 64-bit hashes using FNV-1a with different seeds.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = fnv1a_64(key, 0xcbf29ce484222325);
    let h2 = fnv1a_64(key, 0x517cc1b727220a95);
    (h1, h2)
}

/// Double hashing: h(i) = (h1 + i * h2) mod bits.
fn bit_index(h1: u64, h2: u64, i: u32, bits: u64) -> u64 {
    h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % bits
}

fn set_bit(bits: &mut [u8], idx: u64) {
    bits[(idx / 8) as usize] |= 1 << (idx % 8);
}

fn get_bit(bits: &[u8], idx: u64) -> bool {
    (bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
