//! Hashes shared by the bridge extractors.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Hex blake2b-256 of the UTF-8 bytes of `data`.
///
/// Request ids, event ids and sender address hashes all use this digest.
pub fn blake2b256_hex(data: &str) -> String {
    hex::encode(Blake2b256::digest(data.as_bytes()))
}
