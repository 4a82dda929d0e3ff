//! Hashing primitives
//!
//! SHA-256 everywhere, rendered as lowercase hex. No keyed hashing and no
//! domain separation tag; existing artifacts and the read-side verifier
//! depend on the bare digest.

use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes, as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of a pair of node hashes. The two hex strings are concatenated as
/// text, not as raw bytes; the read-side verification contract replays
/// exactly this operation.
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut combined = String::with_capacity(left.len() + right.len());
    combined.push_str(left);
    combined.push_str(right);
    sha256_hex(combined.as_bytes())
}
