//! Consensus hash functions.
//!
//! Two distinct hashes are consensus-critical. Block identity uses
//! double-SHA256 over the serialized header. Dwarf hashing and the PoW
//! comparison use `minotaur_hash_arbitrary`, a keyed hash over an ASCII
//! string; its output is interpreted big-endian when compared against a
//! target.

use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::types::Hash256;

/// Domain separator for the Minotaur string hash.
const MINOTAUR_TAG: &[u8] = b"lodestone/minotaur/v1";

/// Double-SHA256.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Keyed consensus hash over an arbitrary ASCII string.
///
/// SHA3-256 over the tagged input, then one SHA-256 round. Every node
/// must produce identical bytes for identical input strings.
pub fn minotaur_hash_arbitrary(input: &str) -> Hash256 {
    let mut keccak = Sha3_256::new();
    keccak.update(MINOTAUR_TAG);
    keccak.update(input.as_bytes());
    let inner = keccak.finalize();

    let outer = Sha256::digest(inner);
    let mut out = [0u8; 32];
    out.copy_from_slice(&outer);
    out
}

/// Digest signed by dwarf proofs: double-SHA256 of the deterministic
/// rand string's bytes.
pub fn signed_message_digest(message: &str) -> Hash256 {
    double_sha256(message.as_bytes())
}

/// Hex string of a hash (big-endian byte order).
pub fn hash_to_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}
