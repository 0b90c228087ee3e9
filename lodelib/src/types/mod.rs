pub mod block;
pub mod difficulty;
pub mod transaction;
pub mod units;

/// A 256-bit hash, stored as raw bytes.
///
/// Displayed big-endian (the natural order of `hex::encode`); all target
/// comparisons interpret these bytes as a big-endian unsigned integer.
pub type Hash256 = [u8; 32];

/// A 20-byte key id (hash of a compressed public key).
pub type KeyId = [u8; 20];
