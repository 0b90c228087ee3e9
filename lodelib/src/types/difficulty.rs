//! Compact-encoded difficulty targets.
//!
//! Targets travel in block headers as a 32-bit "compact" encoding:
//! `bits = (size << 24) | mantissa`, where `mantissa` is the top three
//! bytes of the 256-bit target and `size` its length in bytes. The
//! mantissa sign bit (0x00800000) makes a target negative, which is
//! never valid in a header.

use primitive_types::U256;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    #[error("compact target is negative")]
    Negative,
    #[error("compact target overflows 256 bits")]
    Overflow,
    #[error("compact target is zero")]
    Zero,
    #[error("ran out of ancestors while sampling difficulty window")]
    MissingAncestor,
}

/// Decode a compact `bits` value into a full 256-bit target.
///
/// Rejects negative, zero, and overflowing encodings, matching header
/// validity rules.
pub fn compact_to_target(bits: u32) -> Result<U256, DifficultyError> {
    let size = (bits >> 24) as usize;
    let word = bits & 0x007f_ffff;

    if word == 0 {
        return Err(DifficultyError::Zero);
    }
    if (bits & 0x0080_0000) != 0 {
        return Err(DifficultyError::Negative);
    }
    if size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32) {
        return Err(DifficultyError::Overflow);
    }

    let target = if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else {
        U256::from(word) << (8 * (size - 3))
    };

    if target.is_zero() {
        return Err(DifficultyError::Zero);
    }
    Ok(target)
}

/// Encode a 256-bit target into compact form.
///
/// Normalizes so the mantissa sign bit is never set; `target = 0` encodes
/// as `0`, which `compact_to_target` will refuse to decode.
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact: u32 = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Interpret a hash as a big-endian 256-bit integer for target comparison.
pub fn hash_to_u256(hash: &[u8; 32]) -> U256 {
    U256::from_big_endian(hash)
}
