//! Difficulty retargeting for the PoW and hive production paths.
//!
//! PoW uses a 24-block simple moving average of targets scaled by the
//! clamped actual timespan (fixed-DGW style). Hive averages the targets
//! of the last `hive_difficulty_window` hive blocks and scales by how
//! densely they occur among all blocks.

use primitive_types::U256;
use tracing::debug;

use crate::chain::{parent, HeaderIndex, IndexEntry};
use crate::consensus::params::ConsensusParams;
use crate::types::difficulty::{
    compact_to_target, hash_to_u256, target_to_compact, DifficultyError,
};
use crate::types::Hash256;

/// PoW sample window.
const PAST_BLOCKS: u64 = 24;

/// Compact target required of the PoW block following `tip`.
///
/// `candidate_time` is the header time of the block being built or
/// validated (only consulted for the testnet min-difficulty rule).
pub fn next_pow_work(
    index: &dyn HeaderIndex,
    tip: &IndexEntry,
    candidate_time: u64,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    // Extremely low difficulty up to the last initial distribution block
    if tip.height < params.last_initial_distribution_height {
        return Ok(target_to_compact(params.pow_limit_initial));
    }

    // Min-difficulty block allowed when no block has arrived for ~10
    // spacings (testnet only)
    if params.allow_min_difficulty_blocks
        && candidate_time > tip.time + params.pow_target_spacing * 10
    {
        return Ok(target_to_compact(params.pow_limit));
    }

    // Only PoW blocks count; skip the hive run at the tip
    let mut last = tip.clone();
    while last.is_hive_mined(params) {
        last = parent(index, &last).map_err(|_| DifficultyError::MissingAncestor)?;
    }

    // Simple moving average of the last 24 PoW targets. Dividing each
    // sample before summing keeps the accumulator inside 256 bits.
    let mut avg = U256::zero();
    let mut cursor = last.clone();
    for _ in 0..PAST_BLOCKS {
        while cursor.is_hive_mined(params) {
            cursor = parent(index, &cursor).map_err(|_| DifficultyError::MissingAncestor)?;
        }
        avg += compact_to_target(cursor.bits)? / PAST_BLOCKS;
        cursor = parent(index, &cursor).map_err(|_| DifficultyError::MissingAncestor)?;
    }

    // Span measured from the newest sample to the parent of the oldest
    // one, not between the samples themselves; inherited DGW behaviour,
    // kept for compatibility.
    let target_span = PAST_BLOCKS * params.pow_target_spacing;
    let mut actual_span = last.time.saturating_sub(cursor.time);
    actual_span = actual_span.clamp(target_span / 3, target_span * 3);

    let mut new_target = avg * U256::from(actual_span) / U256::from(target_span);
    if new_target > params.pow_limit {
        new_target = params.pow_limit;
    }

    Ok(target_to_compact(new_target))
}

/// Compact target required of the hive block following `tip`.
pub fn next_hive_work(
    index: &dyn HeaderIndex,
    tip: &IndexEntry,
    params: &ConsensusParams,
) -> Result<u32, DifficultyError> {
    let mut target_sum = U256::zero();
    let mut hive_count: u64 = 0;
    let mut total_count: u64 = 0;

    // Step back until the window is full or history runs out
    let mut cursor = tip.clone();
    while hive_count < params.hive_difficulty_window
        && cursor.height >= params.min_hive_check_block
    {
        let Some(prev) = index.entry(&cursor.prev_block_hash) else {
            break;
        };
        if cursor.is_hive_mined(params) {
            target_sum += compact_to_target(cursor.bits)?;
            hive_count += 1;
        }
        total_count += 1;
        cursor = prev;
    }

    if hive_count == 0 {
        // Chain is starting; open the hive at the easiest target
        debug!("next_hive_work: no previous hive blocks found");
        return Ok(target_to_compact(params.pow_limit_hive));
    }

    let avg = target_sum / hive_count;
    let target_total = hive_count * params.hive_block_spacing_target;
    let mut scaled = avg * U256::from(total_count) / U256::from(target_total);
    if scaled > params.pow_limit_hive {
        scaled = params.pow_limit_hive;
    }

    Ok(target_to_compact(scaled))
}

/// Does `hash` satisfy the compact target `bits`?
///
/// Rejects negative, zero, or overflowing encodings and anything easier
/// than the initial-distribution limit.
pub fn check_pow(hash: &Hash256, bits: u32, params: &ConsensusParams) -> bool {
    let target = match compact_to_target(bits) {
        Ok(t) => t,
        Err(_) => return false,
    };
    if target > params.pow_limit_initial {
        return false;
    }
    hash_to_u256(hash) <= target
}
