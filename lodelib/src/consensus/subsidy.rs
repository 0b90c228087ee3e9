//! Block subsidy schedule per production variant.

use crate::consensus::params::ConsensusParams;
use crate::types::units::Amount;

/// PoW subsidy at a height.
///
/// Distribution-phase blocks pay the full base. After that the subsidy
/// ramps up linearly across the slow start, then follows the halving
/// schedule.
pub fn pow_subsidy(height: u64, params: &ConsensusParams) -> Amount {
    if height <= params.last_initial_distribution_height {
        return params.pow_subsidy_base;
    }

    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }
    let base = params.pow_subsidy_base >> halvings;

    let since_distribution = height - params.last_initial_distribution_height;
    if params.slow_start_blocks > 0 && since_distribution < params.slow_start_blocks {
        base * since_distribution / params.slow_start_blocks
    } else {
        base
    }
}

/// Hive blocks pay a flat subsidy.
pub fn hive_subsidy(params: &ConsensusParams) -> Amount {
    params.hive_subsidy
}

/// Pop subsidy; private-proof blocks pay the reduced amount.
pub fn pop_subsidy(private: bool, params: &ConsensusParams) -> Amount {
    if private {
        params.pop_subsidy_private
    } else {
        params.pop_subsidy_public
    }
}

/// Dwarf price at a height. Flat for now; the height argument keeps the
/// call sites honest if the price ever moves with the chain.
pub fn dwarf_cost(_height: u64, params: &ConsensusParams) -> Amount {
    params.dwarf_cost
}
