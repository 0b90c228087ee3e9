//! Immutable per-chain consensus parameters.

use primitive_types::U256;

use crate::script::{script_for_address, Script, ScriptError};
use crate::types::units::{Amount, COIN};

#[derive(Debug, Clone)]
pub struct ConsensusParams {
    /// Easiest allowed PoW target after the initial distribution.
    pub pow_limit: U256,
    /// Easiest target during initial distribution, and the decode ceiling
    /// for any header's compact bits.
    pub pow_limit_initial: U256,
    /// Easiest allowed hive target.
    pub pow_limit_hive: U256,
    /// Desired seconds between PoW blocks.
    pub pow_target_spacing: u64,
    /// Testnet-style minimum-difficulty escape hatch.
    pub allow_min_difficulty_blocks: bool,

    /// Last block of the initial distribution phase.
    pub last_initial_distribution_height: u64,
    /// PoW-only blocks after initial distribution before hive opens.
    pub slow_start_blocks: u64,
    /// Hive difficulty sampling never walks below this height.
    pub min_hive_check_block: u64,

    /// Price of one dwarf, in grains.
    pub dwarf_cost: Amount,
    /// Blocks a DCT gestates before its dwarves may hash.
    pub dwarf_gestation_blocks: u64,
    /// Blocks a mature DCT's dwarves stay alive.
    pub dwarf_lifespan_blocks: u64,
    /// Hive blocks sampled by the hive retarget.
    pub hive_difficulty_window: u64,
    /// Desired total blocks per hive block.
    pub hive_block_spacing_target: u64,
    /// Observed typical spacing, used for reward projections.
    pub hive_block_spacing_target_typical: u64,
    /// Expected pop blocks per hive block, for reward projections.
    pub pop_blocks_per_hive: u64,
    /// Cap on hive blocks since the last PoW block.
    pub max_consecutive_hive_blocks: u64,
    /// Denominator of the optional community contribution.
    pub community_contrib_factor: u64,

    /// Well-known dwarf-creation address.
    pub dwarf_creation_address: String,
    /// Community fund address for contribution outputs.
    pub hive_community_address: String,

    /// Header nonce value marking hive blocks.
    pub hive_nonce_marker: u32,
    /// Header nonce value marking pop blocks.
    pub pop_nonce_marker: u32,

    /// Height at which witness commitments activate.
    pub witness_activation_height: u64,
    /// Regtest behaviour: mine without peers, stop after one block.
    pub mine_blocks_on_demand: bool,

    /// Base PoW subsidy before halvings.
    pub pow_subsidy_base: Amount,
    /// Blocks between subsidy halvings.
    pub subsidy_halving_interval: u64,
    /// Fixed hive block subsidy.
    pub hive_subsidy: Amount,
    /// Pop subsidy, public proof variant.
    pub pop_subsidy_public: Amount,
    /// Pop subsidy, private proof variant.
    pub pop_subsidy_private: Amount,
}

impl ConsensusParams {
    pub fn main() -> Self {
        Self {
            pow_limit: U256::MAX >> 20,
            pow_limit_initial: U256::MAX >> 8,
            pow_limit_hive: U256::MAX >> 16,
            pow_target_spacing: 120,
            allow_min_difficulty_blocks: false,
            last_initial_distribution_height: 500,
            slow_start_blocks: 2000,
            min_hive_check_block: 2500,
            dwarf_cost: COIN / 4,
            dwarf_gestation_blocks: 48 * 30,
            dwarf_lifespan_blocks: 48 * 30 * 14,
            hive_difficulty_window: 24,
            hive_block_spacing_target: 2,
            hive_block_spacing_target_typical: 3,
            pop_blocks_per_hive: 1,
            max_consecutive_hive_blocks: 8,
            community_contrib_factor: 10,
            dwarf_creation_address: "b1a6bd5d9a0cd2712bd5e848b5a5e68fd977d0a1".to_string(),
            hive_community_address: "c3dd12e61e1d0a7a8f33bdf49d577d2a6051b0ce".to_string(),
            hive_nonce_marker: 0xffff_fffe,
            pop_nonce_marker: 0xffff_fffd,
            witness_activation_height: 0,
            mine_blocks_on_demand: false,
            pow_subsidy_base: 50 * COIN,
            subsidy_halving_interval: 840_000,
            hive_subsidy: 40 * COIN,
            pop_subsidy_public: 10 * COIN,
            pop_subsidy_private: 5 * COIN,
        }
    }

    pub fn regtest() -> Self {
        Self {
            pow_limit: U256::MAX >> 1,
            pow_limit_initial: U256::MAX >> 1,
            pow_limit_hive: U256::MAX >> 1,
            pow_target_spacing: 120,
            allow_min_difficulty_blocks: true,
            last_initial_distribution_height: 0,
            slow_start_blocks: 0,
            min_hive_check_block: 0,
            dwarf_cost: COIN / 4,
            dwarf_gestation_blocks: 4,
            dwarf_lifespan_blocks: 200,
            hive_difficulty_window: 24,
            hive_block_spacing_target: 2,
            hive_block_spacing_target_typical: 3,
            pop_blocks_per_hive: 1,
            max_consecutive_hive_blocks: 8,
            community_contrib_factor: 10,
            dwarf_creation_address: "b1a6bd5d9a0cd2712bd5e848b5a5e68fd977d0a1".to_string(),
            hive_community_address: "c3dd12e61e1d0a7a8f33bdf49d577d2a6051b0ce".to_string(),
            hive_nonce_marker: 0xffff_fffe,
            pop_nonce_marker: 0xffff_fffd,
            witness_activation_height: 0,
            mine_blocks_on_demand: true,
            pow_subsidy_base: 50 * COIN,
            subsidy_halving_interval: 150,
            hive_subsidy: 40 * COIN,
            pop_subsidy_public: 10 * COIN,
            pop_subsidy_private: 5 * COIN,
        }
    }

    /// Payment script of the dwarf-creation address.
    pub fn creation_script(&self) -> Result<Script, ScriptError> {
        script_for_address(&self.dwarf_creation_address)
    }

    /// Payment script of the community fund address.
    pub fn community_script(&self) -> Result<Script, ScriptError> {
        script_for_address(&self.hive_community_address)
    }
}
