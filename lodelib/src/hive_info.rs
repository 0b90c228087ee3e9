//! Network-wide dwarf population summary.
//!
//! Walks the recent chain and totals every live DCT, whether or not the
//! local wallet owns it. Used for status reporting and reward
//! projections; not consensus-critical, but community-contribution
//! outputs are validated exactly as the hive validator does so the
//! totals match what the network will accept.

use thiserror::Error;
use tracing::warn;

use crate::chain::{BlockReader, HeaderIndex, NetStatus};
use crate::consensus::params::ConsensusParams;
use crate::consensus::subsidy::{dwarf_cost, hive_subsidy};
use crate::types::units::Amount;

#[derive(Debug, Error)]
pub enum HiveInfoError {
    #[error("refusing to scan during initial block download")]
    InitialBlockDownload,
    #[error("block at height {0} unavailable")]
    BlockUnavailable(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkHiveInfo {
    pub immature_dwarves: u64,
    pub immature_dcts: u64,
    pub mature_dwarves: u64,
    pub mature_dcts: u64,
    /// Hive rewards a dwarf lifespan's worth of blocks will pay out.
    pub potential_lifespan_rewards: Amount,
}

/// Scan the last gestation-plus-lifespan blocks and total the dwarf
/// population.
pub fn get_network_hive_info(
    index: &dyn HeaderIndex,
    reader: &dyn BlockReader,
    net: &dyn NetStatus,
    params: &ConsensusParams,
) -> Result<NetworkHiveInfo, HiveInfoError> {
    if net.is_initial_block_download() {
        return Err(HiveInfoError::InitialBlockDownload);
    }

    let mut info = NetworkHiveInfo {
        potential_lifespan_rewards: params.dwarf_lifespan_blocks * hive_subsidy(params)
            / (params.hive_block_spacing_target_typical + params.pop_blocks_per_hive),
        ..Default::default()
    };

    let creation_script = params
        .creation_script()
        .map_err(|_| HiveInfoError::BlockUnavailable(0))?;
    let community_script = params
        .community_script()
        .map_err(|_| HiveInfoError::BlockUnavailable(0))?;

    let total_lifespan = params.dwarf_gestation_blocks + params.dwarf_lifespan_blocks;
    let mut cursor = index.tip();

    for depth in 0..total_lifespan {
        if cursor.height < params.min_hive_check_block {
            break;
        }

        // Hive blocks cannot carry DCTs; skip the block-store read
        if !cursor.is_hive_mined(params) {
            let Some(block) = reader.block(&cursor.hash) else {
                warn!(
                    height = cursor.height,
                    "get_network_hive_info: block unavailable; cannot total dwarves"
                );
                return Err(HiveInfoError::BlockUnavailable(cursor.height));
            };

            let cost = dwarf_cost(cursor.height, params);
            for tx in &block.transactions {
                let Some(mut paid) = tx.dct_payment(&creation_script, cost) else {
                    continue;
                };
                if let Some(donation_out) = tx
                    .outputs
                    .get(1)
                    .filter(|out| out.script_pubkey == community_script)
                {
                    let donation = donation_out.value;
                    let expected = (paid + donation) / params.community_contrib_factor;
                    if donation != expected {
                        continue;
                    }
                    paid += donation;
                }
                let count = paid / cost;
                if depth < params.dwarf_gestation_blocks {
                    info.immature_dwarves += count;
                    info.immature_dcts += 1;
                } else {
                    info.mature_dwarves += count;
                    info.mature_dcts += 1;
                }
            }
        }

        match index.entry(&cursor.prev_block_hash) {
            Some(prev) => cursor = prev,
            None => break,
        }
    }

    Ok(info)
}
