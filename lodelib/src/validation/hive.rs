//! Hive proof validation.
//!
//! A hive block's coinbase carries a 144-byte proof naming a dwarf from
//! an on-chain DCT. Validation recomputes everything the prover claims:
//! the dwarf hash against the hive target, the signature over the
//! deterministic rand string, the DCT's location, maturity, reward
//! script, optional community contribution, and the dwarf count.

use tracing::debug;

use crate::chain::{
    deterministic_rand_string, hive_blocks_since_pow, BlockReader, ChainError, HeaderIndex,
    UtxoView,
};
use crate::consensus::params::ConsensusParams;
use crate::consensus::retarget::next_hive_work;
use crate::consensus::subsidy::dwarf_cost;
use crate::crypto::hash::{minotaur_hash_arbitrary, signed_message_digest};
use crate::crypto::signature::{key_id, recover_compact, SignatureError};
use crate::script::{extract_key_id, parse_dct_script, HiveProof, Script, ScriptError};
use crate::types::block::Block;
use crate::types::difficulty::{compact_to_target, hash_to_u256, DifficultyError};
use crate::types::transaction::{OutPoint, Transaction};
use crate::types::units::Amount;
use crate::types::Hash256;

#[derive(Debug, thiserror::Error)]
pub enum HiveProofError {
    #[error("previous block not found in index")]
    UnknownPrevBlock,
    #[error("hive blocks not accepted until after slow start")]
    BeforeSlowStart,
    #[error("too many hive blocks without a PoW block")]
    TooManyConsecutiveHive,
    #[error("hive block contains a DCT")]
    ContainsDct,
    #[error("coinbase transaction missing or invalid")]
    BadCoinbase,
    #[error("coinbase has {0} outputs, expected 2 or 3")]
    WrongOutputCount(usize),
    #[error("proof script: {0}")]
    ProofScript(#[from] ScriptError),
    #[error("dwarf hash does not meet the hive target")]
    HashAboveTarget,
    #[error("difficulty: {0}")]
    Difficulty(#[from] DifficultyError),
    #[error("chain: {0}")]
    Chain(#[from] ChainError),
    #[error("could not extract reward address from coinbase")]
    MissingRewardAddress,
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(#[from] SignatureError),
    #[error("recovered key does not match the reward address")]
    SignatureMismatch,
    #[error("claimed DCT not found")]
    DctNotFound,
    #[error("claimed DCT height {claimed} conflicts with found height {found}")]
    HeightMismatch { claimed: u64, found: u64 },
    #[error("claimed DCT is immature")]
    DctImmature,
    #[error("claimed DCT is too old")]
    DctExpired,
    #[error("claimed utxo is not a valid DCT script")]
    NotDctScript,
    #[error("DCT reward script does not match the coinbase reward script")]
    RewardScriptMismatch,
    #[error("community contribution indicated but not found")]
    CommunityContribMissing,
    #[error("community contribution pays {paid}, expected {expected}")]
    BadCommunityAmount { paid: Amount, expected: Amount },
    #[error("DCT pays less than the cost of a single dwarf")]
    BelowDwarfCost,
    #[error("dwarf nonce {nonce} exceeds the DCT's dwarf count {count}")]
    NonceOutOfRange { nonce: u32, count: u64 },
}

/// The double-Minotaur dwarf hash both the engine and the validator
/// compute: first over `randSeed || txid || index`, then over the hex of
/// the first round.
pub fn dwarf_hash(rand_string: &str, txid_hex: &str, dwarf_index: u32) -> Hash256 {
    let first = minotaur_hash_arbitrary(&format!("{rand_string}{txid_hex}{dwarf_index}"));
    minotaur_hash_arbitrary(&hex::encode(first))
}

/// Verify the hive proof of `block` against the chain ending at its
/// parent. Returns `Ok(())` exactly when the block's dwarf claim holds.
pub fn check_hive_proof(
    block: &Block,
    index: &dyn HeaderIndex,
    utxo: &dyn UtxoView,
    reader: &dyn BlockReader,
    params: &ConsensusParams,
) -> Result<(), HiveProofError> {
    let prev = index
        .entry(&block.header.prev_block_hash)
        .ok_or(HiveProofError::UnknownPrevBlock)?;
    let block_height = prev.height + 1;
    debug!(height = block_height, "check_hive_proof");

    // Hive opens only after the PoW-only slow start
    if block_height < params.last_initial_distribution_height + params.slow_start_blocks {
        return Err(HiveProofError::BeforeSlowStart);
    }

    // Bound the unbroken hive run ending at the parent
    if hive_blocks_since_pow(index, &prev, params, false)? >= params.max_consecutive_hive_blocks {
        return Err(HiveProofError::TooManyConsecutiveHive);
    }

    // Hive blocks must not carry DCTs
    let creation_script = params
        .creation_script()
        .map_err(HiveProofError::ProofScript)?;
    let cost = dwarf_cost(block_height, params);
    for tx in block.transactions.iter().skip(1) {
        if tx.dct_payment(&creation_script, cost).is_some() {
            return Err(HiveProofError::ContainsDct);
        }
    }

    let coinbase = block.coinbase().ok_or(HiveProofError::BadCoinbase)?;
    if coinbase.outputs.len() < 2 || coinbase.outputs.len() > 3 {
        return Err(HiveProofError::WrongOutputCount(coinbase.outputs.len()));
    }

    // Parse the proof at fixed offsets
    let proof = HiveProof::decode(&coinbase.outputs[0].script_pubkey)?;
    debug!(
        dwarf_nonce = proof.dwarf_nonce,
        dct_height = proof.dct_height,
        community = proof.community_contrib,
        txid = %proof.txid_hex,
        "check_hive_proof: parsed proof"
    );

    // Recompute the dwarf hash and compare against the hive target
    let rand_string = deterministic_rand_string(&prev);
    let target = compact_to_target(next_hive_work(index, &prev, params)?)?;
    let hash = dwarf_hash(&rand_string, &proof.txid_hex, proof.dwarf_nonce);
    if hash_to_u256(&hash) >= target {
        return Err(HiveProofError::HashAboveTarget);
    }

    // The reward output names the key the proof must be signed with
    let reward_script = &coinbase.outputs[1].script_pubkey;
    let reward_key_id =
        extract_key_id(reward_script).ok_or(HiveProofError::MissingRewardAddress)?;

    let digest = signed_message_digest(&rand_string);
    let pubkey = recover_compact(&digest, &proof.signature)?;
    if key_id(&pubkey) != reward_key_id {
        return Err(HiveProofError::SignatureMismatch);
    }

    // Locate the claimed DCT: hot UTXO set first, then the deep drill
    // into block storage (the claimed height makes that lookup cheap)
    let txid: Hash256 = hex::decode(&proof.txid_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or(ScriptError::BadTxid)?;
    let claimed_height = u64::from(proof.dct_height);

    let mut dct_tx: Option<Transaction> = None;
    let (dct_value, dct_script_pubkey, found_height) =
        match utxo.coin(&OutPoint::new(txid, 0)) {
            Some(coin) => {
                debug!("check_hive_proof: using utxo set for the DCT output");
                (coin.value, coin.script_pubkey, coin.height)
            }
            None => {
                debug!("check_hive_proof: deep drill for the DCT output");
                let tx = reader
                    .tx_by_hash_and_height(&txid, claimed_height)
                    .ok_or(HiveProofError::DctNotFound)?;
                let first = tx.outputs.first().ok_or(HiveProofError::NotDctScript)?;
                let found = (first.value, first.script_pubkey.clone(), claimed_height);
                dct_tx = Some(tx);
                found
            }
        };

    if found_height != claimed_height {
        return Err(HiveProofError::HeightMismatch {
            claimed: claimed_height,
            found: found_height,
        });
    }

    // Dwarf maturity window
    let depth = block_height.saturating_sub(found_height);
    if depth < params.dwarf_gestation_blocks {
        return Err(HiveProofError::DctImmature);
    }
    if depth > params.dwarf_gestation_blocks + params.dwarf_lifespan_blocks {
        return Err(HiveProofError::DctExpired);
    }

    // The DCT's first output must carry the canonical creation shape and
    // name the same reward script the coinbase pays
    let dct_reward_script = parse_dct_script(&dct_script_pubkey, &creation_script)
        .ok_or(HiveProofError::NotDctScript)?;
    if dct_reward_script != *reward_script {
        return Err(HiveProofError::RewardScriptMismatch);
    }

    // Community contribution: vout[1] of the DCT must pay the community
    // address exactly (value + donation) / factor
    let mut total_paid = dct_value;
    if proof.community_contrib {
        let community_script = params
            .community_script()
            .map_err(HiveProofError::ProofScript)?;
        let donation = community_output_value(
            &dct_tx,
            utxo,
            reader,
            &txid,
            claimed_height,
            &community_script,
        )?;
        let expected = (dct_value + donation) / params.community_contrib_factor;
        if donation != expected {
            return Err(HiveProofError::BadCommunityAmount {
                paid: donation,
                expected,
            });
        }
        total_paid += donation;
    }

    // Enough dwarves must exist to cover the claimed nonce
    if total_paid < cost {
        return Err(HiveProofError::BelowDwarfCost);
    }
    let count = total_paid / cost;
    if u64::from(proof.dwarf_nonce) >= count {
        return Err(HiveProofError::NonceOutOfRange {
            nonce: proof.dwarf_nonce,
            count,
        });
    }

    debug!(height = block_height, "check_hive_proof: pass");
    Ok(())
}

/// Value of the DCT's community output, from whichever source is warm.
fn community_output_value(
    dct_tx: &Option<Transaction>,
    utxo: &dyn UtxoView,
    reader: &dyn BlockReader,
    txid: &Hash256,
    claimed_height: u64,
    community_script: &Script,
) -> Result<Amount, HiveProofError> {
    if let Some(tx) = dct_tx {
        let out = tx
            .outputs
            .get(1)
            .filter(|out| out.script_pubkey == *community_script)
            .ok_or(HiveProofError::CommunityContribMissing)?;
        return Ok(out.value);
    }

    if let Some(coin) = utxo.coin(&OutPoint::new(*txid, 1)) {
        if coin.script_pubkey != *community_script {
            return Err(HiveProofError::CommunityContribMissing);
        }
        return Ok(coin.value);
    }

    debug!("check_hive_proof: deep drill for the community output");
    let tx = reader
        .tx_by_hash_and_height(txid, claimed_height)
        .ok_or(HiveProofError::DctNotFound)?;
    let out = tx
        .outputs
        .get(1)
        .filter(|out| out.script_pubkey == *community_script)
        .ok_or(HiveProofError::CommunityContribMissing)?;
    Ok(out.value)
}
