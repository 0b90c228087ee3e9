//! The narrow chain-state surface the production core consumes.
//!
//! Chain storage, the UTXO database, and block files are external
//! collaborators; the core sees them only through the traits here.
//! `IndexEntry` is a value snapshot of one header's index record, safe to
//! hold without any lock.

use thiserror::Error;

use crate::consensus::params::ConsensusParams;
use crate::crypto::hash::minotaur_hash_arbitrary;
use crate::script::Script;
use crate::types::block::{Block, BlockHeader};
use crate::types::transaction::{OutPoint, Transaction};
use crate::types::units::Amount;
use crate::types::Hash256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("header {0} not found in index")]
    MissingHeader(String),
    #[error("block at height {0} has no parent in index")]
    MissingParent(u64),
}

/// Snapshot of one block's index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: Hash256,
    pub prev_block_hash: Hash256,
    pub height: u64,
    pub time: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl IndexEntry {
    pub fn from_header(header: &BlockHeader, height: u64) -> Self {
        Self {
            hash: header.hash(),
            prev_block_hash: header.prev_block_hash,
            height,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
        }
    }

    pub fn is_hive_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.hive_nonce_marker
    }

    pub fn is_pop_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.pop_nonce_marker
    }
}

/// Read access to the header index and the active tip.
pub trait HeaderIndex: Send + Sync {
    fn entry(&self, hash: &Hash256) -> Option<IndexEntry>;
    fn tip(&self) -> IndexEntry;
}

/// Parent of an entry, or an error at the genesis boundary.
pub fn parent(index: &dyn HeaderIndex, entry: &IndexEntry) -> Result<IndexEntry, ChainError> {
    index
        .entry(&entry.prev_block_hash)
        .ok_or(ChainError::MissingParent(entry.height))
}

/// Median time of the last 11 blocks ending at `entry` (fewer near
/// genesis).
pub fn median_time_past(index: &dyn HeaderIndex, entry: &IndexEntry) -> u64 {
    const SPAN: usize = 11;
    let mut times = Vec::with_capacity(SPAN);
    let mut cursor = entry.clone();
    loop {
        times.push(cursor.time);
        if times.len() == SPAN {
            break;
        }
        match index.entry(&cursor.prev_block_hash) {
            Some(p) => cursor = p,
            None => break,
        }
    }
    times.sort_unstable();
    times[times.len() / 2]
}

/// Deterministic rand string for the block following `tip`.
///
/// Every node derives the same 64-char hex string from the tip record;
/// dwarves are hashed against it and proof signatures commit to it.
pub fn deterministic_rand_string(tip: &IndexEntry) -> String {
    let seed = format!("{}:{}:{}", hex::encode(tip.hash), tip.height, tip.time);
    hex::encode(minotaur_hash_arbitrary(&seed))
}

/// Count hive blocks in the unbroken hive (optionally hive-or-pop) run
/// ending at `tip`.
///
/// The engine bounds consecutive non-PoW blocks with `include_pop`; the
/// validator counts across hive blocks only.
pub fn hive_blocks_since_pow(
    index: &dyn HeaderIndex,
    tip: &IndexEntry,
    params: &ConsensusParams,
    include_pop: bool,
) -> Result<u64, ChainError> {
    let mut count = 0;
    let mut cursor = tip.clone();
    while cursor.is_hive_mined(params) || (include_pop && cursor.is_pop_mined(params)) {
        if cursor.is_hive_mined(params) {
            count += 1;
        }
        cursor = parent(index, &cursor)?;
    }
    Ok(count)
}

/// An unspent output as seen by the hot UTXO view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub value: Amount,
    pub script_pubkey: Script,
    pub height: u64,
}

/// Hot-path UTXO lookups.
pub trait UtxoView: Send + Sync {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}

/// Cold-path block storage reads.
///
/// `tx_by_hash_and_height` is the "deep drill": it must keep working when
/// the UTXO cache is cold (reindex), which is why the claimed DCT height
/// travels in the proof. Implementations layer a hot cache over the block
/// store.
pub trait BlockReader: Send + Sync {
    fn block(&self, hash: &Hash256) -> Option<Block>;
    fn tx_by_hash_and_height(&self, txid: &Hash256, height: u64) -> Option<Transaction>;
}

/// Network conditions gating block production.
pub trait NetStatus: Send + Sync {
    fn peer_count(&self) -> usize;
    fn is_initial_block_download(&self) -> bool;
}

/// Hands a finished block to validation, as if received from a peer.
pub trait BlockSubmitter: Send + Sync {
    fn process_new_block(&self, block: &Block) -> bool;
}
