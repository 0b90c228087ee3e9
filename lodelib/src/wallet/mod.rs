//! The wallet surface the miners consume.
//!
//! Key storage and coin selection are external; the PoW miner needs a
//! reserved coinbase script, and the hive engine needs the wallet's DCTs
//! and a compact signature over the rand-string digest.

use thiserror::Error;

use crate::consensus::params::ConsensusParams;
use crate::crypto::signature::SignatureError;
use crate::script::Script;
use crate::types::{Hash256, KeyId};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet unavailable")]
    Unavailable,
    #[error("wallet is locked")]
    Locked,
    #[error("keypool ran out")]
    KeypoolExhausted,
    #[error("no private key for key id {0}")]
    UnknownKey(String),
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
}

/// Lifecycle stage of a dwarf-creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwarfStatus {
    /// Still gestating; its dwarves may not hash yet.
    Immature,
    /// Dwarves are live.
    Mature,
    /// Past the lifespan; dwarves are dead.
    Expired,
}

/// Status of a DCT confirmed at `dct_height`, seen from `tip_height`.
pub fn dwarf_status(dct_height: u64, tip_height: u64, params: &ConsensusParams) -> DwarfStatus {
    let depth = tip_height.saturating_sub(dct_height);
    if depth < params.dwarf_gestation_blocks {
        DwarfStatus::Immature
    } else if depth <= params.dwarf_gestation_blocks + params.dwarf_lifespan_blocks {
        DwarfStatus::Mature
    } else {
        DwarfStatus::Expired
    }
}

/// One wallet DCT, as reported to the hive engine.
#[derive(Debug, Clone)]
pub struct DctInfo {
    /// Txid as 64 hex chars (the form dwarf hashing consumes).
    pub txid_hex: String,
    /// Raw txid.
    pub txid: Hash256,
    /// Address whose key signs and collects the reward.
    pub reward_address: String,
    /// Whether the DCT carries a community contribution output.
    pub community_contrib: bool,
    /// Number of dwarves the DCT minted.
    pub dwarf_count: u32,
    pub status: DwarfStatus,
}

/// A coinbase script reserved out of the keypool.
///
/// Call `keep()` once a block using it is accepted; otherwise the
/// implementation returns the key to the pool when the handle drops.
pub trait ReservedScript: Send + Sync {
    fn script(&self) -> Script;
    fn keep(&self);
}

/// The wallet operations block production depends on.
pub trait WalletFacade: Send + Sync {
    fn is_available(&self) -> bool;
    fn is_unlocked(&self) -> bool;

    /// Reserve a fresh coinbase payout script from the keypool.
    fn reserve_coinbase_script(&self) -> Result<Box<dyn ReservedScript>, WalletError>;

    /// Compact-sign a digest with the key behind `key_id`.
    fn sign_compact(&self, key_id: &KeyId, digest: &Hash256) -> Result<[u8; 65], WalletError>;

    /// All DCTs the wallet knows about, with status computed at
    /// `tip_height`.
    fn dcts(&self, tip_height: u64, params: &ConsensusParams) -> Vec<DctInfo>;
}
