//! The mempool surface consumed by block assembly.
//!
//! Mempool storage, eviction, and relay policy live outside this crate.
//! The assembler needs nothing beyond entries with ancestor-aggregated
//! statistics, an ancestor-feerate ordering, and descendant walks.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::transaction::Transaction;
use crate::types::units::Amount;
use crate::types::Hash256;

/// Fee rate in grains per 1000 virtual bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate {
    grains_per_kvb: u64,
}

impl FeeRate {
    pub fn new(grains_per_kvb: u64) -> Self {
        Self { grains_per_kvb }
    }

    pub fn grains_per_kvb(&self) -> u64 {
        self.grains_per_kvb
    }

    /// Fee this rate charges for `size` virtual bytes.
    pub fn fee_for(&self, size: u64) -> Amount {
        self.grains_per_kvb * size / 1000
    }
}

/// One mempool transaction with its ancestor-package aggregates.
///
/// The aggregates include the entry itself and every unconfirmed
/// ancestor still in the pool.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    /// Virtual size in bytes.
    pub size: u64,
    /// Weight units.
    pub weight: u64,
    pub fee: Amount,
    /// Fee adjusted by prioritisation, used for ordering.
    pub modified_fee: Amount,
    pub sigop_cost: u64,
    pub count_with_ancestors: u64,
    pub size_with_ancestors: u64,
    pub fees_with_ancestors: Amount,
    pub sigops_with_ancestors: u64,
}

impl MempoolEntry {
    /// Feerate of this entry alone, for priority logging.
    pub fn fee_rate(&self) -> FeeRate {
        if self.size == 0 {
            FeeRate::new(0)
        } else {
            FeeRate::new(self.modified_fee * 1000 / self.size)
        }
    }
}

/// Compare two ancestor packages by feerate, then txid for a stable
/// total order. Cross-multiplied so no precision is lost.
pub fn ancestor_feerate_cmp(
    a_fees: Amount,
    a_size: u64,
    a_txid: &Hash256,
    b_fees: Amount,
    b_size: u64,
    b_txid: &Hash256,
) -> Ordering {
    let lhs = u128::from(a_fees) * u128::from(b_size);
    let rhs = u128::from(b_fees) * u128::from(a_size);
    lhs.cmp(&rhs).then_with(|| a_txid.cmp(b_txid))
}

/// Read access to the mempool during assembly.
///
/// The caller is expected to hold whatever lock the implementation needs
/// for the duration of one assembly run, so the iteration order and the
/// aggregates stay mutually consistent.
pub trait MempoolView: Send + Sync {
    /// All txids, best ancestor feerate first.
    fn txids_by_ancestor_feerate(&self) -> Vec<Hash256>;

    fn entry(&self, txid: &Hash256) -> Option<MempoolEntry>;

    /// Unconfirmed ancestors of `txid`, excluding itself.
    fn ancestors(&self, txid: &Hash256) -> Vec<Hash256>;

    /// In-pool descendants of `txid`, excluding itself.
    fn descendants(&self, txid: &Hash256) -> Vec<Hash256>;

    /// Monotonic counter bumped on every mempool change; miners use it
    /// to notice staleness.
    fn transactions_updated(&self) -> u64;
}
