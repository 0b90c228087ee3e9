use serde::{Deserialize, Serialize};

use crate::consensus::params::ConsensusParams;
use crate::crypto::hash::{double_sha256, minotaur_hash_arbitrary};
use crate::types::transaction::Transaction;
use crate::types::Hash256;
use crate::util::merkle::merkle_root;

/// Which production path minted a block, decided by the header nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVariantKind {
    Pow,
    Hive,
    Pop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        time: u64,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            time,
            bits,
            nonce,
        }
    }

    /// Block identity hash: double-SHA256 over the serialized header.
    pub fn hash(&self) -> Hash256 {
        double_sha256(&bincode::serialize(self).unwrap_or_default())
    }

    /// Proof-of-work hash, distinct from the identity hash: Minotaur over
    /// the hex of the serialized header.
    pub fn pow_hash(&self) -> Hash256 {
        let encoded = bincode::serialize(self).unwrap_or_default();
        minotaur_hash_arbitrary(&hex::encode(encoded))
    }

    /// Hive blocks are flagged by a reserved nonce value.
    pub fn is_hive_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.hive_nonce_marker
    }

    /// Pop blocks likewise.
    pub fn is_pop_mined(&self, params: &ConsensusParams) -> bool {
        self.nonce == params.pop_nonce_marker
    }

    pub fn variant(&self, params: &ConsensusParams) -> BlockVariantKind {
        if self.is_hive_mined(params) {
            BlockVariantKind::Hive
        } else if self.is_pop_mined(params) {
            BlockVariantKind::Pop
        } else {
            BlockVariantKind::Pow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Merkle root over the txids in block order.
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&txids)
    }

    /// Recompute and store the merkle root; call after any coinbase edit.
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.compute_merkle_root();
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}
