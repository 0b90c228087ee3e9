//! In-memory stand-ins for the external collaborators, shared by unit
//! tests across the crate.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::chain::{BlockReader, Coin, HeaderIndex, IndexEntry, NetStatus, UtxoView};
use crate::types::block::Block;
use crate::types::transaction::{OutPoint, Transaction};
use crate::types::Hash256;

/// Header index backed by a hash map, with an append API that chains
/// heights and times automatically.
pub(crate) struct TestIndex {
    entries: Mutex<HashMap<Hash256, IndexEntry>>,
    tip: Mutex<Hash256>,
}

impl TestIndex {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tip: Mutex::new([0u8; 32]),
        }
    }

    /// Append a block with the given spacing from its parent.
    pub fn push(&self, bits: u32, nonce: u32, spacing: u64) -> IndexEntry {
        let mut entries = self.entries.lock().unwrap();
        let mut tip = self.tip.lock().unwrap();
        let (height, time, prev) = match entries.get(&*tip) {
            Some(t) => (t.height + 1, t.time + spacing, t.hash),
            None => (0, 1_000_000, [0u8; 32]),
        };
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&(height + 1).to_le_bytes());
        hash[8] = 0xee;
        let entry = IndexEntry {
            hash,
            prev_block_hash: prev,
            height,
            time,
            bits,
            nonce,
        };
        entries.insert(hash, entry.clone());
        *tip = hash;
        entry
    }
}

impl HeaderIndex for TestIndex {
    fn entry(&self, hash: &Hash256) -> Option<IndexEntry> {
        self.entries.lock().unwrap().get(hash).cloned()
    }
    fn tip(&self) -> IndexEntry {
        self.entries.lock().unwrap()[&*self.tip.lock().unwrap()].clone()
    }
}

/// UTXO view backed by a hash map.
#[derive(Default)]
pub(crate) struct MemUtxo {
    coins: Mutex<HashMap<OutPoint, Coin>>,
}

impl MemUtxo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, outpoint: OutPoint, coin: Coin) {
        self.coins.lock().unwrap().insert(outpoint, coin);
    }

    pub fn remove(&self, outpoint: &OutPoint) {
        self.coins.lock().unwrap().remove(outpoint);
    }
}

impl UtxoView for MemUtxo {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.lock().unwrap().get(outpoint).cloned()
    }
}

/// Block store with a by-height transaction index standing in for the
/// deep drill.
#[derive(Default)]
pub(crate) struct MemBlocks {
    blocks: Mutex<HashMap<Hash256, Block>>,
    txs: Mutex<HashMap<(Hash256, u64), Transaction>>,
}

impl MemBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_block(&self, hash: Hash256, block: Block) {
        self.blocks.lock().unwrap().insert(hash, block);
    }

    pub fn insert_tx(&self, txid: Hash256, height: u64, tx: Transaction) {
        self.txs.lock().unwrap().insert((txid, height), tx);
    }
}

impl BlockReader for MemBlocks {
    fn block(&self, hash: &Hash256) -> Option<Block> {
        self.blocks.lock().unwrap().get(hash).cloned()
    }
    fn tx_by_hash_and_height(&self, txid: &Hash256, height: u64) -> Option<Transaction> {
        self.txs.lock().unwrap().get(&(*txid, height)).cloned()
    }
}

/// Fixed network conditions.
pub(crate) struct StaticNet {
    pub peers: usize,
    pub ibd: bool,
}

impl NetStatus for StaticNet {
    fn peer_count(&self) -> usize {
        self.peers
    }
    fn is_initial_block_download(&self) -> bool {
        self.ibd
    }
}
