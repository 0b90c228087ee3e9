//! In-memory collaborators for miner tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use secp256k1::{Secp256k1, SecretKey};

use lodelib::chain::{
    BlockSubmitter, Coin, HeaderIndex, IndexEntry, NetStatus, UtxoView,
};
use lodelib::consensus::params::ConsensusParams;
use lodelib::crypto::signature::{key_id, sign_compact};
use lodelib::mempool::{ancestor_feerate_cmp, MempoolEntry, MempoolView};
use lodelib::script::{script_for_key_id, Script};
use lodelib::types::block::Block;
use lodelib::types::difficulty::target_to_compact;
use lodelib::types::transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
use lodelib::types::{Hash256, KeyId};
use lodelib::wallet::{DctInfo, ReservedScript, WalletError, WalletFacade};

pub(crate) fn easy_params() -> ConsensusParams {
    ConsensusParams::regtest()
}

/// Mutable in-memory chain.
pub(crate) struct MockChain {
    entries: Mutex<HashMap<Hash256, IndexEntry>>,
    tip: Mutex<Hash256>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tip: Mutex::new([0u8; 32]),
        }
    }

    pub fn with_pow_blocks(params: &ConsensusParams, count: u64) -> Self {
        let chain = Self::new();
        for _ in 0..count {
            chain.push_pow_block(params);
        }
        chain
    }

    fn push_entry(&self, bits: u32, nonce: u32, spacing: u64) -> IndexEntry {
        let mut entries = self.entries.lock().unwrap();
        let mut tip = self.tip.lock().unwrap();
        let (height, time, prev) = match entries.get(&*tip) {
            Some(t) => (t.height + 1, t.time + spacing, t.hash),
            None => (0, 1_000_000, [0u8; 32]),
        };
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&(height + 1).to_le_bytes());
        hash[9] = 0xcc;
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

    pub fn push_pow_block(&self, params: &ConsensusParams) -> IndexEntry {
        self.push_entry(
            target_to_compact(params.pow_limit),
            0,
            params.pow_target_spacing,
        )
    }

    pub fn push_hive_block(&self, params: &ConsensusParams) -> IndexEntry {
        self.push_entry(
            target_to_compact(params.pow_limit_hive),
            params.hive_nonce_marker,
            1,
        )
    }

    /// Append a freshly mined block's header to the index.
    pub fn accept_block(&self, block: &Block) {
        let mut entries = self.entries.lock().unwrap();
        let mut tip = self.tip.lock().unwrap();
        let height = entries.get(&*tip).map(|t| t.height + 1).unwrap_or(0);
        let entry = IndexEntry::from_header(&block.header, height);
        *tip = entry.hash;
        entries.insert(entry.hash, entry);
    }
}

impl HeaderIndex for MockChain {
    fn entry(&self, hash: &Hash256) -> Option<IndexEntry> {
        self.entries.lock().unwrap().get(hash).cloned()
    }
    fn tip(&self) -> IndexEntry {
        self.entries.lock().unwrap()[&*self.tip.lock().unwrap()].clone()
    }
}

/// Mempool mock that maintains real ancestor aggregates.
#[derive(Default)]
pub(crate) struct MockMempool {
    entries: Mutex<HashMap<Hash256, MempoolEntry>>,
    parents: Mutex<HashMap<Hash256, Vec<Hash256>>>,
    children: Mutex<HashMap<Hash256, Vec<Hash256>>>,
    updated: AtomicU64,
}

impl MockMempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A distinct dummy transaction per tag.
    pub fn dummy_tx(tag: u8, outputs: Vec<TransactionOutput>) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new(
                OutPoint::new([tag; 32], 0),
                Script::new(),
                u32::MAX,
            )],
            outputs,
            0,
        )
    }

    fn transitive(&self, txid: &Hash256, edges: &HashMap<Hash256, Vec<Hash256>>) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        let mut stack = edges.get(txid).cloned().unwrap_or_default();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(edges.get(&next).cloned().unwrap_or_default());
                out.push(next);
            }
        }
        out
    }

    /// Insert a transaction with explicit stats and direct parents;
    /// ancestor aggregates are derived.
    pub fn add_tx(
        &self,
        tx: Transaction,
        fee: u64,
        size: u64,
        sigop_cost: u64,
        parents: &[Hash256],
    ) -> Hash256 {
        let txid = tx.txid();
        self.parents.lock().unwrap().insert(txid, parents.to_vec());
        for parent in parents {
            self.children
                .lock()
                .unwrap()
                .entry(*parent)
                .or_default()
                .push(txid);
        }

        let ancestors = self.transitive(&txid, &self.parents.lock().unwrap());
        let entries = self.entries.lock().unwrap();
        let mut size_wa = size;
        let mut fees_wa = fee;
        let mut sigops_wa = sigop_cost;
        for anc in &ancestors {
            let anc_entry = &entries[anc];
            size_wa += anc_entry.size;
            fees_wa += anc_entry.modified_fee;
            sigops_wa += anc_entry.sigop_cost;
        }
        drop(entries);

        let entry = MempoolEntry {
            txid,
            tx,
            size,
            weight: size * 4,
            fee,
            modified_fee: fee,
            sigop_cost,
            count_with_ancestors: ancestors.len() as u64 + 1,
            size_with_ancestors: size_wa,
            fees_with_ancestors: fees_wa,
            sigops_with_ancestors: sigops_wa,
        };
        self.entries.lock().unwrap().insert(txid, entry);
        self.updated.fetch_add(1, Ordering::Relaxed);
        txid
    }

    pub fn bump(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }
}

impl MempoolView for MockMempool {
    fn txids_by_ancestor_feerate(&self) -> Vec<Hash256> {
        let entries = self.entries.lock().unwrap();
        let mut txids: Vec<Hash256> = entries.keys().copied().collect();
        txids.sort_by(|a, b| {
            let ea = &entries[a];
            let eb = &entries[b];
            // Descending: best package first
            ancestor_feerate_cmp(
                eb.fees_with_ancestors,
                eb.size_with_ancestors,
                b,
                ea.fees_with_ancestors,
                ea.size_with_ancestors,
                a,
            )
        });
        txids
    }

    fn entry(&self, txid: &Hash256) -> Option<MempoolEntry> {
        self.entries.lock().unwrap().get(txid).cloned()
    }

    fn ancestors(&self, txid: &Hash256) -> Vec<Hash256> {
        self.transitive(txid, &self.parents.lock().unwrap())
    }

    fn descendants(&self, txid: &Hash256) -> Vec<Hash256> {
        self.transitive(txid, &self.children.lock().unwrap())
    }

    fn transactions_updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }
}

struct MockReserved {
    script: Script,
    kept: Arc<AtomicBool>,
}

impl ReservedScript for MockReserved {
    fn script(&self) -> Script {
        self.script.clone()
    }
    fn keep(&self) {
        self.kept.store(true, Ordering::Relaxed);
    }
}

/// Wallet with deterministic keys and configurable DCTs.
pub(crate) struct MockWallet {
    keys: Mutex<HashMap<KeyId, SecretKey>>,
    payout_key: KeyId,
    dcts: Mutex<Vec<DctInfo>>,
    pub kept: Arc<AtomicBool>,
    pub unlocked: AtomicBool,
}

impl MockWallet {
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x51u8; 32]).unwrap();
        let id = key_id(&secret.public_key(&secp));
        let mut keys = HashMap::new();
        keys.insert(id, secret);
        Self {
            keys: Mutex::new(keys),
            payout_key: id,
            dcts: Mutex::new(Vec::new()),
            kept: Arc::new(AtomicBool::new(false)),
            unlocked: AtomicBool::new(true),
        }
    }

    pub fn payout_script(&self) -> Script {
        script_for_key_id(&self.payout_key)
    }

    pub fn add_key(&self, secret: SecretKey) -> KeyId {
        let secp = Secp256k1::new();
        let id = key_id(&secret.public_key(&secp));
        self.keys.lock().unwrap().insert(id, secret);
        id
    }

    pub fn push_dct(&self, dct: DctInfo) {
        self.dcts.lock().unwrap().push(dct);
    }
}

impl WalletFacade for MockWallet {
    fn is_available(&self) -> bool {
        true
    }
    fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Relaxed)
    }

    fn reserve_coinbase_script(&self) -> Result<Box<dyn ReservedScript>, WalletError> {
        Ok(Box::new(MockReserved {
            script: self.payout_script(),
            kept: Arc::clone(&self.kept),
        }))
    }

    fn sign_compact(&self, id: &KeyId, digest: &Hash256) -> Result<[u8; 65], WalletError> {
        let keys = self.keys.lock().unwrap();
        let secret = keys
            .get(id)
            .ok_or_else(|| WalletError::UnknownKey(hex::encode(id)))?;
        Ok(sign_compact(secret, digest)?)
    }

    fn dcts(&self, _tip_height: u64, _params: &ConsensusParams) -> Vec<DctInfo> {
        self.dcts.lock().unwrap().clone()
    }
}

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

/// UTXO view backed by a map.
#[derive(Default)]
pub(crate) struct MockUtxo {
    coins: Mutex<HashMap<OutPoint, Coin>>,
}

impl MockUtxo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, outpoint: OutPoint, coin: Coin) {
        self.coins.lock().unwrap().insert(outpoint, coin);
    }
}

impl UtxoView for MockUtxo {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.lock().unwrap().get(outpoint).cloned()
    }
}

/// A block reader with nothing in it; validation then depends entirely
/// on the UTXO view.
pub(crate) struct EmptyBlockReader;

impl lodelib::chain::BlockReader for EmptyBlockReader {
    fn block(&self, _hash: &Hash256) -> Option<Block> {
        None
    }
    fn tx_by_hash_and_height(&self, _txid: &Hash256, _height: u64) -> Option<Transaction> {
        None
    }
}

/// Records submitted blocks; optionally extends a chain so on-demand
/// miners observe their own block.
pub(crate) struct RecordingSubmitter {
    blocks: Mutex<Vec<Block>>,
    extend: Option<Arc<MockChain>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            extend: None,
        }
    }

    pub fn extending(chain: Arc<MockChain>) -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            extend: Some(chain),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    pub fn submissions(&self) -> Vec<Block> {
        self.blocks.lock().unwrap().clone()
    }
}

impl BlockSubmitter for RecordingSubmitter {
    fn process_new_block(&self, block: &Block) -> bool {
        self.blocks.lock().unwrap().push(block.clone());
        if let Some(chain) = &self.extend {
            chain.accept_block(block);
        }
        true
    }
}
