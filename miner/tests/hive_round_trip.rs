//! End-to-end hive lifecycle: a wallet holding a mature DCT wins the
//! dwarf lottery, the engine assembles and submits a hive block, and the
//! consensus validator accepts exactly that block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use secp256k1::{Secp256k1, SecretKey};

use lode_miner::{BlockAssembler, AssemblerOptions, BlockVariant, HiveConfig, HiveEngine};
use lodelib::chain::{
    BlockReader, BlockSubmitter, Coin, HeaderIndex, IndexEntry, NetStatus, UtxoView,
};
use lodelib::consensus::params::ConsensusParams;
use lodelib::crypto::signature::{key_id, sign_compact};
use lodelib::mempool::{MempoolEntry, MempoolView};
use lodelib::script::{dct_script, script_for_key_id, HiveProof, Script};
use lodelib::types::block::Block;
use lodelib::types::difficulty::target_to_compact;
use lodelib::types::transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
use lodelib::types::{Hash256, KeyId};
use lodelib::validation::hive::{check_hive_proof, HiveProofError};
use lodelib::wallet::{DctInfo, DwarfStatus, ReservedScript, WalletError, WalletFacade};

struct SimpleChain {
    entries: Mutex<HashMap<Hash256, IndexEntry>>,
    tip: Mutex<Hash256>,
}

impl SimpleChain {
    fn with_pow_blocks(params: &ConsensusParams, count: u64) -> Self {
        let chain = Self {
            entries: Mutex::new(HashMap::new()),
            tip: Mutex::new([0u8; 32]),
        };
        for _ in 0..count {
            chain.push(target_to_compact(params.pow_limit), 0);
        }
        chain
    }

    fn push(&self, bits: u32, nonce: u32) -> IndexEntry {
        let mut entries = self.entries.lock().unwrap();
        let mut tip = self.tip.lock().unwrap();
        let (height, time, prev) = match entries.get(&*tip) {
            Some(t) => (t.height + 1, t.time + 120, t.hash),
            None => (0, 1_000_000, [0u8; 32]),
        };
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&(height + 1).to_le_bytes());
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

impl HeaderIndex for SimpleChain {
    fn entry(&self, hash: &Hash256) -> Option<IndexEntry> {
        self.entries.lock().unwrap().get(hash).cloned()
    }
    fn tip(&self) -> IndexEntry {
        self.entries.lock().unwrap()[&*self.tip.lock().unwrap()].clone()
    }
}

#[derive(Default)]
struct EmptyMempool;

impl MempoolView for EmptyMempool {
    fn txids_by_ancestor_feerate(&self) -> Vec<Hash256> {
        Vec::new()
    }
    fn entry(&self, _txid: &Hash256) -> Option<MempoolEntry> {
        None
    }
    fn ancestors(&self, _txid: &Hash256) -> Vec<Hash256> {
        Vec::new()
    }
    fn descendants(&self, _txid: &Hash256) -> Vec<Hash256> {
        Vec::new()
    }
    fn transactions_updated(&self) -> u64 {
        0
    }
}

#[derive(Default)]
struct SimpleUtxo {
    coins: Mutex<HashMap<OutPoint, Coin>>,
}

impl UtxoView for SimpleUtxo {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.lock().unwrap().get(outpoint).cloned()
    }
}

#[derive(Default)]
struct NoBlocks;

impl BlockReader for NoBlocks {
    fn block(&self, _hash: &Hash256) -> Option<Block> {
        None
    }
    fn tx_by_hash_and_height(&self, _txid: &Hash256, _height: u64) -> Option<Transaction> {
        None
    }
}

struct OnePeer;

impl NetStatus for OnePeer {
    fn peer_count(&self) -> usize {
        1
    }
    fn is_initial_block_download(&self) -> bool {
        false
    }
}

struct KeyWallet {
    keys: HashMap<KeyId, SecretKey>,
    dcts: Vec<DctInfo>,
}

struct StaticReserved(Script, Arc<AtomicBool>);

impl ReservedScript for StaticReserved {
    fn script(&self) -> Script {
        self.0.clone()
    }
    fn keep(&self) {
        self.1.store(true, Ordering::Relaxed);
    }
}

impl WalletFacade for KeyWallet {
    fn is_available(&self) -> bool {
        true
    }
    fn is_unlocked(&self) -> bool {
        true
    }
    fn reserve_coinbase_script(&self) -> Result<Box<dyn ReservedScript>, WalletError> {
        let id = *self.keys.keys().next().ok_or(WalletError::KeypoolExhausted)?;
        Ok(Box::new(StaticReserved(
            script_for_key_id(&id),
            Arc::new(AtomicBool::new(false)),
        )))
    }
    fn sign_compact(&self, id: &KeyId, digest: &Hash256) -> Result<[u8; 65], WalletError> {
        let key = self
            .keys
            .get(id)
            .ok_or_else(|| WalletError::UnknownKey(hex::encode(id)))?;
        Ok(sign_compact(key, digest)?)
    }
    fn dcts(&self, _tip_height: u64, _params: &ConsensusParams) -> Vec<DctInfo> {
        self.dcts.clone()
    }
}

#[derive(Default)]
struct CollectSubmitter {
    blocks: Mutex<Vec<Block>>,
}

impl BlockSubmitter for CollectSubmitter {
    fn process_new_block(&self, block: &Block) -> bool {
        self.blocks.lock().unwrap().push(block.clone());
        true
    }
}

fn dct_transaction(params: &ConsensusParams, reward_script: &Script, dwarves: u64) -> Transaction {
    let creation = params.creation_script().unwrap();
    Transaction::new(
        1,
        vec![TransactionInput::new(
            OutPoint::new([0x77u8; 32], 0),
            Script::new(),
            u32::MAX,
        )],
        vec![TransactionOutput::new(
            dwarves * params.dwarf_cost,
            dct_script(&creation, reward_script),
        )],
        0,
    )
}

#[test]
fn hive_block_round_trips_through_the_validator() {
    let params = ConsensusParams::regtest();
    let chain = Arc::new(SimpleChain::with_pow_blocks(&params, 30));

    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x2au8; 32]).unwrap();
    let reward_id = key_id(&secret.public_key(&secp));
    let reward_script = script_for_key_id(&reward_id);

    let dwarves = 64u64;
    let dct_tx = dct_transaction(&params, &reward_script, dwarves);
    let txid = dct_tx.txid();
    let dct_height = 12u64;

    let utxo = Arc::new(SimpleUtxo::default());
    utxo.coins.lock().unwrap().insert(
        OutPoint::new(txid, 0),
        Coin {
            value: dct_tx.outputs[0].value,
            script_pubkey: dct_tx.outputs[0].script_pubkey.clone(),
            height: dct_height,
        },
    );

    let wallet = Arc::new(KeyWallet {
        keys: HashMap::from([(reward_id, secret)]),
        dcts: vec![DctInfo {
            txid_hex: hex::encode(txid),
            txid,
            reward_address: hex::encode(reward_id),
            community_contrib: false,
            dwarf_count: dwarves as u32,
            status: DwarfStatus::Mature,
        }],
    });

    let submitter = Arc::new(CollectSubmitter::default());
    let engine = HiveEngine::new(
        Arc::clone(&chain) as Arc<dyn HeaderIndex>,
        Arc::new(EmptyMempool),
        Arc::clone(&wallet) as Arc<dyn WalletFacade>,
        Arc::clone(&utxo) as Arc<dyn UtxoView>,
        Arc::new(OnePeer),
        Arc::clone(&submitter) as Arc<dyn BlockSubmitter>,
        params.clone(),
        HiveConfig {
            check_threads: 2,
            early_out: false,
            ..HiveConfig::default()
        },
    );

    let mined = engine.busy_dwarves(chain.tip().height).unwrap();
    assert!(mined, "with 64 dwarves and a half-range target a win is certain");

    let blocks = submitter.blocks.lock().unwrap();
    assert_eq!(blocks.len(), 1, "exactly one winner per sweep");
    let block = &blocks[0];

    // Header marks the hive variant and extends the current tip
    assert_eq!(block.header.nonce, params.hive_nonce_marker);
    assert_eq!(block.header.prev_block_hash, chain.tip().hash);

    // The validator accepts the engine's proof at the same tip
    check_hive_proof(block, &*chain, &*utxo, &NoBlocks, &params).unwrap();

    // The parsed proof names the DCT where the chain actually holds it
    let proof = HiveProof::decode(&block.transactions[0].outputs[0].script_pubkey).unwrap();
    assert_eq!(u64::from(proof.dct_height), dct_height);
    assert_eq!(proof.txid_hex, hex::encode(txid));
    assert!(u64::from(proof.dwarf_nonce) < dwarves);
    assert!(!proof.community_contrib);

    // Tampering with the claimed height must not survive validation
    let mut tampered = block.clone();
    let mut bad = proof.clone();
    bad.dct_height += 1;
    tampered.transactions[0].outputs[0].script_pubkey = bad.encode();
    tampered.update_merkle_root();
    assert!(matches!(
        check_hive_proof(&tampered, &*chain, &*utxo, &NoBlocks, &params),
        Err(HiveProofError::HeightMismatch { .. })
    ));
}

#[test]
fn pow_template_extends_tip_and_pays_subsidy() {
    let params = ConsensusParams::regtest();
    let chain = SimpleChain::with_pow_blocks(&params, 30);
    let mempool = EmptyMempool;
    let payout = script_for_key_id(&[0x09u8; 20]);

    let template = BlockAssembler::new(&chain, &mempool, &params, AssemblerOptions::default())
        .create_block(&payout, BlockVariant::Pow)
        .unwrap()
        .unwrap();

    let tip = chain.tip();
    assert_eq!(template.block.header.prev_block_hash, tip.hash);
    assert!(template.block.header.time > tip.time);
    let paid: u64 = template.block.transactions[0]
        .outputs
        .iter()
        .map(|o| o.value)
        .sum();
    assert_eq!(
        paid,
        lodelib::consensus::subsidy::pow_subsidy(tip.height + 1, &params)
    );
}
