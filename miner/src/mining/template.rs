//! Block template assembly.
//!
//! Builds candidate blocks for all three production paths. Transaction
//! selection orders the mempool by ancestor feerate and pulls whole
//! packages (a transaction plus its unconfirmed ancestors); a modified
//! overlay re-scores entries whose ancestors have already been placed in
//! the block.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use lodelib::chain::{median_time_past, HeaderIndex};
use lodelib::consensus::params::ConsensusParams;
use lodelib::consensus::retarget::{next_hive_work, next_pow_work};
use lodelib::consensus::subsidy::{hive_subsidy, pop_subsidy, pow_subsidy};
use lodelib::crypto::hash::double_sha256;
use lodelib::mempool::{ancestor_feerate_cmp, FeeRate, MempoolEntry, MempoolView};
use lodelib::script::{coinbase_script_sig, Script, OP_RETURN, OP_TRUE};
use lodelib::types::block::{Block, BlockHeader};
use lodelib::types::difficulty::target_to_compact;
use lodelib::types::transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
use lodelib::types::units::{Amount, MAX_BLOCK_WEIGHT, MAX_BLOCK_SIGOPS_COST, WITNESS_SCALE_FACTOR};
use lodelib::types::Hash256;
use lodelib::util::merkle::merkle_root;
use lodelib::util::time::adjusted_time;

use super::MiningError;

/// Weight reserved for the coinbase transaction.
const COINBASE_WEIGHT_RESERVE: u64 = 4000;
/// Sigop cost reserved for the coinbase transaction.
const COINBASE_SIGOPS_RESERVE: u64 = 400;
/// Default cap when no `-blockmaxweight` override is given.
pub const DEFAULT_BLOCK_MAX_WEIGHT: u64 = MAX_BLOCK_WEIGHT - 4000;
/// Default `-blockmintxfee`, in grains per kvB.
pub const DEFAULT_BLOCK_MIN_TX_FEE: u64 = 1000;
/// Default header version when no soft-fork signalling override applies.
pub const DEFAULT_BLOCK_VERSION: u32 = 0x2000_0000;
/// Give up on a near-full block after this many failed packages.
const MAX_CONSECUTIVE_FAILURES: u64 = 1000;
/// Magic prefix of the witness commitment output.
const WITNESS_COMMITMENT_MAGIC: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Which kind of block to assemble.
#[derive(Debug, Clone)]
pub enum BlockVariant {
    Pow,
    /// Hive block carrying the given proof script.
    Hive(Script),
    /// Pop block carrying the given proof script.
    Pop(Script),
}

impl BlockVariant {
    fn is_pow(&self) -> bool {
        matches!(self, BlockVariant::Pow)
    }
    fn is_pop(&self) -> bool {
        matches!(self, BlockVariant::Pop(_))
    }
}

/// Assembly knobs, mirroring the node's command-line flags.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AssemblerOptions {
    /// `-blockmaxweight`; clamped to sane bounds by the assembler.
    pub block_max_weight: u64,
    /// `-blockmintxfee`.
    pub block_min_fee_rate: FeeRate,
    /// `-blockversion` (regtest only).
    pub block_version: Option<u32>,
    /// `-printpriority`.
    pub print_priority: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            block_max_weight: DEFAULT_BLOCK_MAX_WEIGHT,
            block_min_fee_rate: FeeRate::new(DEFAULT_BLOCK_MIN_TX_FEE),
            block_version: None,
            print_priority: false,
        }
    }
}

/// A candidate block plus the per-transaction bookkeeping the miner and
/// RPC layers need.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    /// Fee of each transaction; entry 0 is the negated total.
    pub tx_fees: Vec<i64>,
    /// Sigop cost of each transaction.
    pub tx_sigop_costs: Vec<i64>,
    /// Witness commitment bytes, empty before witness activation.
    pub coinbase_commitment: Vec<u8>,
}

/// A mempool entry whose ancestor aggregates have been reduced by the
/// ancestors already placed in the block.
#[derive(Debug, Clone)]
struct ModifiedEntry {
    size_with_ancestors: u64,
    fees_with_ancestors: Amount,
    sigops_with_ancestors: u64,
}

/// Ordering key for the modified overlay: ancestor feerate, then txid.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModKey {
    fees: Amount,
    size: u64,
    txid: Hash256,
}

impl Ord for ModKey {
    fn cmp(&self, other: &Self) -> Ordering {
        ancestor_feerate_cmp(
            self.fees, self.size, &self.txid, other.fees, other.size, &other.txid,
        )
    }
}

impl PartialOrd for ModKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct BlockAssembler<'a> {
    chain: &'a dyn HeaderIndex,
    mempool: &'a dyn MempoolView,
    params: &'a ConsensusParams,
    options: AssemblerOptions,

    // Per-run selection state
    in_block: HashSet<Hash256>,
    selected: Vec<MempoolEntry>,
    block_weight: u64,
    block_sigops: u64,
    block_tx_count: u64,
    fees: Amount,
    include_witness: bool,
    include_dcts: bool,
    height: u64,
    lock_time_cutoff: u64,
}

impl<'a> BlockAssembler<'a> {
    pub fn new(
        chain: &'a dyn HeaderIndex,
        mempool: &'a dyn MempoolView,
        params: &'a ConsensusParams,
        mut options: AssemblerOptions,
    ) -> Self {
        // Keep the weight cap inside [4K, MAX-4K] for sanity
        options.block_max_weight = options
            .block_max_weight
            .clamp(4000, MAX_BLOCK_WEIGHT - 4000);
        Self {
            chain,
            mempool,
            params,
            options,
            in_block: HashSet::new(),
            selected: Vec::new(),
            block_weight: COINBASE_WEIGHT_RESERVE,
            block_sigops: COINBASE_SIGOPS_RESERVE,
            block_tx_count: 0,
            fees: 0,
            include_witness: false,
            include_dcts: true,
            height: 0,
            lock_time_cutoff: 0,
        }
    }

    fn reset(&mut self) {
        self.in_block.clear();
        self.selected.clear();
        self.block_weight = COINBASE_WEIGHT_RESERVE;
        self.block_sigops = COINBASE_SIGOPS_RESERVE;
        self.block_tx_count = 0;
        self.fees = 0;
        self.include_witness = false;
        self.include_dcts = true;
    }

    /// Build a template for the requested variant, or `Ok(None)` when a
    /// pop request cannot currently be satisfied (pop assembly runs on
    /// event-handler threads and must not throw).
    pub fn create_block(
        &mut self,
        payout_script: &Script,
        variant: BlockVariant,
    ) -> Result<Option<BlockTemplate>, MiningError> {
        self.reset();

        let tip = self.chain.tip();
        self.height = tip.height + 1;
        self.include_witness = self.height >= self.params.witness_activation_height;
        // Hive and pop blocks must not carry DCTs
        self.include_dcts = variant.is_pow();

        let mut version = DEFAULT_BLOCK_VERSION;
        if self.params.mine_blocks_on_demand {
            if let Some(v) = self.options.block_version {
                version = v;
            }
        }

        let mtp = median_time_past(self.chain, &tip);
        let time = std::cmp::max(mtp + 1, adjusted_time());
        self.lock_time_cutoff = mtp;

        let (packages, descendants_updated) = self.select_packages();

        // Coinbase per variant
        let mut tx_fees: Vec<i64> = vec![-(self.fees as i64)];
        let mut tx_sigop_costs: Vec<i64> = vec![0];
        let subsidy = match &variant {
            BlockVariant::Pow => pow_subsidy(self.height, self.params),
            BlockVariant::Hive(_) => hive_subsidy(self.params),
            BlockVariant::Pop(proof) => {
                let private = proof.as_bytes().get(36) == Some(&OP_TRUE);
                pop_subsidy(private, self.params)
            }
        };

        let mut outputs = Vec::new();
        match &variant {
            BlockVariant::Pow => {
                outputs.push(TransactionOutput::new(self.fees + subsidy, payout_script.clone()));
            }
            BlockVariant::Hive(proof) | BlockVariant::Pop(proof) => {
                outputs.push(TransactionOutput::new(0, proof.clone()));
                outputs.push(TransactionOutput::new(self.fees + subsidy, payout_script.clone()));
            }
        }

        let mut coinbase = Transaction::new(
            1,
            vec![TransactionInput::new(
                OutPoint::null(),
                coinbase_script_sig(self.height, 0),
                u32::MAX,
            )],
            outputs,
            0,
        );

        let mut transactions: Vec<Transaction> =
            self.selected.iter().map(|entry| entry.tx.clone()).collect();

        // Witness commitment, appended as the final coinbase output
        let coinbase_commitment = if self.include_witness {
            let commitment = witness_commitment(&transactions);
            coinbase.outputs.push(TransactionOutput::new(
                0,
                commitment_script(&commitment),
            ));
            commitment
        } else {
            Vec::new()
        };

        tx_sigop_costs[0] = (WITNESS_SCALE_FACTOR * coinbase.legacy_sigop_count()) as i64;
        for entry in &self.selected {
            tx_fees.push(entry.fee as i64);
            tx_sigop_costs.push(entry.sigop_cost as i64);
        }

        let mut all_txs = vec![coinbase];
        all_txs.append(&mut transactions);

        let bits = match &variant {
            BlockVariant::Pow => next_pow_work(self.chain, &tip, time, self.params)?,
            BlockVariant::Hive(_) => next_hive_work(self.chain, &tip, self.params)?,
            BlockVariant::Pop(_) => target_to_compact(self.params.pow_limit),
        };
        let nonce = match &variant {
            BlockVariant::Pow => 0,
            BlockVariant::Hive(_) => self.params.hive_nonce_marker,
            BlockVariant::Pop(_) => self.params.pop_nonce_marker,
        };

        let header = BlockHeader::new(version, tip.hash, [0u8; 32], time, bits, nonce);
        let mut block = Block::new(header, all_txs);
        block.update_merkle_root();

        info!(
            weight = self.block_weight,
            txs = self.block_tx_count,
            fees = self.fees,
            sigops = self.block_sigops,
            packages,
            descendants_updated,
            "create_block: assembled"
        );

        // Pretend-validate against the tip before handing the template
        // out; a self-built invalid block is a bug for PoW and hive
        if let Err(reason) = self.test_block_validity(&block, subsidy) {
            if variant.is_pop() {
                warn!(reason, "create_block: pop template failed validity");
                return Ok(None);
            }
            return Err(MiningError::InvalidTemplate(reason));
        }

        Ok(Some(BlockTemplate {
            block,
            tx_fees,
            tx_sigop_costs,
            coinbase_commitment,
        }))
    }

    /// Would the package still fit?
    fn test_package(&self, package_size: u64, package_sigops: u64) -> bool {
        if self.block_weight + WITNESS_SCALE_FACTOR * package_size >= self.options.block_max_weight
        {
            return false;
        }
        if self.block_sigops + package_sigops >= MAX_BLOCK_SIGOPS_COST {
            return false;
        }
        true
    }

    /// Transaction-level checks: finality, premature witness, and DCT
    /// exclusion in hive/pop blocks.
    fn test_package_transactions(&self, package: &[MempoolEntry]) -> bool {
        let Ok(creation_script) = self.params.creation_script() else {
            return false;
        };
        let cost = lodelib::consensus::subsidy::dwarf_cost(self.height, self.params);
        for entry in package {
            if !entry.tx.is_final(self.height, self.lock_time_cutoff) {
                return false;
            }
            if !self.include_witness && entry.tx.has_witness() {
                return false;
            }
            if !self.include_dcts && entry.tx.dct_payment(&creation_script, cost).is_some() {
                return false;
            }
        }
        true
    }

    fn add_to_block(&mut self, entry: MempoolEntry) {
        self.block_weight += entry.weight;
        self.block_sigops += entry.sigop_cost;
        self.fees += entry.fee;
        self.block_tx_count += 1;
        self.in_block.insert(entry.txid);
        if self.options.print_priority {
            info!(
                fee_rate = entry.fee_rate().grains_per_kvb(),
                txid = %hex::encode(entry.txid),
                "add_to_block"
            );
        }
        self.selected.push(entry);
    }

    /// Walk the in-pool descendants of newly added transactions and
    /// fold the inclusion into the modified overlay.
    fn update_packages_for_added(
        &self,
        added: &[MempoolEntry],
        modified: &mut HashMap<Hash256, ModifiedEntry>,
        order: &mut BTreeSet<ModKey>,
    ) -> u64 {
        let mut descendants_updated = 0;
        for added_entry in added {
            for desc_txid in self.mempool.descendants(&added_entry.txid) {
                if self.in_block.contains(&desc_txid) {
                    continue;
                }
                let Some(desc) = self.mempool.entry(&desc_txid) else {
                    continue;
                };
                descendants_updated += 1;

                let current = modified.get(&desc_txid).cloned().unwrap_or(ModifiedEntry {
                    size_with_ancestors: desc.size_with_ancestors,
                    fees_with_ancestors: desc.fees_with_ancestors,
                    sigops_with_ancestors: desc.sigops_with_ancestors,
                });
                order.remove(&ModKey {
                    fees: current.fees_with_ancestors,
                    size: current.size_with_ancestors,
                    txid: desc_txid,
                });

                let updated = ModifiedEntry {
                    size_with_ancestors: current.size_with_ancestors - added_entry.size,
                    fees_with_ancestors: current
                        .fees_with_ancestors
                        .saturating_sub(added_entry.modified_fee),
                    sigops_with_ancestors: current.sigops_with_ancestors
                        - added_entry.sigop_cost,
                };
                order.insert(ModKey {
                    fees: updated.fees_with_ancestors,
                    size: updated.size_with_ancestors,
                    txid: desc_txid,
                });
                modified.insert(desc_txid, updated);
            }
        }
        descendants_updated
    }

    /// Ancestor-feerate package selection.
    ///
    /// Walks the mempool's ancestor-feerate order in parallel with the
    /// best entry of the modified overlay, always taking the higher of
    /// the two, until the block is full or the remaining packages pay
    /// below the floor. Returns (packages selected, descendants
    /// updated).
    fn select_packages(&mut self) -> (u64, u64) {
        let mut modified: HashMap<Hash256, ModifiedEntry> = HashMap::new();
        let mut order: BTreeSet<ModKey> = BTreeSet::new();
        let mut failed: HashSet<Hash256> = HashSet::new();

        let by_feerate = self.mempool.txids_by_ancestor_feerate();
        let mut mi = by_feerate.into_iter().peekable();

        let mut packages_selected = 0;
        let mut descendants_updated = 0;
        let mut consecutive_failures: u64 = 0;

        loop {
            // Skip pool entries already placed, failed, or shadowed by a
            // modified counterpart
            while let Some(txid) = mi.peek() {
                if self.in_block.contains(txid)
                    || failed.contains(txid)
                    || modified.contains_key(txid)
                {
                    mi.next();
                } else {
                    break;
                }
            }

            let best_modified = order.iter().next_back().cloned();

            // Pick the better of the pool iterator and the overlay
            let (candidate_txid, using_modified) = match (mi.peek().copied(), &best_modified)
            {
                (None, None) => break,
                (None, Some(key)) => (key.txid, true),
                (Some(pool_txid), maybe_key) => {
                    let Some(pool_entry) = self.mempool.entry(&pool_txid) else {
                        mi.next();
                        continue;
                    };
                    match maybe_key {
                        Some(key)
                            if ancestor_feerate_cmp(
                                key.fees,
                                key.size,
                                &key.txid,
                                pool_entry.fees_with_ancestors,
                                pool_entry.size_with_ancestors,
                                &pool_txid,
                            ) == Ordering::Greater =>
                        {
                            (key.txid, true)
                        }
                        _ => {
                            mi.next();
                            (pool_txid, false)
                        }
                    }
                }
            };

            let Some(candidate) = self.mempool.entry(&candidate_txid) else {
                if using_modified {
                    if let Some(key) = best_modified {
                        order.remove(&key);
                    }
                    modified.remove(&candidate_txid);
                }
                continue;
            };

            let (package_size, package_fees, package_sigops) = if using_modified {
                let entry = &modified[&candidate_txid];
                (
                    entry.size_with_ancestors,
                    entry.fees_with_ancestors,
                    entry.sigops_with_ancestors,
                )
            } else {
                (
                    candidate.size_with_ancestors,
                    candidate.fees_with_ancestors,
                    candidate.sigops_with_ancestors,
                )
            };

            if package_fees < self.options.block_min_fee_rate.fee_for(package_size) {
                // Everything else we might consider pays a lower rate
                return (packages_selected, descendants_updated);
            }

            if !self.test_package(package_size, package_sigops) {
                if using_modified {
                    // Drop the failed overlay entry so the next-best one
                    // surfaces on the following iteration
                    if let Some(key) = best_modified {
                        order.remove(&key);
                    }
                    modified.remove(&candidate_txid);
                    failed.insert(candidate_txid);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && self.block_weight > self.options.block_max_weight - 4000
                {
                    // Close to full and not succeeding; stop trying
                    break;
                }
                continue;
            }

            // Assemble the package: unconfirmed ancestors not yet in the
            // block, then the candidate itself
            let mut package: Vec<MempoolEntry> = self
                .mempool
                .ancestors(&candidate_txid)
                .into_iter()
                .filter(|txid| !self.in_block.contains(txid))
                .filter_map(|txid| self.mempool.entry(&txid))
                .collect();
            package.push(candidate);

            if !self.test_package_transactions(&package) {
                if using_modified {
                    if let Some(key) = best_modified {
                        order.remove(&key);
                    }
                    modified.remove(&candidate_txid);
                    failed.insert(candidate_txid);
                }
                continue;
            }

            // This package makes it in; reset the failure streak
            consecutive_failures = 0;

            // Parents before children: ancestor count is sufficient
            package.sort_by(|a, b| {
                a.count_with_ancestors
                    .cmp(&b.count_with_ancestors)
                    .then_with(|| a.txid.cmp(&b.txid))
            });

            for entry in &package {
                if let Some(existing) = modified.remove(&entry.txid) {
                    order.remove(&ModKey {
                        fees: existing.fees_with_ancestors,
                        size: existing.size_with_ancestors,
                        txid: entry.txid,
                    });
                }
            }
            for entry in package.clone() {
                self.add_to_block(entry);
            }
            packages_selected += 1;

            descendants_updated +=
                self.update_packages_for_added(&package, &mut modified, &mut order);
        }

        (packages_selected, descendants_updated)
    }

    /// Pretend-validation of a freshly assembled block against the tip.
    fn test_block_validity(&self, block: &Block, subsidy: Amount) -> Result<(), String> {
        if block.compute_merkle_root() != block.header.merkle_root {
            return Err("merkle root mismatch".to_string());
        }
        if self.block_weight > self.options.block_max_weight {
            return Err(format!("block weight {} over cap", self.block_weight));
        }
        if self.block_sigops > MAX_BLOCK_SIGOPS_COST {
            return Err(format!("sigop cost {} over cap", self.block_sigops));
        }

        let coinbase = block.coinbase().ok_or("missing coinbase")?;
        let paid: Amount = coinbase.outputs.iter().map(|out| out.value).sum();
        if paid != self.fees + subsidy {
            return Err(format!(
                "coinbase pays {paid}, expected {}",
                self.fees + subsidy
            ));
        }

        let creation_script = self.params.creation_script().map_err(|e| e.to_string())?;
        let cost = lodelib::consensus::subsidy::dwarf_cost(self.height, self.params);
        for tx in block.transactions.iter().skip(1) {
            if !tx.is_final(self.height, self.lock_time_cutoff) {
                return Err(format!("non-final transaction {}", tx.txid_hex()));
            }
            if !self.include_dcts && tx.dct_payment(&creation_script, cost).is_some() {
                return Err("DCT in a block that forbids them".to_string());
            }
        }

        debug!(height = self.height, "test_block_validity: ok");
        Ok(())
    }
}

/// Witness commitment: double-SHA256 of the witness merkle root paired
/// with a zero witness nonce. The coinbase's own wtxid slot is zero.
fn witness_commitment(rest: &[Transaction]) -> Vec<u8> {
    let mut wtxids: Vec<Hash256> = vec![[0u8; 32]];
    wtxids.extend(rest.iter().map(|tx| tx.wtxid()));
    let root = merkle_root(&wtxids);

    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(&root);
    // Second half stays zero: the witness nonce
    double_sha256(&preimage).to_vec()
}

fn commitment_script(commitment: &[u8]) -> Script {
    let mut payload = Vec::with_capacity(36);
    payload.extend_from_slice(&WITNESS_COMMITMENT_MAGIC);
    payload.extend_from_slice(commitment);
    let mut script = Script::new();
    script.push_opcode(OP_RETURN);
    script.push_data(&payload);
    script
}
