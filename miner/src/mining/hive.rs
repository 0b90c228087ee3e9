//! The hive dwarf engine.
//!
//! Every time the tip advances, the engine gives each mature dwarf the
//! wallet owns exactly one hash attempt against the hive target. Dwarves
//! are partitioned into per-thread bins of contiguous ranges; workers
//! race under a shared solution flag, an optional watcher aborts the
//! whole sweep when the tip moves again, and the first winner's proof is
//! assembled into a hive block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use primitive_types::U256;
use tracing::{debug, error, info, warn};

use lodelib::chain::{
    deterministic_rand_string, hive_blocks_since_pow, BlockSubmitter, HeaderIndex, NetStatus,
    UtxoView,
};
use lodelib::consensus::params::ConsensusParams;
use lodelib::consensus::retarget::next_hive_work;
use lodelib::crypto::hash::signed_message_digest;
use lodelib::mempool::MempoolView;
use lodelib::script::{extract_key_id, script_for_address, HiveProof};
use lodelib::types::difficulty::{compact_to_target, hash_to_u256};
use lodelib::types::transaction::OutPoint;
use lodelib::types::Hash256;
use lodelib::validation::hive::dwarf_hash;
use lodelib::wallet::{DwarfStatus, WalletFacade};

use super::template::{AssemblerOptions, BlockAssembler, BlockVariant};
use super::MiningError;

/// Workers poll the shared flags every this many hashes.
const ABORT_CHECK_INTERVAL: u64 = 1000;
/// Default `-hivecheckdelay`, in milliseconds.
pub const DEFAULT_HIVE_CHECK_DELAY_MS: u64 = 250;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HiveConfig {
    /// `-hivecheckdelay`: master tick, clamped to at least 1 ms.
    pub check_delay_ms: u64,
    /// `-hivecheckthreads`: -2 means cores minus one, 0 means one,
    /// anything out of range means all cores.
    pub check_threads: i32,
    /// `-hiveearlyout`: run the tip-watching abort thread.
    pub early_out: bool,
    pub options: AssemblerOptions,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            check_delay_ms: DEFAULT_HIVE_CHECK_DELAY_MS,
            check_threads: -2,
            early_out: true,
            options: AssemblerOptions::default(),
        }
    }
}

/// A contiguous slice of dwarves from one DCT, assigned to one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwarfRange {
    pub txid: Hash256,
    pub txid_hex: String,
    pub reward_address: String,
    pub community_contrib: bool,
    pub offset: u32,
    pub count: u32,
}

/// Shared state for one `busy_dwarves` sweep. `found` transitions false
/// to true at most once (CAS); the payload behind the mutex is written
/// only by the thread that won the CAS.
struct SolutionState {
    found: AtomicBool,
    abort: AtomicBool,
    payload: Mutex<Option<(DwarfRange, u32)>>,
}

impl SolutionState {
    fn new() -> Self {
        Self {
            found: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            payload: Mutex::new(None),
        }
    }

    fn should_stop(&self) -> bool {
        self.found.load(Ordering::Acquire) || self.abort.load(Ordering::Acquire)
    }
}

/// Resolve `-hivecheckthreads` against the machine's core count.
fn resolve_thread_count(config_threads: i32, cores: usize) -> usize {
    if config_threads == -2 {
        cores.saturating_sub(1).max(1)
    } else if config_threads == 0 {
        1
    } else if config_threads < 0 || config_threads as usize > cores {
        cores
    } else {
        config_threads as usize
    }
}

/// Pack mature DCTs into `threads` bins of roughly equal dwarf count. A
/// DCT may span two adjacent bins.
fn bin_dwarves(dcts: &[DwarfRange], total: u64, threads: usize) -> Vec<Vec<DwarfRange>> {
    let per_bin = ((total + threads as u64 - 1) / threads as u64) as u32;
    let mut bins: Vec<Vec<DwarfRange>> = Vec::new();

    let mut iter = dcts.iter();
    let mut current = iter.next();
    let mut offset: u32 = 0;

    while let Some(_) = current {
        let mut bin = Vec::new();
        let mut in_bin: u32 = 0;
        while let Some(dct) = current {
            let space = per_bin - in_bin;
            let remaining = dct.count - offset;
            if remaining <= space {
                // The rest of this DCT fits; take it and move on
                let mut range = dct.clone();
                range.offset = offset;
                range.count = remaining;
                bin.push(range);
                in_bin += remaining;
                offset = 0;
                current = iter.next();
                if in_bin == per_bin {
                    break;
                }
            } else {
                // Fill what we can; the remainder starts the next bin
                let mut range = dct.clone();
                range.offset = offset;
                range.count = space;
                bin.push(range);
                offset += space;
                break;
            }
        }
        bins.push(bin);
    }
    bins
}

/// Hash every dwarf in the bin until a winner, an abort, or exhaustion.
fn check_bin(thread_id: usize, bin: Vec<DwarfRange>, rand_string: String, target: U256, state: Arc<SolutionState>) {
    let mut checked: u64 = 0;
    for range in &bin {
        for i in range.offset..range.offset + range.count {
            // The atomic load is cheap but not free; amortize it
            if checked % ABORT_CHECK_INTERVAL == 0 && state.should_stop() {
                return;
            }
            checked += 1;

            let hash = dwarf_hash(&rand_string, &range.txid_hex, i);
            if hash_to_u256(&hash) < target {
                // First CAS winner owns the payload; late winners see
                // the flag and back off
                if state
                    .found
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    *state.payload.lock().unwrap_or_else(|e| e.into_inner()) =
                        Some((range.clone(), i));
                }
                debug!(thread_id, dwarf = i, "check_bin: solution");
                return;
            }
        }
    }
    debug!(thread_id, "check_bin: out of dwarves");
}

/// The hive engine; one per node, long-lived.
pub struct HiveEngine {
    chain: Arc<dyn HeaderIndex>,
    mempool: Arc<dyn MempoolView>,
    wallet: Arc<dyn WalletFacade>,
    utxo: Arc<dyn UtxoView>,
    net: Arc<dyn NetStatus>,
    submitter: Arc<dyn BlockSubmitter>,
    params: ConsensusParams,
    config: HiveConfig,
    interrupt: Arc<AtomicBool>,
}

impl HiveEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn HeaderIndex>,
        mempool: Arc<dyn MempoolView>,
        wallet: Arc<dyn WalletFacade>,
        utxo: Arc<dyn UtxoView>,
        net: Arc<dyn NetStatus>,
        submitter: Arc<dyn BlockSubmitter>,
        params: ConsensusParams,
        config: HiveConfig,
    ) -> Self {
        Self {
            chain,
            mempool,
            wallet,
            utxo,
            net,
            submitter,
            params,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the dwarf-master loop: sleep, poke `busy_dwarves` whenever
    /// the tip height changes.
    pub fn start_master(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        std::thread::spawn(move || {
            info!("dwarf master: thread started");
            let mut height = engine.chain.tip().height;
            let delay = Duration::from_millis(engine.config.check_delay_ms.max(1));
            while !engine.interrupt.load(Ordering::Relaxed) {
                std::thread::sleep(delay);
                let new_height = engine.chain.tip().height;
                if new_height != height {
                    // Height changed; release the dwarves
                    height = new_height;
                    if let Err(e) = engine.busy_dwarves(new_height) {
                        error!(error = %e, "dwarf master: busy_dwarves failed");
                    }
                }
            }
            info!("dwarf master: thread terminated");
        })
    }

    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Give every mature dwarf one attempt at the current tip. Returns
    /// `Ok(true)` only when a hive block was produced and accepted.
    pub fn busy_dwarves(&self, height: u64) -> Result<bool, MiningError> {
        // Precondition skips are quiet: the next tick retries
        if self.net.peer_count() == 0 {
            debug!("busy_dwarves: skipping hive check (not connected)");
            return Ok(false);
        }
        if self.net.is_initial_block_download() {
            debug!("busy_dwarves: skipping hive check (in initial block download)");
            return Ok(false);
        }
        if height < self.params.last_initial_distribution_height + self.params.slow_start_blocks {
            debug!("busy_dwarves: skipping hive check (slow start has not finished)");
            return Ok(false);
        }

        let tip = self.chain.tip();
        // Hive and pop blocks both extend the non-PoW run the cap guards
        let hive_since_pow = hive_blocks_since_pow(&*self.chain, &tip, &self.params, true)?;
        if hive_since_pow >= self.params.max_consecutive_hive_blocks {
            info!("busy_dwarves: skipping hive check (max hive blocks without a PoW block)");
            return Ok(false);
        }

        if !self.wallet.is_available() {
            debug!("busy_dwarves: skipping hive check (wallet unavailable)");
            return Ok(false);
        }
        if !self.wallet.is_unlocked() {
            debug!("busy_dwarves: skipping hive check (wallet is locked)");
            return Ok(false);
        }

        info!(height, "busy_dwarves: dwarves at work");

        let rand_string = deterministic_rand_string(&tip);
        let target = compact_to_target(next_hive_work(&*self.chain, &tip, &self.params)?)?;
        debug!(rand = %rand_string, "busy_dwarves: deterministic rand string");

        // Mature dwarves only
        let mut ranges: Vec<DwarfRange> = Vec::new();
        let mut total_dwarves: u64 = 0;
        for dct in self.wallet.dcts(tip.height, &self.params) {
            if dct.status != DwarfStatus::Mature {
                continue;
            }
            total_dwarves += u64::from(dct.dwarf_count);
            ranges.push(DwarfRange {
                txid: dct.txid,
                txid_hex: dct.txid_hex,
                reward_address: dct.reward_address,
                community_contrib: dct.community_contrib,
                offset: 0,
                count: dct.dwarf_count,
            });
        }
        if total_dwarves == 0 {
            debug!("busy_dwarves: no mature dwarves found");
            return Ok(false);
        }

        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let threads = resolve_thread_count(self.config.check_threads, cores);
        let bins = bin_dwarves(&ranges, total_dwarves, threads);
        debug!(
            total_dwarves,
            threads,
            bins = bins.len(),
            "busy_dwarves: binned"
        );

        let state = Arc::new(SolutionState::new());
        let check_start = Instant::now();

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(bins.len());
        for (thread_id, bin) in bins.into_iter().enumerate() {
            let rand = rand_string.clone();
            let state = Arc::clone(&state);
            workers.push(std::thread::spawn(move || {
                check_bin(thread_id, bin, rand, target, state)
            }));
        }

        // Watch for the tip moving under us
        let watcher: Option<JoinHandle<()>> = if self.config.early_out {
            let chain = Arc::clone(&self.chain);
            let state = Arc::clone(&state);
            Some(std::thread::spawn(move || loop {
                std::thread::sleep(Duration::from_millis(1));
                if state.should_stop() {
                    return;
                }
                if chain.tip().height != height {
                    state.abort.store(true, Ordering::Release);
                    return;
                }
            }))
        } else {
            None
        };

        for worker in workers {
            let _ = worker.join();
        }
        let check_ms = check_start.elapsed().as_millis();

        if let Some(watcher) = watcher {
            if state.abort.load(Ordering::Acquire) {
                info!(check_ms, "busy_dwarves: chain state changed, check aborted");
                let _ = watcher.join();
                return Ok(false);
            }
            // We finished first; release the watcher
            state.abort.store(true, Ordering::Release);
            let _ = watcher.join();
        }

        if !state.found.load(Ordering::Acquire) {
            info!(
                total_dwarves,
                threads, check_ms, "busy_dwarves: no dwarf meets hash target"
            );
            return Ok(false);
        }

        let Some((range, winning_dwarf)) = state
            .payload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            // found flag without payload means the winner died mid-write
            warn!("busy_dwarves: solution flag set but no payload");
            return Ok(false);
        };
        info!(
            check_ms,
            dwarf = winning_dwarf,
            txid = %range.txid_hex,
            reward = %range.reward_address,
            "busy_dwarves: dwarf meets hash target"
        );

        // Assemble the proof: signature over the rand digest plus the
        // DCT's confirmed height
        let reward_script = match script_for_address(&range.reward_address) {
            Ok(script) => script,
            Err(e) => {
                warn!(error = %e, "busy_dwarves: reward destination invalid");
                return Ok(false);
            }
        };
        let Some(reward_key_id) = extract_key_id(&reward_script) else {
            warn!("busy_dwarves: reward script has no key id");
            return Ok(false);
        };
        let digest = signed_message_digest(&rand_string);
        let signature = match self.wallet.sign_compact(&reward_key_id, &digest) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "busy_dwarves: couldn't sign the dwarf proof");
                return Ok(false);
            }
        };

        let Some(coin) = self.utxo.coin(&OutPoint::new(range.txid, 0)) else {
            warn!("busy_dwarves: couldn't get the DCT utxo");
            return Ok(false);
        };

        let proof = HiveProof {
            dwarf_nonce: winning_dwarf,
            dct_height: coin.height as u32,
            community_contrib: range.community_contrib,
            txid_hex: range.txid_hex.clone(),
            signature,
        };

        let mut assembler = BlockAssembler::new(
            &*self.chain,
            &*self.mempool,
            &self.params,
            self.config.options.clone(),
        );
        let Some(template) =
            assembler.create_block(&reward_script, BlockVariant::Hive(proof.encode()))?
        else {
            warn!("busy_dwarves: couldn't create block");
            return Ok(false);
        };
        let block = template.block;

        // Make sure the new block's not stale
        if self.chain.tip().hash != block.header.prev_block_hash {
            info!("busy_dwarves: generated block is stale");
            return Ok(false);
        }

        if !self.submitter.process_new_block(&block) {
            warn!("busy_dwarves: block wasn't accepted");
            return Ok(false);
        }

        info!(height = tip.height + 1, "busy_dwarves: block mined");
        Ok(true)
    }
}
