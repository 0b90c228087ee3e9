//! Multi-threaded PoW nonce search.
//!
//! Each worker owns its template refresh loop: build a template, bump
//! the extra-nonce, scan nonces in batches, and rebuild whenever the tip
//! moves, the mempool advances, the nonce space saturates, or the clock
//! runs backwards. A found block is only submitted if the tip it was
//! built on is still current.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use lodelib::chain::{median_time_past, BlockSubmitter, HeaderIndex, IndexEntry, NetStatus};
use lodelib::consensus::params::ConsensusParams;
use lodelib::mempool::MempoolView;
use lodelib::script::coinbase_script_sig;
use lodelib::types::block::{Block, BlockHeader};
use lodelib::types::difficulty::{compact_to_target, hash_to_u256};
use lodelib::types::Hash256;
use lodelib::util::time::adjusted_time;
use lodelib::wallet::WalletFacade;

use super::template::{AssemblerOptions, BlockAssembler, BlockVariant};

/// Nonce space considered exhausted past this point.
const NONCE_SATURATION: u32 = 0xffff_0000;
/// Seconds to sleep while waiting for peers.
const PEER_WAIT_SECS: u64 = 10;
/// Keep a template at least this long before a mempool change alone
/// forces a rebuild.
const MEMPOOL_REFRESH_SECS: u64 = 60;
/// Hashrate meter window.
const METER_WINDOW: Duration = Duration::from_secs(4);
/// Interval between hashrate log lines.
const METER_LOG_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// What became of a found block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// The tip moved between the find and the submit.
    Stale,
    /// Validation refused the block.
    Rejected,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MinerConfig {
    /// Worker thread count; negative means all cores.
    pub threads: i32,
    pub options: AssemblerOptions,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            options: AssemblerOptions::default(),
        }
    }
}

/// Raise the header time to `max(mtp + 1, now)`; the returned delta is
/// negative when the wall clock has fallen behind the header (the miner
/// treats that as a refresh signal).
pub fn update_time(header: &mut BlockHeader, chain: &dyn HeaderIndex, tip: &IndexEntry) -> i64 {
    let old = header.time;
    let new = std::cmp::max(median_time_past(chain, tip) + 1, adjusted_time());
    if old < new {
        header.time = new;
    }
    new as i64 - old as i64
}

/// Scan nonces until one produces a pow-hash with its top two bytes
/// zero, the 16-bit batch ends, or an interrupt is observed.
///
/// The caller checks the full target; the zero-prefix test just keeps
/// the expensive comparison off the hot path.
pub fn scan_hash(
    header: &mut BlockHeader,
    nonce: &mut u32,
    interrupt: &AtomicBool,
) -> Option<Hash256> {
    loop {
        *nonce = nonce.wrapping_add(1);
        header.nonce = *nonce;
        let hash = header.pow_hash();

        if hash[0] == 0 && hash[1] == 0 {
            return Some(hash);
        }
        if *nonce & 0xffff == 0 {
            // Nothing found this batch; let the caller re-check state
            return None;
        }
        if *nonce & 0xfff == 0 && interrupt.load(Ordering::Relaxed) {
            return None;
        }
    }
}

struct HashrateMeter {
    hashes: u64,
    window_start: Instant,
    last_log: Instant,
    rate: Arc<AtomicU64>,
}

impl HashrateMeter {
    fn new(rate: Arc<AtomicU64>) -> Self {
        let now = Instant::now();
        Self {
            hashes: 0,
            window_start: now,
            last_log: now,
            rate,
        }
    }

    fn add(&mut self, hashes: u64) {
        self.hashes += hashes;
        let elapsed = self.window_start.elapsed();
        if elapsed > METER_WINDOW {
            let per_sec = self.hashes * 1000 / elapsed.as_millis().max(1) as u64;
            self.rate.store(per_sec, Ordering::Relaxed);
            self.hashes = 0;
            self.window_start = Instant::now();
            if self.last_log.elapsed() > METER_LOG_INTERVAL {
                self.last_log = Instant::now();
                info!(khash_per_sec = per_sec as f64 / 1000.0, "miner hashrate");
            }
        }
    }
}

/// The PoW mining controller: spawns workers, hands out the shared
/// interrupt, and reports the metered hashrate.
pub struct PowMiner {
    chain: Arc<dyn HeaderIndex>,
    mempool: Arc<dyn MempoolView>,
    wallet: Arc<dyn WalletFacade>,
    net: Arc<dyn NetStatus>,
    submitter: Arc<dyn BlockSubmitter>,
    params: ConsensusParams,
    config: MinerConfig,
    interrupt: Arc<AtomicBool>,
    hashrate: Arc<AtomicU64>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PowMiner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn HeaderIndex>,
        mempool: Arc<dyn MempoolView>,
        wallet: Arc<dyn WalletFacade>,
        net: Arc<dyn NetStatus>,
        submitter: Arc<dyn BlockSubmitter>,
        params: ConsensusParams,
        config: MinerConfig,
    ) -> Self {
        Self {
            chain,
            mempool,
            wallet,
            net,
            submitter,
            params,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            hashrate: Arc::new(AtomicU64::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads. Stops any previous generation first.
    pub fn start(self: &Arc<Self>) {
        self.stop();
        self.interrupt.store(false, Ordering::Relaxed);

        let threads = if self.config.threads < 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            (self.config.threads as usize).max(1)
        };

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..threads {
            let miner = Arc::clone(self);
            handles.push(std::thread::spawn(move || miner.miner_thread(worker_id)));
        }
        info!(threads, "pow miner started");
    }

    /// Signal every worker and join them.
    pub fn stop(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Metered hashrate across all workers, hashes per second.
    pub fn hashes_per_second(&self) -> u64 {
        self.hashrate.load(Ordering::Relaxed)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Submit a found block unless the tip moved while scanning. A stale
    /// candidate is discarded without error.
    pub fn try_submit(&self, block: &Block) -> SubmitOutcome {
        if self.chain.tip().hash != block.header.prev_block_hash {
            return SubmitOutcome::Stale;
        }
        if !self.submitter.process_new_block(block) {
            return SubmitOutcome::Rejected;
        }
        SubmitOutcome::Submitted
    }

    /// Block until peers are connected and IBD is over, or an interrupt
    /// arrives. Returns false on interrupt.
    fn wait_for_network(&self) -> bool {
        if self.params.mine_blocks_on_demand {
            return true;
        }
        loop {
            if self.net.peer_count() > 0 && !self.net.is_initial_block_download() {
                return true;
            }
            if self.net.is_initial_block_download() {
                info!("miner: initial block download; sleeping");
            } else {
                info!("miner: no peers; sleeping");
            }
            for _ in 0..PEER_WAIT_SECS * 10 {
                if self.interrupted() {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    fn miner_thread(&self, worker_id: usize) {
        info!(worker_id, "miner thread started");

        // Fail fast when the keypool is dry
        let reserved = match self.wallet.reserve_coinbase_script() {
            Ok(script) => script,
            Err(e) => {
                error!(worker_id, error = %e, "miner: no coinbase script; thread exiting");
                return;
            }
        };
        let payout_script = reserved.script();

        let mut meter = HashrateMeter::new(Arc::clone(&self.hashrate));
        let mut extra_nonce: u64 = 0;
        let mut last_prev: Hash256 = [0u8; 32];

        'outer: while !self.interrupted() {
            if !self.wait_for_network() {
                break;
            }

            let tx_updated_last = self.mempool.transactions_updated();
            let tip = self.chain.tip();

            let mut assembler = BlockAssembler::new(
                self.chain.as_ref(),
                self.mempool.as_ref(),
                &self.params,
                self.config.options.clone(),
            );
            let template = match assembler.create_block(&payout_script, BlockVariant::Pow) {
                Ok(Some(template)) => template,
                Ok(None) | Err(_) => {
                    error!(worker_id, "miner: could not assemble a template; thread exiting");
                    return;
                }
            };
            let mut block: Block = template.block;

            // Extra-nonce: reset on a new parent, bump otherwise, and
            // fold into the coinbase scriptSig
            if block.header.prev_block_hash != last_prev {
                extra_nonce = 0;
                last_prev = block.header.prev_block_hash;
            }
            extra_nonce += 1;
            block.transactions[0].inputs[0].script_sig =
                coinbase_script_sig(tip.height + 1, extra_nonce);
            block.update_merkle_root();

            let target = match compact_to_target(block.header.bits) {
                Ok(target) => target,
                Err(e) => {
                    error!(worker_id, error = %e, "miner: template carries bad bits");
                    return;
                }
            };

            debug!(
                worker_id,
                txs = block.transactions.len(),
                "miner: scanning template"
            );
            let scan_start = Instant::now();
            let mut nonce: u32 = 0;
            let mut old_nonce: u32 = 0;

            loop {
                let found = scan_hash(&mut block.header, &mut nonce, &self.interrupt);
                meter.add(u64::from(nonce.wrapping_sub(old_nonce)));
                old_nonce = nonce;

                if let Some(hash) = found {
                    if hash_to_u256(&hash) <= target {
                        info!(
                            worker_id,
                            hash = %hex::encode(hash),
                            nonce,
                            "miner: block found"
                        );
                        match self.try_submit(&block) {
                            SubmitOutcome::Submitted => {
                                reserved.keep();
                                if self.params.mine_blocks_on_demand {
                                    // Regression mode: one block and done
                                    break 'outer;
                                }
                            }
                            SubmitOutcome::Stale => {
                                warn!(worker_id, "miner: generated block is stale");
                            }
                            SubmitOutcome::Rejected => {
                                warn!(worker_id, "miner: block was not accepted");
                            }
                        }
                        continue 'outer;
                    }
                }

                // Refresh conditions between nonce batches
                if self.interrupted() {
                    break 'outer;
                }
                if !self.params.mine_blocks_on_demand && self.net.peer_count() == 0 {
                    continue 'outer;
                }
                if nonce >= NONCE_SATURATION {
                    continue 'outer;
                }
                if self.mempool.transactions_updated() != tx_updated_last
                    && scan_start.elapsed().as_secs() > MEMPOOL_REFRESH_SECS
                {
                    continue 'outer;
                }
                if self.chain.tip().hash != tip.hash {
                    continue 'outer;
                }
                if update_time(&mut block.header, self.chain.as_ref(), &tip) < 0 {
                    // Clock went backwards; rebuild
                    continue 'outer;
                }
            }
        }

        info!(worker_id, "miner thread terminated");
    }
}
