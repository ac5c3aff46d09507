//! Internal multi-threaded miner.
//!
//! One coordinator thread owns template lifecycle and tip-watching; N worker
//! threads own one RandomX VM each and grind nonces. Templates travel from
//! coordinator to workers as an immutable [`MiningContext`] behind a mutexed
//! slot; staleness is detected through a monotonic atomic job id, so workers
//! never touch the slot mutex on the hot path. Tip updates arrive through a
//! validation callback that only flips an atomic flag and wakes the
//! coordinator.
//!
//! Nonce space is stride-partitioned: worker `w` of `N` tries `w, w+N,
//! w+2N, …` with natural 32-bit wraparound, so the workers cover the whole
//! nonce space exactly once per 2^32 attempts with no range bookkeeping.

pub mod config;
pub mod stats;

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::block::{Block, Hash256, HEADER_SIZE, NONCE_OFFSET};
use crate::error::MinerError;
use crate::interfaces::{ChainEntry, NodeContext, TipCallback};
use crate::miner::config::MinerConfig;
use crate::miner::stats::{MinerCounters, MinerStatus};
use crate::params::Params;
use crate::pow::randomx::{self, MiningVm};
use crate::pow::{check_proof_of_work, seed};

/// Rebuild the template after this long even without a tip change, so fresh
/// transactions and timestamps get picked up.
const TEMPLATE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Workers flush their local hash count to the shared counter in batches.
const HASH_BATCH_SIZE: u64 = 10_000;

/// Upper bound on grinding iterations between staleness checks.
const STALENESS_CHECK_INTERVAL: u64 = 1_000;

/// Exponential backoff cap: 2^6 = 64 seconds.
const MAX_BACKOFF_LEVEL: u32 = 6;

/// Refuse to mine with fewer connected peers; a partitioned miner would only
/// build a private fork.
const MIN_PEERS_FOR_MINING: u32 = 3;

/// How long `start` waits for the coordinator to produce the first template.
const FIRST_TEMPLATE_WAIT: Duration = Duration::from_secs(30);

/// Immutable snapshot handed from the coordinator to the workers. Published
/// once through the context slot and never mutated afterwards.
pub struct MiningContext {
    pub block: Block,
    pub seed_hash: Hash256,
    pub bits: u32,
    pub job_id: u64,
    pub height: u64,
}

struct MinerShared {
    node: NodeContext,
    params: Params,
    coinbase_script: Vec<u8>,
    num_threads: u32,
    low_priority: bool,

    running: AtomicBool,
    job_id: AtomicU64,

    context: Mutex<Option<Arc<MiningContext>>>,
    context_cv: Condvar,

    signal_lock: Mutex<()>,
    signal_cv: Condvar,
    new_block_signal: AtomicBool,

    backoff_level: AtomicU32,
    using_fast_mode: AtomicBool,
    fallback_logged: AtomicBool,

    counters: MinerCounters,
}

impl MinerShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.node.interrupt.load(Ordering::Relaxed)
    }

    /// Mining conditions gate. Deliberately does NOT check initial block
    /// download: a young chain that pauses for a day latches IBD on every
    /// node, the miner would then refuse to build templates, and no block
    /// could ever unlatch it. Partition safety comes from the peer floor.
    fn should_mine(&self) -> bool {
        self.node.network.connected_peer_count() >= MIN_PEERS_FOR_MINING
    }

    /// Exponential backoff with jitter: 1s, 2s, 4s … capped at 64s, plus
    /// 0–25% random smear so restarting miners don't thunder in step.
    fn backoff_duration(&self) -> Duration {
        let level = self.backoff_level.load(Ordering::Relaxed).min(MAX_BACKOFF_LEVEL);
        let base_ms = 1000u64 << level;
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
        Duration::from_millis(base_ms + jitter)
    }

    /// Wait on the new-block signal for at most `timeout`, then consume the
    /// signal. Wakes immediately on tip updates and on shutdown.
    fn wait_for_signal(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.signal_lock.lock();
        while !self.new_block_signal.load(Ordering::Acquire) && self.running.load(Ordering::Acquire)
        {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.signal_cv.wait_for(&mut guard, deadline - now).timed_out() {
                break;
            }
        }
        self.new_block_signal.store(false, Ordering::Release);
    }

    /// Build a fresh mining context from the external template builder.
    fn create_template(&self) -> Option<Arc<MiningContext>> {
        let tip = self.node.chain.active_tip()?;
        let template = self
            .node
            .templates
            .create_block_template(&self.coinbase_script)?;

        let mut block = template.block;
        block.header.hash_merkle_root = block.merkle_root();

        let seed_hash = seed::seed_hash_for_block(&*self.node.chain, Some(&tip));
        let bits = block.header.bits;
        let job_id = self.job_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.templates.fetch_add(1, Ordering::Relaxed);

        Some(Arc::new(MiningContext {
            block,
            seed_hash,
            bits,
            job_id,
            height: tip.height + 1,
        }))
    }

    /// Publish a context and wake every worker.
    fn publish(&self, ctx: Arc<MiningContext>) {
        *self.context.lock() = Some(ctx);
        self.context_cv.notify_all();
    }

    fn submit_block(&self, block: &Block) -> bool {
        // The worker just re-validated the PoW locally, hence min_pow_checked.
        let result = self.node.processor.process_new_block(block, true, true);
        if result.accepted && result.new_block {
            info!(target: "miner", "block accepted by the network");
            true
        } else if result.accepted {
            info!(target: "miner", "block was a duplicate");
            false
        } else {
            info!(target: "miner", "block rejected (stale or invalid)");
            false
        }
    }

    fn status(&self) -> MinerStatus {
        MinerStatus {
            running: self.running.load(Ordering::Acquire),
            threads: self.num_threads,
            hashrate: self.counters.hashrate(),
            blocks_found: self.counters.blocks_found.load(Ordering::Relaxed),
            stale_blocks: self.counters.stale_blocks.load(Ordering::Relaxed),
            templates: self.counters.templates.load(Ordering::Relaxed),
            uptime_seconds: self.counters.uptime_seconds(),
            fast_mode: self.using_fast_mode.load(Ordering::Relaxed),
        }
    }
}

/// Tip-update listener registered with the validation signals while the miner
/// runs. Writes one atomic flag and wakes one waiter; no ownership edge back
/// into the miner beyond the shared state.
struct TipListener {
    shared: Arc<MinerShared>,
}

impl TipCallback for TipListener {
    fn updated_block_tip(
        &self,
        _new_tip: &ChainEntry,
        _fork_point: Option<&ChainEntry>,
        _initial_download: bool,
    ) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        {
            let _guard = self.shared.signal_lock.lock();
            self.shared.new_block_signal.store(true, Ordering::Release);
        }
        self.shared.signal_cv.notify_one();
        self.shared.backoff_level.store(0, Ordering::Relaxed);
    }
}

struct RunHandles {
    coordinator: thread::JoinHandle<()>,
    workers: Vec<thread::JoinHandle<()>>,
    listener: Arc<dyn TipCallback>,
}

/// The internal miner. Construct once, `start` with validated options, `stop`
/// at shutdown (also invoked on drop). Start/stop are idempotent in the sense
/// that a second start fails cleanly and a second stop is a no-op.
pub struct InternalMiner {
    node: NodeContext,
    params: Params,
    shared: Mutex<Option<Arc<MinerShared>>>,
    run: Mutex<Option<RunHandles>>,
}

impl InternalMiner {
    pub fn new(node: NodeContext, params: Params) -> Self {
        Self {
            node,
            params,
            shared: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    /// Start mining. Validates the configuration, warms the RandomX cache,
    /// registers for tip updates, then brings up the coordinator and workers.
    pub fn start(&self, config: &MinerConfig, coinbase_script: Vec<u8>) -> Result<(), MinerError> {
        config.validate()?;
        if coinbase_script.is_empty() {
            return Err(MinerError::EmptyCoinbaseScript);
        }

        let mut run = self.run.lock();
        if run.is_some() {
            return Err(MinerError::AlreadyRunning);
        }

        // If even the light cache cannot come up there is nothing to mine
        // with; fast-mode degradation is handled later, this is the floor.
        let next_height = self
            .node
            .chain
            .active_tip()
            .map(|tip| tip.height + 1)
            .unwrap_or(0);
        randomx::update_seed(&seed::seed_hash_for_height(next_height), false)?;

        let num_threads = config.minethreads;
        let logical_cores = num_cpus::get() as u32;
        if num_threads > logical_cores {
            warn!(
                num_threads,
                logical_cores, "more mining threads than logical cores"
            );
        }

        let shared = Arc::new(MinerShared {
            node: self.node.clone(),
            params: self.params.clone(),
            coinbase_script,
            num_threads,
            low_priority: config.low_priority(),
            running: AtomicBool::new(true),
            job_id: AtomicU64::new(0),
            context: Mutex::new(None),
            context_cv: Condvar::new(),
            signal_lock: Mutex::new(()),
            signal_cv: Condvar::new(),
            new_block_signal: AtomicBool::new(false),
            backoff_level: AtomicU32::new(0),
            using_fast_mode: AtomicBool::new(config.fast_mode()),
            fallback_logged: AtomicBool::new(false),
            counters: MinerCounters::default(),
        });
        shared.counters.reset();

        info!(target: "miner", "╔════════════════════════════════════════════════╗");
        info!(target: "miner", "║            internal miner starting             ║");
        info!(target: "miner", "╠════════════════════════════════════════════════╣");
        info!(target: "miner", "║ worker threads : {:<29} ║", num_threads);
        info!(target: "miner", "║ nonce pattern  : {:<29} ║", "stride (w, w+N, w+2N, …)");
        info!(
            target: "miner",
            "║ randomx mode   : {:<29} ║",
            if config.fast_mode() { "fast (~2 GiB dataset)" } else { "light (~256 MiB cache)" }
        );
        info!(
            target: "miner",
            "║ priority       : {:<29} ║",
            if config.low_priority() { "low (nice 19)" } else { "normal" }
        );
        info!(
            target: "miner",
            "║ payout address : {:<29} ║",
            config.mineaddress
        );
        info!(
            target: "miner",
            "║ script size    : {:<29} ║",
            shared.coinbase_script.len()
        );
        info!(target: "miner", "╚════════════════════════════════════════════════╝");

        let listener: Arc<dyn TipCallback> = Arc::new(TipListener {
            shared: shared.clone(),
        });
        self.node.signals.register_tip_callback(listener.clone());

        let coordinator = {
            let shared = shared.clone();
            thread::spawn(move || coordinator_loop(&shared))
        };

        // Block until the first template lands so workers start hot. On
        // timeout the coordinator keeps trying and workers park on the slot.
        {
            let deadline = Instant::now() + FIRST_TEMPLATE_WAIT;
            let mut slot = shared.context.lock();
            while slot.is_none() && shared.running.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let _ = shared.context_cv.wait_for(&mut slot, deadline - now);
            }
            if slot.is_none() {
                info!(target: "miner", "no template after {FIRST_TEMPLATE_WAIT:?}; workers will wait for one");
            }
        }

        let workers = (0..num_threads)
            .map(|worker_id| {
                let shared = shared.clone();
                thread::spawn(move || worker_loop(&shared, worker_id))
            })
            .collect();

        info!(target: "miner", num_threads, "coordinator and workers started");

        *self.shared.lock() = Some(shared);
        *run = Some(RunHandles {
            coordinator,
            workers,
            listener,
        });
        Ok(())
    }

    /// Stop mining: unregister the tip callback, wake every waiter, join
    /// workers first and the coordinator last. Safe to call repeatedly.
    pub fn stop(&self) {
        let Some(handles) = self.run.lock().take() else {
            return;
        };
        let Some(shared) = self.shared.lock().clone() else {
            return;
        };

        info!(target: "miner", "stopping");
        shared.running.store(false, Ordering::Release);
        self.node.signals.unregister_tip_callback(&handles.listener);

        {
            let _guard = shared.signal_lock.lock();
        }
        shared.signal_cv.notify_all();
        {
            let _guard = shared.context.lock();
        }
        shared.context_cv.notify_all();

        for worker in handles.workers {
            let _ = worker.join();
        }
        let _ = handles.coordinator.join();

        *shared.context.lock() = None;

        let status = shared.status();
        info!(
            target: "miner",
            uptime_seconds = status.uptime_seconds,
            total_hashes = shared.counters.hashes.load(Ordering::Relaxed),
            blocks_found = status.blocks_found,
            stale_blocks = status.stale_blocks,
            templates = status.templates,
            avg_hashrate = format!("{:.2}", status.hashrate),
            "miner stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Read-only status snapshot; zeros before the first start.
    pub fn status(&self) -> MinerStatus {
        match &*self.shared.lock() {
            Some(shared) => shared.status(),
            None => MinerStatus::default(),
        }
    }
}

impl Drop for InternalMiner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn coordinator_loop(shared: &Arc<MinerShared>) {
    info!(target: "miner", "coordinator started");

    let mut last_tip: Option<Hash256> = None;
    let mut last_template: Option<Instant> = None;

    while shared.is_running() {
        if !shared.should_mine() {
            let backoff = shared.backoff_duration();
            shared.backoff_level.fetch_add(1, Ordering::Relaxed);
            debug!(target: "miner", backoff_ms = backoff.as_millis() as u64, "conditions not met, backing off");
            shared.wait_for_signal(backoff);
            continue;
        }
        shared.backoff_level.store(0, Ordering::Relaxed);

        let current_tip = shared.node.chain.active_tip().map(|tip| tip.hash);
        let refresh_due = match last_template {
            Some(at) => at.elapsed() >= TEMPLATE_REFRESH_INTERVAL,
            None => true,
        };
        let need_template =
            current_tip != last_tip || refresh_due || shared.job_id.load(Ordering::Relaxed) == 0;

        if need_template {
            match shared.create_template() {
                Some(ctx) => {
                    let job_id = ctx.job_id;
                    let height = ctx.height;
                    shared.publish(ctx);
                    last_tip = current_tip;
                    last_template = Some(Instant::now());
                    if job_id == 1 {
                        info!(target: "miner", height, "first template ready");
                    } else {
                        debug!(target: "miner", job_id, height, "new template");
                    }
                }
                None => {
                    let backoff = shared.backoff_duration();
                    shared.backoff_level.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "miner", backoff_ms = backoff.as_millis() as u64, "template unavailable, backing off");
                    shared.wait_for_signal(backoff);
                    continue;
                }
            }
        }

        shared.wait_for_signal(Duration::from_millis(100));
    }

    info!(target: "miner", "coordinator stopped");
}

/// Bind a worker VM to `seed`, degrading from fast to light mode when the
/// dataset cannot be built. Returns false when no mode works right now.
fn bind_worker_vm(shared: &MinerShared, vm: &mut MiningVm, seed_hash: &Hash256, worker_id: u32) -> bool {
    if shared.using_fast_mode.load(Ordering::Relaxed) {
        match vm.initialize(seed_hash, true) {
            Ok(()) => return true,
            Err(err) if err.is_resource_unavailable() => {
                if !shared.fallback_logged.swap(true, Ordering::Relaxed) {
                    warn!(target: "miner", %err, "fast mode unavailable; mining in light mode");
                }
                shared.using_fast_mode.store(false, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(target: "miner", worker_id, %err, "mining VM initialization failed");
                return false;
            }
        }
    }
    match vm.initialize(seed_hash, false) {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "miner", worker_id, %err, "mining VM initialization failed (light mode)");
            false
        }
    }
}

#[cfg(unix)]
fn apply_low_priority() {
    // Scheduling hint only; failure changes nothing about correctness.
    unsafe {
        libc::nice(19);
    }
}

#[cfg(not(unix))]
fn apply_low_priority() {}

fn worker_loop(shared: &Arc<MinerShared>, worker_id: u32) {
    debug!(target: "miner", worker_id, "worker started");
    if shared.low_priority {
        apply_low_priority();
    }

    let mut vm = MiningVm::new();
    let mut local_hashes: u64 = 0;
    let mut last_job_id: u64 = 0;
    let mut ctx: Option<Arc<MiningContext>> = None;
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut nonce: u32 = 0;

    'run: while shared.is_running() {
        let current_job = shared.job_id.load(Ordering::Acquire);
        if current_job != last_job_id || ctx.is_none() {
            {
                let mut slot = shared.context.lock();
                while slot.is_none() && shared.running.load(Ordering::Acquire) {
                    shared.context_cv.wait(&mut slot);
                }
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                ctx = slot.clone();
            }
            let Some(job) = ctx.clone() else { continue };

            if !vm.has_seed(&job.seed_hash)
                && !bind_worker_vm(shared, &mut vm, &job.seed_hash, worker_id)
            {
                thread::sleep(Duration::from_secs(1));
                continue;
            }

            // Serialize once per job; grinding only rewrites the nonce bytes.
            header_buf = job.block.header.serialize();
            nonce = worker_id;
            last_job_id = job.job_id;
        }
        let Some(job) = ctx.clone() else { continue };

        for iter in 0..STALENESS_CHECK_INTERVAL {
            header_buf[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());

            let digest = match vm.hash(&header_buf) {
                Ok(digest) => digest,
                Err(err) => {
                    warn!(target: "miner", worker_id, %err, "hash attempt failed");
                    thread::sleep(Duration::from_secs(1));
                    continue 'run;
                }
            };
            local_hashes += 1;

            if check_proof_of_work(&digest, job.bits, &shared.params) {
                let mut block = job.block.clone();
                block.header.nonce = nonce;

                info!(
                    target: "miner",
                    worker_id,
                    height = job.height,
                    nonce,
                    digest = %hex::encode(digest),
                    "block found"
                );

                if shared.submit_block(&block) {
                    shared.counters.blocks_found.fetch_add(1, Ordering::Relaxed);
                } else {
                    shared.counters.stale_blocks.fetch_add(1, Ordering::Relaxed);
                }

                if local_hashes > 0 {
                    shared.counters.hashes.fetch_add(local_hashes, Ordering::Relaxed);
                    local_hashes = 0;
                }

                // Force a context refresh; the tip just moved under us.
                last_job_id = 0;
                break;
            }

            // Stride to the next nonce in this worker's residue class.
            nonce = nonce.wrapping_add(shared.num_threads);

            if iter % 100 == 99 {
                if !shared.is_running() {
                    break 'run;
                }
                if shared.job_id.load(Ordering::Relaxed) != last_job_id {
                    break;
                }
            }
        }

        if local_hashes >= HASH_BATCH_SIZE {
            shared.counters.hashes.fetch_add(local_hashes, Ordering::Relaxed);
            local_hashes = 0;
        }
    }

    if local_hashes > 0 {
        shared.counters.hashes.fetch_add(local_hashes, Ordering::Relaxed);
    }
    debug!(target: "miner", worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_covers_disjoint_residue_classes() {
        // worker w of N only ever visits nonces ≡ w (mod N), and the union
        // over all workers is the full 32-bit space once per 2^32 attempts
        let n = 4u32;
        for worker in 0..n {
            let mut nonce = worker;
            for _ in 0..10_000 {
                assert_eq!(nonce % n, worker);
                nonce = nonce.wrapping_add(n);
            }
        }
    }

    #[test]
    fn stride_partition_covers_the_space_exactly_once() {
        // u8-scale model of the 32-bit nonce space: 4 workers with natural
        // wraparound visit every value exactly once per full pass
        let n = 4u8;
        let mut seen = [0u32; 256];
        for worker in 0..n {
            let mut nonce = worker;
            for _ in 0..(256 / n as usize) {
                seen[nonce as usize] += 1;
                nonce = nonce.wrapping_add(n);
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn backoff_levels_are_capped() {
        // 2^MAX_BACKOFF_LEVEL seconds is the ceiling, jitter adds at most 25%
        let base_ms = 1000u64 << MAX_BACKOFF_LEVEL;
        assert_eq!(base_ms, 64_000);
        let max_with_jitter = base_ms + base_ms / 4;
        assert_eq!(max_with_jitter, 80_000);
    }
}
