//! RandomX engine: the process-wide cache/dataset context and the per-thread
//! mining VMs.
//!
//! One cache (~256 MiB) and at most one dataset (~2 GiB) exist per process,
//! owned by a global context behind a single mutex. The mutex covers
//! initialization and the shared validation VMs only; mining workers build
//! their own VM against the shared buffers and hash without taking any lock.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use randomx_rs::{RandomXCache, RandomXDataset, RandomXError, RandomXFlag, RandomXVM};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::block::Hash256;
use crate::error::PowError;

static CONTEXT: Lazy<Mutex<RxContext>> = Lazy::new(|| Mutex::new(RxContext::default()));

/// Emitted at most once per process when fast mode degrades to light mode.
static FALLBACK_NOTICE: AtomicBool = AtomicBool::new(false);

fn cache_flags() -> RandomXFlag {
    RandomXFlag::get_recommended_flags()
}

fn vm_flags(fast_mode: bool) -> RandomXFlag {
    let mut flags = RandomXFlag::get_recommended_flags();
    if fast_mode {
        flags |= RandomXFlag::FLAG_FULL_MEM;
    }
    flags
}

/// Create a VM, retrying with the portable interpreter when the recommended
/// flags (JIT on most hosts) are not usable. Correctness is unaffected; only
/// throughput drops.
fn create_vm(
    fast_mode: bool,
    cache: Option<RandomXCache>,
    dataset: Option<RandomXDataset>,
) -> Result<RandomXVM, PowError> {
    match RandomXVM::new(vm_flags(fast_mode), cache.clone(), dataset.clone()) {
        Ok(vm) => Ok(vm),
        Err(err) => {
            debug!(%err, "RandomX VM creation with recommended flags failed, retrying portable");
            let mut flags = RandomXFlag::FLAG_DEFAULT;
            if fast_mode {
                flags |= RandomXFlag::FLAG_FULL_MEM;
            }
            RandomXVM::new(flags, cache, dataset).map_err(PowError::VmUnavailable)
        }
    }
}

fn digest_from(output: Vec<u8>) -> Result<Hash256, PowError> {
    let len = output.len();
    output
        .as_slice()
        .try_into()
        .map_err(|_| PowError::from(RandomXError::Other(format!("hash output length {len}"))))
}

/// Process-wide RandomX state. All fields change together under the global
/// mutex; the cache and dataset handles given out to mining VMs are
/// reference-counted snapshots that outlive a reseed safely.
#[derive(Default)]
struct RxContext {
    cache: Option<RandomXCache>,
    dataset: Option<RandomXDataset>,
    current_seed: Option<Hash256>,
    fast_ready: bool,
    light_vm: Option<RandomXVM>,
    fast_vm: Option<RandomXVM>,
}

// randomx-rs's cache/dataset/VM handles wrap raw pointers into the RandomX C
// library and are not `Send`/`Sync` on their own, but the design here (one
// mutex-guarded context shared by all threads, read-only handles handed out
// for per-thread VM construction) only ever touches them from one thread at
// a time.
unsafe impl Send for RxContext {}
unsafe impl Sync for RxContext {}

impl RxContext {
    /// (Re)build the cache for `seed` and rebind the shared light VM.
    /// Constructed into locals first: a failure leaves the previous state
    /// untouched, and the next call simply retries.
    fn init_light(&mut self, seed: &Hash256) -> Result<(), PowError> {
        let cache = RandomXCache::new(cache_flags(), seed).map_err(PowError::CacheUnavailable)?;
        let vm = create_vm(false, Some(cache.clone()), None)?;
        self.cache = Some(cache);
        self.light_vm = Some(vm);
        self.current_seed = Some(*seed);
        // Any previous dataset was derived from the old seed.
        self.dataset = None;
        self.fast_vm = None;
        self.fast_ready = false;
        debug!(seed = %hex::encode(seed), "RandomX light mode initialized");
        Ok(())
    }

    /// Build the full dataset from the cache and bind the shared fast VM.
    /// Single-shot and expensive (minutes of compute, ~2 GiB resident).
    fn init_fast(&mut self, seed: &Hash256) -> Result<(), PowError> {
        if self.cache.is_none() || self.current_seed.as_ref() != Some(seed) {
            self.init_light(seed)?;
        }
        let cache = match &self.cache {
            Some(cache) => cache.clone(),
            None => return Err(PowError::VmNotInitialized),
        };
        debug!(seed = %hex::encode(seed), "building RandomX dataset");
        let dataset = RandomXDataset::new(RandomXFlag::FLAG_DEFAULT, cache.clone(), 0)
            .map_err(PowError::DatasetUnavailable)?;
        let vm = create_vm(true, Some(cache), Some(dataset.clone()))?;
        self.dataset = Some(dataset);
        self.fast_vm = Some(vm);
        self.fast_ready = true;
        debug!(seed = %hex::encode(seed), "RandomX fast mode initialized");
        Ok(())
    }

    fn update_seed(&mut self, seed: &Hash256, want_fast: bool) -> Result<(), PowError> {
        if self.current_seed.as_ref() == Some(seed) && (!want_fast || self.fast_ready) {
            return Ok(());
        }
        if self.current_seed.as_ref() != Some(seed) {
            self.init_light(seed)?;
        }
        if want_fast && !self.fast_ready {
            self.init_fast(seed)?;
        }
        Ok(())
    }

    fn hash_with(vm: &RandomXVM, input: &[u8]) -> Result<Hash256, PowError> {
        digest_from(vm.calculate_hash(input)?)
    }
}

/// Ensure the process context is initialized for `seed` in the requested mode.
pub fn update_seed(seed: &Hash256, want_fast: bool) -> Result<(), PowError> {
    CONTEXT.lock().update_seed(seed, want_fast)
}

/// Light-mode hash through the shared validation VM (~256 MiB cache only).
pub fn hash_light(input: &[u8], seed: &Hash256) -> Result<Hash256, PowError> {
    let mut ctx = CONTEXT.lock();
    ctx.update_seed(seed, false)?;
    match &ctx.light_vm {
        Some(vm) => RxContext::hash_with(vm, input),
        None => Err(PowError::VmNotInitialized),
    }
}

/// Fast-mode hash through the shared dataset VM. Bit-identical to
/// [`hash_light`]; an order of magnitude faster once the dataset is warm.
/// Falls back to light mode (with a single logged notice) when the dataset
/// cannot be allocated.
pub fn hash_fast(input: &[u8], seed: &Hash256) -> Result<Hash256, PowError> {
    let mut ctx = CONTEXT.lock();
    match ctx.update_seed(seed, true) {
        Ok(()) => {}
        Err(PowError::DatasetUnavailable(err)) => {
            if !FALLBACK_NOTICE.swap(true, Ordering::Relaxed) {
                warn!(%err, "RandomX dataset unavailable; continuing in light mode");
            }
            ctx.update_seed(seed, false)?;
            return match &ctx.light_vm {
                Some(vm) => RxContext::hash_with(vm, input),
                None => Err(PowError::VmNotInitialized),
            };
        }
        Err(err) => return Err(err),
    }
    match &ctx.fast_vm {
        Some(vm) => RxContext::hash_with(vm, input),
        None => Err(PowError::VmNotInitialized),
    }
}

/// Read-only handle to the shared cache for `seed`, initializing it first if
/// needed. The handle is reference-counted and stays valid across a reseed.
pub fn shared_cache(seed: &Hash256) -> Result<RandomXCache, PowError> {
    let mut ctx = CONTEXT.lock();
    ctx.update_seed(seed, false)?;
    match &ctx.cache {
        Some(cache) => Ok(cache.clone()),
        None => Err(PowError::VmNotInitialized),
    }
}

/// Read-only handle to the shared dataset for `seed`, building it on first
/// use. Errors with `DatasetUnavailable` under memory pressure.
pub fn shared_dataset(seed: &Hash256) -> Result<RandomXDataset, PowError> {
    let mut ctx = CONTEXT.lock();
    ctx.update_seed(seed, true)?;
    match &ctx.dataset {
        Some(dataset) => Ok(dataset.clone()),
        None => Err(PowError::VmNotInitialized),
    }
}

/// Per-thread mining VM.
///
/// Each worker owns one of these. The VM binds to the shared cache (light
/// mode) or dataset (fast mode) and hashes without any locking; the only
/// synchronized step is `initialize`, which goes through the process context.
/// Move-only by construction; dropping it releases the VM exactly once.
pub struct MiningVm {
    vm: Option<RandomXVM>,
    seed: Hash256,
    fast_mode: bool,
}

impl MiningVm {
    pub fn new() -> Self {
        Self {
            vm: None,
            seed: [0u8; 32],
            fast_mode: false,
        }
    }

    /// Bind to `seed`. Ensures the process context holds the cache (and, in
    /// fast mode, the dataset) for that seed, then builds a private VM over
    /// the shared buffers. Fast-mode failure is reported to the caller, which
    /// may retry in light mode.
    pub fn initialize(&mut self, seed: &Hash256, fast_mode: bool) -> Result<(), PowError> {
        let (cache, dataset) = if fast_mode {
            let dataset = shared_dataset(seed)?;
            (shared_cache(seed)?, Some(dataset))
        } else {
            (shared_cache(seed)?, None)
        };
        let vm = create_vm(fast_mode, Some(cache), dataset)?;
        self.vm = Some(vm);
        self.seed = *seed;
        self.fast_mode = fast_mode;
        Ok(())
    }

    /// Hash `input`. Lock-free; no allocations besides the library's output
    /// buffer.
    pub fn hash(&self, input: &[u8]) -> Result<Hash256, PowError> {
        match &self.vm {
            Some(vm) => digest_from(vm.calculate_hash(input)?),
            None => Err(PowError::VmNotInitialized),
        }
    }

    /// Whether the VM is currently bound to `seed`.
    pub fn has_seed(&self, seed: &Hash256) -> bool {
        self.vm.is_some() && self.seed == *seed
    }

    pub fn is_fast_mode(&self) -> bool {
        self.fast_mode
    }
}

impl Default for MiningVm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::seed::genesis_seed_hash;

    #[test]
    fn light_hash_is_deterministic_and_input_sensitive() {
        let seed = genesis_seed_hash();
        let header_a = [0u8; 80];
        let header_b = [1u8; 80];

        let h1 = hash_light(&header_a, &seed).unwrap();
        let h2 = hash_light(&header_a, &seed).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, [0u8; 32]);
        assert_ne!(h1, seed);

        let h3 = hash_light(&header_b, &seed).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn different_seed_changes_output() {
        let header = [0u8; 80];
        let mut seed_b = [0u8; 32];
        seed_b[0] = 1;

        let h1 = hash_light(&header, &[0u8; 32]).unwrap();
        let h2 = hash_light(&header, &seed_b).unwrap();
        assert_ne!(h1, h2);

        // switching back reinitializes the cache and reproduces the result
        let h3 = hash_light(&header, &[0u8; 32]).unwrap();
        assert_eq!(h1, h3);
    }

    #[test]
    fn mining_vm_matches_shared_light_vm() {
        let seed = genesis_seed_hash();
        let header = [42u8; 80];

        let mut vm = MiningVm::new();
        assert!(!vm.has_seed(&seed));
        vm.initialize(&seed, false).unwrap();
        assert!(vm.has_seed(&seed));
        assert!(!vm.is_fast_mode());

        let worker_digest = vm.hash(&header).unwrap();
        let shared_digest = hash_light(&header, &seed).unwrap();
        assert_eq!(worker_digest, shared_digest);
    }

    #[test]
    fn uninitialized_vm_reports_error() {
        let vm = MiningVm::new();
        assert!(matches!(
            vm.hash(&[0u8; 80]),
            Err(PowError::VmNotInitialized)
        ));
    }

    #[test]
    #[ignore = "materializes the ~2 GiB RandomX dataset"]
    fn fast_mode_matches_light_mode() {
        let seed = genesis_seed_hash();
        let header = [7u8; 80];
        let light = hash_light(&header, &seed).unwrap();
        let fast = hash_fast(&header, &seed).unwrap();
        assert_eq!(light, fast);

        let mut vm = MiningVm::new();
        vm.initialize(&seed, true).unwrap();
        assert_eq!(vm.hash(&header).unwrap(), light);
    }
}
