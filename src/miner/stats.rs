//! Miner statistics: lock-free counters updated by the workers and the
//! read-only status snapshot served to the node's status surface.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared counters. Workers batch their hash counts locally and flush here to
/// keep the hot loop free of contended writes.
#[derive(Default)]
pub(crate) struct MinerCounters {
    pub hashes: AtomicU64,
    pub blocks_found: AtomicU64,
    pub stale_blocks: AtomicU64,
    pub templates: AtomicU64,
    pub start_time: AtomicI64,
}

impl MinerCounters {
    pub fn reset(&self) {
        self.hashes.store(0, Ordering::Relaxed);
        self.blocks_found.store(0, Ordering::Relaxed);
        self.stale_blocks.store(0, Ordering::Relaxed);
        self.templates.store(0, Ordering::Relaxed);
        self.start_time.store(unix_now(), Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        let start = self.start_time.load(Ordering::Relaxed);
        (unix_now() - start).max(0) as u64
    }

    /// Average hashrate over the whole run.
    pub fn hashrate(&self) -> f64 {
        let uptime = self.uptime_seconds();
        if uptime == 0 {
            return 0.0;
        }
        self.hashes.load(Ordering::Relaxed) as f64 / uptime as f64
    }
}

pub(crate) fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Read-only miner status snapshot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MinerStatus {
    pub running: bool,
    pub threads: u32,
    /// Hashes per second averaged over the uptime.
    pub hashrate: f64,
    pub blocks_found: u64,
    pub stale_blocks: u64,
    pub templates: u64,
    pub uptime_seconds: u64,
    /// Whether workers are hashing against the full dataset. Flips to false
    /// if the dataset could not be built and the miner degraded to light mode.
    pub fast_mode: bool,
}
