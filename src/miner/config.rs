//! Miner configuration.
//!
//! Mining is off by default and refuses to start without an explicit payout
//! address and thread count; an accidental `-mine` must not silently burn a
//! machine's CPU into a script nobody controls.

use serde::{Deserialize, Serialize};

use crate::error::MinerError;

/// RandomX memory/performance trade-off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomxMode {
    /// Fully materialized ~2 GiB dataset; fastest steady-state hashing.
    #[default]
    Fast,
    /// Cache-only ~256 MiB; an order of magnitude slower but cheap.
    Light,
}

/// Worker OS-thread priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinePriority {
    /// nice(19) on unix; best effort everywhere else.
    #[default]
    Low,
    Normal,
}

/// Options recognized by the internal miner.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Master enable. Everything else is ignored while this is false.
    #[serde(default)]
    pub mine: bool,

    /// Payout address. Required; an empty value fails startup.
    #[serde(default)]
    pub mineaddress: String,

    /// Worker thread count. Required; zero fails startup.
    #[serde(default)]
    pub minethreads: u32,

    /// RandomX mode.
    #[serde(default)]
    pub minerandomx: RandomxMode,

    /// Worker thread priority.
    #[serde(default)]
    pub minepriority: MinePriority,
}

impl MinerConfig {
    /// Validate the startup requirements.
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.mineaddress.trim().is_empty() {
            return Err(MinerError::MissingAddress);
        }
        if self.minethreads == 0 {
            return Err(MinerError::MissingThreads);
        }
        Ok(())
    }

    pub fn fast_mode(&self) -> bool {
        self.minerandomx == RandomxMode::Fast
    }

    pub fn low_priority(&self) -> bool {
        self.minepriority == MinePriority::Low
    }
}
