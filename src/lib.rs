//! Botcoin proof-of-work core.
//!
//! The three pieces with original engineering in them:
//!
//! - the RandomX PoW engine ([`pow::randomx`]): process-wide cache/dataset
//!   lifecycle, light vs fast modes, per-thread mining VMs;
//! - the per-block difficulty retarget ([`pow::difficulty`]): a Monero-style
//!   sorted-window algorithm with symmetric outlier trimming;
//! - the internal miner ([`miner`]): an event-driven coordinator plus N
//!   stride-partitioned worker threads.
//!
//! Everything else a full node needs (mempool, wallet, P2P, storage, RPC) is
//! reached through the traits in [`interfaces`].

pub mod block;
pub mod error;
pub mod interfaces;
pub mod miner;
pub mod params;
pub mod pow;

pub use block::{Block, BlockHeader, BlockTemplate, Hash256, HEADER_SIZE, NONCE_OFFSET};
pub use error::{MinerError, PowError};
pub use interfaces::{
    BlockProcessor, ChainEntry, ChainView, NetworkView, NodeContext, ProcessedBlock,
    TemplateBuilder, TipCallback, ValidationSignals,
};
pub use miner::config::{MinePriority, MinerConfig, RandomxMode};
pub use miner::stats::MinerStatus;
pub use miner::InternalMiner;
pub use params::{ChainType, Params};
