//! Error types for the proof-of-work engine and the internal miner.

use randomx_rs::RandomXError;

/// Failures raised by the RandomX engine and header validation.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PowError {
    /// The ~256 MiB RandomX cache could not be allocated or initialized.
    #[error("failed to allocate RandomX cache: {0}")]
    CacheUnavailable(RandomXError),

    /// The ~2 GiB RandomX dataset could not be allocated or built.
    #[error("failed to allocate RandomX dataset: {0}")]
    DatasetUnavailable(RandomXError),

    /// A RandomX VM could not be created, even with the portable interpreter.
    #[error("failed to create RandomX VM: {0}")]
    VmUnavailable(RandomXError),

    /// Hash computation failed inside the RandomX library.
    #[error("failed to calculate RandomX hash: {0}")]
    HashCalculation(#[from] RandomXError),

    /// The VM was used before `initialize` bound it to a seed.
    #[error("RandomX VM is not initialized")]
    VmNotInitialized,

    /// Header bytes do not form a valid 80-byte header.
    #[error("invalid block header: {0}")]
    InvalidHeader(String),
}

impl PowError {
    /// True when the failure is a resource problem (allocation) rather than a
    /// consensus-level rejection. Resource failures are retryable after the
    /// memory pressure clears.
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(
            self,
            PowError::CacheUnavailable(_)
                | PowError::DatasetUnavailable(_)
                | PowError::VmUnavailable(_)
        )
    }
}

/// Failures raised by the internal miner's start path. Runtime conditions
/// (missing template, rejected submission, too few peers) are handled inside
/// the mining loops and never abort the process.
#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    #[error("mining requires a payout address (set -mineaddress)")]
    MissingAddress,

    #[error("mining requires an explicit worker thread count (set -minethreads)")]
    MissingThreads,

    #[error("mining requires a non-empty coinbase script")]
    EmptyCoinbaseScript,

    #[error("miner is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Pow(#[from] PowError),
}
