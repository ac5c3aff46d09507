//! RandomX seed-hash resolution.
//!
//! Botcoin uses a fixed genesis seed for every block. Rotating the seed every
//! epoch (the Monero scheme) causes permanent fork divergence when nodes on
//! different forks disagree about the block hash at an epoch boundary; with a
//! constant seed any node can verify any block regardless of chain history.
//! The rotation constants remain part of the published interface so the
//! schedule can be re-enabled by changing [`seed_height`] alone.

use sha2::{Digest, Sha256};

use crate::block::Hash256;
use crate::interfaces::{ChainEntry, ChainView};

/// Seed rotation epoch length in blocks.
pub const EPOCH_LENGTH: u64 = 2048;

/// Blocks of lag before a newly eligible seed activates.
pub const EPOCH_LAG: u64 = 64;

/// The constant genesis seed: SHA-256 of the ASCII string
/// "Botcoin Genesis Seed", hashed as raw bytes with no framing.
pub fn genesis_seed_hash() -> Hash256 {
    Sha256::digest(b"Botcoin Genesis Seed").into()
}

/// Height of the block whose hash seeds the RandomX cache for a block at
/// `block_height`. The rotation schedule is deliberately disabled: every
/// height resolves to the genesis seed (height 0). Flip this to
/// [`rotation_seed_height`] to re-enable rotation.
pub fn seed_height(block_height: u64) -> u64 {
    let _ = block_height;
    0
}

/// The published rotation schedule: the seed block advances by one epoch
/// every `EPOCH_LENGTH` blocks, `EPOCH_LAG` blocks after the epoch boundary.
/// Kept as a pure function so validators and tests can check the arithmetic
/// even while [`seed_height`] ignores it.
pub fn rotation_seed_height(block_height: u64) -> u64 {
    (block_height.saturating_sub(EPOCH_LAG) / EPOCH_LENGTH) * EPOCH_LENGTH
}

/// Seed hash for a block at the given height.
pub fn seed_hash_for_height(block_height: u64) -> Hash256 {
    if seed_height(block_height) == 0 {
        return genesis_seed_hash();
    }
    // Unreachable while rotation is disabled; non-zero seed heights are
    // resolved against the chain in `seed_hash_for_block`.
    genesis_seed_hash()
}

/// Seed hash for the block that would extend `prev`. `prev` of `None` means
/// the genesis block itself is being validated or mined.
///
/// When a future schedule returns a non-zero seed height, the seed is the
/// hash of the ancestor block at that height, found by walking `prev`
/// pointers; if the ancestor cannot be resolved the genesis seed is used.
pub fn seed_hash_for_block(chain: &dyn ChainView, prev: Option<&ChainEntry>) -> Hash256 {
    let Some(prev) = prev else {
        return genesis_seed_hash();
    };
    let target_height = seed_height(prev.height + 1);
    if target_height == 0 {
        return genesis_seed_hash();
    }
    let mut cursor = prev.clone();
    while cursor.height > target_height {
        match cursor.prev.and_then(|hash| chain.entry(&hash)) {
            Some(entry) => cursor = entry,
            None => return genesis_seed_hash(),
        }
    }
    if cursor.height == target_height {
        cursor.hash
    } else {
        genesis_seed_hash()
    }
}
