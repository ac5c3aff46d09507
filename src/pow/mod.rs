//! Proof-of-work validation.
//!
//! A block's PoW digest is the RandomX hash of its 80-byte serialized header,
//! keyed by the seed hash for the block's height. The digest, read as a
//! 256-bit little-endian integer, must not exceed the target decoded from the
//! header's compact `bits`.

pub mod difficulty;
pub mod randomx;
pub mod seed;
pub mod target;

use crate::block::{BlockHeader, Hash256};
use crate::error::PowError;
use crate::interfaces::{ChainEntry, ChainView};
use crate::params::Params;

/// Check a PoW digest against a compact target. Fails when the encoding is
/// negative, zero, overflowing, or above the network pow_limit, or when the
/// digest exceeds the decoded target.
#[cfg(not(feature = "fuzz-determinism"))]
pub fn check_proof_of_work(pow_hash: &Hash256, bits: u32, params: &Params) -> bool {
    match target::derive_target(bits, params.pow_limit) {
        Some(required) => target::hash_to_u256(pow_hash) <= required,
        None => false,
    }
}

/// Deterministic stand-in for fuzzing: accept when the top bit of the last
/// digest byte is clear. Compiled only under the `fuzz-determinism` feature.
#[cfg(feature = "fuzz-determinism")]
pub fn check_proof_of_work(pow_hash: &Hash256, _bits: u32, _params: &Params) -> bool {
    pow_hash[31] & 0x80 == 0
}

/// RandomX PoW digest of a block header under `seed_hash`. Uses the shared
/// light-mode VM; validation never needs the full dataset.
pub fn block_pow_hash(header: &BlockHeader, seed_hash: &Hash256) -> Result<Hash256, PowError> {
    randomx::hash_light(&header.serialize(), seed_hash)
}

/// Full header PoW check: resolve the seed for the header's height, hash the
/// serialized header, and compare against the decoded target. `prev` is
/// `None` when validating genesis.
///
/// `Ok(false)` means the header fails consensus (bad target encoding or
/// insufficient work); `Err` is reserved for RandomX resource failures.
pub fn check_block_proof_of_work(
    header: &BlockHeader,
    prev: Option<&ChainEntry>,
    chain: &dyn ChainView,
    params: &Params,
) -> Result<bool, PowError> {
    let seed_hash = seed::seed_hash_for_block(chain, prev);
    let pow_hash = block_pow_hash(header, &seed_hash)?;
    Ok(check_proof_of_work(&pow_hash, header.bits, params))
}
