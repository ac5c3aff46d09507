//! Canonical consensus and network parameters.
//!
//! This is the single source of truth for the constants shared by the
//! difficulty engine, the PoW validator, and the internal miner. Miners and
//! validators must agree on these exact values or the chain forks.

use primitive_types::U256;

use crate::block::{BlockHeader, Hash256};

/// Which network these parameters describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainType {
    Main,
    Testnet,
    Regtest,
}

/// Per-network parameter table.
#[derive(Clone, Debug)]
pub struct Params {
    pub chain: ChainType,

    /// Highest (easiest) permitted proof-of-work target.
    pub pow_limit: U256,

    /// Target seconds between blocks; drives the per-block retarget.
    pub pow_target_spacing: i64,

    /// Two-week-style timespan for the legacy retarget path. Unused by the
    /// live per-block algorithm.
    pub pow_target_timespan: i64,

    /// Sliding window of recent blocks examined by the retarget.
    pub difficulty_window: i64,

    /// Number of outlier timestamps trimmed from each end of the window.
    pub difficulty_cut: i64,

    /// Regtest: keep the previous difficulty forever.
    pub pow_no_retargeting: bool,

    /// P2P message-start magic.
    pub message_start: [u8; 4],

    /// Default P2P port.
    pub default_port: u16,

    /// Genesis block header.
    pub genesis: BlockHeader,
}

/// Merkle root of the genesis coinbase, identical on every network
/// (stored byte order).
pub const GENESIS_MERKLE_ROOT: Hash256 = [
    0x90, 0xab, 0xe1, 0x85, 0x22, 0xca, 0xb1, 0x44, 0xa5, 0x90, 0x1d, 0x69, 0x46, 0x05, 0x66,
    0x4f, 0x73, 0x36, 0x86, 0x0b, 0xd9, 0x32, 0x92, 0xf1, 0x61, 0x49, 0x7f, 0xdf, 0x3a, 0x0c,
    0x37, 0x50,
];

/// Genesis timestamp: 2025-01-30 00:00:00 UTC.
pub const GENESIS_TIME: u32 = 1_738_195_200;

/// Genesis version: BIP9 signaling enabled from the first block.
pub const GENESIS_VERSION: i32 = 0x2000_0000;

/// Genesis compact target; decodes exactly to the mainnet pow_limit.
pub const GENESIS_BITS: u32 = 0x207f_ffff;

fn genesis_header(nonce: u32) -> BlockHeader {
    BlockHeader {
        version: GENESIS_VERSION,
        hash_prev_block: [0u8; 32],
        hash_merkle_root: GENESIS_MERKLE_ROOT,
        time: GENESIS_TIME,
        bits: GENESIS_BITS,
        nonce,
    }
}

impl Params {
    pub fn main() -> Self {
        Self {
            chain: ChainType::Main,
            // 0x7fffff followed by 58 zero nibbles; matches the genesis nBits.
            pow_limit: U256::from(0x7f_ffffu64) << 232,
            pow_target_spacing: 120,
            pow_target_timespan: 120,
            difficulty_window: 720,
            difficulty_cut: 60,
            pow_no_retargeting: false,
            message_start: [0xb0, 0x7c, 0x01, 0x0e],
            default_port: 8433,
            genesis: genesis_header(0),
        }
    }

    pub fn testnet() -> Self {
        Self {
            chain: ChainType::Testnet,
            pow_limit: U256::from(0x7f_ffffu64) << 232,
            pow_target_spacing: 60,
            pow_target_timespan: 14 * 24 * 60 * 60,
            difficulty_window: 720,
            difficulty_cut: 60,
            pow_no_retargeting: false,
            message_start: [0xb0, 0x7c, 0x7e, 0x57],
            default_port: 18433,
            genesis: genesis_header(1),
        }
    }

    pub fn regtest() -> Self {
        Self {
            chain: ChainType::Regtest,
            pow_limit: U256::MAX >> 1,
            pow_target_spacing: 60,
            pow_target_timespan: 24 * 60 * 60,
            difficulty_window: 720,
            difficulty_cut: 60,
            pow_no_retargeting: true,
            message_start: [0xb0, 0x7c, 0x00, 0x00],
            default_port: 18544,
            genesis: genesis_header(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::target::{decode_compact, derive_target};

    #[test]
    fn mainnet_pow_limit_matches_genesis_bits() {
        let params = Params::main();
        let (target, negative, overflow) = decode_compact(params.genesis.bits);
        assert!(!negative);
        assert!(!overflow);
        assert_eq!(target, params.pow_limit);
    }

    #[test]
    fn genesis_bits_sane_on_every_network() {
        for params in [Params::main(), Params::testnet(), Params::regtest()] {
            let target = derive_target(params.genesis.bits, params.pow_limit);
            assert!(
                target.is_some(),
                "{:?}: genesis bits must decode below pow_limit",
                params.chain
            );
        }
    }

    #[test]
    fn spacing_divides_legacy_timespan() {
        for params in [Params::main(), Params::testnet(), Params::regtest()] {
            assert_eq!(
                params.pow_target_timespan % params.pow_target_spacing,
                0,
                "{:?}",
                params.chain
            );
        }
    }

    #[test]
    fn networks_have_distinct_magic_and_ports() {
        let main = Params::main();
        let testnet = Params::testnet();
        let regtest = Params::regtest();
        assert_ne!(main.message_start, testnet.message_start);
        assert_ne!(main.message_start, regtest.message_start);
        assert_ne!(main.default_port, testnet.default_port);
        assert_ne!(testnet.default_port, regtest.default_port);
    }
}
