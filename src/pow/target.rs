//! Compact target encoding and 256-bit target arithmetic.
//!
//! The compact form packs a 256-bit target into 32 bits: one byte of exponent
//! (the target's size in bytes) and a 23-bit mantissa. Bit 0x00800000 is the
//! sign flag and must be clear for a valid target.

use primitive_types::U256;

use crate::block::Hash256;

/// Decode a compact value. Returns the target plus the negative and overflow
/// flags; callers that need a consensus-valid target go through
/// [`derive_target`].
pub fn decode_compact(bits: u32) -> (U256, bool, bool) {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;
    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };
    let negative = mantissa != 0 && (bits & 0x0080_0000) != 0;
    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));
    (target, negative, overflow)
}

/// Encode a target into compact form, dropping precision below the top
/// 23 mantissa bits.
pub fn encode_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        target.low_u64() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u64()
    };
    // The mantissa sign bit must stay clear; shift into the next exponent.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    (compact as u32) | ((size as u32) << 24)
}

/// Decode and range-check a compact target. `None` if the encoding is
/// negative, zero, overflowing, or above the network's pow_limit.
pub fn derive_target(bits: u32, pow_limit: U256) -> Option<U256> {
    let (target, negative, overflow) = decode_compact(bits);
    if negative || overflow || target.is_zero() || target > pow_limit {
        return None;
    }
    Some(target)
}

/// Interpret a 32-byte digest as a 256-bit integer (stored order is
/// little-endian: byte 31 is most significant).
pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash)
}
