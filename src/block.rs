//! Block primitives: the fixed 80-byte header codec, blocks, templates, and
//! merkle-root computation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PowError;

/// 32-byte hash in stored (little-endian) byte order.
pub type Hash256 = [u8; 32];

/// Serialized header size. Fixed by consensus.
pub const HEADER_SIZE: usize = 80;

/// Byte offset of the nonce inside a serialized header.
pub const NONCE_OFFSET: usize = 76;

/// Block header. Field order and widths match the wire encoding:
/// version(4) ‖ prev(32) ‖ merkle(32) ‖ time(4) ‖ bits(4) ‖ nonce(4),
/// all integers little-endian, hash fields in stored byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub hash_prev_block: Hash256,
    pub hash_merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize to the exact 80-byte wire form.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.hash_prev_block);
        out[36..68].copy_from_slice(&self.hash_merkle_root);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Decode an 80-byte header. Any other length is rejected.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, PowError> {
        if bytes.len() != HEADER_SIZE {
            return Err(PowError::InvalidHeader(format!(
                "expected {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&bytes[36..68]);
        let le4 = |s: &[u8]| -> [u8; 4] {
            let mut b = [0u8; 4];
            b.copy_from_slice(s);
            b
        };
        Ok(Self {
            version: i32::from_le_bytes(le4(&bytes[0..4])),
            hash_prev_block: prev,
            hash_merkle_root: merkle,
            time: u32::from_le_bytes(le4(&bytes[68..72])),
            bits: u32::from_le_bytes(le4(&bytes[72..76])),
            nonce: u32::from_le_bytes(le4(&bytes[76..80])),
        })
    }

    /// Block identity hash: double SHA-256 of the serialized header.
    pub fn block_hash(&self) -> Hash256 {
        sha256d(&self.serialize())
    }
}

/// A block as assembled by the external template builder: header plus the raw
/// serialized transactions (coinbase first). The miner only ever touches the
/// header nonce and the merkle root.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Vec<u8>>,
}

impl Block {
    /// Merkle root over the block's transaction hashes.
    pub fn merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.txs.iter().map(|tx| sha256d(tx)).collect();
        merkle_root(&txids)
    }
}

/// Candidate block handed out by the external block assembler.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
}

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Bitcoin-family merkle root: pair up hashes with double SHA-256, duplicating
/// the last node at odd levels. An empty list hashes to all zeroes.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash256> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&left);
            buf[32..].copy_from_slice(&right);
            next.push(sha256d(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 0x2000_0000,
            hash_prev_block: [0x11; 32],
            hash_merkle_root: [0x22; 32],
            time: 1_738_195_200,
            bits: 0x207f_ffff,
            nonce: 42,
        }
    }

    #[test]
    fn header_serializes_to_exactly_80_bytes() {
        let bytes = sample_header().serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        // nonce occupies the final four bytes, little-endian
        assert_eq!(&bytes[NONCE_OFFSET..], &42u32.to_le_bytes());
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let decoded = BlockHeader::deserialize(&header.serialize()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn short_and_long_headers_are_rejected() {
        assert!(BlockHeader::deserialize(&[0u8; 79]).is_err());
        assert!(BlockHeader::deserialize(&[0u8; 81]).is_err());
        assert!(BlockHeader::deserialize(&[]).is_err());
    }

    #[test]
    fn nonce_patch_matches_full_reserialize() {
        let mut header = sample_header();
        let mut patched = header.serialize();
        header.nonce = 0xdead_beef;
        patched[NONCE_OFFSET..].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert_eq!(patched, header.serialize());
    }

    #[test]
    fn merkle_root_single_tx_is_its_hash() {
        let txid = sha256d(b"coinbase");
        assert_eq!(merkle_root(&[txid]), txid);
    }

    #[test]
    fn merkle_root_duplicates_last_node_on_odd_levels() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        let c = sha256d(b"c");
        // three leaves: level 1 is [H(a‖b), H(c‖c)]
        let mut ab = [0u8; 64];
        ab[..32].copy_from_slice(&a);
        ab[32..].copy_from_slice(&b);
        let mut cc = [0u8; 64];
        cc[..32].copy_from_slice(&c);
        cc[32..].copy_from_slice(&c);
        let expected = merkle_root(&[sha256d(&ab), sha256d(&cc)]);
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn merkle_root_empty_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn block_merkle_root_hashes_raw_txs() {
        let block = Block {
            header: sample_header(),
            txs: vec![b"tx0".to_vec(), b"tx1".to_vec()],
        };
        let expected = merkle_root(&[sha256d(b"tx0"), sha256d(b"tx1")]);
        assert_eq!(block.merkle_root(), expected);
    }
}
