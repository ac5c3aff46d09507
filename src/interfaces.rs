//! Interfaces to the surrounding node.
//!
//! The PoW core does not own chain state, block assembly, validation, or the
//! peer set; it consumes them through these traits. The node wires real
//! implementations in; tests substitute fakes.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::block::{Block, BlockTemplate, Hash256};

/// One entry of the block index, as much of it as the PoW core needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    pub height: u64,
    pub hash: Hash256,
    /// Hash of the previous block; `None` only for genesis.
    pub prev: Option<Hash256>,
    pub time: u32,
    pub bits: u32,
}

/// Read-only view of the active chain.
pub trait ChainView: Send + Sync {
    /// The current tip, or `None` before the genesis block is connected.
    fn active_tip(&self) -> Option<ChainEntry>;

    /// Look up an index entry by block hash.
    fn entry(&self, hash: &Hash256) -> Option<ChainEntry>;
}

/// The external block assembler.
pub trait TemplateBuilder: Send + Sync {
    /// Build a candidate block paying to `coinbase_script`, or `None` when no
    /// template is currently available.
    fn create_block_template(&self, coinbase_script: &[u8]) -> Option<BlockTemplate>;
}

/// Outcome of handing a block to the external validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessedBlock {
    /// The block passed validation (it may still be a duplicate).
    pub accepted: bool,
    /// The block extended the index for the first time.
    pub new_block: bool,
}

/// The external block validator / chain-state manager.
pub trait BlockProcessor: Send + Sync {
    fn process_new_block(
        &self,
        block: &Block,
        force_processing: bool,
        min_pow_checked: bool,
    ) -> ProcessedBlock;
}

/// Receiver for chain-tip updates. The miner registers one of these at start
/// and unregisters it at stop; the callback body must stay cheap (it runs on
/// the validator's thread).
pub trait TipCallback: Send + Sync {
    fn updated_block_tip(
        &self,
        new_tip: &ChainEntry,
        fork_point: Option<&ChainEntry>,
        initial_download: bool,
    );
}

/// Registration surface of the validation-signals dispatcher.
pub trait ValidationSignals: Send + Sync {
    fn register_tip_callback(&self, callback: Arc<dyn TipCallback>);
    fn unregister_tip_callback(&self, callback: &Arc<dyn TipCallback>);
}

/// Read-only view of the P2P layer.
pub trait NetworkView: Send + Sync {
    fn connected_peer_count(&self) -> u32;
}

/// Bundle of collaborator handles handed to the miner. All `Arc`s; the miner
/// never owns the node and the node never references the miner back.
#[derive(Clone)]
pub struct NodeContext {
    pub chain: Arc<dyn ChainView>,
    pub templates: Arc<dyn TemplateBuilder>,
    pub processor: Arc<dyn BlockProcessor>,
    pub signals: Arc<dyn ValidationSignals>,
    pub network: Arc<dyn NetworkView>,
    /// Process-wide interrupt flag shared with the chain validator.
    pub interrupt: Arc<AtomicBool>,
}
