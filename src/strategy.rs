//! Definitions for the block-publication strategies of miners.

pub mod honest;
pub mod lead_selfish;
pub mod selfish;

pub use honest::Honest;
pub use lead_selfish::LeadSelfish;
pub use selfish::Selfish;

use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::{block::BlockId, chain::ChainRegistry};

/// What a miner does after mining a block or observing that its node's
/// public tip moved.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Decision {
    /// The block the miner keeps building on privately.
    pub mining_tip: BlockId,
    /// A block to announce to every peer, if any.
    pub broadcast: Option<BlockId>,
    /// A candidate to feed into the node's own fork choice, if any.
    pub public_tip: Option<BlockId>,
}

impl Decision {
    /// Keep mining on `tip` and reveal nothing.
    pub fn mine_on(tip: BlockId) -> Self {
        Decision { mining_tip: tip, broadcast: None, public_tip: None }
    }

    /// Keep mining on `tip` while announcing `broadcast` to peers.
    pub fn reveal(tip: BlockId, broadcast: BlockId) -> Self {
        Decision {
            mining_tip: tip,
            broadcast: Some(broadcast),
            public_tip: None,
        }
    }
}

/// A miner's block-publication strategy. Stateless over the registry: every
/// hook receives the full chain and the relevant tips, and replies with a
/// [Decision].
pub trait Strategy: Debug + DynClone + Send + Sync {
    /// Returns the name of the strategy.
    fn name(&self) -> String;

    /// Called when the node's public tip differs from the miner's private
    /// mining tip, once per tick before any mining attempt.
    fn on_new_tip(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        mining_tip: BlockId,
    ) -> Decision;

    /// Called when the miner finds a block; `mined` was minted on
    /// `mining_tip`.
    fn on_block_mined(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        mining_tip: BlockId,
        mined: BlockId,
    ) -> Decision;
}

dyn_clone::clone_trait_object!(Strategy);

/// Height difference between a private mining tip and the public tip.
/// Negative when the public chain is ahead.
pub(crate) fn lead(
    chain: &ChainRegistry,
    private: BlockId,
    public: BlockId,
) -> i64 {
    chain[private].block.height as i64 - chain[public].block.height as i64
}
