//! Implementation of honest mining.

use crate::{block::BlockId, chain::ChainRegistry};

use super::{Decision, Strategy};

/// Mines on the node's public tip and announces every block the moment it
/// is found. The mined block is also fed back into the node's own fork
/// choice, so an honest miner adopts its own blocks instead of waiting to
/// hear them echoed back.
#[derive(Debug, Default, Clone, Copy)]
pub struct Honest;

impl Honest {
    pub fn new() -> Self {
        Honest
    }
}

impl Strategy for Honest {
    fn name(&self) -> String {
        "Honest".into()
    }

    fn on_new_tip(
        &self,
        _chain: &ChainRegistry,
        public_tip: BlockId,
        _mining_tip: BlockId,
    ) -> Decision {
        Decision::mine_on(public_tip)
    }

    fn on_block_mined(
        &self,
        _chain: &ChainRegistry,
        _public_tip: BlockId,
        _mining_tip: BlockId,
        mined: BlockId,
    ) -> Decision {
        Decision {
            mining_tip: mined,
            broadcast: Some(mined),
            public_tip: Some(mined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Honest;
    use crate::{
        chain::ChainRegistry,
        network::VertexId,
        strategy::{Decision, Strategy},
    };

    #[test]
    fn follows_the_public_tip() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let tip = chain.mint(genesis, VertexId::from(0), 5, None).unwrap();

        let decision = Honest.on_new_tip(&chain, tip, genesis);
        assert_eq!(decision, Decision::mine_on(tip));
    }

    #[test]
    fn publishes_and_adopts_mined_blocks() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let mined = chain.mint(genesis, VertexId::from(0), 5, None).unwrap();

        let decision = Honest.on_block_mined(&chain, genesis, genesis, mined);
        assert_eq!(decision.mining_tip, mined);
        assert_eq!(decision.broadcast, Some(mined));
        assert_eq!(decision.public_tip, Some(mined));
    }
}
