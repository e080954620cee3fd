//! Implementation of selfish mining.

use crate::{block::BlockId, chain::ChainRegistry};

use super::{lead, Decision, Strategy};

/// Withholds mined blocks to build a private chain, revealing just enough
/// of it to keep winning races against the public chain, as described by
/// Eyal and Sirer ([arXiv:1311.0243](https://arxiv.org/abs/1311.0243)).
///
/// While ahead, every public tip advance is answered by revealing the
/// private block at the contested height; when the public chain pulls
/// level the whole private chain is put up to race; when it pulls ahead
/// the private chain is abandoned.
#[derive(Debug, Default, Clone, Copy)]
pub struct Selfish;

impl Selfish {
    pub fn new() -> Self {
        Selfish
    }
}

impl Strategy for Selfish {
    fn name(&self) -> String {
        "Selfish".into()
    }

    fn on_new_tip(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        mining_tip: BlockId,
    ) -> Decision {
        let lead = lead(chain, mining_tip, public_tip);

        if lead < 0 {
            // capitulate and mine on the public chain
            Decision::mine_on(public_tip)
        } else if lead == 0 {
            // even race: our whole private chain against theirs
            Decision::reveal(mining_tip, mining_tip)
        } else {
            let contested = chain
                .ancestor_at_height(
                    mining_tip,
                    chain[public_tip].block.height,
                )
                .expect("positive lead implies an ancestor at tip height");
            Decision::reveal(mining_tip, contested)
        }
    }

    fn on_block_mined(
        &self,
        chain: &ChainRegistry,
        public_tip: BlockId,
        _mining_tip: BlockId,
        mined: BlockId,
    ) -> Decision {
        if lead(chain, mined, public_tip) >= 1 {
            let contested = chain
                .ancestor_at_height(mined, chain[public_tip].block.height)
                .expect("positive lead implies an ancestor at tip height");
            Decision::reveal(mined, contested)
        } else {
            Decision::mine_on(mined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Selfish;
    use crate::{
        block::BlockId,
        chain::ChainRegistry,
        network::VertexId,
        strategy::{Decision, Strategy},
    };

    /// Genesis plus a private chain of `private` blocks and a public fork
    /// of `public` blocks, both off genesis.
    fn forked(
        private: u64,
        public: u64,
    ) -> (ChainRegistry, BlockId, BlockId) {
        let mut chain = ChainRegistry::new();
        let us = VertexId::from(0);
        let them = VertexId::from(1);

        let mut private_tip = chain.genesis();
        for time in 0..private {
            private_tip =
                chain.mint(private_tip, us, time + 1, None).unwrap();
        }
        let mut public_tip = chain.genesis();
        for time in 0..public {
            public_tip =
                chain.mint(public_tip, them, time + 1, None).unwrap();
        }

        (chain, private_tip, public_tip)
    }

    #[test]
    fn capitulates_when_behind() {
        let (chain, private_tip, public_tip) = forked(1, 2);
        let decision = Selfish.on_new_tip(&chain, public_tip, private_tip);
        assert_eq!(decision, Decision::mine_on(public_tip));
    }

    #[test]
    fn races_with_the_full_chain_at_even_heights() {
        let (chain, private_tip, public_tip) = forked(2, 2);
        let decision = Selfish.on_new_tip(&chain, public_tip, private_tip);
        assert_eq!(decision, Decision::reveal(private_tip, private_tip));
    }

    #[test]
    fn reveals_the_contested_height_while_ahead() {
        let (chain, private_tip, public_tip) = forked(3, 1);
        let decision = Selfish.on_new_tip(&chain, public_tip, private_tip);

        let contested = chain.ancestor_at_height(private_tip, 1).unwrap();
        assert_eq!(decision, Decision::reveal(private_tip, contested));
        assert_ne!(contested, private_tip);
    }

    #[test]
    fn withholds_fresh_blocks_until_ahead() {
        let mut chain = ChainRegistry::new();
        let us = VertexId::from(0);
        let genesis = chain.genesis();

        // first block off genesis: lead 1, reveal the contested height
        let first = chain.mint(genesis, us, 1, None).unwrap();
        let decision = Selfish.on_block_mined(&chain, genesis, genesis, first);
        assert_eq!(decision.mining_tip, first);
        assert_eq!(decision.broadcast, Some(genesis));
        assert_eq!(decision.public_tip, None);

        // mined while level with a longer public fork: keep it hidden
        let (chain, private_tip, public_tip) = forked(2, 2);
        let parent = chain[private_tip].block.parent.unwrap();
        let decision =
            Selfish.on_block_mined(&chain, public_tip, parent, private_tip);
        assert_eq!(decision, Decision::mine_on(private_tip));
    }
}
