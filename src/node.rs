//! Per-vertex protocol state and the gossip/fork-choice engine.

use std::collections::{hash_map::Entry, HashMap};

use log::{debug, error, warn};
use rand::{rngs::StdRng, Rng};

use crate::{
    block::{BlockId, Tick, TipRole},
    chain::{ChainError, ChainRegistry},
    config::{
        SimConfig, DIFFICULTY_SCALE, RETARGET_EXPONENT, RETARGET_INTERVAL,
    },
    network::{Envelope, Message, VertexId},
    poisson::PoissonProcess,
    strategy::{Decision, Strategy},
};

/// Outcome of offering a candidate block to a node's fork choice.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TipUpdate {
    /// The candidate extends the current tip's chain.
    Advanced {
        /// Height gained over the previous tip.
        advance: i64,
    },
    /// The candidate won on a competing branch.
    Reorged {
        /// Height gained over the previous tip; can be negative when a
        /// shorter chain carries more work.
        advance: i64,
        /// Blocks abandoned below the previous tip.
        depth: u64,
    },
    /// The candidate was rejected; the tip is unchanged.
    Refused(RefusalReason),
}

/// Why a candidate block failed fork choice.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RefusalReason {
    /// The candidate does not carry strictly more total work than the
    /// current tip.
    Work,
    /// Switching would abandon more blocks than the node allows.
    Depth,
}

impl TipUpdate {
    /// True iff the candidate became the new tip.
    pub fn accepted(&self) -> bool {
        !matches!(self, TipUpdate::Refused(_))
    }
}

/// Mining-side extension of a [NodeState].
#[derive(Debug, Clone)]
pub struct MinerState {
    /// Declared hashrate; `None` falls back to
    /// [`SimConfig::default_hashrate`] on every tick.
    pub hashrate: Option<f64>,
    /// The private block this miner builds on. May lag or lead the node's
    /// public tip, depending on the strategy.
    pub mining_tip: Option<BlockId>,
    /// Arrival process deciding when the next block is found.
    pub process: PoissonProcess,
    /// Decides what happens to mined blocks and observed tip changes.
    pub strategy: Box<dyn Strategy>,
}

impl MinerState {
    fn new(strategy: Box<dyn Strategy>, hashrate: Option<f64>) -> Self {
        MinerState {
            hashrate,
            mining_tip: None,
            process: PoissonProcess::new(1.0),
            strategy,
        }
    }
}

/// Protocol state of a single vertex: its view of the best chain, what it
/// believes its peers know, and (for miners) the private mining state.
///
/// The per-tick [`update`](NodeState::update) runs the gossip steps in a
/// fixed order: bootstrap, handshake, ingest/relay, resync, mining.
/// Messages produced along the way collect in an outbox which the
/// simulation flushes into the network after the update.
#[derive(Debug, Default, Clone)]
pub struct NodeState {
    /// Head of the best chain this vertex knows, by total work.
    tip: Option<BlockId>,
    /// The best block each peer is known to have announced or been sent.
    /// Used to skip redundant relays.
    peer_tips: HashMap<VertexId, BlockId>,
    /// Messages that arrived this tick, consumed by `update`.
    inbox: Vec<Envelope>,
    /// Messages produced this tick, flushed by the simulation.
    outbox: Vec<(VertexId, Message)>,
    /// Whether the one-time handshake has been sent.
    joined: bool,
    /// Reorg depth beyond which this node refuses to switch branches.
    /// `None` accepts any depth.
    max_reorg_depth: Option<u64>,
    miner: Option<MinerState>,
}

/// Everything a vertex update needs from the simulation.
pub(crate) struct TickContext<'a> {
    pub chain: &'a mut ChainRegistry,
    pub config: &'a SimConfig,
    pub rng: &'a mut StdRng,
    pub time: Tick,
    /// Sum of every miner's effective hashrate, for difficulty bootstrap.
    pub total_hashrate: f64,
}

impl NodeState {
    /// A vertex that relays announcements but never mines.
    pub fn relay() -> Self {
        Self::default()
    }

    /// A vertex that relays and mines with the given strategy. `hashrate`
    /// of `None` uses the config default.
    pub fn miner(strategy: Box<dyn Strategy>, hashrate: Option<f64>) -> Self {
        NodeState {
            miner: Some(MinerState::new(strategy, hashrate)),
            ..Self::default()
        }
    }

    #[inline]
    pub fn tip(&self) -> Option<BlockId> {
        self.tip
    }

    #[inline]
    pub fn mining_tip(&self) -> Option<BlockId> {
        self.miner.as_ref().and_then(|m| m.mining_tip)
    }

    #[inline]
    pub fn is_miner(&self) -> bool {
        self.miner.is_some()
    }

    #[inline]
    pub fn miner_state(&self) -> Option<&MinerState> {
        self.miner.as_ref()
    }

    #[inline]
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// What this node last heard from (or sent to) `peer`.
    #[inline]
    pub fn peer_tip(&self, peer: VertexId) -> Option<BlockId> {
        self.peer_tips.get(&peer).copied()
    }

    #[inline]
    pub fn max_reorg_depth(&self) -> Option<u64> {
        self.max_reorg_depth
    }

    pub fn set_max_reorg_depth(&mut self, bound: Option<u64>) {
        self.max_reorg_depth = bound;
    }

    pub(crate) fn deliver(&mut self, envelope: Envelope) {
        self.inbox.push(envelope);
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<(VertexId, Message)> {
        std::mem::take(&mut self.outbox)
    }

    /// Runs one tick of the protocol for this vertex.
    pub(crate) fn update(
        &mut self,
        vk: VertexId,
        neighbors: &[VertexId],
        ctx: &mut TickContext<'_>,
    ) {
        self.bootstrap(vk, ctx.chain);
        self.handshake(neighbors);
        self.ingest(vk, neighbors, ctx);
        self.maybe_resync(neighbors, ctx);
        self.update_miner(vk, neighbors, ctx);
    }

    /// Adopts genesis as the initial tip.
    fn bootstrap(&mut self, vk: VertexId, chain: &mut ChainRegistry) {
        if self.tip.is_none() {
            self.move_tip(vk, chain.genesis(), chain);
        }
    }

    /// Announces this vertex to its neighbors, once.
    fn handshake(&mut self, neighbors: &[VertexId]) {
        if self.joined {
            return;
        }
        for &peer in neighbors {
            self.outbox.push((peer, Message::Joined));
        }
        self.joined = true;
    }

    /// Consumes the inbox: tracks peer tips, feeds the best announcement
    /// into fork choice, and relays the own tip when anything newsworthy
    /// arrived (including a peer's handshake).
    fn ingest(
        &mut self,
        vk: VertexId,
        neighbors: &[VertexId],
        ctx: &mut TickContext<'_>,
    ) {
        let inbox = std::mem::take(&mut self.inbox);
        let mut best: Option<BlockId> = None;
        let mut heard_news = false;
        let mut heard_joined = false;

        for Envelope { from, message } in inbox {
            match message {
                Message::Joined => heard_joined = true,
                Message::Block(block) => {
                    let work = ctx.chain[block].block.total_work;
                    match self.peer_tips.entry(from) {
                        Entry::Occupied(mut entry) => {
                            if work > ctx.chain[*entry.get()].block.total_work
                            {
                                entry.insert(block);
                                heard_news = true;
                            }
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(block);
                            heard_news = true;
                        }
                    }

                    let improves = best
                        .map_or(true, |b| work > ctx.chain[b].block.total_work);
                    if improves {
                        best = Some(block);
                    }
                }
            }
        }

        let tip = self.tip.expect("bootstrap precedes ingest");
        if let Some(candidate) = best {
            if ctx.chain[candidate].block.total_work
                > ctx.chain[tip].block.total_work
            {
                if let Err(err) = self.update_tip(vk, candidate, ctx.chain) {
                    error!(
                        "{}: dropped announcement {}: {}",
                        vk, candidate, err
                    );
                }
                heard_news = true;
            }
        }

        if heard_news || heard_joined {
            self.broadcast_tip(neighbors, ctx.chain);
        }
    }

    /// Occasionally rebroadcasts the tip to every neighbor, skip rule
    /// bypassed. Repairs peers whose state this node is wrong about
    /// (dropped handshakes, missed announcements).
    fn maybe_resync(
        &mut self,
        neighbors: &[VertexId],
        ctx: &mut TickContext<'_>,
    ) {
        let Some(tip) = self.tip else { return };
        let p = ctx.config.resync_probability;
        if p > 0.0 && ctx.rng.gen_bool(p.min(1.0)) {
            for &peer in neighbors {
                self.peer_tips.insert(peer, tip);
                self.outbox.push((peer, Message::Block(tip)));
            }
        }
    }

    /// Offers `candidate` to this node's fork choice. The candidate wins
    /// only with strictly more total work than the current tip (first seen
    /// wins ties), and only if switching branches would not abandon more
    /// than `max_reorg_depth` blocks.
    pub fn update_tip(
        &mut self,
        vk: VertexId,
        candidate: BlockId,
        chain: &mut ChainRegistry,
    ) -> Result<TipUpdate, ChainError> {
        let current = match self.tip {
            Some(tip) => tip,
            None => {
                let advance = chain[candidate].block.height as i64;
                self.move_tip(vk, candidate, chain);
                return Ok(TipUpdate::Advanced { advance });
            }
        };

        if chain[candidate].block.total_work
            <= chain[current].block.total_work
        {
            return Ok(TipUpdate::Refused(RefusalReason::Work));
        }

        let ancestor = chain.common_ancestor(current, candidate)?;
        let advance = chain[candidate].block.height as i64
            - chain[current].block.height as i64;

        let update = if ancestor == current {
            TipUpdate::Advanced { advance }
        } else {
            let depth =
                chain[current].block.height - chain[ancestor].block.height;
            if let Some(bound) = self.max_reorg_depth {
                if depth > bound {
                    warn!(
                        "{}: refused reorg to {}: depth {} exceeds bound {}",
                        vk, candidate, depth, bound
                    );
                    return Ok(TipUpdate::Refused(RefusalReason::Depth));
                }
            }
            debug!(
                "{}: reorg to {} (depth {}, advance {})",
                vk, candidate, depth, advance
            );
            TipUpdate::Reorged { advance, depth }
        };

        self.move_tip(vk, candidate, chain);
        Ok(update)
    }

    /// Moves the public tip, keeping the registry's holder counts in step.
    fn move_tip(
        &mut self,
        vk: VertexId,
        block: BlockId,
        chain: &mut ChainRegistry,
    ) {
        if self.tip == Some(block) {
            return;
        }
        if let Some(old) = self.tip {
            chain.unregister_tip_holder(old, vk, TipRole::Node);
        }
        self.tip = Some(block);
        chain.register_tip_holder(block, vk, TipRole::Node);
    }

    /// Moves a miner's private tip, keeping the registry's holder counts
    /// in step.
    fn move_mining_tip(
        miner: &mut MinerState,
        vk: VertexId,
        block: BlockId,
        chain: &mut ChainRegistry,
    ) {
        if miner.mining_tip == Some(block) {
            return;
        }
        if let Some(old) = miner.mining_tip {
            chain.unregister_tip_holder(old, vk, TipRole::Miner);
        }
        miner.mining_tip = Some(block);
        chain.register_tip_holder(block, vk, TipRole::Miner);
    }

    /// Announces the current tip to every neighbor not already known to
    /// hold an at-least-as-good block.
    fn broadcast_tip(&mut self, neighbors: &[VertexId], chain: &ChainRegistry) {
        if let Some(tip) = self.tip {
            self.broadcast_block(tip, neighbors, chain);
        }
    }

    /// Announces `block` to every neighbor the skip rule lets through,
    /// recording each send in `peer_tips`.
    fn broadcast_block(
        &mut self,
        block: BlockId,
        neighbors: &[VertexId],
        chain: &ChainRegistry,
    ) {
        let work = chain[block].block.total_work;
        for &peer in neighbors {
            if let Some(&known) = self.peer_tips.get(&peer) {
                if chain[known].block.total_work >= work {
                    continue;
                }
            }
            self.peer_tips.insert(peer, block);
            self.outbox.push((peer, Message::Block(block)));
        }
    }

    /// Runs the mining side of the tick: reacts to tip divergence through
    /// the strategy, then attempts to mine via the Poisson process.
    fn update_miner(
        &mut self,
        vk: VertexId,
        neighbors: &[VertexId],
        ctx: &mut TickContext<'_>,
    ) {
        let Some(mut miner) = self.miner.take() else { return };
        let tip = self.tip.expect("bootstrap precedes mining");

        if miner.mining_tip.is_none() {
            Self::move_mining_tip(&mut miner, vk, tip, ctx.chain);
        }
        let mining_tip = miner.mining_tip.expect("mining tip just set");

        if mining_tip != tip {
            let decision =
                miner.strategy.on_new_tip(ctx.chain, tip, mining_tip);
            self.apply_decision(&mut miner, vk, neighbors, decision, ctx);
        }

        let difficulty = self.working_difficulty(ctx);
        let hashrate = miner.hashrate.unwrap_or(ctx.config.default_hashrate);
        let lambda = hashrate / (difficulty / DIFFICULTY_SCALE)
            / ctx.config.block_time_ticks();

        if miner.process.update(ctx.time as f64, lambda, ctx.rng) {
            if let Err(err) =
                self.mint_on(&mut miner, vk, neighbors, difficulty, ctx)
            {
                error!("{}: mint failed: {}", vk, err);
            }
        }

        self.miner = Some(miner);
    }

    /// Mints a block on the mining tip (retargeted difficulty at interval
    /// boundaries) and routes it through the strategy's mined hook.
    fn mint_on(
        &mut self,
        miner: &mut MinerState,
        vk: VertexId,
        neighbors: &[VertexId],
        difficulty: f64,
        ctx: &mut TickContext<'_>,
    ) -> Result<BlockId, ChainError> {
        let tip = self.tip.expect("bootstrap precedes mining");
        let mining_tip = miner.mining_tip.expect("mining tip set before mint");

        let requested =
            retarget(ctx.chain, mining_tip, difficulty, ctx.config);
        let mined = ctx.chain.mint(mining_tip, vk, ctx.time, Some(requested))?;
        debug!(
            "{} mined {} at height {} (difficulty {})",
            vk,
            mined,
            ctx.chain[mined].block.height,
            ctx.chain[mined].block.difficulty
        );

        let decision =
            miner.strategy.on_block_mined(ctx.chain, tip, mining_tip, mined);
        self.apply_decision(miner, vk, neighbors, decision, ctx);

        Ok(mined)
    }

    /// Forces one mining event right now, bypassing the Poisson schedule.
    /// Scripted scenarios use this to mint deterministically.
    pub(crate) fn force_mine(
        &mut self,
        vk: VertexId,
        neighbors: &[VertexId],
        ctx: &mut TickContext<'_>,
    ) -> Result<BlockId, ChainError> {
        self.bootstrap(vk, ctx.chain);
        let mut miner =
            self.miner.take().expect("force_mine called on a miner");

        if miner.mining_tip.is_none() {
            let tip = self.tip.expect("bootstrap sets a tip");
            Self::move_mining_tip(&mut miner, vk, tip, ctx.chain);
        }

        let difficulty = self.working_difficulty(ctx);
        let result = self.mint_on(&mut miner, vk, neighbors, difficulty, ctx);
        self.miner = Some(miner);

        result
    }

    /// Applies a strategy [Decision]: moves the mining tip, feeds the
    /// public-tip candidate into fork choice, and broadcasts.
    fn apply_decision(
        &mut self,
        miner: &mut MinerState,
        vk: VertexId,
        neighbors: &[VertexId],
        decision: Decision,
        ctx: &mut TickContext<'_>,
    ) {
        Self::move_mining_tip(miner, vk, decision.mining_tip, ctx.chain);

        if let Some(candidate) = decision.public_tip {
            if let Err(err) = self.update_tip(vk, candidate, ctx.chain) {
                error!("{}: dropped strategy candidate: {}", vk, err);
            }
        }
        if let Some(block) = decision.broadcast {
            self.broadcast_block(block, neighbors, ctx.chain);
        }
    }

    /// The difficulty a miner works against: the public tip's, except
    /// while the tip is still genesis, where the combined network hashrate
    /// seeds a bootstrap value.
    fn working_difficulty(&self, ctx: &TickContext<'_>) -> f64 {
        let tip = &ctx.chain[self.tip.expect("bootstrap sets a tip")].block;
        if tip.height == 0 {
            (ctx.total_hashrate * DIFFICULTY_SCALE).floor()
        } else {
            tip.difficulty as f64
        }
    }
}

/// Difficulty requested for the next block on `mining_tip`: unchanged off
/// retarget boundaries; at a boundary, scaled by the ratio of target to
/// measured block time, damped by [`RETARGET_EXPONENT`].
fn retarget(
    chain: &ChainRegistry,
    mining_tip: BlockId,
    difficulty: f64,
    config: &SimConfig,
) -> f64 {
    let height = chain[mining_tip].block.height;
    if height % RETARGET_INTERVAL != RETARGET_INTERVAL - 1 {
        return difficulty;
    }

    match chain.measured_block_time(mining_tip, 2 * RETARGET_INTERVAL) {
        Some(measured) if measured > 0.0 => {
            let ratio = config.block_time_ticks() / measured;
            difficulty * ratio.powf(RETARGET_EXPONENT)
        }
        // a whole window inside one tick carries no usable signal
        _ => difficulty,
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{NodeState, RefusalReason, TipUpdate};
    use crate::{
        block::{BlockId, TipRole},
        chain::ChainRegistry,
        network::VertexId,
    };

    fn vk() -> VertexId {
        VertexId::from(0)
    }

    /// Chain of `length` blocks at fixed `difficulty` off `from`.
    fn grow(
        chain: &mut ChainRegistry,
        from: BlockId,
        length: u64,
        difficulty: f64,
    ) -> Vec<BlockId> {
        let mut blocks = vec![from];
        for time in 0..length {
            let tip = *blocks.last().unwrap();
            blocks.push(
                chain
                    .mint(tip, VertexId::from(9), time + 1, Some(difficulty))
                    .unwrap(),
            );
        }
        blocks
    }

    #[test]
    fn adopting_first_candidate_registers_the_holder() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let chain_a = grow(&mut chain, genesis, 2, 100.0);
        let mut node = NodeState::relay();

        let update = node.update_tip(vk(), chain_a[2], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Advanced { advance: 2 });
        assert_eq!(node.tip(), Some(chain_a[2]));
        assert_eq!(chain[chain_a[2]].holder_count(TipRole::Node), 1);
    }

    #[test]
    fn work_beats_height() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let light = grow(&mut chain, genesis, 4, 50.0);
        let heavy = grow(&mut chain, genesis, 2, 400.0);

        let mut node = NodeState::relay();
        node.update_tip(vk(), light[4], &mut chain).unwrap();

        // taller chain with less work is refused
        let taller = grow(&mut chain, light[4], 1, 1.0);
        assert!(
            chain[taller[1]].block.total_work
                < chain[heavy[2]].block.total_work
        );

        let update = node.update_tip(vk(), heavy[2], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Reorged { advance: -2, depth: 4 });
        assert_eq!(node.tip(), Some(heavy[2]));

        let update = node.update_tip(vk(), taller[1], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Refused(RefusalReason::Work));
        assert_eq!(node.tip(), Some(heavy[2]));
    }

    #[test]
    fn equal_work_keeps_the_first_seen_tip() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let a = grow(&mut chain, genesis, 1, 100.0);
        let b = grow(&mut chain, genesis, 1, 100.0);

        let mut node = NodeState::relay();
        node.update_tip(vk(), a[1], &mut chain).unwrap();

        let update = node.update_tip(vk(), b[1], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Refused(RefusalReason::Work));
        assert_eq!(node.tip(), Some(a[1]));
    }

    #[test]
    fn reorg_depth_bound_refuses_deep_switches() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let main = grow(&mut chain, genesis, 5, 100.0);

        let mut node = NodeState::relay();
        node.set_max_reorg_depth(Some(2));
        node.update_tip(vk(), main[5], &mut chain).unwrap();

        // fork off height 2: switching would drop 3 blocks
        let deep = grow(&mut chain, main[2], 2, 400.0);
        let update = node.update_tip(vk(), deep[2], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Refused(RefusalReason::Depth));
        assert_eq!(node.tip(), Some(main[5]));

        // fork off height 3 stays within the bound
        let shallow = grow(&mut chain, main[3], 2, 400.0);
        let update = node.update_tip(vk(), shallow[2], &mut chain).unwrap();
        assert_eq!(update, TipUpdate::Reorged { advance: 0, depth: 2 });
        assert_eq!(node.tip(), Some(shallow[2]));
    }

    #[test]
    fn tip_work_never_decreases() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut chain = ChainRegistry::new();
        for time in 1..120 {
            let parent =
                BlockId::from(rng.gen_range(0..chain.block_count()));
            let difficulty = rng.gen_range(1.0..300.0);
            chain.mint(parent, vk(), time, Some(difficulty)).unwrap();
        }

        let mut node = NodeState::relay();
        node.update_tip(vk(), chain.genesis(), &mut chain).unwrap();

        for id in 0..chain.block_count() {
            let before = chain[node.tip().unwrap()].block.total_work;
            node.update_tip(vk(), BlockId::from(id), &mut chain).unwrap();
            let after = chain[node.tip().unwrap()].block.total_work;
            assert!(after >= before);
        }
    }

    #[test]
    fn moving_the_tip_transfers_holder_counts() {
        let mut chain = ChainRegistry::new();
        let genesis = chain.genesis();
        let blocks = grow(&mut chain, genesis, 2, 100.0);

        let mut node = NodeState::relay();
        node.update_tip(vk(), blocks[1], &mut chain).unwrap();
        node.update_tip(vk(), blocks[2], &mut chain).unwrap();

        assert!(chain[blocks[1]].holders(TipRole::Node).is_empty());
        assert_eq!(chain[blocks[2]].holder_count(TipRole::Node), 1);
        assert!(chain[genesis].holders(TipRole::Node).is_empty());
    }
}
