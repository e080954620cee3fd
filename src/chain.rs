use std::{collections::HashMap, ops::Index};

use thiserror::Error;

use crate::{
    block::{Block, BlockId, Tick, TipRole},
    config::{INIT_DIFFICULTY, MIN_DIFFICULTY},
    network::VertexId,
};

/// Append-only arena of every [Block] minted during a simulation run,
/// canonical and orphaned alike. Vertices hold [`BlockId`]s into this
/// registry instead of owning blocks; parent links are ids, so the whole
/// block tree lives in one flat allocation.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    /// All blocks, indexed by [`BlockId`] in registration order.
    blocks: Vec<BlockData>,
    /// IDs of all blocks at each height, sorted by registration order.
    by_height: Vec<Vec<BlockId>>,
}

/// A block and its registry-side bookkeeping.
#[derive(Debug, Clone)]
pub struct BlockData {
    pub block: Block,
    /// Vertices currently holding `block` as their public tip, with a
    /// reference count per vertex.
    node_holders: HashMap<VertexId, u32>,
    /// Vertices currently holding `block` as their private mining tip.
    miner_holders: HashMap<VertexId, u32>,
}

impl BlockData {
    fn new(block: Block) -> Self {
        BlockData {
            block,
            node_holders: HashMap::new(),
            miner_holders: HashMap::new(),
        }
    }

    /// Vertices holding this block as a tip under `role`.
    #[inline]
    pub fn holders(&self, role: TipRole) -> &HashMap<VertexId, u32> {
        match role {
            TipRole::Node => &self.node_holders,
            TipRole::Miner => &self.miner_holders,
        }
    }

    fn holders_mut(&mut self, role: TipRole) -> &mut HashMap<VertexId, u32> {
        match role {
            TipRole::Node => &mut self.node_holders,
            TipRole::Miner => &mut self.miner_holders,
        }
    }

    /// Total references held to this block under `role`.
    pub fn holder_count(&self, role: TipRole) -> u32 {
        self.holders(role).values().sum()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A mint was requested on a parent this registry does not track.
    #[error("mint parent {0} is not on this registry")]
    InvalidParent(BlockId),
    /// A parent walk crossed blocks whose heights or parent links disagree.
    /// The block tree is corrupt and the result would be meaningless.
    #[error("ancestor walk diverged between {0} and {1}")]
    InconsistentTree(BlockId, BlockId),
}

impl ChainRegistry {
    /// Creates a registry containing only the genesis block. Genesis has
    /// [`BlockId`] 0, no parent, no miner, and carries the initial
    /// difficulty as its total work.
    pub fn new() -> Self {
        let mut registry =
            ChainRegistry { blocks: vec![], by_height: vec![] };

        registry.register(Block {
            id: BlockId(0),
            parent: None,
            height: 0,
            miner: None,
            time: 0,
            difficulty: INIT_DIFFICULTY,
            total_work: INIT_DIFFICULTY,
            fork: 0,
        });

        registry
    }

    /// Discards every block and starts over from a fresh genesis.
    pub fn reset(&mut self) {
        *self = ChainRegistry::new();
    }

    /// The root block every chain in this registry extends.
    #[inline]
    pub fn genesis(&self) -> BlockId {
        BlockId(0)
    }

    /// Returns true iff the given block ID is tracked by this registry.
    #[inline]
    pub fn contains(&self, id: BlockId) -> bool {
        id.0 < self.blocks.len()
    }

    /// Returns a reference to the [BlockData] associated with the given
    /// block ID.
    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockData> {
        self.blocks.get(id.0)
    }

    /// Number of blocks registered, genesis included.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Maximum height of any registered block.
    #[inline]
    pub fn max_height(&self) -> u64 {
        (self.by_height.len() - 1) as u64
    }

    /// Returns the IDs of all blocks at the specified height, in
    /// registration order.
    ///
    /// ## Panics
    /// Panics if `height` is greater than [ChainRegistry::max_height].
    #[inline]
    pub fn at_height(&self, height: u64) -> &[BlockId] {
        assert!(
            height <= self.max_height(),
            "{} exceeds the maximum height {} of the registry",
            height,
            self.max_height()
        );
        &self.by_height[height as usize]
    }

    /// The canonical tip: the earliest-registered block at the maximum
    /// height.
    #[inline]
    pub fn canonical_tip(&self) -> BlockId {
        // every height bucket gains its first entry when created
        self.by_height.last().unwrap()[0]
    }

    /// Iterates over all registered blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockData> {
        self.blocks.iter()
    }

    /// Fraction of registered blocks that are not on the canonical chain:
    /// `1 - (max_height + 1) / block_count`.
    pub fn orphan_rate(&self) -> f64 {
        1.0 - (self.max_height() + 1) as f64 / self.block_count() as f64
    }

    fn register(&mut self, mut block: Block) -> BlockId {
        let height = block.height as usize;
        if height == self.by_height.len() {
            self.by_height.push(vec![]);
        }
        block.fork = self.by_height[height].len();

        let id = block.id;
        self.by_height[height].push(id);
        self.blocks.push(BlockData::new(block));

        id
    }

    /// Mints a block on `parent` and registers it. The new block's height
    /// is the parent's plus one and its total work is the parent's plus its
    /// own difficulty. `difficulty` is floored and clamped to at least
    /// [`MIN_DIFFICULTY`]; `None` (or a non-finite request) falls back to
    /// [`INIT_DIFFICULTY`].
    pub fn mint(
        &mut self,
        parent: BlockId,
        miner: VertexId,
        time: Tick,
        difficulty: Option<f64>,
    ) -> Result<BlockId, ChainError> {
        if !self.contains(parent) {
            return Err(ChainError::InvalidParent(parent));
        }

        let difficulty = match difficulty {
            Some(d) if d.is_finite() => {
                d.max(MIN_DIFFICULTY as f64).floor() as u64
            }
            _ => INIT_DIFFICULTY,
        };

        let parent_block = &self[parent].block;
        let block = Block {
            id: BlockId(self.blocks.len()),
            parent: Some(parent),
            height: parent_block.height + 1,
            miner: Some(miner),
            time,
            difficulty,
            total_work: parent_block.total_work + difficulty,
            fork: 0, // assigned on registration
        };

        Ok(self.register(block))
    }

    /// The ancestor of `id` at exactly `height`, or `None` if `height`
    /// exceeds the block's own height. A block is its own ancestor at its
    /// own height.
    pub fn ancestor_at_height(
        &self,
        id: BlockId,
        height: u64,
    ) -> Option<BlockId> {
        let mut current = &self[id].block;
        if height > current.height {
            return None;
        }
        while current.height > height {
            current = &self[current.parent?].block;
        }
        Some(current.id)
    }

    /// The ancestor `n` steps up from `id`, stopping early at genesis.
    pub fn nth_parent(&self, id: BlockId, n: u64) -> BlockId {
        let mut current = &self[id].block;
        for _ in 0..n {
            match current.parent {
                Some(parent) => current = &self[parent].block,
                None => break,
            }
        }
        current.id
    }

    /// The deepest block that is an ancestor of both `a` and `b`: the
    /// deeper block is walked down to the shallower one's height, then both
    /// walk parent links in lock step until they meet.
    pub fn common_ancestor(
        &self,
        a: BlockId,
        b: BlockId,
    ) -> Result<BlockId, ChainError> {
        let diverged = || ChainError::InconsistentTree(a, b);

        let (lower, higher) = if self[a].block.height <= self[b].block.height
        {
            (a, b)
        } else {
            (b, a)
        };

        let mut x = self
            .ancestor_at_height(higher, self[lower].block.height)
            .ok_or_else(diverged)?;
        let mut y = lower;

        while x != y {
            match (self[x].block.parent, self[y].block.parent) {
                (Some(px), Some(py))
                    if self[px].block.height == self[py].block.height =>
                {
                    x = px;
                    y = py;
                }
                _ => return Err(diverged()),
            }
        }

        Ok(x)
    }

    /// Mean ticks per block over the last `window` blocks ending at `tip`
    /// (fewer if the chain is shorter). `None` when `tip` is genesis.
    pub fn measured_block_time(
        &self,
        tip: BlockId,
        window: u64,
    ) -> Option<f64> {
        let block = &self[tip].block;
        if block.height == 0 {
            return None;
        }

        let span = window.min(block.height);
        let start = self.ancestor_at_height(tip, block.height - span)?;
        let elapsed = block.time.saturating_sub(self[start].block.time);

        Some(elapsed as f64 / span as f64)
    }

    /// Records that `holder` now holds `block` as a tip under `role`.
    pub fn register_tip_holder(
        &mut self,
        block: BlockId,
        holder: VertexId,
        role: TipRole,
    ) {
        *self.blocks[block.0]
            .holders_mut(role)
            .entry(holder)
            .or_insert(0) += 1;
    }

    /// Releases one of `holder`'s references to `block` under `role`,
    /// dropping the entry when it reaches zero. Releasing a reference that
    /// was never registered is a no-op.
    pub fn unregister_tip_holder(
        &mut self,
        block: BlockId,
        holder: VertexId,
        role: TipRole,
    ) {
        let holders = self.blocks[block.0].holders_mut(role);
        if let Some(count) = holders.get_mut(&holder) {
            *count -= 1;
            if *count == 0 {
                holders.remove(&holder);
            }
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<BlockId> for ChainRegistry {
    type Output = BlockData;

    fn index(&self, index: BlockId) -> &Self::Output {
        self.blocks.index(index.0)
    }
}

impl Index<&BlockId> for ChainRegistry {
    type Output = BlockData;

    fn index(&self, index: &BlockId) -> &Self::Output {
        self.blocks.index(index.0)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{ChainError, ChainRegistry};
    use crate::{
        block::{BlockId, TipRole},
        config::{INIT_DIFFICULTY, MIN_DIFFICULTY},
        network::VertexId,
    };

    fn miner() -> VertexId {
        VertexId::from(7)
    }

    #[test]
    fn new_instance_is_genesis_only() {
        let registry = ChainRegistry::new();

        assert_eq!(registry.block_count(), 1);
        assert_eq!(registry.max_height(), 0);
        assert_eq!(registry.canonical_tip(), registry.genesis());

        let genesis = &registry[registry.genesis()].block;
        assert!(genesis.is_genesis());
        assert_eq!(genesis.height, 0);
        assert_eq!(genesis.total_work, INIT_DIFFICULTY);
    }

    #[test]
    fn mint_recurrences_hold_on_random_trees() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut registry = ChainRegistry::new();

        for time in 1..200 {
            let parent =
                BlockId::from(rng.gen_range(0..registry.block_count()));
            let difficulty = rng.gen_range(1.0..500.0);
            let id = registry
                .mint(parent, miner(), time, Some(difficulty))
                .unwrap();

            let block = &registry[id].block;
            let parent_block = &registry[parent].block;
            assert_eq!(block.height, parent_block.height + 1);
            assert_eq!(
                block.total_work,
                parent_block.total_work + block.difficulty
            );
            assert_eq!(block.difficulty, difficulty.floor() as u64);
            assert_eq!(
                block.fork,
                registry.at_height(block.height).len() - 1
            );
        }
    }

    #[test]
    fn mint_clamps_difficulty() {
        let mut registry = ChainRegistry::new();
        let genesis = registry.genesis();

        let low = registry.mint(genesis, miner(), 1, Some(0.2)).unwrap();
        assert_eq!(registry[low].block.difficulty, MIN_DIFFICULTY);

        let default = registry.mint(genesis, miner(), 2, None).unwrap();
        assert_eq!(registry[default].block.difficulty, INIT_DIFFICULTY);

        let nan = registry.mint(genesis, miner(), 3, Some(f64::NAN)).unwrap();
        assert_eq!(registry[nan].block.difficulty, INIT_DIFFICULTY);
    }

    #[test]
    fn mint_rejects_unknown_parent() {
        let mut registry = ChainRegistry::new();
        let missing = BlockId::from(99);

        assert_eq!(
            registry.mint(missing, miner(), 1, None),
            Err(ChainError::InvalidParent(missing))
        );
    }

    #[test]
    fn ancestor_lookups() {
        let mut registry = ChainRegistry::new();
        let mut tip = registry.genesis();
        let mut chain = vec![tip];
        for time in 1..=5 {
            tip = registry.mint(tip, miner(), time, None).unwrap();
            chain.push(tip);
        }

        assert_eq!(registry.ancestor_at_height(tip, 5), Some(tip));
        assert_eq!(registry.ancestor_at_height(tip, 2), Some(chain[2]));
        assert_eq!(registry.ancestor_at_height(tip, 0), Some(chain[0]));
        assert_eq!(registry.ancestor_at_height(chain[2], 4), None);

        assert_eq!(registry.nth_parent(tip, 2), chain[3]);
        assert_eq!(registry.nth_parent(tip, 5), chain[0]);
        // clamps at genesis
        assert_eq!(registry.nth_parent(tip, 50), chain[0]);
    }

    #[test]
    fn common_ancestor_is_symmetric_and_bounded() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut registry = ChainRegistry::new();
        for time in 1..150 {
            let parent =
                BlockId::from(rng.gen_range(0..registry.block_count()));
            registry.mint(parent, miner(), time, None).unwrap();
        }

        for _ in 0..300 {
            let a = BlockId::from(rng.gen_range(0..registry.block_count()));
            let b = BlockId::from(rng.gen_range(0..registry.block_count()));

            let ab = registry.common_ancestor(a, b).unwrap();
            let ba = registry.common_ancestor(b, a).unwrap();
            assert_eq!(ab, ba);

            let min_height =
                registry[a].block.height.min(registry[b].block.height);
            assert!(registry[ab].block.height <= min_height);
            // the ancestor sits on both parent paths
            let height = registry[ab].block.height;
            assert_eq!(registry.ancestor_at_height(a, height), Some(ab));
            assert_eq!(registry.ancestor_at_height(b, height), Some(ab));
        }
    }

    #[test]
    fn common_ancestor_of_sibling_forks() {
        let mut registry = ChainRegistry::new();
        let genesis = registry.genesis();
        let a = registry.mint(genesis, miner(), 1, None).unwrap();
        let b = registry.mint(genesis, miner(), 1, None).unwrap();
        let a2 = registry.mint(a, miner(), 2, None).unwrap();

        assert_eq!(registry.common_ancestor(a2, b), Ok(genesis));
        assert_eq!(registry.common_ancestor(a2, a), Ok(a));
        assert_eq!(registry.common_ancestor(b, b), Ok(b));

        assert_eq!(registry[a].block.fork, 0);
        assert_eq!(registry[b].block.fork, 1);
    }

    #[test]
    fn orphan_rate_counts_off_chain_blocks() {
        let mut registry = ChainRegistry::new();
        let genesis = registry.genesis();
        let a = registry.mint(genesis, miner(), 1, None).unwrap();
        registry.mint(genesis, miner(), 1, None).unwrap();
        registry.mint(a, miner(), 2, None).unwrap();

        // 4 blocks, canonical path genesis..a2 covers 3 of them
        assert_eq!(registry.orphan_rate(), 0.25);

        registry.reset();
        assert_eq!(registry.orphan_rate(), 0.0);
    }

    #[test]
    fn measured_block_time_windows() {
        let mut registry = ChainRegistry::new();
        let mut tip = registry.genesis();
        for height in 1..=4u64 {
            tip = registry.mint(tip, miner(), height * 10, None).unwrap();
        }

        assert_eq!(registry.measured_block_time(tip, 2), Some(10.0));
        assert_eq!(registry.measured_block_time(tip, 4), Some(10.0));
        // window longer than the chain divides by the height instead
        assert_eq!(registry.measured_block_time(tip, 100), Some(10.0));
        assert_eq!(
            registry.measured_block_time(registry.genesis(), 50),
            None
        );
    }

    #[test]
    fn tip_holder_counts_are_refcounted() {
        let mut registry = ChainRegistry::new();
        let genesis = registry.genesis();
        let holder = VertexId::from(3);

        registry.register_tip_holder(genesis, holder, TipRole::Node);
        registry.register_tip_holder(genesis, holder, TipRole::Node);
        registry.register_tip_holder(genesis, holder, TipRole::Miner);

        let data = registry.get(genesis).unwrap();
        assert_eq!(data.holder_count(TipRole::Node), 2);
        assert_eq!(data.holder_count(TipRole::Miner), 1);

        registry.unregister_tip_holder(genesis, holder, TipRole::Node);
        assert_eq!(
            registry[genesis].holders(TipRole::Node).get(&holder),
            Some(&1)
        );

        registry.unregister_tip_holder(genesis, holder, TipRole::Node);
        assert!(registry[genesis].holders(TipRole::Node).is_empty());

        // releasing more than was held is ignored
        registry.unregister_tip_holder(genesis, holder, TipRole::Node);
        assert!(registry[genesis].holders(TipRole::Node).is_empty());
    }
}
