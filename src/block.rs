use std::fmt::{self, Display};

use crate::network::VertexId;

/// Discrete simulation time. One tick corresponds to
/// `1 / SimConfig::ticks_per_second` seconds of simulated time.
pub type Tick = u64;

/// Role under which a vertex holds a block as a tip.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TipRole {
    /// The vertex's public tip, the head of the chain it relays.
    Node,
    /// A miner's private mining tip, the block it builds on.
    Miner,
}

/// Representation of a mined block. Immutable once registered; bookkeeping
/// that changes over a block's lifetime (tip holders) lives in
/// [`BlockData`](crate::chain::BlockData).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// This block's identifier within its [`ChainRegistry`](crate::chain::ChainRegistry).
    pub id: BlockId,
    /// The block this block was mined on. `None` only for genesis.
    pub parent: Option<BlockId>,
    /// Number of ancestors between this block and genesis.
    pub height: u64,
    /// The vertex that mined this block. `None` for genesis.
    pub miner: Option<VertexId>,
    /// The tick this block was mined in. Genesis is minted at tick 0.
    pub time: Tick,
    /// Difficulty this block was mined at.
    pub difficulty: u64,
    /// Sum of difficulties from genesis up to and including this block.
    /// The fork-choice metric.
    pub total_work: u64,
    /// Position among siblings registered at the same height, in discovery
    /// order. Diagnostic only; consensus never reads it.
    pub fork: usize,
}

/// A unique identifier assigned to each [`Block`]: its index in the owning
/// registry's arena, in registration order.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Underlying arena index.
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for BlockId {
    fn from(value: usize) -> Self {
        BlockId(value)
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Block {
    /// True for the registry's root block.
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }
}

impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Block {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
