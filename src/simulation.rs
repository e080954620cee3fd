/*!
Building and running simulations.

# Examples

Wiring a small network and running it:

```
use consensus_sim::prelude::*;

let mut sim = Simulation::builder()
    .add_relay(0)
    .add_miner(1, Honest::new())
    .add_edge(0, 1)
    .seed(7)
    .build()
    .unwrap();

sim.run(20_000);

let metrics = sim.metrics();
assert!(metrics.height > 0);
```
*/

use std::collections::BTreeMap;

use log::error;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    block::{BlockId, Tick},
    chain::{ChainError, ChainRegistry},
    config::SimConfig,
    metrics::Metrics,
    network::{NetworkGraph, TopologyError, VertexId, VertexKind},
    node::{NodeState, TickContext},
    strategy::Strategy,
};

pub mod builder;

pub use builder::{BuildError, SimulationBuilder};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("chain operation failed")]
    Chain(#[from] ChainError),
    #[error("topology operation failed")]
    Topology(#[from] TopologyError),
    #[error("vertex {0} is not a miner")]
    NotAMiner(VertexId),
    #[error("miner hashrate {0} is not positive")]
    NonPositiveHashrate(f64),
}

/// A peer-to-peer blockchain network advanced one tick at a time.
///
/// Each tick delivers the messages that matured in transit, then runs every
/// vertex's protocol update in ascending [`VertexId`] order, flushing each
/// outbox into the network as it goes. Two simulations built with the same
/// topology, config, and seed replay identically.
#[derive(Debug, Clone)]
pub struct Simulation {
    chain: ChainRegistry,
    network: NetworkGraph,
    nodes: BTreeMap<VertexId, NodeState>,
    config: SimConfig,
    rng: StdRng,
    time: Tick,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    #[inline]
    pub fn time(&self) -> Tick {
        self.time
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Mutable access to the parameters; changes apply from the next tick.
    #[inline]
    pub fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    #[inline]
    pub fn chain(&self) -> &ChainRegistry {
        &self.chain
    }

    #[inline]
    pub fn network(&self) -> &NetworkGraph {
        &self.network
    }

    /// The protocol state of a vertex, if it exists.
    pub fn node(&self, id: impl Into<VertexId>) -> Option<&NodeState> {
        self.nodes.get(&id.into())
    }

    /// All vertices and their protocol state, in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (VertexId, &NodeState)> {
        self.nodes.iter().map(|(&vk, node)| (vk, node))
    }

    /// Sum of every miner's effective hashrate.
    pub fn total_hashrate(&self) -> f64 {
        self.nodes
            .values()
            .filter_map(|node| node.miner_state())
            .map(|m| m.hashrate.unwrap_or(self.config.default_hashrate))
            .sum()
    }

    /// Adds a relay vertex to the running simulation.
    pub fn add_relay(
        &mut self,
        id: impl Into<VertexId>,
    ) -> Result<(), TopologyError> {
        let id = id.into();
        self.network.add_vertex(id, VertexKind::Relay)?;
        self.nodes.insert(id, NodeState::relay());

        Ok(())
    }

    /// Adds a mining vertex to the running simulation. A `hashrate` of
    /// `None` uses [`SimConfig::default_hashrate`]; an explicit one must be
    /// positive, matching [`SimulationBuilder`]'s validation.
    pub fn add_miner(
        &mut self,
        id: impl Into<VertexId>,
        strategy: impl Strategy + 'static,
        hashrate: Option<f64>,
    ) -> Result<(), SimulationError> {
        if let Some(rate) = hashrate {
            if !(rate > 0.0) {
                return Err(SimulationError::NonPositiveHashrate(rate));
            }
        }

        let id = id.into();
        self.network.add_vertex(id, VertexKind::Miner)?;
        self.nodes
            .insert(id, NodeState::miner(Box::new(strategy), hashrate));

        Ok(())
    }

    /// Connects two existing vertices.
    pub fn add_edge(
        &mut self,
        a: impl Into<VertexId>,
        b: impl Into<VertexId>,
    ) -> Result<(), TopologyError> {
        self.network.add_edge(a.into(), b.into())
    }

    /// Connects `id` to up to `peers` other vertices chosen uniformly at
    /// random among the ones it is not yet connected to. Returns the number
    /// of edges created.
    pub fn connect_random(
        &mut self,
        id: impl Into<VertexId>,
        peers: usize,
    ) -> Result<usize, TopologyError> {
        let id = id.into();
        if !self.network.has_vertex(id) {
            return Err(TopologyError::UnknownVertex(id));
        }

        let mut candidates: Vec<VertexId> = self
            .network
            .vertex_ids()
            .filter(|&other| other != id && !self.network.has_edge(id, other))
            .collect();
        candidates.shuffle(&mut self.rng);

        let mut added = 0;
        for other in candidates.into_iter().take(peers) {
            self.network.add_edge(id, other)?;
            added += 1;
        }

        Ok(added)
    }

    /// Sets (or clears) a vertex's reorg refusal bound.
    pub fn set_max_reorg_depth(
        &mut self,
        id: impl Into<VertexId>,
        bound: Option<u64>,
    ) -> Result<(), TopologyError> {
        let id = id.into();
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TopologyError::UnknownVertex(id))?;
        node.set_max_reorg_depth(bound);

        Ok(())
    }

    /// Advances the simulation by one tick: matured messages are delivered
    /// first, then every vertex runs its protocol update and its outgoing
    /// messages enter transit.
    pub fn tick(&mut self) {
        let ids: Vec<VertexId> = self.network.vertex_ids().collect();
        let total_hashrate = self.total_hashrate();
        let delay = self.config.edge_delay_ticks();

        let Simulation { chain, network, nodes, config, rng, time } = self;

        for (target, envelope) in network.advance_one_tick() {
            if let Some(node) = nodes.get_mut(&target) {
                node.deliver(envelope);
            }
        }

        let mut ctx = TickContext {
            chain,
            config,
            rng,
            time: *time,
            total_hashrate,
        };

        for &vk in &ids {
            let node =
                nodes.get_mut(&vk).expect("vertex ids come from the graph");
            let neighbors = network.neighbors(vk);
            node.update(vk, &neighbors, &mut ctx);

            for (to, message) in node.take_outbox() {
                if let Err(err) = network.enqueue(vk, to, message, delay) {
                    error!("{}: dropped message to {}: {}", vk, to, err);
                }
            }
        }

        *time += 1;
    }

    /// Advances by [`SimConfig::speedup`] ticks.
    pub fn step(&mut self) {
        for _ in 0..self.config.speedup {
            self.tick();
        }
    }

    /// Advances by the given number of ticks.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Forces the given miner to find a block immediately, bypassing its
    /// Poisson schedule; everything else (difficulty, strategy hooks,
    /// broadcasts) behaves exactly as for a scheduled block. Simulated time
    /// does not advance. Scripted tests use this to build exact scenarios.
    pub fn mine_block(
        &mut self,
        vk: impl Into<VertexId>,
    ) -> Result<BlockId, SimulationError> {
        let vk = vk.into();
        let total_hashrate = self.total_hashrate();
        let delay = self.config.edge_delay_ticks();

        let Simulation { chain, network, nodes, config, rng, time } = self;
        let node = nodes
            .get_mut(&vk)
            .ok_or(TopologyError::UnknownVertex(vk))?;
        if !node.is_miner() {
            return Err(SimulationError::NotAMiner(vk));
        }

        let neighbors = network.neighbors(vk);
        let mut ctx = TickContext {
            chain,
            config,
            rng,
            time: *time,
            total_hashrate,
        };
        let mined = node.force_mine(vk, &neighbors, &mut ctx)?;

        for (to, message) in node.take_outbox() {
            network.enqueue(vk, to, message, delay)?;
        }

        Ok(mined)
    }

    /// Snapshot of the current chain statistics.
    pub fn metrics(&self) -> Metrics {
        Metrics::collect(self)
    }

    /// Clears the whole world: registry back to genesis, no vertices, no
    /// edges, tick zero. The config and RNG state are kept.
    pub fn reset(&mut self) {
        self.chain.reset();
        self.network = NetworkGraph::new();
        self.nodes.clear();
        self.time = 0;
    }

    /// Replaces the RNG with one seeded from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

/// Runs seeded replicas of one configured simulation in parallel.
///
/// Every replica starts from a clone of the same template and a seed of
/// `base_seed + index`, so a group run is reproducible end to end.
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    template: Simulation,
    replicas: usize,
    ticks: u64,
    base_seed: u64,
}

impl SimulationGroup {
    pub fn new(template: Simulation) -> Self {
        SimulationGroup {
            template,
            replicas: 1,
            ticks: 100_000,
            base_seed: 0,
        }
    }

    /// Number of independent replicas to run (default 1).
    pub fn replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;

        self
    }

    /// Ticks each replica runs for (default 100,000).
    pub fn ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;

        self
    }

    /// Seed of the first replica; replica `i` uses `base_seed + i`.
    pub fn base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;

        self
    }

    /// Runs all replicas in parallel and returns their end-of-run
    /// snapshots in replica order.
    pub fn run_all(self) -> Vec<Metrics> {
        let SimulationGroup { template, replicas, ticks, base_seed } = self;

        (0..replicas)
            .into_par_iter()
            .map(|i| {
                let mut sim = template.clone();
                sim.reseed(base_seed.wrapping_add(i as u64));
                sim.run(ticks);
                sim.metrics()
            })
            .collect()
    }
}
