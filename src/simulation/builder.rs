use rand::{rngs::StdRng, SeedableRng};
use thiserror::Error;

use crate::{
    chain::ChainRegistry,
    config::SimConfig,
    network::{NetworkGraph, TopologyError, VertexId, VertexKind},
    node::NodeState,
    strategy::Strategy,
};

use super::Simulation;

/// Builds a [Simulation].
#[derive(Debug, Default)]
pub struct SimulationBuilder {
    config: SimConfig,
    seed: Option<u64>,
    vertices: Vec<(VertexId, VertexSpec)>,
    edges: Vec<(VertexId, VertexId)>,
    reorg_bounds: Vec<(VertexId, u64)>,
}

#[derive(Debug)]
enum VertexSpec {
    Relay,
    Miner { strategy: Box<dyn Strategy>, hashrate: Option<f64> },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no vertices were added")]
    NoVertices,
    #[error("miner hashrate {0} is not positive")]
    NonPositiveHashrate(f64),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl SimulationBuilder {
    /// Creates a new [SimulationBuilder].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulation parameters ([SimConfig::default] otherwise).
    pub fn config(mut self, config: SimConfig) -> Self {
        self.config = config;

        self
    }

    /// Seeds the simulation's RNG for a reproducible run. Without a seed
    /// the RNG is seeded from the OS.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);

        self
    }

    /// Adds a relay vertex.
    pub fn add_relay(mut self, id: impl Into<VertexId>) -> Self {
        self.vertices.push((id.into(), VertexSpec::Relay));

        self
    }

    /// Adds a mining vertex using [SimConfig::default_hashrate].
    pub fn add_miner(
        mut self,
        id: impl Into<VertexId>,
        strategy: impl Strategy + 'static,
    ) -> Self {
        self.vertices.push((
            id.into(),
            VertexSpec::Miner { strategy: Box::new(strategy), hashrate: None },
        ));

        self
    }

    /// Adds a mining vertex with an explicit hashrate.
    pub fn add_miner_with_hashrate(
        mut self,
        id: impl Into<VertexId>,
        strategy: impl Strategy + 'static,
        hashrate: f64,
    ) -> Self {
        self.vertices.push((
            id.into(),
            VertexSpec::Miner {
                strategy: Box::new(strategy),
                hashrate: Some(hashrate),
            },
        ));

        self
    }

    /// Connects two vertices.
    pub fn add_edge(
        mut self,
        a: impl Into<VertexId>,
        b: impl Into<VertexId>,
    ) -> Self {
        self.edges.push((a.into(), b.into()));

        self
    }

    /// Bounds the reorg depth a vertex will accept.
    pub fn max_reorg_depth(
        mut self,
        id: impl Into<VertexId>,
        bound: u64,
    ) -> Self {
        self.reorg_bounds.push((id.into(), bound));

        self
    }

    /// Creates a [Simulation] from the specified parameters.
    pub fn build(self) -> Result<Simulation, BuildError> {
        use BuildError::*;

        let SimulationBuilder { config, seed, vertices, edges, reorg_bounds } =
            self;

        if vertices.is_empty() {
            return Err(NoVertices);
        }

        let mut network = NetworkGraph::new();
        let mut nodes = std::collections::BTreeMap::new();
        for (id, spec) in vertices {
            match spec {
                VertexSpec::Relay => {
                    network.add_vertex(id, VertexKind::Relay)?;
                    nodes.insert(id, NodeState::relay());
                }
                VertexSpec::Miner { strategy, hashrate } => {
                    if let Some(rate) = hashrate {
                        if !(rate > 0.0) {
                            return Err(NonPositiveHashrate(rate));
                        }
                    }
                    network.add_vertex(id, VertexKind::Miner)?;
                    nodes.insert(id, NodeState::miner(strategy, hashrate));
                }
            }
        }

        for (a, b) in edges {
            network.add_edge(a, b)?;
        }

        for (id, bound) in reorg_bounds {
            let node = nodes
                .get_mut(&id)
                .ok_or(TopologyError::UnknownVertex(id))?;
            node.set_max_reorg_depth(Some(bound));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Simulation {
            chain: ChainRegistry::new(),
            network,
            nodes,
            config,
            rng,
            time: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, SimulationBuilder};
    use crate::{
        network::{TopologyError, VertexKind},
        strategy::{Honest, Selfish},
    };

    #[test]
    fn example_build() {
        let sim = SimulationBuilder::new()
            .add_miner(0, Honest::new())
            .add_miner_with_hashrate(1, Selfish::new(), 3.0)
            .add_relay(2)
            .add_edge(0, 2)
            .add_edge(1, 2)
            .max_reorg_depth(2, 6)
            .seed(1)
            .build()
            .expect("valid simulation build");

        assert_eq!(sim.network().vertex_count(), 3);
        assert_eq!(sim.network().edge_count(), 2);
        assert_eq!(sim.network().vertex_kind(1.into()), Some(VertexKind::Miner));
        assert_eq!(sim.node(2).unwrap().max_reorg_depth(), Some(6));
        assert_eq!(sim.total_hashrate(), 4.0);
    }

    #[test]
    fn rejects_empty_networks() {
        assert!(matches!(
            SimulationBuilder::new().build(),
            Err(BuildError::NoVertices)
        ));
    }

    #[test]
    fn rejects_non_positive_hashrates() {
        let result = SimulationBuilder::new()
            .add_miner_with_hashrate(0, Honest::new(), 0.0)
            .build();
        assert!(matches!(result, Err(BuildError::NonPositiveHashrate(_))));
    }

    #[test]
    fn propagates_topology_mistakes() {
        let duplicate = SimulationBuilder::new()
            .add_relay(0)
            .add_relay(0)
            .build();
        assert!(matches!(
            duplicate,
            Err(BuildError::Topology(TopologyError::DuplicateVertex(_)))
        ));

        let dangling = SimulationBuilder::new()
            .add_relay(0)
            .add_edge(0, 5)
            .build();
        assert!(matches!(
            dangling,
            Err(BuildError::Topology(TopologyError::UnknownVertex(_)))
        ));

        let unknown_bound = SimulationBuilder::new()
            .add_relay(0)
            .max_reorg_depth(3, 2)
            .build();
        assert!(matches!(
            unknown_bound,
            Err(BuildError::Topology(TopologyError::UnknownVertex(_)))
        ));
    }
}
