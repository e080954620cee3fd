/*!
Re-export of common values and datatypes used for building and running
simulations. Must be imported manually.

```
use consensus_sim::prelude::*;
```
*/

use crate::{
    block, chain, config, metrics, network, node, poisson, simulation,
    strategy,
};

pub use block::{Block, BlockId, Tick, TipRole};

pub use chain::{BlockData, ChainError, ChainRegistry};

pub use config::SimConfig;

pub use metrics::{GroupSummary, Metrics};

pub use network::{
    Envelope, Message, NetworkGraph, TopologyError, VertexId, VertexKind,
};

pub use node::{MinerState, NodeState, RefusalReason, TipUpdate};

pub use poisson::PoissonProcess;

pub use simulation::{
    BuildError, Simulation, SimulationBuilder, SimulationError,
    SimulationGroup,
};

pub use strategy::{Decision, Honest, LeadSelfish, Selfish, Strategy};
