/*!
Discrete-event simulator of a peer-to-peer blockchain network: block gossip
over an explicit topology, total-work fork choice with bounded reorgs,
Poisson block arrivals with difficulty retargeting, and pluggable mining
strategies (honest and selfish variants).

Time advances in whole ticks. Each tick the network delivers the messages
whose propagation delay has elapsed, then every vertex runs one round of
the protocol: adopt the best announced chain, relay it to peers that have
not seen it, and (for miners) attempt to extend a private mining tip.
*/

// ## Todo:
// - Per-edge propagation delays (transit queues are already keyed by edge;
//   only SimConfig and the enqueue call sites need the plumbing)

pub mod block;
pub mod chain;
pub mod config;
pub mod metrics;
pub mod network;
pub mod node;
pub mod poisson;
pub mod prelude;
pub mod simulation;
pub mod strategy;

pub(crate) mod utils;
