use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display},
    sync::Arc,
};

use thiserror::Error;

use crate::block::BlockId;

/// A unique identifier assigned to each vertex of a [NetworkGraph].
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct VertexId(pub(crate) usize);

impl VertexId {
    /// Underlying index.
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for VertexId {
    fn from(value: usize) -> Self {
        VertexId(value)
    }
}

impl Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// What a vertex does with the blocks it hears about.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum VertexKind {
    /// Relays announcements without producing blocks.
    Relay,
    /// Relays announcements and mines new blocks.
    Miner,
}

/// Payload carried between vertices. Block announcements carry only the
/// [`BlockId`]; the receiver reaches the full chain through the shared
/// registry.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Message {
    /// Announcement of a (claimed better) chain tip.
    Block(BlockId),
    /// One-time handshake a vertex sends on its first tick.
    Joined,
}

/// A delivered [Message] tagged with its sender.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Envelope {
    pub from: VertexId,
    pub message: Message,
}

/// A message in flight along an edge.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TransitItem {
    /// Ticks left until delivery.
    pub remaining: u64,
    pub origin: VertexId,
    pub target: VertexId,
    pub message: Message,
}

#[derive(Debug, Clone, Default)]
struct Edge {
    /// Messages currently travelling this edge, in send order.
    transit: Vec<TransitItem>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("vertex {0} already exists")]
    DuplicateVertex(VertexId),
    #[error("edge between {0} and {1} already exists")]
    DuplicateEdge(VertexId, VertexId),
    #[error("vertex {0} does not exist")]
    UnknownVertex(VertexId),
    #[error("no edge between {0} and {1}")]
    UnknownEdge(VertexId, VertexId),
}

/// Undirected graph of vertices with per-edge in-flight message queues.
/// Edges are stored under a canonical `(min, max)` key, so `a -> b` and
/// `b -> a` share one queue.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    vertices: BTreeMap<VertexId, VertexKind>,
    edges: BTreeMap<(VertexId, VertexId), Edge>,
    /// Adjacency lists, kept in step with the edge set. Shared slices so
    /// `neighbors` is a cheap clone on the per-tick hot path.
    adjacency: HashMap<VertexId, Arc<[VertexId]>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        NetworkGraph {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            adjacency: HashMap::new(),
        }
    }

    fn edge_key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn rebuild_adjacency(&mut self, id: VertexId) {
        let computed: Arc<[VertexId]> = self
            .edges
            .keys()
            .filter_map(|&(a, b)| {
                if a == id {
                    Some(b)
                } else if b == id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        self.adjacency.insert(id, computed);
    }

    /// Adds a vertex of the given kind.
    pub fn add_vertex(
        &mut self,
        id: VertexId,
        kind: VertexKind,
    ) -> Result<(), TopologyError> {
        if self.vertices.contains_key(&id) {
            return Err(TopologyError::DuplicateVertex(id));
        }
        self.vertices.insert(id, kind);
        self.adjacency.insert(id, Vec::new().into());

        Ok(())
    }

    /// Adds an undirected edge between two existing vertices.
    pub fn add_edge(
        &mut self,
        a: VertexId,
        b: VertexId,
    ) -> Result<(), TopologyError> {
        for id in [a, b] {
            if !self.vertices.contains_key(&id) {
                return Err(TopologyError::UnknownVertex(id));
            }
        }

        let key = Self::edge_key(a, b);
        if self.edges.contains_key(&key) {
            return Err(TopologyError::DuplicateEdge(key.0, key.1));
        }
        self.edges.insert(key, Edge::default());
        for id in [key.0, key.1] {
            self.rebuild_adjacency(id);
        }

        Ok(())
    }

    #[inline]
    pub fn has_vertex(&self, id: VertexId) -> bool {
        self.vertices.contains_key(&id)
    }

    #[inline]
    pub fn has_edge(&self, a: VertexId, b: VertexId) -> bool {
        self.edges.contains_key(&Self::edge_key(a, b))
    }

    #[inline]
    pub fn vertex_kind(&self, id: VertexId) -> Option<VertexKind> {
        self.vertices.get(&id).copied()
    }

    /// All vertex ids in ascending order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices.keys().copied()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The vertices sharing an edge with `id`, in canonical edge order.
    /// Empty for unknown vertices.
    pub fn neighbors(&self, id: VertexId) -> Arc<[VertexId]> {
        self.adjacency
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Vec::new().into())
    }

    /// Schedules `message` for delivery from `from` to `to` after `delay`
    /// ticks. A zero delay is bumped to one tick, so nothing is ever
    /// delivered within the tick it was sent.
    pub fn enqueue(
        &mut self,
        from: VertexId,
        to: VertexId,
        message: Message,
        delay: u64,
    ) -> Result<(), TopologyError> {
        let key = Self::edge_key(from, to);
        let edge = self
            .edges
            .get_mut(&key)
            .ok_or(TopologyError::UnknownEdge(from, to))?;

        edge.transit.push(TransitItem {
            remaining: delay.max(1),
            origin: from,
            target: to,
            message,
        });

        Ok(())
    }

    /// Advances every in-flight message by one tick and removes the ones
    /// that reach zero, returning them as `(target, envelope)` pairs in a
    /// deterministic order (edge key, then send order within the edge).
    pub fn advance_one_tick(&mut self) -> Vec<(VertexId, Envelope)> {
        let mut delivered = vec![];

        for edge in self.edges.values_mut() {
            edge.transit.retain_mut(|item| {
                item.remaining -= 1;
                if item.remaining == 0 {
                    delivered.push((
                        item.target,
                        Envelope { from: item.origin, message: item.message },
                    ));
                    false
                } else {
                    true
                }
            });
        }

        delivered
    }

    /// Iterates over every message currently in flight.
    pub fn in_flight(&self) -> impl Iterator<Item = &TransitItem> {
        self.edges.values().flat_map(|edge| edge.transit.iter())
    }
}

impl Default for NetworkGraph {
    fn default() -> Self {
        Self::new()
    }
}
