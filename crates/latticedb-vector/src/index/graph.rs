//! HNSW graph data structure.
//!
//! Nodes live in an append-only table and are addressed by their slot
//! ([`NodeId`]), which also records insertion order. Each node keeps one
//! neighbor list per layer behind its own lock. Lists are never edited in
//! place: a writer builds a new list and swaps the `Arc`, so a reader that
//! cloned the old `Arc` keeps a complete, consistent list.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{VectorError, VectorResult};

/// Slot of a node in the graph. Smaller ids were inserted earlier.
pub type NodeId = u64;

/// A node paired with its distance to some reference vector.
///
/// Ordered by distance, then by node id, so equal distances resolve to the
/// earlier insertion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candidate {
    /// The node.
    pub node: NodeId,
    /// Distance to the reference vector.
    pub distance: f32,
}

impl Candidate {
    /// Create a new candidate.
    #[inline]
    #[must_use]
    pub const fn new(node: NodeId, distance: f32) -> Self {
        Self { node, distance }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then_with(|| self.node.cmp(&other.node))
    }
}

/// A node in the HNSW graph.
#[derive(Debug)]
pub struct HnswNode {
    id: String,
    lsn: u64,
    vector: Vec<f32>,
    level: usize,
    deleted: AtomicBool,
    layers: Vec<RwLock<Arc<Vec<Candidate>>>>,
}

impl HnswNode {
    /// Create a node present on layers `0..=level`, with no edges.
    pub(crate) fn new(id: String, lsn: u64, vector: Vec<f32>, level: usize) -> Self {
        let layers = (0..=level).map(|_| RwLock::new(Arc::new(Vec::new()))).collect();
        Self { id, lsn, vector, level, deleted: AtomicBool::new(false), layers }
    }

    /// External record id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sequence number of the write this node was built from.
    #[inline]
    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    /// The node's vector.
    #[inline]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Highest layer this node appears on.
    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Tombstoned nodes stay traversable but never appear in results.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(AtomicOrdering::Acquire)
    }

    /// Returns true if this call tombstoned the node.
    pub(crate) fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, AtomicOrdering::AcqRel)
    }

    /// Current neighbor list at `layer` (empty above the node's level).
    #[inline]
    pub fn neighbors(&self, layer: usize) -> Arc<Vec<Candidate>> {
        self.layers.get(layer).map(|slot| Arc::clone(&slot.read())).unwrap_or_default()
    }

    pub(crate) fn set_neighbors(&self, layer: usize, neighbors: Vec<Candidate>) {
        if let Some(slot) = self.layers.get(layer) {
            *slot.write() = Arc::new(neighbors);
        }
    }

    /// Read-modify-write of one neighbor list, holding that list's lock.
    pub(crate) fn update_neighbors(
        &self,
        layer: usize,
        timeout: Duration,
        update: impl FnOnce(&mut Vec<Candidate>),
    ) -> VectorResult<()> {
        let Some(slot) = self.layers.get(layer) else {
            return Ok(());
        };
        let mut guard = slot.try_write_for(timeout).ok_or(VectorError::Busy("neighbor list"))?;
        let mut list = (**guard).clone();
        update(&mut list);
        *guard = Arc::new(list);
        Ok(())
    }
}

/// Where searches start: the node on the highest layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// The entry node.
    pub node: NodeId,
    /// Its level, which is the graph's maximum layer.
    pub level: usize,
}

/// Result of offering a node to the graph.
pub(crate) enum Admission {
    /// The graph already holds this id at the same or a newer LSN.
    Stale,
    /// The node was added (and any older node for the id tombstoned).
    Admitted(NodeId),
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    nodes: RwLock<Vec<Arc<HnswNode>>>,
    /// External id to the node holding its current version.
    ids: RwLock<HashMap<String, NodeId>>,
    entry: RwLock<Option<EntryPoint>>,
    live: AtomicUsize,
    metric: DistanceMetric,
    dimension: usize,
}

impl HnswGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            ids: RwLock::new(HashMap::new()),
            entry: RwLock::new(None),
            live: AtomicUsize::new(0),
            metric,
            dimension,
        }
    }

    /// Build a graph from already-linked nodes. Tombstoned nodes are kept
    /// for traversal but not bound to their ids.
    pub(crate) fn from_parts(
        dimension: usize,
        metric: DistanceMetric,
        nodes: Vec<Arc<HnswNode>>,
        entry: Option<EntryPoint>,
    ) -> Self {
        let graph = Self::new(dimension, metric);
        graph.replace(nodes, entry);
        graph
    }

    /// Swap in a new node table; ids and the live count are rebuilt from it.
    pub(crate) fn replace(&self, nodes: Vec<Arc<HnswNode>>, entry: Option<EntryPoint>) {
        let mut ids = self.ids.write();
        ids.clear();
        for (slot, node) in nodes.iter().enumerate() {
            if node.is_deleted() {
                continue;
            }
            // Two live versions of one id: keep the newer.
            if let Some(previous) = ids.get(&node.id).copied() {
                if nodes[previous as usize].lsn >= node.lsn {
                    node.mark_deleted();
                    continue;
                }
                nodes[previous as usize].mark_deleted();
            }
            ids.insert(node.id.clone(), slot as NodeId);
        }
        self.live.store(ids.len(), AtomicOrdering::Release);
        *self.nodes.write() = nodes;
        *self.entry.write() = entry;
    }

    /// The distance metric.
    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Dimension of every vector in the graph.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fetch a node by slot.
    #[inline]
    pub fn node(&self, node: NodeId) -> Option<Arc<HnswNode>> {
        self.nodes.read().get(node as usize).cloned()
    }

    /// Fetch the live node for an external id.
    pub fn lookup(&self, id: &str) -> Option<Arc<HnswNode>> {
        let slot = *self.ids.read().get(id)?;
        self.node(slot)
    }

    /// All nodes, live and tombstoned, in slot order.
    pub fn nodes(&self) -> Vec<Arc<HnswNode>> {
        self.nodes.read().clone()
    }

    /// Ids of all live nodes.
    pub fn live_ids(&self) -> Vec<String> {
        self.ids.read().keys().cloned().collect()
    }

    /// Current entry point.
    #[inline]
    pub fn entry_point(&self) -> Option<EntryPoint> {
        *self.entry.read()
    }

    /// Number of live (non-tombstoned) nodes.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.load(AtomicOrdering::Acquire)
    }

    /// Number of nodes including tombstones.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Distance from `query` to a node's vector.
    #[inline]
    pub fn distance_to(&self, query: &[f32], node: &HnswNode) -> f32 {
        self.metric.calculate(query, &node.vector)
    }

    /// Add a node for `id`, unless the graph already has an equal or newer
    /// version. An older version is tombstoned in the same step.
    pub(crate) fn admit(&self, id: &str, lsn: u64, vector: Vec<f32>, level: usize) -> Admission {
        let mut ids = self.ids.write();
        let previous = ids.get(id).copied();
        if let Some(old) = previous.and_then(|slot| self.node(slot)) {
            if old.lsn >= lsn {
                return Admission::Stale;
            }
        }

        let slot = {
            let mut nodes = self.nodes.write();
            nodes.push(Arc::new(HnswNode::new(id.to_string(), lsn, vector, level)));
            (nodes.len() - 1) as NodeId
        };
        ids.insert(id.to_string(), slot);

        match previous.and_then(|old| self.node(old)) {
            Some(old) => {
                old.mark_deleted();
            }
            None => {
                self.live.fetch_add(1, AtomicOrdering::AcqRel);
            }
        }
        Admission::Admitted(slot)
    }

    /// Install `candidate` as the entry point if the graph has none.
    /// Returns the entry point in effect afterwards.
    pub(crate) fn init_entry(&self, candidate: EntryPoint) -> EntryPoint {
        *self.entry.write().get_or_insert(candidate)
    }

    /// Make `candidate` the entry point if it sits on a higher layer.
    pub(crate) fn promote_entry(&self, candidate: EntryPoint) {
        let mut entry = self.entry.write();
        if entry.map_or(true, |current| candidate.level > current.level) {
            *entry = Some(candidate);
        }
    }

    /// Tombstone the live node for `id`.
    pub(crate) fn remove(&self, id: &str) -> bool {
        let Some(slot) = self.ids.write().remove(id) else {
            return false;
        };
        if let Some(node) = self.node(slot) {
            if node.mark_deleted() {
                self.live.fetch_sub(1, AtomicOrdering::AcqRel);
            }
        }
        true
    }
}

/// Greedy descent on one layer: move to a neighbor only while it is strictly
/// closer than the current node.
pub fn greedy_closest(
    graph: &HnswGraph,
    query: &[f32],
    start: Candidate,
    layer: usize,
) -> Candidate {
    let mut current = start;
    loop {
        let Some(node) = graph.node(current.node) else {
            return current;
        };
        let mut moved = false;
        for neighbor in node.neighbors(layer).iter() {
            let Some(candidate_node) = graph.node(neighbor.node) else {
                continue;
            };
            let distance = graph.distance_to(query, &candidate_node);
            if distance < current.distance {
                current = Candidate::new(neighbor.node, distance);
                moved = true;
            }
        }
        if !moved {
            return current;
        }
    }
}

/// Beam search on one layer.
///
/// Returns up to `ef` nodes closest to `query`, sorted ascending. With
/// `skip_deleted`, tombstoned nodes are still expanded but left out of the
/// result.
pub fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[Candidate],
    ef: usize,
    layer: usize,
    skip_deleted: bool,
) -> Vec<Candidate> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
    // Max-heap: the worst kept result is on top.
    let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

    for &entry in entry_points {
        if !visited.insert(entry.node) {
            continue;
        }
        let Some(node) = graph.node(entry.node) else {
            continue;
        };
        candidates.push(Reverse(entry));
        if !(skip_deleted && node.is_deleted()) {
            results.push(entry);
        }
    }
    while results.len() > ef {
        results.pop();
    }

    while let Some(Reverse(current)) = candidates.pop() {
        if results.len() >= ef && results.peek().is_some_and(|worst| current > *worst) {
            break;
        }

        let Some(node) = graph.node(current.node) else {
            continue;
        };
        for neighbor in node.neighbors(layer).iter() {
            if !visited.insert(neighbor.node) {
                continue;
            }
            let Some(neighbor_node) = graph.node(neighbor.node) else {
                continue;
            };

            let candidate = Candidate::new(neighbor.node, graph.distance_to(query, &neighbor_node));
            let improves =
                results.len() < ef || results.peek().is_some_and(|worst| candidate < *worst);
            if !improves {
                continue;
            }

            candidates.push(Reverse(candidate));
            if !(skip_deleted && neighbor_node.is_deleted()) {
                results.push(candidate);
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut found = results.into_vec();
    found.sort_unstable();
    found
}

/// Select up to `m` neighbors from `candidates` (sorted ascending by distance
/// to the new node).
///
/// A candidate is kept only if it is closer to the new node than to every
/// neighbor already selected, which avoids spending edges on a tight cluster.
pub fn select_neighbors_heuristic(
    graph: &HnswGraph,
    candidates: &[Candidate],
    m: usize,
) -> Vec<Candidate> {
    let mut selected: Vec<(Candidate, Arc<HnswNode>)> = Vec::with_capacity(m);

    for &candidate in candidates {
        if selected.len() >= m {
            break;
        }
        let Some(node) = graph.node(candidate.node) else {
            continue;
        };
        let diverse = selected
            .iter()
            .all(|(_, chosen)| {
                candidate.distance < graph.metric.calculate(&node.vector, &chosen.vector)
            });
        if diverse {
            selected.push((candidate, node));
        }
    }

    selected.into_iter().map(|(candidate, _)| candidate).collect()
}
