//! HNSW index implementation.
//!
//! Approximate nearest neighbor search over an in-memory graph. The index
//! keeps its own copy of each vector; durability belongs to the caller,
//! which replays its log into the index (see [`HnswIndex::insert_with_lsn`])
//! or loads a snapshot.
//!
//! ## Concurrency
//!
//! Inserts, deletes and searches run concurrently. Each neighbor list has its
//! own lock and is replaced wholesale on update, so a search never observes a
//! half-written list. [`HnswIndex::purge_tombstones`] is the only operation
//! that needs the whole graph to itself.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{VectorError, VectorResult};

use super::config::{HnswConfig, MAX_LEVEL};
use super::graph::{
    greedy_closest, search_layer, select_neighbors_heuristic, Admission, Candidate, EntryPoint,
    HnswGraph, HnswNode, NodeId,
};
use super::persistence;
use super::traits::{SearchResult, VectorIndex};

/// Point-in-time counters for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Searchable nodes.
    pub live: usize,
    /// Deleted or superseded nodes still in the graph.
    pub tombstoned: usize,
    /// Highest layer in the graph, if any node exists.
    pub max_layer: Option<usize>,
}

/// HNSW index for approximate nearest neighbor search.
pub struct HnswIndex {
    graph: HnswGraph,
    config: HnswConfig,
    levels: Mutex<StdRng>,
    /// Shared by inserts and searches, exclusive for tombstone purging.
    maintenance: RwLock<()>,
    /// Highest LSN seen; [`VectorIndex::insert`] allocates above it.
    clock: AtomicU64,
}

impl HnswIndex {
    /// Create an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if `dimension` is zero or the configuration is invalid.
    pub fn new(dimension: usize, metric: DistanceMetric, config: HnswConfig) -> VectorResult<Self> {
        Self::from_graph(HnswGraph::new(dimension, metric), config, 0)
    }

    pub(crate) fn from_graph(
        graph: HnswGraph,
        config: HnswConfig,
        clock: u64,
    ) -> VectorResult<Self> {
        if graph.dimension() == 0 {
            return Err(VectorError::InvalidDimension { expected: 1, actual: 0 });
        }
        config.validate()?;
        Ok(Self {
            levels: Mutex::new(StdRng::seed_from_u64(config.seed)),
            graph,
            config,
            maintenance: RwLock::new(()),
            clock: AtomicU64::new(clock),
        })
    }

    /// Load an index from a snapshot written by [`HnswIndex::save`].
    ///
    /// Live nodes get their vectors from `lookup`; a node whose id the lookup
    /// cannot resolve is dropped along with its edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is unreadable or was built for a
    /// different dimension or metric.
    pub fn load<F>(
        path: &Path,
        dimension: usize,
        metric: DistanceMetric,
        config: HnswConfig,
        lookup: F,
    ) -> VectorResult<Self>
    where
        F: FnMut(&str) -> Option<Vec<f32>>,
    {
        let (graph, clock) = persistence::load_graph(path, dimension, metric, lookup)?;
        Self::from_graph(graph, config, clock)
    }

    /// Write the graph to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the graph is being purged.
    pub fn save(&self, path: &Path) -> VectorResult<()> {
        let _guard = self.shared()?;
        persistence::save_graph(&self.graph, path)
    }

    /// The index configuration.
    #[inline]
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// The distance metric.
    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.graph.metric()
    }

    /// Insert `vector` for `id` at sequence number `lsn`.
    ///
    /// Returns `false` without touching the graph if the index already holds
    /// `id` at `lsn` or newer, which makes replaying a log idempotent. A
    /// newer `lsn` tombstones the previous node for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector is invalid, or `Busy` if a lock could
    /// not be taken in time.
    pub fn insert_with_lsn(&self, id: &str, vector: &[f32], lsn: u64) -> VectorResult<bool> {
        self.check_vector(vector)?;
        let _guard = self.shared()?;
        self.clock.fetch_max(lsn, Ordering::AcqRel);

        let level = self.random_level();
        let node = match self.graph.admit(id, lsn, vector.to_vec(), level) {
            Admission::Stale => return Ok(false),
            Admission::Admitted(node) => node,
        };

        let candidate = EntryPoint { node, level };
        let entry = self.graph.init_entry(candidate);
        if entry == candidate {
            return Ok(true);
        }

        self.link(node, vector, level, entry)?;
        if level > entry.level {
            self.graph.promote_entry(candidate);
        }
        Ok(true)
    }

    /// Search with an explicit beam width.
    ///
    /// # Errors
    ///
    /// See [`VectorIndex::search`].
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
    ) -> VectorResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(VectorError::InvalidK);
        }
        self.check_vector(query)?;
        let _guard = self.shared()?;

        if self.graph.live_count() == 0 {
            return Err(VectorError::EmptyIndex);
        }
        let entry = self.graph.entry_point().ok_or(VectorError::EmptyIndex)?;
        let entry_node = self.graph.node(entry.node).ok_or(VectorError::EmptyIndex)?;

        let ef = ef.unwrap_or(self.config.ef_search).max(k);
        let mut current = Candidate::new(entry.node, self.graph.distance_to(query, &entry_node));
        for layer in (1..=entry.level).rev() {
            current = greedy_closest(&self.graph, query, current, layer);
        }

        let found = search_layer(&self.graph, query, &[current], ef, 0, true);
        let mut results: Vec<SearchResult> = found
            .into_iter()
            .filter_map(|c| {
                self.graph.node(c.node).map(|node| SearchResult::new(node.id(), c.distance))
            })
            .collect();
        // Equal distances rank by id.
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        results.truncate(k);
        Ok(results)
    }

    /// LSN of the live node for `id`.
    pub fn lsn_of(&self, id: &str) -> Option<u64> {
        self.graph.lookup(id).map(|node| node.lsn())
    }

    /// Vector of the live node for `id`.
    pub fn vector_of(&self, id: &str) -> Option<Vec<f32>> {
        self.graph.lookup(id).map(|node| node.vector().to_vec())
    }

    /// Ids of all live nodes, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.graph.live_ids()
    }

    /// Id and level of the current entry point.
    pub fn entry_point(&self) -> Option<(String, usize)> {
        let entry = self.graph.entry_point()?;
        self.graph.node(entry.node).map(|node| (node.id().to_string(), entry.level))
    }

    /// Current counters.
    pub fn stats(&self) -> IndexStats {
        let live = self.graph.live_count();
        IndexStats {
            live,
            tombstoned: self.graph.node_count().saturating_sub(live),
            max_layer: self.graph.entry_point().map(|entry| entry.level),
        }
    }

    /// Remove tombstoned nodes from the graph.
    ///
    /// Neighbor lists that pointed at a removed node are rebuilt from the
    /// removed node's own neighbors, so the survivors stay connected. Returns
    /// the number of nodes removed.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if in-flight operations do not drain in time.
    pub fn purge_tombstones(&self) -> VectorResult<usize> {
        let _guard = self.exclusive()?;

        let nodes = self.graph.nodes();
        let dead: Vec<bool> = nodes.iter().map(|node| node.is_deleted()).collect();
        let removed = dead.iter().filter(|&&d| d).count();
        if removed == 0 {
            return Ok(0);
        }

        for (slot, node) in nodes.iter().enumerate() {
            if dead[slot] {
                continue;
            }
            for layer in 0..=node.level() {
                self.repair_neighbors(slot as NodeId, node, layer, &nodes, &dead);
            }
        }

        let mut remap: Vec<Option<NodeId>> = vec![None; nodes.len()];
        let mut kept = Vec::with_capacity(nodes.len() - removed);
        for (slot, node) in nodes.iter().enumerate() {
            if !dead[slot] {
                remap[slot] = Some(kept.len() as NodeId);
                kept.push(Arc::clone(node));
            }
        }
        for node in &kept {
            for layer in 0..=node.level() {
                let list = node
                    .neighbors(layer)
                    .iter()
                    .filter_map(|c| {
                        remap[c.node as usize].map(|slot| Candidate::new(slot, c.distance))
                    })
                    .collect();
                node.set_neighbors(layer, list);
            }
        }

        let entry = self
            .graph
            .entry_point()
            .and_then(|entry| {
                remap[entry.node as usize].map(|node| EntryPoint { node, level: entry.level })
            })
            .or_else(|| highest_node(&kept));
        self.graph.replace(kept, entry);

        tracing::debug!(removed, live = self.graph.live_count(), "purged tombstones");
        Ok(removed)
    }

    fn repair_neighbors(
        &self,
        slot: NodeId,
        node: &HnswNode,
        layer: usize,
        nodes: &[Arc<HnswNode>],
        dead: &[bool],
    ) {
        let current = node.neighbors(layer);
        if !current.iter().any(|c| dead[c.node as usize]) {
            return;
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        seen.insert(slot);
        let mut pool: Vec<Candidate> = Vec::new();
        let mut offer = |id: NodeId, pool: &mut Vec<Candidate>| {
            if dead[id as usize] || !seen.insert(id) {
                return;
            }
            let distance = self.graph.distance_to(node.vector(), &nodes[id as usize]);
            pool.push(Candidate::new(id, distance));
        };

        for neighbor in current.iter() {
            if dead[neighbor.node as usize] {
                for second in nodes[neighbor.node as usize].neighbors(layer).iter() {
                    offer(second.node, &mut pool);
                }
            } else {
                offer(neighbor.node, &mut pool);
            }
        }

        pool.sort_unstable();
        let max_degree = self.config.max_degree(layer);
        let selected = select_neighbors_heuristic(&self.graph, &pool, max_degree);
        node.set_neighbors(layer, selected);
    }

    /// Connect a freshly admitted node into every layer up to `level`.
    fn link(
        &self,
        node_id: NodeId,
        vector: &[f32],
        level: usize,
        entry: EntryPoint,
    ) -> VectorResult<()> {
        let graph = &self.graph;
        let (Some(node), Some(entry_node)) = (graph.node(node_id), graph.node(entry.node)) else {
            return Ok(());
        };

        let mut current = Candidate::new(entry.node, graph.distance_to(vector, &entry_node));
        for layer in (level + 1..=entry.level).rev() {
            current = greedy_closest(graph, vector, current, layer);
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(entry.level)).rev() {
            let ef = self.config.ef_construction;
            let found = search_layer(graph, vector, &entry_points, ef, layer, false);
            let candidates: Vec<Candidate> =
                found.iter().copied().filter(|c| c.node != node_id).collect();
            let live: Vec<Candidate> = candidates
                .iter()
                .copied()
                .filter(|c| graph.node(c.node).is_some_and(|n| !n.is_deleted()))
                .collect();
            let pool = if live.is_empty() { &candidates } else { &live };

            let max_degree = self.config.max_degree(layer);
            let neighbors = select_neighbors_heuristic(graph, pool, max_degree);
            node.set_neighbors(layer, neighbors.clone());

            for neighbor in &neighbors {
                let Some(neighbor_node) = graph.node(neighbor.node) else {
                    continue;
                };
                neighbor_node.update_neighbors(layer, self.config.lock_timeout, |list| {
                    if list.iter().any(|c| c.node == node_id) {
                        return;
                    }
                    list.push(Candidate::new(node_id, neighbor.distance));
                    if list.len() > max_degree {
                        let farthest =
                            list.iter().enumerate().max_by(|a, b| a.1.cmp(b.1)).map(|(i, _)| i);
                        if let Some(farthest) = farthest {
                            list.swap_remove(farthest);
                        }
                    }
                })?;
            }

            if !found.is_empty() {
                entry_points = found;
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn random_level(&self) -> usize {
        // gen() is in [0, 1), so 1 - u is never zero.
        let u: f64 = self.levels.lock().gen();
        let level = (-(1.0 - u).ln() * self.config.ml).floor();
        (level as usize).min(MAX_LEVEL)
    }

    fn check_vector(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.len() != self.graph.dimension() {
            return Err(VectorError::DimensionMismatch {
                expected: self.graph.dimension(),
                actual: vector.len(),
            });
        }
        self.graph.metric().validate(vector)
    }

    fn shared(&self) -> VectorResult<RwLockReadGuard<'_, ()>> {
        self.maintenance
            .try_read_for(self.config.lock_timeout)
            .ok_or(VectorError::Busy("index maintenance"))
    }

    fn exclusive(&self) -> VectorResult<RwLockWriteGuard<'_, ()>> {
        self.maintenance
            .try_write_for(self.config.lock_timeout)
            .ok_or(VectorError::Busy("index maintenance"))
    }
}

/// The first node on the highest layer.
pub(crate) fn highest_node(nodes: &[Arc<HnswNode>]) -> Option<EntryPoint> {
    let mut best: Option<EntryPoint> = None;
    for (slot, node) in nodes.iter().enumerate() {
        if node.is_deleted() {
            continue;
        }
        if best.map_or(true, |b| node.level() > b.level) {
            best = Some(EntryPoint { node: slot as NodeId, level: node.level() });
        }
    }
    best
}

impl VectorIndex for HnswIndex {
    fn insert(&self, id: &str, vector: &[f32]) -> VectorResult<()> {
        let lsn = self.clock.load(Ordering::Acquire) + 1;
        self.insert_with_lsn(id, vector, lsn)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> VectorResult<bool> {
        let _guard = self.shared()?;
        Ok(self.graph.remove(id))
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: Option<usize>,
    ) -> VectorResult<Vec<SearchResult>> {
        self.search_with_ef(query, k, ef_search)
    }

    fn contains(&self, id: &str) -> bool {
        self.graph.lookup(id).is_some()
    }

    fn len(&self) -> usize {
        self.graph.live_count()
    }

    fn dimension(&self) -> usize {
        self.graph.dimension()
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.graph.dimension())
            .field("metric", &self.graph.metric())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
