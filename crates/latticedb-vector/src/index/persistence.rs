//! Graph snapshots.
//!
//! A snapshot holds the graph structure: every node's id, LSN, level and
//! per-layer edges. Vectors of live nodes are not stored, since the record
//! store already has them; they are looked up again on load. Tombstoned
//! nodes keep their vectors inline because the store no longer has them
//! and they are still needed for traversal.
//!
//! ```text
//! [magic: 8 "LTCGRAPH"][version: u32][len: u64][crc32: u32][bincode payload]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{VectorError, VectorResult};

use super::graph::{Candidate, EntryPoint, HnswGraph, HnswNode, NodeId};
use super::hnsw::highest_node;

const MAGIC: &[u8; 8] = b"LTCGRAPH";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 8 + 4;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    metric: DistanceMetric,
    entry: Option<(NodeId, usize)>,
    nodes: Vec<NodeRecord>,
}

#[derive(Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    lsn: u64,
    level: usize,
    deleted: bool,
    /// Present only for tombstoned nodes.
    vector: Option<Vec<f32>>,
    layers: Vec<Vec<Candidate>>,
}

impl Snapshot {
    fn capture(graph: &HnswGraph) -> Self {
        let nodes = graph
            .nodes()
            .iter()
            .map(|node| {
                let deleted = node.is_deleted();
                NodeRecord {
                    id: node.id().to_string(),
                    lsn: node.lsn(),
                    level: node.level(),
                    deleted,
                    vector: deleted.then(|| node.vector().to_vec()),
                    layers: (0..=node.level())
                        .map(|layer| node.neighbors(layer).to_vec())
                        .collect(),
                }
            })
            .collect();

        Self {
            dimension: graph.dimension(),
            metric: graph.metric(),
            entry: graph.entry_point().map(|entry| (entry.node, entry.level)),
            nodes,
        }
    }
}

/// Write `graph` to `path` via a temporary file and rename.
pub(crate) fn save_graph(graph: &HnswGraph, path: &Path) -> VectorResult<()> {
    let snapshot = Snapshot::capture(graph);
    let payload = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
        .map_err(|e| VectorError::Encoding(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);

    let tmp = path.with_extension("snap.tmp");
    {
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }

    tracing::debug!(
        path = %path.display(),
        nodes = snapshot.nodes.len(),
        bytes = bytes.len(),
        "saved graph snapshot"
    );
    Ok(())
}

/// Read a snapshot and rebuild the graph. Returns the graph and the highest
/// LSN it contains.
pub(crate) fn load_graph<F>(
    path: &Path,
    dimension: usize,
    metric: DistanceMetric,
    mut lookup: F,
) -> VectorResult<(HnswGraph, u64)>
where
    F: FnMut(&str) -> Option<Vec<f32>>,
{
    let snapshot = read_snapshot(path)?;
    if snapshot.dimension != dimension {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            actual: snapshot.dimension,
        });
    }
    if snapshot.metric != metric {
        return Err(VectorError::Corrupt(format!(
            "snapshot uses {} but the index uses {metric}",
            snapshot.metric
        )));
    }

    // Resolve vectors first: a node without one cannot be kept.
    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(snapshot.nodes.len());
    for record in &snapshot.nodes {
        let vector = if record.deleted { record.vector.clone() } else { lookup(&record.id) };
        vectors.push(vector.filter(|v| v.len() == dimension));
    }

    let mut remap: Vec<Option<NodeId>> = vec![None; snapshot.nodes.len()];
    let mut next: NodeId = 0;
    for (slot, vector) in vectors.iter().enumerate() {
        if vector.is_some() {
            remap[slot] = Some(next);
            next += 1;
        }
    }
    let dropped = snapshot.nodes.len() - next as usize;

    let mut clock = 0;
    let mut nodes: Vec<Arc<HnswNode>> = Vec::with_capacity(next as usize);
    for (record, vector) in snapshot.nodes.into_iter().zip(vectors) {
        let Some(vector) = vector else {
            continue;
        };
        if record.layers.len() != record.level + 1 {
            return Err(VectorError::Corrupt(format!(
                "node {:?} has a malformed layer table",
                record.id
            )));
        }
        clock = clock.max(record.lsn);

        let node = HnswNode::new(record.id, record.lsn, vector, record.level);
        for (layer, edges) in record.layers.into_iter().enumerate() {
            let edges = edges
                .into_iter()
                .filter_map(|edge| {
                    let slot = *remap.get(edge.node as usize)?;
                    slot.map(|slot| Candidate::new(slot, edge.distance))
                })
                .collect();
            node.set_neighbors(layer, edges);
        }
        if record.deleted {
            node.mark_deleted();
        }
        nodes.push(Arc::new(node));
    }

    let entry = snapshot
        .entry
        .and_then(|(node, level)| {
            let slot = (*remap.get(node as usize)?)?;
            let kept = nodes.get(slot as usize)?;
            (kept.level() == level).then_some(EntryPoint { node: slot, level })
        })
        .or_else(|| highest_node(&nodes));

    if dropped > 0 {
        tracing::warn!(
            path = %path.display(),
            dropped,
            "snapshot nodes missing from the record store were dropped"
        );
    }
    tracing::debug!(path = %path.display(), nodes = nodes.len(), "loaded graph snapshot");

    Ok((HnswGraph::from_parts(dimension, metric, nodes, entry), clock))
}

fn read_snapshot(path: &Path) -> VectorResult<Snapshot> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => VectorError::Corrupt("truncated header".into()),
        _ => VectorError::Io(e),
    })?;

    if &header[0..8] != MAGIC {
        return Err(VectorError::Corrupt("bad magic".into()));
    }
    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != VERSION {
        return Err(VectorError::Corrupt(format!("unsupported version {version}")));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[12..20]);
    let len = u64::from_le_bytes(len_bytes);
    let expected_crc = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(VectorError::Corrupt(format!(
            "expected {len} payload bytes, found {}",
            payload.len()
        )));
    }
    if crc32fast::hash(&payload) != expected_crc {
        return Err(VectorError::Corrupt("checksum mismatch".into()));
    }

    let (snapshot, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
        .map_err(|e| VectorError::Encoding(e.to_string()))?;
    Ok(snapshot)
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
