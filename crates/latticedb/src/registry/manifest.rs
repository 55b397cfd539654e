//! The registry manifest: a JSON directory of collections.
//!
//! The manifest is rewritten on every structural change (create, drop) and
//! after checkpoints, which refresh each collection's entry point. Writes go
//! to a temp file that is fsynced and renamed over the old manifest.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use latticedb_vector::{DistanceMetric, HnswConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::CollectionConfig;
use crate::error::{Error, Result};

/// File name of the manifest inside the registry root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Persisted metadata for every collection in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    pub version: u32,
    /// Collections by name.
    pub collections: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self { version: MANIFEST_VERSION, collections: BTreeMap::new() }
    }
}

/// One collection's manifest record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Vector dimensionality.
    pub dimension: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// HNSW parameters the collection was created with.
    pub hnsw: HnswConfig,
    /// Id of the graph entry point as of the last checkpoint.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Highest graph layer as of the last checkpoint.
    #[serde(default)]
    pub max_layer: Option<usize>,
    /// Collection directory, relative to the registry root.
    pub directory: String,
}

impl ManifestEntry {
    /// A fresh entry for a collection stored in `directory`.
    pub(crate) fn new(config: &CollectionConfig, directory: impl Into<String>) -> Self {
        Self {
            dimension: config.dimension,
            metric: config.metric,
            hnsw: config.hnsw.clone(),
            entry_point: None,
            max_layer: None,
            directory: directory.into(),
        }
    }

    /// The collection configuration recorded in this entry.
    #[must_use]
    pub fn config(&self) -> CollectionConfig {
        CollectionConfig::new(self.dimension, self.metric).with_hnsw(self.hnsw.clone())
    }
}

/// The manifest file together with its in-memory copy.
///
/// Every change goes through [`ManifestFile::update`], which persists the
/// modified copy before making it current.
pub(crate) struct ManifestFile {
    path: PathBuf,
    state: Mutex<Manifest>,
}

impl ManifestFile {
    /// Read the manifest in `root`, or start an empty one if there is none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Manifest` if the file exists but cannot be parsed or
    /// has an unsupported version.
    pub(crate) fn open(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        let manifest = match fs::read(&path) {
            Ok(bytes) => parse(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let manifest = Manifest::default();
                write_atomic(&path, &manifest)?;
                manifest
            }
            Err(e) => return Err(Error::Manifest(format!("cannot read {}: {e}", path.display()))),
        };
        debug!(path = %path.display(), collections = manifest.collections.len(), "manifest loaded");
        Ok(Self { path, state: Mutex::new(manifest) })
    }

    /// A copy of the current manifest.
    pub(crate) fn snapshot(&self) -> Manifest {
        self.state.lock().clone()
    }

    /// Apply `f` to a copy of the manifest, persist it, then make it current.
    ///
    /// If `f` fails nothing is written. If the write fails the in-memory
    /// manifest is left unchanged.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Manifest) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = f(&mut next)?;
        if next != *state {
            write_atomic(&self.path, &next)?;
            *state = next;
        }
        Ok(out)
    }
}

fn parse(bytes: &[u8]) -> Result<Manifest> {
    let manifest: Manifest = serde_json::from_slice(bytes)
        .map_err(|e| Error::Manifest(format!("unreadable manifest: {e}")))?;
    if manifest.version != MANIFEST_VERSION {
        return Err(Error::Manifest(format!("unsupported manifest version {}", manifest.version)));
    }
    Ok(manifest)
}

fn write_atomic(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest).map_err(|e| Error::Manifest(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}
