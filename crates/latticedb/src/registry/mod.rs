//! The collection registry.
//!
//! A [`CollectionRegistry`] owns a root directory holding the manifest and
//! one subdirectory per collection:
//!
//! ```text
//! <root>/
//!     manifest.json
//!     <collection>/
//!         store/
//!         graph.snap
//! ```
//!
//! Every collection in the manifest is opened (and reconciled) when the
//! registry opens. Creating and dropping collections is serialized; all
//! other work happens on the [`Collection`] handles.

pub(crate) mod manifest;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use latticedb_vector::DistanceMetric;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

pub use manifest::{Manifest, ManifestEntry, MANIFEST_FILE, MANIFEST_VERSION};

use crate::collection::{Collection, CollectionConfig, CollectionName};
use crate::compaction::{CollectionMap, Compactor};
use crate::config::Config;
use crate::error::{Error, Result};
use manifest::ManifestFile;

/// Process-wide directory of collections backed by one root directory.
///
/// The registry is `Sync`; share it by reference or behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// use latticedb::{CollectionRegistry, Config, DistanceMetric};
///
/// # fn main() -> latticedb::Result<()> {
/// let registry = CollectionRegistry::open(Config::new("/tmp/latticedb"))?;
/// let animals = registry.get_or_create("animals", 2, DistanceMetric::Euclidean)?;
///
/// animals.add(&["dog", "cat"], &[[0.12, 0.45], [0.15, 0.50]], &["Dog", "Cat"])?;
/// let hits = animals.query(&[0.14, 0.48], 1)?;
/// assert_eq!(hits[0].id, "cat");
///
/// registry.close()?;
/// # Ok(())
/// # }
/// ```
pub struct CollectionRegistry {
    config: Config,
    manifest: Arc<ManifestFile>,
    pub(crate) collections: CollectionMap,
    /// Held while creating or dropping a collection.
    structure: Mutex<()>,
    compactor: Mutex<Option<Compactor>>,
}

impl CollectionRegistry {
    /// Open the registry rooted at `config.path`.
    ///
    /// Reads the manifest and opens every collection it lists. Starts the
    /// background compactor if `config.compaction.interval` is set.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the root is missing and `create_if_missing` is off
    /// - `Manifest` if the manifest cannot be read
    /// - `InvalidArgument` for an invalid configuration
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let root = config.path.clone();
        if !root.exists() {
            if !config.create_if_missing {
                return Err(Error::NotFound(format!("registry directory {}", root.display())));
            }
            fs::create_dir_all(&root)?;
        }

        let manifest = Arc::new(ManifestFile::open(&root)?);
        let mut collections = HashMap::new();
        for (name, entry) in manifest.snapshot().collections {
            let name = CollectionName::new(name)
                .map_err(|e| Error::Manifest(format!("invalid collection name in manifest: {e}")))?;
            let collection = Collection::open(
                name.clone(),
                root.join(&entry.directory),
                entry.config(),
                &config,
                Arc::clone(&manifest),
            )?;
            collections.insert(name.into_string(), Arc::new(collection));
        }
        let collections: CollectionMap = Arc::new(RwLock::new(collections));

        let compactor = match config.compaction.interval {
            Some(interval) => Some(Compactor::start(
                Arc::clone(&collections),
                config.compaction.clone(),
                interval,
            )?),
            None => None,
        };

        info!(
            path = %root.display(),
            collections = collections.read().len(),
            background_compaction = compactor.is_some(),
            "registry opened"
        );

        Ok(Self {
            config,
            manifest,
            collections,
            structure: Mutex::new(()),
            compactor: Mutex::new(compactor),
        })
    }

    /// The registry configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The root directory.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Create a collection with the registry's default HNSW parameters.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken, `InvalidArgument` for a bad
    /// name or dimension.
    pub fn create(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Arc<Collection>> {
        self.create_with_config(name, self.default_config(dimension, metric))
    }

    /// Create a collection with an explicit configuration.
    pub fn create_with_config(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        let name = CollectionName::new(name)?;
        config.validate()?;
        let _structure = self.lock_structure()?;
        if self.collections.read().contains_key(name.as_str()) {
            return Err(Error::AlreadyExists(name.into_string()));
        }
        self.create_locked(name, config)
    }

    /// Return the named collection, creating it if needed.
    ///
    /// # Errors
    ///
    /// `ConfigMismatch` if the collection exists with a different dimension
    /// or metric.
    pub fn get_or_create(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Arc<Collection>> {
        self.get_or_create_with_config(name, self.default_config(dimension, metric))
    }

    /// [`get_or_create`](Self::get_or_create) with an explicit configuration.
    ///
    /// Only dimension and metric are compared against an existing
    /// collection; its HNSW parameters are kept as created.
    pub fn get_or_create_with_config(
        &self,
        name: &str,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        let name = CollectionName::new(name)?;
        config.validate()?;
        let _structure = self.lock_structure()?;
        if let Some(existing) = self.collections.read().get(name.as_str()) {
            existing.config().ensure_compatible(name.as_str(), &config)?;
            return Ok(Arc::clone(existing));
        }
        self.create_locked(name, config)
    }

    /// Look up a collection.
    ///
    /// # Errors
    ///
    /// `NotFound` if no collection has this name.
    pub fn get(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection {name:?}")))
    }

    /// Remove a collection and delete its files. Irreversible.
    ///
    /// Waits for in-flight operations on the collection; handles still held
    /// elsewhere report `NotFound` afterwards.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let _structure = self.lock_structure()?;
        let collection = self.get(name)?;

        collection.retire()?;
        self.manifest.update(|manifest| {
            manifest.collections.remove(name);
            Ok(())
        })?;
        self.collections.write().remove(name);
        fs::remove_dir_all(collection.path())?;

        info!(collection = name, "collection dropped");
        Ok(())
    }

    /// Names of all collections, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a collection with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Stop background compaction and checkpoint every collection.
    ///
    /// # Errors
    ///
    /// Returns the first checkpoint error; the remaining collections are
    /// still checkpointed.
    pub fn close(self) -> Result<()> {
        self.stop_compactor();

        let mut first_error = None;
        for collection in self.collections.read().values() {
            if let Err(e) = collection.checkpoint() {
                warn!(collection = %collection.name(), error = %e, "checkpoint on close failed");
                first_error.get_or_insert(e);
            }
        }

        info!(path = %self.config.path.display(), "registry closed");
        first_error.map_or(Ok(()), Err)
    }

    fn create_locked(
        &self,
        name: CollectionName,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        let dir: PathBuf = self.config.path.join(name.as_str());
        if dir.exists() {
            warn!(
                collection = %name,
                dir = %dir.display(),
                "removing leftover files of an unregistered collection"
            );
            fs::remove_dir_all(&dir)?;
        }

        let collection = Collection::open(
            name.clone(),
            dir.clone(),
            config.clone(),
            &self.config,
            Arc::clone(&self.manifest),
        )?;
        let registered = self.manifest.update(|manifest| {
            let entry = ManifestEntry::new(&config, name.as_str());
            manifest.collections.insert(name.as_str().to_string(), entry);
            Ok(())
        });
        if let Err(e) = registered {
            drop(collection);
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!(
                    collection = %name,
                    error = %cleanup,
                    "failed to remove files of unregistered collection"
                );
            }
            return Err(e);
        }

        let collection = Arc::new(collection);
        self.collections.write().insert(name.as_str().to_string(), Arc::clone(&collection));
        info!(
            collection = %name,
            dimension = config.dimension,
            metric = %config.metric,
            "collection created"
        );
        Ok(collection)
    }

    fn default_config(&self, dimension: usize, metric: DistanceMetric) -> CollectionConfig {
        CollectionConfig::new(dimension, metric).with_hnsw(self.config.hnsw.clone())
    }

    fn lock_structure(&self) -> Result<MutexGuard<'_, ()>> {
        self.structure.try_lock_for(self.config.lock_timeout).ok_or(Error::Busy("registry"))
    }

    fn stop_compactor(&self) {
        if let Some(mut compactor) = self.compactor.lock().take() {
            compactor.stop();
        }
    }
}

impl Drop for CollectionRegistry {
    fn drop(&mut self) {
        self.stop_compactor();
    }
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("path", &self.config.path)
            .field("collections", &self.list())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_root_without_create() {
        let dir = tempfile::tempdir().expect("failed");
        let config = Config::new(dir.path().join("absent")).with_create_if_missing(false);
        assert!(matches!(CollectionRegistry::open(config), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_create_rejects_taken_name() {
        let dir = tempfile::tempdir().expect("failed");
        let registry = CollectionRegistry::open(Config::new(dir.path())).expect("failed");
        registry.create("docs", 3, DistanceMetric::Cosine).expect("failed");
        assert!(matches!(
            registry.create("docs", 3, DistanceMetric::Cosine),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            registry.create("bad name", 3, DistanceMetric::Cosine),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.create("zero", 0, DistanceMetric::Cosine),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(registry.list(), vec!["docs"]);
    }

    #[test]
    fn test_manifest_tracks_collections() {
        let dir = tempfile::tempdir().expect("failed");
        let registry = CollectionRegistry::open(Config::new(dir.path())).expect("failed");
        registry.create("a", 2, DistanceMetric::Euclidean).expect("failed");
        registry.create("b", 4, DistanceMetric::DotProduct).expect("failed");
        registry.drop_collection("a").expect("failed");

        let manifest = registry.manifest.snapshot();
        assert_eq!(manifest.collections.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(manifest.collections["b"].dimension, 4);
        assert_eq!(manifest.collections["b"].metric, DistanceMetric::DotProduct);
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_leftover_directory_is_replaced() {
        let dir = tempfile::tempdir().expect("failed");
        fs::create_dir_all(dir.path().join("ghost").join("store")).expect("failed");
        fs::write(dir.path().join("ghost").join("graph.snap"), b"stale").expect("failed");

        let registry = CollectionRegistry::open(Config::new(dir.path())).expect("failed");
        let ghost = registry.create("ghost", 2, DistanceMetric::Euclidean).expect("failed");
        assert_eq!(ghost.count(), 0);
        assert!(!dir.path().join("ghost").join("graph.snap").exists());
    }
}
