//! On-disk model cache keyed by (granularity, metric, family)
//!
//! Each key owns two files in the cache directory:
//!
//! - `{key}.model.bin`: bincode artifact holding the network, its scaler and
//!   the fingerprint of the history it was trained on
//! - `{key}.meta.json`: human-readable metadata, written after the artifact
//!
//! Both are written to a temporary file and renamed into place. A lookup only
//! succeeds when the metadata fingerprint and the artifact's embedded
//! fingerprint both match the request, so a half-finished write can never pair
//! one key's network with another history. The network shape and epoch count
//! are part of the match too; changing either in configuration retrains.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Metric;

use super::fingerprint::Fingerprint;
use super::model::TrainedForecaster;
use super::network::NetworkShape;
use super::{Granularity, ModelFamily};

const META_SUFFIX: &str = ".meta.json";
const MODEL_SUFFIX: &str = ".model.bin";
const TMP_SUFFIX: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub granularity: Granularity,
    pub metric: Metric,
    pub family: ModelFamily,
}

impl CacheKey {
    pub fn new(granularity: Granularity, metric: Metric, family: ModelFamily) -> Self {
        Self {
            granularity,
            metric,
            family,
        }
    }

    /// File stem, e.g. `daily_temp_lstm`.
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.granularity.as_str(),
            self.metric.as_str(),
            self.family.as_str()
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.granularity, self.metric, self.family)
    }
}

/// How a cached model was built. Reuse requires an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRecipe {
    pub shape: NetworkShape,
    pub epochs: usize,
}

/// Sidecar metadata describing a cached model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub key: CacheKey,
    pub fingerprint: Fingerprint,
    pub recipe: ModelRecipe,
    /// Length of the history the model was trained on
    pub data_points: usize,
    pub training_samples: usize,
    pub final_loss: Option<f64>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct CachedArtifact {
    version: u32,
    key: CacheKey,
    fingerprint: Fingerprint,
    recipe: ModelRecipe,
    forecaster: TrainedForecaster,
}

/// Result of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(TrainedForecaster),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Errors that can occur while writing or enumerating the cache
#[derive(Debug, Clone)]
pub enum PersistenceError {
    /// IO error
    IoError(String),
    /// Serialization error
    SerializeError(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::IoError(e) => write!(f, "IO error: {}", e),
            PersistenceError::SerializeError(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<io::Error> for PersistenceError {
    fn from(e: io::Error) -> Self {
        PersistenceError::IoError(e.to_string())
    }
}

/// Directory-backed model cache.
#[derive(Debug, Clone)]
pub struct ModelCacheStore {
    dir: PathBuf,
}

impl ModelCacheStore {
    /// Current on-disk format version
    pub const CURRENT_VERSION: u32 = 2;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}{}", key.stem(), META_SUFFIX))
    }

    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}{}", key.stem(), MODEL_SUFFIX))
    }

    /// Return the cached model for `key` if it was built by `recipe` on
    /// exactly the history identified by `fingerprint`.
    ///
    /// Missing, unreadable, stale or mismatched entries are all misses.
    pub fn lookup(
        &self,
        key: &CacheKey,
        fingerprint: &Fingerprint,
        recipe: &ModelRecipe,
    ) -> CacheLookup {
        let Some(meta) = self.metadata(key) else {
            return CacheLookup::Miss;
        };

        if meta.version != Self::CURRENT_VERSION || meta.key != *key {
            tracing::info!(
                %key,
                version = meta.version,
                "Cached metadata is from another format, ignoring"
            );
            return CacheLookup::Miss;
        }
        if meta.fingerprint != *fingerprint {
            tracing::debug!(%key, "History changed since the cached model was trained");
            return CacheLookup::Miss;
        }
        if meta.recipe != *recipe {
            tracing::info!(%key, "Model settings changed since the cached model was trained");
            return CacheLookup::Miss;
        }

        let path = self.artifact_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    %key,
                    path = %path.display(),
                    error = %e,
                    "Cached model artifact unreadable"
                );
                return CacheLookup::Miss;
            }
        };

        let artifact: CachedArtifact = match bincode::deserialize(&bytes) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(
                    %key,
                    path = %path.display(),
                    error = %e,
                    "Cached model artifact corrupt"
                );
                return CacheLookup::Miss;
            }
        };

        if artifact.version != Self::CURRENT_VERSION
            || artifact.key != *key
            || artifact.fingerprint != *fingerprint
            || artifact.recipe != *recipe
            || *artifact.forecaster.network().shape() != recipe.shape
        {
            tracing::warn!(%key, "Cached model artifact does not match its metadata");
            return CacheLookup::Miss;
        }

        CacheLookup::Hit(artifact.forecaster)
    }

    /// Read the metadata sidecar for `key`, if present and parseable.
    pub fn metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
        read_metadata(&self.metadata_path(key))
    }

    /// Persist `forecaster` as the entry for `key`, replacing any previous one.
    pub fn store(
        &self,
        key: &CacheKey,
        forecaster: &TrainedForecaster,
        fingerprint: &Fingerprint,
        recipe: &ModelRecipe,
        data_points: usize,
    ) -> Result<CacheMetadata, PersistenceError> {
        fs::create_dir_all(&self.dir)?;

        let artifact = CachedArtifact {
            version: Self::CURRENT_VERSION,
            key: *key,
            fingerprint: fingerprint.clone(),
            recipe: *recipe,
            forecaster: forecaster.clone(),
        };
        let bytes = bincode::serialize(&artifact)
            .map_err(|e| PersistenceError::SerializeError(e.to_string()))?;
        write_atomic(&self.artifact_path(key), &bytes)?;

        let meta = CacheMetadata {
            version: Self::CURRENT_VERSION,
            key: *key,
            fingerprint: fingerprint.clone(),
            recipe: *recipe,
            data_points,
            training_samples: forecaster.training_samples,
            final_loss: forecaster.final_loss,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PersistenceError::SerializeError(e.to_string()))?;
        write_atomic(&self.metadata_path(key), &json)?;

        Ok(meta)
    }

    /// Metadata of every readable entry, sorted by key stem.
    pub fn entries(&self) -> Result<Vec<CacheMetadata>, PersistenceError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }
            if let Some(meta) = read_metadata(&path) {
                entries.push(meta);
            }
        }

        entries.sort_by_key(|m| m.key.stem());
        Ok(entries)
    }

    /// Delete every cache file. Returns the number of files removed.
    pub fn purge(&self) -> Result<usize, PersistenceError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in read_dir {
            let path = entry?.path();
            let owned = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_cache_file);
            if owned {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_cache_file(name: &str) -> bool {
    [META_SUFFIX, MODEL_SUFFIX, TMP_SUFFIX]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

fn read_metadata(path: &Path) -> Option<CacheMetadata> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cache metadata unreadable");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cache metadata corrupt");
            None
        }
    }
}

/// Write via a uniquely named sibling and rename over the destination.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no file name"))?;
    let tmp = path.with_file_name(format!(
        "{}.{}.{}{}",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        TMP_SUFFIX
    ));

    if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::tempdir;

    use super::*;
    use crate::forecast::{MinMaxScaler, NetworkShape, RecurrentNetwork};

    fn key() -> CacheKey {
        CacheKey::new(Granularity::Daily, Metric::Temp, ModelFamily::Lstm)
    }

    fn recipe() -> ModelRecipe {
        ModelRecipe {
            shape: NetworkShape::default(),
            epochs: 10,
        }
    }

    fn model() -> TrainedForecaster {
        let network = RecurrentNetwork::new(
            ModelFamily::Lstm,
            NetworkShape::default(),
            &mut StdRng::seed_from_u64(3),
        );
        TrainedForecaster::new(
            network,
            MinMaxScaler::fit(&[20.0, 30.0]),
            65,
            Some(0.02),
            Utc::now(),
        )
    }

    #[test]
    fn test_key_stem() {
        assert_eq!(key().stem(), "daily_temp_lstm");
        let other = CacheKey::new(Granularity::Monthly, Metric::EnergyKwh, ModelFamily::Rnn);
        assert_eq!(other.stem(), "monthly_energy_kwh_rnn");
    }

    #[test]
    fn test_empty_store_misses() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path().join("missing"));
        assert!(!store.lookup(&key(), &Fingerprint::of(&[1.0]), &recipe()).is_hit());
        assert!(store.entries().unwrap().is_empty());
        assert_eq!(store.purge().unwrap(), 0);
    }

    #[test]
    fn test_store_then_lookup_hits() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0, 2.0, 3.0]);
        let original = model();

        let meta = store.store(&key(), &original, &fp, &recipe(), 72).unwrap();
        assert_eq!(meta.fingerprint, fp);
        assert_eq!(meta.data_points, 72);
        assert_eq!(meta.training_samples, 65);

        let CacheLookup::Hit(loaded) = store.lookup(&key(), &fp, &recipe()) else {
            panic!("expected a cache hit");
        };
        let series = [25.0; 7];
        assert_eq!(
            loaded.forecast(&series, 5).unwrap(),
            original.forecast(&series, 5).unwrap()
        );
    }

    #[test]
    fn test_different_fingerprint_misses() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();
        assert!(!store.lookup(&key(), &Fingerprint::of(&[2.0]), &recipe()).is_hit());
    }

    #[test]
    fn test_different_recipe_misses() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        let meta = store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();
        assert_eq!(meta.recipe, recipe());

        let more_epochs = ModelRecipe {
            epochs: 11,
            ..recipe()
        };
        assert!(!store.lookup(&key(), &fp, &more_epochs).is_hit());

        let wider = ModelRecipe {
            shape: NetworkShape {
                units: 64,
                ..NetworkShape::default()
            },
            ..recipe()
        };
        assert!(!store.lookup(&key(), &fp, &wider).is_hit());
        assert!(store.lookup(&key(), &fp, &recipe()).is_hit());
    }

    #[test]
    fn test_recipe_that_disagrees_with_network_misses() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        let claimed = ModelRecipe {
            shape: NetworkShape {
                units: 64,
                ..NetworkShape::default()
            },
            ..recipe()
        };
        // Metadata and artifact agree but the stored network is the default shape.
        store.store(&key(), &model(), &fp, &claimed, 1).unwrap();
        assert!(!store.lookup(&key(), &fp, &claimed).is_hit());
    }

    #[test]
    fn test_keys_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();

        let rnn = CacheKey::new(Granularity::Daily, Metric::Temp, ModelFamily::Rnn);
        assert!(!store.lookup(&rnn, &fp, &recipe()).is_hit());
        assert!(store.lookup(&key(), &fp, &recipe()).is_hit());
    }

    #[test]
    fn test_corrupt_artifact_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();

        fs::write(store.artifact_path(&key()), b"not a model").unwrap();
        assert!(!store.lookup(&key(), &fp, &recipe()).is_hit());
    }

    #[test]
    fn test_corrupt_metadata_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();

        fs::write(store.metadata_path(&key()), b"{ truncated").unwrap();
        assert!(!store.lookup(&key(), &fp, &recipe()).is_hit());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_ahead_of_artifact_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let old = Fingerprint::of(&[1.0]);
        let new = Fingerprint::of(&[2.0]);
        store.store(&key(), &model(), &old, &recipe(), 1).unwrap();

        // Simulate a crash that left new metadata next to the old artifact.
        let mut meta = store.metadata(&key()).unwrap();
        meta.fingerprint = new.clone();
        let json = serde_json::to_vec(&meta).unwrap();
        fs::write(store.metadata_path(&key()), json).unwrap();

        assert!(!store.lookup(&key(), &new, &recipe()).is_hit());
        assert!(!store.lookup(&key(), &old, &recipe()).is_hit());
    }

    #[test]
    fn test_entries_and_purge() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        let weekly = CacheKey::new(Granularity::Weekly, Metric::Co2, ModelFamily::Rnn);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();
        store.store(&weekly, &model(), &fp, &recipe(), 1).unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, key());
        assert_eq!(entries[1].key, weekly);

        assert_eq!(store.purge().unwrap(), 4);
        assert!(store.entries().unwrap().is_empty());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ModelCacheStore::new(dir.path());
        let fp = Fingerprint::of(&[1.0]);
        store.store(&key(), &model(), &fp, &recipe(), 1).unwrap();

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .count();
        assert_eq!(leftovers, 0);
    }
}
