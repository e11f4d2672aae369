//! Framework library cache store.

use crate::layout::CacheLayout;
use crate::locks::{KeyGuard, KeyLocks};
use crate::snapshot::CatalogSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use trellis_core::{CoreError, Distribution, Integrity, LibraryKey, ResolvedLibrary};

/// Staging directories of other store instances older than this are swept on open
const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache root directory
    pub root: PathBuf,
    /// Age after which a cached catalog snapshot is re-fetched, in seconds
    pub catalog_max_age_secs: u64,
}

impl CacheConfig {
    /// Create a config rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Set catalog max age
    #[must_use]
    pub fn with_catalog_max_age(mut self, max_age: Duration) -> Self {
        self.catalog_max_age_secs = max_age.as_secs();
        self
    }

    /// Catalog max age
    #[must_use]
    pub const fn catalog_max_age(&self) -> Duration {
        Duration::from_secs(self.catalog_max_age_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".trellis/framework"),
            catalog_max_age_secs: 24 * 60 * 60,
        }
    }
}

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// An installed entry failed verification
    #[error("Corrupted cache entry {key}: {reason}")]
    Corrupted { key: String, reason: String },

    /// Data offered for installation does not match its integrity
    #[error("Integrity mismatch for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// A record could not be encoded
    #[error("Serialization error for {path}: {reason}")]
    Serialization { path: String, reason: String },

    /// The store was closed
    #[error("Cache store is closed")]
    Closed,
}

fn io_err(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Metadata record stored next to each artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryMetadata {
    /// Verified integrity of the artifact
    pub integrity: Integrity,
    /// When the artifact was fetched
    pub fetched_at: DateTime<Utc>,
    /// Artifact size in bytes
    pub size: u64,
    /// Runtime dependencies from the release manifest
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Lookups that found a corrupted entry
    pub corrupted: u64,
    /// Artifacts promoted into the cache
    pub installs: u64,
}

/// On-disk cache of framework libraries and catalog snapshots
///
/// Opened once per run and shared behind an `Arc`. Access to a library key
/// goes through [`CacheStore::entry`], which holds that key's lock; different
/// keys never block each other.
pub struct CacheStore {
    config: CacheConfig,
    layout: CacheLayout,
    /// Staging directory owned by this instance
    staging: PathBuf,
    locks: KeyLocks<LibraryKey>,
    stats: Mutex<StoreStats>,
    closed: AtomicBool,
}

impl CacheStore {
    /// Open (and create if needed) the cache at `config.root`
    ///
    /// Leftover staging directories of crashed runs are removed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory structure cannot be created
    pub async fn open(config: CacheConfig) -> Result<Self, StoreError> {
        let layout = CacheLayout::new(&config.root);
        for dir in [layout.libraries_dir(), layout.catalogs_dir(), layout.staging_dir()] {
            fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;
        }

        let swept = sweep_stale_staging(&layout.staging_dir()).await?;
        if swept > 0 {
            warn!(count = swept, "removed stale staging directories");
        }

        let staging = layout.new_staging_path();
        info!(root = %layout.root().display(), "cache store opened");

        Ok(Self {
            config,
            layout,
            staging,
            locks: KeyLocks::new(),
            stats: Mutex::new(StoreStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Close the store, removing this instance's staging directory
    ///
    /// # Errors
    ///
    /// Returns error if the staging directory cannot be removed
    pub async fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        remove_dir_if_exists(&self.staging).await?;
        info!(root = %self.layout.root().display(), stats = ?self.stats(), "cache store closed");
        Ok(())
    }

    /// Take the lock on `key` and return a handle for reading or installing it
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after [`CacheStore::close`]
    pub async fn entry(&self, key: &LibraryKey) -> Result<CacheEntry<'_>, StoreError> {
        self.ensure_open()?;
        let guard = self.locks.lock(key).await;
        Ok(CacheEntry {
            store: self,
            key: key.clone(),
            _guard: guard,
        })
    }

    /// Look up a library, verifying its integrity
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the entry exists but fails verification
    pub async fn lookup(&self, key: &LibraryKey) -> Result<Option<ResolvedLibrary>, StoreError> {
        self.entry(key).await?.lookup().await
    }

    /// Remove a library from the cache
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be removed
    pub async fn invalidate(&self, key: &LibraryKey) -> Result<bool, StoreError> {
        self.entry(key).await?.remove().await
    }

    /// Read the cached catalog snapshot of a distribution
    ///
    /// An unreadable snapshot is reported as absent so that it gets re-fetched.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure
    pub async fn read_catalog(&self, distribution: Distribution) -> Result<Option<CatalogSnapshot>, StoreError> {
        self.ensure_open()?;
        let path = self.layout.catalog_path(distribution);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        match serde_json::from_slice::<CatalogSnapshot>(&raw) {
            Ok(snapshot) if snapshot.distribution == distribution => Ok(Some(snapshot)),
            Ok(_) => {
                warn!(path = %path.display(), "catalog snapshot belongs to another distribution");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable catalog snapshot");
                Ok(None)
            }
        }
    }

    /// Persist a catalog snapshot, replacing the previous one atomically
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be written
    pub async fn write_catalog(&self, snapshot: &CatalogSnapshot) -> Result<(), StoreError> {
        self.ensure_open()?;
        let path = self.layout.catalog_path(snapshot.distribution);
        let data = serde_json::to_vec_pretty(snapshot).map_err(|e| StoreError::Serialization {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        fs::create_dir_all(&self.staging)
            .await
            .map_err(|e| io_err(&self.staging, e))?;
        let staged = self.staging.join(format!("{}.json", uuid::Uuid::new_v4()));
        write_synced(&staged, &data).await?;
        if let Err(e) = fs::rename(&staged, &path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(io_err(&path, e));
        }
        debug!(distribution = %snapshot.distribution, versions = snapshot.versions.len(), "catalog snapshot written");
        Ok(())
    }

    /// Remove every installed library and catalog snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the directories cannot be removed or recreated
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        for dir in [self.layout.libraries_dir(), self.layout.catalogs_dir()] {
            remove_dir_if_exists(&dir).await?;
            fs::create_dir_all(&dir).await.map_err(|e| io_err(&dir, e))?;
        }
        info!(root = %self.layout.root().display(), "cache cleared");
        Ok(())
    }

    /// Store configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache layout
    #[must_use]
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Get store statistics
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats)) {
        update(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// Locked handle on one library key
pub struct CacheEntry<'a> {
    store: &'a CacheStore,
    key: LibraryKey,
    _guard: KeyGuard,
}

impl CacheEntry<'_> {
    /// Key this entry is locked on
    #[must_use]
    pub fn key(&self) -> &LibraryKey {
        &self.key
    }

    /// Read the installed library, verifying the artifact against its record
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the record is unreadable, the
    /// artifact is missing, or the artifact does not match its integrity
    pub async fn lookup(&self) -> Result<Option<ResolvedLibrary>, StoreError> {
        let dir = self.store.layout.library_dir(&self.key);
        let metadata_path = CacheLayout::metadata_in(&dir);
        let raw = match fs::read(&metadata_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.store.record(|s| s.misses += 1);
                return Ok(None);
            }
            Err(e) => return Err(io_err(&metadata_path, e)),
        };

        let metadata: LibraryMetadata =
            serde_json::from_slice(&raw).map_err(|e| self.corrupted(format!("unreadable metadata: {}", e)))?;

        let artifact = CacheLayout::artifact_in(&dir);
        let bytes = match fs::read(&artifact).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.corrupted("artifact missing".to_string())),
            Err(e) => return Err(io_err(&artifact, e)),
        };
        if !metadata.integrity.matches(&bytes) {
            return Err(self.corrupted(format!("artifact does not match {}", metadata.integrity)));
        }

        self.store.record(|s| s.hits += 1);
        debug!(key = %self.key, "cache hit");
        Ok(Some(self.resolved(artifact, metadata)))
    }

    /// Verify `bytes` against `expected` and promote them into the cache
    ///
    /// The artifact and its metadata are written to a staging directory and
    /// renamed into place; any previous entry under the key is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IntegrityMismatch`] if the data does not match,
    /// or an I/O error if staging or promotion fails. Nothing becomes
    /// visible under the key on error.
    pub async fn install(
        &self,
        bytes: &[u8],
        expected: &Integrity,
        dependencies: &[String],
    ) -> Result<ResolvedLibrary, StoreError> {
        self.store.ensure_open()?;
        self.check_integrity(expected, bytes)?;

        let staging = self.store.staging.join(uuid::Uuid::new_v4().to_string());
        let metadata = LibraryMetadata {
            integrity: *expected,
            fetched_at: Utc::now(),
            size: bytes.len() as u64,
            dependencies: dependencies.to_vec(),
        };

        let result = self.stage_and_promote(&staging, bytes, &metadata).await;
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging).await;
        }
        let final_dir = result?;

        self.store.record(|s| s.installs += 1);
        debug!(key = %self.key, size = metadata.size, "library installed");
        Ok(self.resolved(CacheLayout::artifact_in(&final_dir), metadata))
    }

    /// Remove the entry
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be removed
    pub async fn remove(&self) -> Result<bool, StoreError> {
        let dir = self.store.layout.library_dir(&self.key);
        let existed = remove_dir_if_exists(&dir).await?;
        if existed {
            debug!(key = %self.key, "cache entry removed");
        }
        Ok(existed)
    }

    async fn stage_and_promote(
        &self,
        staging: &Path,
        bytes: &[u8],
        metadata: &LibraryMetadata,
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(staging).await.map_err(|e| io_err(staging, e))?;

        let staged_artifact = CacheLayout::artifact_in(staging);
        write_synced(&staged_artifact, bytes).await?;

        let metadata_path = CacheLayout::metadata_in(staging);
        let encoded = serde_json::to_vec_pretty(metadata).map_err(|e| StoreError::Serialization {
            path: metadata_path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_synced(&metadata_path, &encoded).await?;

        let written = fs::read(&staged_artifact)
            .await
            .map_err(|e| io_err(&staged_artifact, e))?;
        self.check_integrity(&metadata.integrity, &written)?;

        let final_dir = self.store.layout.library_dir(&self.key);
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        }
        remove_dir_if_exists(&final_dir).await?;
        fs::rename(staging, &final_dir)
            .await
            .map_err(|e| io_err(&final_dir, e))?;
        Ok(final_dir)
    }

    fn check_integrity(&self, expected: &Integrity, bytes: &[u8]) -> Result<(), StoreError> {
        expected.verify(bytes).map_err(|e| match e {
            CoreError::IntegrityMismatch { expected, actual } => StoreError::IntegrityMismatch {
                key: self.key.to_string(),
                expected,
                actual,
            },
            other => StoreError::Corrupted {
                key: self.key.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn corrupted(&self, reason: String) -> StoreError {
        self.store.record(|s| s.corrupted += 1);
        StoreError::Corrupted {
            key: self.key.to_string(),
            reason,
        }
    }

    fn resolved(&self, installed_path: PathBuf, metadata: LibraryMetadata) -> ResolvedLibrary {
        ResolvedLibrary {
            distribution: self.key.distribution,
            version: self.key.version.clone(),
            library_name: self.key.library.clone(),
            installed_path,
            integrity: metadata.integrity,
            dependencies: metadata.dependencies,
        }
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).await.map_err(|e| io_err(path, e))?;
    file.write_all(data).await.map_err(|e| io_err(path, e))?;
    file.sync_all().await.map_err(|e| io_err(path, e))?;
    Ok(())
}

async fn remove_dir_if_exists(dir: &Path) -> Result<bool, StoreError> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(dir, e)),
    }
}

/// Remove staging directories left behind by runs that never closed
async fn sweep_stale_staging(staging_root: &Path) -> Result<usize, StoreError> {
    let mut entries = fs::read_dir(staging_root)
        .await
        .map_err(|e| io_err(staging_root, e))?;
    let mut swept = 0;
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(staging_root, e))? {
        let path = entry.path();
        let modified = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age < STALE_STAGING_AGE {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => swept += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path, e)),
        }
    }
    Ok(swept)
}
