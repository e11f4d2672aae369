//! Framework dependency resolver.
//!
//! Pins a version specifier against a distribution's catalog, expands the
//! requested libraries over the release manifest, and makes sure every
//! library is installed in the cache. Library fetches run as detached tasks
//! behind a [`SingleFlight`] registry and a bounded number of permits.

use crate::client::{CatalogClient, FetchError};
use crate::flight::SingleFlight;
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use trellis_core::{
    Distribution, FrameworkVersion, LibraryKey, LibraryManifestEntry, ResolvedLibrary, Version, VersionSpec,
};
use trellis_storage::{CacheStore, CatalogSnapshot, StoreError};

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Library downloads allowed to run at once
    pub max_concurrent_fetches: usize,
    /// Retry policy for catalog and artifact requests
    pub retry: RetryPolicy,
    /// Never touch the network; use cached catalogs and artifacts only
    pub offline: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            retry: RetryPolicy::default(),
            offline: false,
        }
    }
}

impl ResolverConfig {
    /// Set download concurrency
    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable offline mode
    #[must_use]
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}

/// Resolution error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// No release satisfies the specifier
    #[error("No {distribution} release matches '{specifier}'")]
    NoMatchingVersion {
        /// Distribution searched
        distribution: Distribution,
        /// Specifier as given
        specifier: String,
    },

    /// The pinned release does not ship a required library
    #[error("Library '{library}' is not part of {distribution} {version}")]
    UnknownLibrary {
        /// Distribution of the release
        distribution: Distribution,
        /// Missing library
        library: String,
        /// Pinned version
        version: Version,
    },

    /// A catalog or artifact could not be fetched
    #[error("Failed to fetch {what}: {source}")]
    Fetch {
        /// What was being fetched
        what: String,
        /// Final fetch failure
        source: FetchError,
    },

    /// Resolution was cancelled
    #[error("Resolution cancelled")]
    Cancelled,

    /// No client is registered for the distribution
    #[error("No catalog client configured for distribution '{distribution}'")]
    UnknownDistribution {
        /// Requested distribution
        distribution: Distribution,
    },

    /// Version specifier could not be parsed
    #[error("Invalid version specifier: {0}")]
    InvalidSpecifier(String),

    /// A manifest names a library that cannot be stored
    #[error("Invalid library name '{name}'")]
    InvalidLibraryName {
        /// Offending name
        name: String,
    },

    /// Data is missing from the cache and the network may not be used
    #[error("{what} is not cached and offline mode is enabled")]
    Offline {
        /// Missing data
        what: String,
    },

    /// Cache store failure
    #[error("Cache error: {0}")]
    Cache(#[from] StoreError),

    /// A fetch task ended abnormally
    #[error("Fetch task failed: {reason}")]
    TaskFailed {
        /// Join failure
        reason: String,
    },
}

impl From<JoinError> for ResolveError {
    fn from(err: JoinError) -> Self {
        Self::TaskFailed {
            reason: err.to_string(),
        }
    }
}

/// Capability handed to the project preprocessor
#[async_trait]
pub trait LibraryResolver: Send + Sync {
    /// Resolve `libraries` of `distribution` at `spec`, including their
    /// transitive dependencies
    ///
    /// # Errors
    ///
    /// Returns error if the version cannot be pinned or a library cannot be
    /// resolved
    async fn resolve_libraries(
        &self,
        distribution: Distribution,
        spec: &VersionSpec,
        libraries: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ResolvedLibrary>, ResolveError>;
}

type CatalogFlights = SingleFlight<Distribution, Arc<CatalogSnapshot>, ResolveError>;
type LibraryFlights = SingleFlight<LibraryKey, ResolvedLibrary, ResolveError>;

/// Resolves framework versions and installs libraries into the cache
pub struct FrameworkResolver {
    clients: HashMap<Distribution, Arc<dyn CatalogClient>>,
    store: Arc<CacheStore>,
    config: ResolverConfig,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    catalogs: RwLock<HashMap<Distribution, Arc<CatalogSnapshot>>>,
    catalog_flights: Arc<CatalogFlights>,
    library_flights: Arc<LibraryFlights>,
}

impl FrameworkResolver {
    /// Create a resolver over `store` with no clients registered
    #[must_use]
    pub fn new(store: Arc<CacheStore>, config: ResolverConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1)));
        Self {
            clients: HashMap::new(),
            store,
            config,
            permits,
            cancel: CancellationToken::new(),
            catalogs: RwLock::new(HashMap::new()),
            catalog_flights: Arc::new(SingleFlight::new()),
            library_flights: Arc::new(SingleFlight::new()),
        }
    }

    /// Register the client serving its distribution, replacing any previous one
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn CatalogClient>) -> Self {
        self.register(client);
        self
    }

    /// Register the client serving its distribution, replacing any previous one
    pub fn register(&mut self, client: Arc<dyn CatalogClient>) {
        self.clients.insert(client.distribution(), client);
    }

    /// Use `token` for cancellation instead of the resolver's own
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels every resolution of this resolver
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all current and future resolutions
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolver configuration
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Shared cache store
    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Distributions with a registered client, sorted
    #[must_use]
    pub fn distributions(&self) -> Vec<Distribution> {
        let mut distributions: Vec<Distribution> = self.clients.keys().copied().collect();
        distributions.sort();
        distributions
    }

    /// Resolve `libraries` and their transitive dependencies
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NoMatchingVersion`] if no release satisfies
    /// `spec`, [`ResolveError::UnknownLibrary`] if the pinned release lacks a
    /// library, [`ResolveError::Fetch`] if a download keeps failing, and
    /// [`ResolveError::Cancelled`] once the resolver is cancelled
    #[instrument(skip_all, fields(%distribution, %spec, requested = libraries.len()))]
    pub async fn resolve(
        &self,
        distribution: Distribution,
        spec: &VersionSpec,
        libraries: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ResolvedLibrary>, ResolveError> {
        self.ensure_active()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ResolveError::Cancelled),
            resolved = self.resolve_uncancelled(distribution, spec, libraries) => resolved,
        }
    }

    async fn resolve_uncancelled(
        &self,
        distribution: Distribution,
        spec: &VersionSpec,
        libraries: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ResolvedLibrary>, ResolveError> {
        let client = self.client(distribution)?;
        let snapshot = self.catalog(distribution, &client, false).await?;
        let release = pin(&snapshot, spec)?;
        if libraries.is_empty() {
            return Ok(BTreeMap::new());
        }

        let required = expand(release, libraries)?;
        info!(version = %release.version, libraries = required.len(), "resolving framework libraries");

        let fetches = required
            .iter()
            .map(|(name, entry)| self.library(&client, release, name, entry));
        let resolved = try_join_all(fetches).await?;
        Ok(resolved.into_iter().map(|lib| (lib.library_name.clone(), lib)).collect())
    }

    /// Pin `spec` to a release without installing anything
    ///
    /// # Errors
    ///
    /// Returns error if the catalog is unavailable or nothing matches
    pub async fn pin_version(&self, distribution: Distribution, spec: &VersionSpec) -> Result<Version, ResolveError> {
        self.ensure_active()?;
        let client = self.client(distribution)?;
        let snapshot = self.catalog(distribution, &client, false).await?;
        Ok(pin(&snapshot, spec)?.version.clone())
    }

    /// Re-fetch a distribution's catalog regardless of its age
    ///
    /// Resolutions already holding the previous snapshot keep using it. A
    /// catalog load already in flight for the distribution is joined instead.
    ///
    /// # Errors
    ///
    /// Returns error if the catalog cannot be fetched
    pub async fn refresh_catalog(&self, distribution: Distribution) -> Result<Arc<CatalogSnapshot>, ResolveError> {
        self.ensure_active()?;
        let client = self.client(distribution)?;
        self.catalog(distribution, &client, true).await
    }

    fn client(&self, distribution: Distribution) -> Result<Arc<dyn CatalogClient>, ResolveError> {
        self.clients
            .get(&distribution)
            .cloned()
            .ok_or(ResolveError::UnknownDistribution { distribution })
    }

    fn ensure_active(&self) -> Result<(), ResolveError> {
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }

    async fn catalog(
        &self,
        distribution: Distribution,
        client: &Arc<dyn CatalogClient>,
        force: bool,
    ) -> Result<Arc<CatalogSnapshot>, ResolveError> {
        let max_age = self.store.config().catalog_max_age();
        if !force {
            let catalogs = self.catalogs.read().await;
            if let Some(snapshot) = catalogs.get(&distribution) {
                if self.config.offline || snapshot.is_fresh(max_age, Utc::now()) {
                    return Ok(Arc::clone(snapshot));
                }
            }
        }

        let loader = CatalogLoader {
            distribution,
            client: Arc::clone(client),
            store: Arc::clone(&self.store),
            retry: self.config.retry.clone(),
            offline: self.config.offline,
            max_age,
            force,
        };
        let snapshot = self
            .catalog_flights
            .run(distribution, move || loader.load())
            .await?;

        self.catalogs
            .write()
            .await
            .insert(distribution, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn library(
        &self,
        client: &Arc<dyn CatalogClient>,
        release: &FrameworkVersion,
        name: &str,
        entry: &LibraryManifestEntry,
    ) -> Result<ResolvedLibrary, ResolveError> {
        let key = LibraryKey::new(release.distribution, release.version.clone(), name)
            .map_err(|_| ResolveError::InvalidLibraryName { name: name.to_string() })?;

        let fetch = LibraryFetch {
            key: key.clone(),
            entry: entry.clone(),
            client: Arc::clone(client),
            store: Arc::clone(&self.store),
            permits: Arc::clone(&self.permits),
            cancel: self.cancel.clone(),
            retry: self.config.retry.clone(),
            offline: self.config.offline,
        };
        self.library_flights.run(key, move || fetch.run()).await
    }
}

#[async_trait]
impl LibraryResolver for FrameworkResolver {
    async fn resolve_libraries(
        &self,
        distribution: Distribution,
        spec: &VersionSpec,
        libraries: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ResolvedLibrary>, ResolveError> {
        self.resolve(distribution, spec, libraries).await
    }
}

/// Select the release `spec` resolves to
fn pin<'a>(snapshot: &'a CatalogSnapshot, spec: &VersionSpec) -> Result<&'a FrameworkVersion, ResolveError> {
    let no_match = || ResolveError::NoMatchingVersion {
        distribution: snapshot.distribution,
        specifier: spec.to_string(),
    };
    let version = spec.select(snapshot.version_numbers()).ok_or_else(no_match)?;
    let release = snapshot.release(&version).ok_or_else(no_match)?;
    debug!(%spec, %version, "version pinned");
    Ok(release)
}

/// Close `roots` over the release's dependency lists
fn expand<'a>(
    release: &'a FrameworkVersion,
    roots: &BTreeSet<String>,
) -> Result<BTreeMap<&'a str, &'a LibraryManifestEntry>, ResolveError> {
    let mut required = BTreeMap::new();
    let mut pending: Vec<&str> = roots.iter().map(String::as_str).collect();

    while let Some(name) = pending.pop() {
        if required.contains_key(name) {
            continue;
        }
        let (name, entry) = release
            .available_libraries
            .get_key_value(name)
            .ok_or_else(|| ResolveError::UnknownLibrary {
                distribution: release.distribution,
                library: name.to_string(),
                version: release.version.clone(),
            })?;
        pending.extend(entry.dependencies.iter().map(String::as_str));
        required.insert(name.as_str(), entry);
    }
    Ok(required)
}

/// Catalog retrieval run inside a single flight
struct CatalogLoader {
    distribution: Distribution,
    client: Arc<dyn CatalogClient>,
    store: Arc<CacheStore>,
    retry: RetryPolicy,
    offline: bool,
    max_age: Duration,
    force: bool,
}

impl CatalogLoader {
    async fn load(self) -> Result<Arc<CatalogSnapshot>, ResolveError> {
        let cached = if self.force {
            None
        } else {
            self.store.read_catalog(self.distribution).await?
        };
        if let Some(cached) = cached {
            if self.offline || cached.is_fresh(self.max_age, Utc::now()) {
                debug!(distribution = %self.distribution, fetched_at = %cached.fetched_at, "using cached catalog");
                return Ok(Arc::new(cached));
            }
            debug!(distribution = %self.distribution, "cached catalog is stale");
        }

        if self.offline {
            return Err(ResolveError::Offline {
                what: format!("{} catalog", self.distribution),
            });
        }

        let what = format!("{} catalog", self.distribution);
        let versions = retry(&self.retry, &what, || self.client.fetch_catalog())
            .await
            .map_err(|source| ResolveError::Fetch {
                what: what.clone(),
                source,
            })?;

        let snapshot = CatalogSnapshot::new(self.distribution, versions);
        self.store.write_catalog(&snapshot).await?;
        info!(distribution = %self.distribution, versions = snapshot.versions.len(), "catalog fetched");
        Ok(Arc::new(snapshot))
    }
}

/// Cache-or-fetch of one library run inside a single flight
struct LibraryFetch {
    key: LibraryKey,
    entry: LibraryManifestEntry,
    client: Arc<dyn CatalogClient>,
    store: Arc<CacheStore>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    retry: RetryPolicy,
    offline: bool,
}

impl LibraryFetch {
    async fn run(self) -> Result<ResolvedLibrary, ResolveError> {
        let cached = self.store.entry(&self.key).await?;
        match cached.lookup().await {
            Ok(Some(hit)) if hit.integrity == self.entry.integrity => return Ok(hit),
            Ok(Some(hit)) => {
                warn!(
                    key = %self.key,
                    cached = %hit.integrity,
                    published = %self.entry.integrity,
                    "cached library differs from the release manifest, fetching again"
                );
                cached.remove().await?;
            }
            Ok(None) => {}
            Err(StoreError::Corrupted { key, reason }) => {
                warn!(%key, %reason, "corrupted cache entry, fetching again");
                cached.remove().await?;
            }
            Err(e) => return Err(e.into()),
        }

        if self.offline {
            return Err(ResolveError::Offline {
                what: self.key.to_string(),
            });
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ResolveError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => permit.map_err(|_| ResolveError::Cancelled)?,
        };

        let what = self.key.to_string();
        let artifact = retry(&self.retry, &what, || {
            self.client
                .fetch_library(&self.key.version, &self.key.library, &self.entry)
        })
        .await
        .map_err(|source| ResolveError::Fetch {
            what: what.clone(),
            source,
        })?;

        let resolved = cached
            .install(&artifact.bytes, &self.entry.integrity, &self.entry.dependencies)
            .await?;
        info!(key = %self.key, size = artifact.bytes.len(), "library installed");
        Ok(resolved)
    }
}
