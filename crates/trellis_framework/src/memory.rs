//! In-memory catalog client.
//!
//! Serves a fixed set of releases from memory and counts every request. Used
//! for tests and for offline fixtures.

use crate::client::{CatalogClient, FetchError, LibraryArtifact};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use trellis_core::{Distribution, FrameworkVersion, Integrity, LibraryManifestEntry, Version};

/// Catalog client backed by in-memory releases
pub struct MemoryCatalog {
    distribution: Distribution,
    releases: Mutex<Vec<FrameworkVersion>>,
    artifacts: Mutex<HashMap<(Version, String), Bytes>>,
    latency: Duration,
    transient_failures: AtomicU32,
    catalog_fetches: AtomicUsize,
    library_fetches: AtomicUsize,
}

impl MemoryCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new(distribution: Distribution) -> Self {
        Self {
            distribution,
            releases: Mutex::new(Vec::new()),
            artifacts: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            transient_failures: AtomicU32::new(0),
            catalog_fetches: AtomicUsize::new(0),
            library_fetches: AtomicUsize::new(0),
        }
    }

    /// Add an empty release
    #[must_use]
    pub fn with_release(self, version: Version) -> Self {
        self.release_entry(&version);
        self
    }

    /// Add a library to a release, creating the release if needed
    #[must_use]
    pub fn with_library(self, version: Version, name: &str, contents: &[u8], dependencies: &[&str]) -> Self {
        let integrity = Integrity::sha256(contents);
        let entry = LibraryManifestEntry::new(format!("memory://{}/{}", version, name), integrity)
            .with_dependencies(dependencies.iter().copied());
        self.add_library(version, name, entry, Bytes::copy_from_slice(contents));
        self
    }

    /// Add a library whose served bytes do not match its published integrity
    #[must_use]
    pub fn with_tampered_library(self, version: Version, name: &str, published: &[u8], served: &[u8]) -> Self {
        let entry = LibraryManifestEntry::new(format!("memory://{}/{}", version, name), Integrity::sha256(published));
        self.add_library(version, name, entry, Bytes::copy_from_slice(served));
        self
    }

    /// Delay every request by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` requests with a transient error
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Number of catalog requests served
    #[must_use]
    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }

    /// Number of library requests served
    #[must_use]
    pub fn library_fetches(&self) -> usize {
        self.library_fetches.load(Ordering::SeqCst)
    }

    fn add_library(&self, version: Version, name: &str, entry: LibraryManifestEntry, bytes: Bytes) {
        self.release_entry(&version);
        let mut releases = self.releases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(release) = releases.iter_mut().find(|r| r.version == version) {
            release.available_libraries.insert(name.to_string(), entry);
        }
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((version, name.to_string()), bytes);
    }

    fn release_entry(&self, version: &Version) {
        let mut releases = self.releases.lock().unwrap_or_else(PoisonError::into_inner);
        if !releases.iter().any(|r| &r.version == version) {
            releases.push(FrameworkVersion::new(self.distribution, version.clone()));
        }
    }

    async fn simulate(&self, what: &str) -> Result<(), FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Status {
                url: format!("memory://{}", what),
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    fn distribution(&self) -> Distribution {
        self.distribution
    }

    async fn fetch_catalog(&self) -> Result<Vec<FrameworkVersion>, FetchError> {
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate("catalog").await?;
        Ok(self.releases.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn fetch_library(
        &self,
        version: &Version,
        library: &str,
        entry: &LibraryManifestEntry,
    ) -> Result<LibraryArtifact, FetchError> {
        self.library_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate(&entry.location).await?;
        let bytes = self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(version.clone(), library.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                what: format!("{} {}", library, version),
            })?;
        Ok(LibraryArtifact {
            bytes,
            integrity: entry.integrity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_registered_libraries() {
        let catalog = MemoryCatalog::new(Distribution::OpenCore)
            .with_library(Version::new(1, 70, 0), "fw.core", b"core", &[])
            .with_library(Version::new(1, 70, 0), "fw.m", b"m", &["fw.core"])
            .with_release(Version::new(1, 71, 0));

        let releases = catalog.fetch_catalog().await.unwrap();
        assert_eq!(releases.len(), 2);
        let release = &releases[0];
        assert_eq!(release.available_libraries["fw.m"].dependencies, vec!["fw.core"]);

        let artifact = catalog
            .fetch_library(&release.version, "fw.core", &release.available_libraries["fw.core"])
            .await
            .unwrap();
        assert!(artifact.integrity.matches(&artifact.bytes));
        assert_eq!(catalog.catalog_fetches(), 1);
        assert_eq!(catalog.library_fetches(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let catalog = MemoryCatalog::new(Distribution::Enterprise).with_release(Version::new(2, 0, 0));
        catalog.fail_transiently(1);

        let err = catalog.fetch_catalog().await.unwrap_err();
        assert!(err.is_transient());
        assert!(catalog.fetch_catalog().await.is_ok());
    }
}
