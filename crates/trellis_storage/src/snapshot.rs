//! Catalog snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trellis_core::{Distribution, FrameworkVersion, Version};

/// Versions of one distribution as fetched at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    /// Distribution the catalog describes
    pub distribution: Distribution,
    /// When the catalog was fetched
    pub fetched_at: DateTime<Utc>,
    /// Released versions with their manifests
    pub versions: Vec<FrameworkVersion>,
}

impl CatalogSnapshot {
    /// Create a snapshot fetched now
    #[must_use]
    pub fn new(distribution: Distribution, versions: Vec<FrameworkVersion>) -> Self {
        Self::fetched_at(distribution, versions, Utc::now())
    }

    /// Create a snapshot with an explicit fetch time
    #[must_use]
    pub fn fetched_at(distribution: Distribution, mut versions: Vec<FrameworkVersion>, fetched_at: DateTime<Utc>) -> Self {
        versions.sort_by(|a, b| a.version.cmp(&b.version));
        versions.dedup_by(|a, b| a.version == b.version);
        Self {
            distribution,
            fetched_at,
            versions,
        }
    }

    /// Whether the snapshot is younger than `max_age` at `now`
    #[must_use]
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now.signed_duration_since(self.fetched_at) < max_age,
            Err(_) => true,
        }
    }

    /// All released versions, ascending
    pub fn version_numbers(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter().map(|v| &v.version)
    }

    /// Manifest of one release
    #[must_use]
    pub fn release(&self, version: &Version) -> Option<&FrameworkVersion> {
        self.versions
            .binary_search_by(|v| v.version.cmp(version))
            .ok()
            .map(|idx| &self.versions[idx])
    }
}
