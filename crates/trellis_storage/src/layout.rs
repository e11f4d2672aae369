//! Directory layout of the cache.
//!
//! ```text
//! <root>/libraries/<distribution>/<version>/<library>/artifact
//! <root>/libraries/<distribution>/<version>/<library>/metadata.json
//! <root>/catalogs/<distribution>.json
//! <root>/.staging/<uuid>/
//! ```

use std::path::{Path, PathBuf};
use trellis_core::{Distribution, LibraryKey};

const LIBRARIES_DIR: &str = "libraries";
const CATALOGS_DIR: &str = "catalogs";
const STAGING_DIR: &str = ".staging";
const ARTIFACT_FILE: &str = "artifact";
const METADATA_FILE: &str = "metadata.json";

/// Path computations for a cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all installed libraries
    #[must_use]
    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join(LIBRARIES_DIR)
    }

    /// Directory of one installed library
    #[must_use]
    pub fn library_dir(&self, key: &LibraryKey) -> PathBuf {
        self.libraries_dir()
            .join(key.distribution.as_str())
            .join(key.version.to_string())
            .join(&key.library)
    }

    /// Artifact file inside a library (or staging) directory
    #[must_use]
    pub fn artifact_in(dir: &Path) -> PathBuf {
        dir.join(ARTIFACT_FILE)
    }

    /// Metadata record inside a library (or staging) directory
    #[must_use]
    pub fn metadata_in(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// Directory holding catalog snapshots
    #[must_use]
    pub fn catalogs_dir(&self) -> PathBuf {
        self.root.join(CATALOGS_DIR)
    }

    /// Catalog snapshot file of a distribution
    #[must_use]
    pub fn catalog_path(&self, distribution: Distribution) -> PathBuf {
        self.catalogs_dir().join(format!("{}.json", distribution.as_str()))
    }

    /// Staging area for in-progress writes
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Fresh, unique staging path
    #[must_use]
    pub fn new_staging_path(&self) -> PathBuf {
        self.staging_dir().join(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Version;

    #[test]
    fn test_library_dir() {
        let layout = CacheLayout::new("/cache");
        let key = LibraryKey::new(Distribution::OpenCore, Version::new(1, 70, 5), "fw.core").unwrap();
        assert_eq!(
            layout.library_dir(&key),
            PathBuf::from("/cache/libraries/open-core/1.70.5/fw.core")
        );
        assert_eq!(
            CacheLayout::artifact_in(&layout.library_dir(&key)),
            PathBuf::from("/cache/libraries/open-core/1.70.5/fw.core/artifact")
        );
    }

    #[test]
    fn test_catalog_path() {
        let layout = CacheLayout::new("/cache");
        assert_eq!(
            layout.catalog_path(Distribution::Enterprise),
            PathBuf::from("/cache/catalogs/enterprise.json")
        );
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let layout = CacheLayout::new("/cache");
        let a = layout.new_staging_path();
        let b = layout.new_staging_path();
        assert_ne!(a, b);
        assert!(a.starts_with(layout.staging_dir()));
    }
}
