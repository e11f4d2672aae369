//! Catalog and resolution records shared by the cache and the resolver.

use crate::distribution::Distribution;
use crate::error::{CoreError, CoreResult};
use crate::integrity::Integrity;
use crate::version::Version;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Manifest entry for one library of a framework release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryManifestEntry {
    /// Download location, absolute URL or relative to the distribution base
    pub location: String,
    /// Integrity of the artifact behind `location`
    pub integrity: Integrity,
    /// Libraries this one needs at runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl LibraryManifestEntry {
    /// Create a new manifest entry
    #[must_use]
    pub fn new(location: impl Into<String>, integrity: Integrity) -> Self {
        Self {
            location: location.into(),
            integrity,
            dependencies: Vec::new(),
        }
    }

    /// Set runtime dependencies
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// One released version of a distribution and the libraries it ships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkVersion {
    /// Distribution the release belongs to
    pub distribution: Distribution,
    /// Release version
    pub version: Version,
    /// Library name to manifest entry
    pub available_libraries: IndexMap<String, LibraryManifestEntry>,
}

impl FrameworkVersion {
    /// Create a release without libraries
    #[must_use]
    pub fn new(distribution: Distribution, version: Version) -> Self {
        Self {
            distribution,
            version,
            available_libraries: IndexMap::new(),
        }
    }

    /// Add a library entry
    #[must_use]
    pub fn with_library(mut self, name: impl Into<String>, entry: LibraryManifestEntry) -> Self {
        self.available_libraries.insert(name.into(), entry);
        self
    }
}

/// Cache key of an installed library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryKey {
    /// Distribution
    pub distribution: Distribution,
    /// Pinned version
    pub version: Version,
    /// Library name
    pub library: String,
}

impl LibraryKey {
    /// Create a key, checking the library name is usable as a path segment
    ///
    /// # Errors
    ///
    /// Returns error if the name is empty, `.`/`..`, or contains characters
    /// other than ASCII alphanumerics, `.`, `-` and `_`
    pub fn new(distribution: Distribution, version: Version, library: impl Into<String>) -> CoreResult<Self> {
        let library = library.into();
        let valid_chars = library
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if library.is_empty() || library == "." || library == ".." || !valid_chars {
            return Err(CoreError::InvalidLibraryName { name: library });
        }
        Ok(Self {
            distribution,
            version,
            library,
        })
    }
}

impl fmt::Display for LibraryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.distribution, self.version, self.library)
    }
}

/// A framework library installed in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLibrary {
    /// Distribution
    pub distribution: Distribution,
    /// Pinned version
    pub version: Version,
    /// Library name
    pub library_name: String,
    /// Location of the installed artifact
    pub installed_path: PathBuf,
    /// Verified integrity of the artifact
    pub integrity: Integrity,
    /// Runtime dependencies from the release manifest
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResolvedLibrary {
    /// Cache key of this library
    #[must_use]
    pub fn key(&self) -> LibraryKey {
        LibraryKey {
            distribution: self.distribution,
            version: self.version.clone(),
            library: self.library_name.clone(),
        }
    }
}
