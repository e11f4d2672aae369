//! TRELLIS Core Types
//!
//! Pure value types shared by the cache, the framework resolver, and the
//! project preprocessor. Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod distribution;
pub mod error;
pub mod integrity;
pub mod version;

// Re-exports
pub use catalog::{FrameworkVersion, LibraryKey, LibraryManifestEntry, ResolvedLibrary};
pub use distribution::Distribution;
pub use error::{CoreError, CoreResult};
pub use integrity::{Integrity, IntegrityAlgorithm};
pub use version::{Version, VersionSpec};
