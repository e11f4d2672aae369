//! TRELLIS Storage
//!
//! Process-wide on-disk cache for framework library artifacts and catalog
//! snapshots. Entries are written to a staging area and promoted with a
//! rename, so readers never observe a partially written artifact.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod layout;
pub mod locks;
pub mod snapshot;
pub mod store;

pub use layout::CacheLayout;
pub use locks::{KeyGuard, KeyLocks};
pub use snapshot::CatalogSnapshot;
pub use store::{CacheConfig, CacheEntry, CacheStore, LibraryMetadata, StoreError, StoreStats};
