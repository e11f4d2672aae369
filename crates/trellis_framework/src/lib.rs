//! TRELLIS Framework
//!
//! Resolves framework version specifiers against distribution catalogs and
//! installs the required libraries into the shared cache. Each library key is
//! fetched at most once at a time, however many resolutions ask for it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod flight;
pub mod http;
pub mod memory;
pub mod resolver;
pub mod retry;

pub use client::{CatalogClient, FetchError, LibraryArtifact};
pub use flight::SingleFlight;
pub use http::{EnterpriseClient, Endpoint, HttpTransport, OpenCoreClient};
pub use memory::MemoryCatalog;
pub use resolver::{FrameworkResolver, LibraryResolver, ResolveError, ResolverConfig};
pub use retry::{retry, RetryPolicy};
