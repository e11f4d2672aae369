//! HTTP catalog clients.
//!
//! Open-core publishes a version index and one manifest per release:
//!
//! ```text
//! <base>/versions.json            {"versions": ["1.70.0", ...]}
//! <base>/<version>/manifest.json  {"libraries": {"fw.core": {...}}}
//! ```
//!
//! Enterprise publishes a single authenticated catalog:
//!
//! ```text
//! <base>/catalog.json             {"releases": [{"version": "...", "libraries": {...}}]}
//! ```
//!
//! Relative library locations resolve against the document that lists them.

use crate::client::{CatalogClient, FetchError, LibraryArtifact};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use trellis_core::{Distribution, FrameworkVersion, LibraryManifestEntry, Version};
use url::Url;

/// Manifests fetched concurrently while building the open-core catalog
const MANIFEST_CONCURRENCY: usize = 8;

/// Location of a distribution's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Base URL all catalog paths are relative to
    pub base_url: Url,
    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Endpoint {
    /// Create an endpoint with the default request timeout
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Shared HTTP plumbing of the catalog clients
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
}

impl HttpTransport {
    /// Create a transport for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(endpoint: &Endpoint) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.request_timeout_secs))
            .user_agent(concat!("trellis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport {
                url: endpoint.base_url.to_string(),
                reason: e.to_string(),
                transient: false,
            })?;

        let mut base = endpoint.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            token: None,
        })
    }

    /// Authenticate requests to the endpoint's origin with a bearer token
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Base URL, always ending in `/`
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Whether a request to `url` carries the token
    ///
    /// Only URLs on the endpoint's own origin are authenticated; artifacts
    /// hosted elsewhere are fetched anonymously.
    #[must_use]
    pub fn authorizes(&self, url: &Url) -> bool {
        self.token.is_some() && url.origin() == self.base.origin()
    }

    /// Resolve `location` against `relative_to`
    ///
    /// # Errors
    ///
    /// Returns error if the result is not a valid URL
    pub fn resolve(&self, relative_to: &Url, location: &str) -> Result<Url, FetchError> {
        relative_to.join(location).map_err(|e| FetchError::Decode {
            url: relative_to.to_string(),
            reason: format!("invalid location '{}': {}", location, e),
        })
    }

    /// GET a JSON document
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-success status or malformed body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        let response = self.send(url).await?;
        response.json::<T>().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET raw bytes
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-success status
    pub async fn get_bytes(&self, url: &Url) -> Result<Bytes, FetchError> {
        let response = self.send(url).await?;
        response.bytes().await.map_err(|e| transport_error(url, &e))
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        debug!(%url, "GET");
        let mut request = self.client.get(url.clone());
        if let Some(token) = self.token.as_ref().filter(|_| self.authorizes(url)) {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request.send().await.map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { what: url.to_string() });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport_error(url: &Url, err: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        reason: err.to_string(),
        transient: err.is_timeout() || err.is_connect() || err.is_request() || err.is_body(),
    }
}

#[derive(Debug, Deserialize)]
struct VersionIndex {
    versions: Vec<Version>,
}

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    #[serde(default)]
    libraries: IndexMap<String, LibraryManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogIndex {
    releases: Vec<CatalogRelease>,
}

#[derive(Debug, Deserialize)]
struct CatalogRelease {
    version: Version,
    #[serde(default)]
    libraries: IndexMap<String, LibraryManifestEntry>,
}

/// Rewrite relative locations against `base` so artifacts can be fetched
/// without knowing which document listed them
fn absolutize(
    transport: &HttpTransport,
    base: &Url,
    libraries: IndexMap<String, LibraryManifestEntry>,
) -> Result<IndexMap<String, LibraryManifestEntry>, FetchError> {
    libraries
        .into_iter()
        .map(|(name, mut entry)| {
            entry.location = transport.resolve(base, &entry.location)?.to_string();
            Ok((name, entry))
        })
        .collect()
}

async fn download(
    transport: &HttpTransport,
    version: &Version,
    library: &str,
    entry: &LibraryManifestEntry,
) -> Result<LibraryArtifact, FetchError> {
    let url = transport.resolve(transport.base(), &entry.location)?;
    let bytes = transport.get_bytes(&url).await?;
    debug!(%library, %version, size = bytes.len(), "artifact downloaded");
    Ok(LibraryArtifact {
        bytes,
        integrity: entry.integrity,
    })
}

/// Client for the public open-core distribution
pub struct OpenCoreClient {
    transport: HttpTransport,
}

impl OpenCoreClient {
    /// Create a client for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(endpoint: &Endpoint) -> Result<Self, FetchError> {
        Ok(Self {
            transport: HttpTransport::new(endpoint)?,
        })
    }

    async fn fetch_release(&self, version: Version) -> Result<FrameworkVersion, FetchError> {
        let release_base = self.transport.resolve(self.transport.base(), &format!("{}/", version))?;
        let manifest_url = self.transport.resolve(&release_base, "manifest.json")?;
        let manifest: ReleaseManifest = self.transport.get_json(&manifest_url).await?;
        Ok(FrameworkVersion {
            distribution: Distribution::OpenCore,
            version,
            available_libraries: absolutize(&self.transport, &release_base, manifest.libraries)?,
        })
    }
}

#[async_trait]
impl CatalogClient for OpenCoreClient {
    fn distribution(&self) -> Distribution {
        Distribution::OpenCore
    }

    async fn fetch_catalog(&self) -> Result<Vec<FrameworkVersion>, FetchError> {
        let index_url = self.transport.resolve(self.transport.base(), "versions.json")?;
        let index: VersionIndex = self.transport.get_json(&index_url).await?;
        debug!(versions = index.versions.len(), "open-core version index fetched");

        stream::iter(index.versions)
            .map(|version| self.fetch_release(version))
            .buffer_unordered(MANIFEST_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn fetch_library(
        &self,
        version: &Version,
        library: &str,
        entry: &LibraryManifestEntry,
    ) -> Result<LibraryArtifact, FetchError> {
        download(&self.transport, version, library, entry).await
    }
}

/// Client for the authenticated enterprise distribution
pub struct EnterpriseClient {
    transport: HttpTransport,
}

impl EnterpriseClient {
    /// Create a client for `endpoint` authenticating with `token`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(endpoint: &Endpoint, token: SecretString) -> Result<Self, FetchError> {
        Ok(Self {
            transport: HttpTransport::new(endpoint)?.with_token(token),
        })
    }
}

#[async_trait]
impl CatalogClient for EnterpriseClient {
    fn distribution(&self) -> Distribution {
        Distribution::Enterprise
    }

    async fn fetch_catalog(&self) -> Result<Vec<FrameworkVersion>, FetchError> {
        let catalog_url = self.transport.resolve(self.transport.base(), "catalog.json")?;
        let catalog: CatalogIndex = self.transport.get_json(&catalog_url).await?;
        debug!(releases = catalog.releases.len(), "enterprise catalog fetched");

        catalog
            .releases
            .into_iter()
            .map(|release| {
                Ok(FrameworkVersion {
                    distribution: Distribution::Enterprise,
                    version: release.version,
                    available_libraries: absolutize(&self.transport, &catalog_url, release.libraries)?,
                })
            })
            .collect()
    }

    async fn fetch_library(
        &self,
        version: &Version,
        library: &str,
        entry: &LibraryManifestEntry,
    ) -> Result<LibraryArtifact, FetchError> {
        download(&self.transport, version, library, entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> Endpoint {
        Endpoint::new(Url::parse(base).unwrap())
    }

    #[test]
    fn test_base_gets_trailing_slash() {
        let transport = HttpTransport::new(&endpoint("https://cdn.example/framework")).unwrap();
        assert_eq!(transport.base().as_str(), "https://cdn.example/framework/");
    }

    #[test]
    fn test_relative_locations_are_absolutized() {
        let transport = HttpTransport::new(&endpoint("https://cdn.example/framework/")).unwrap();
        let release_base = transport.resolve(transport.base(), "1.70.0/").unwrap();
        let entry = LibraryManifestEntry::new("fw/core.tgz", trellis_core::Integrity::sha256(b"core"));
        let mut libraries = IndexMap::new();
        libraries.insert("fw.core".to_string(), entry);

        let resolved = absolutize(&transport, &release_base, libraries).unwrap();
        assert_eq!(
            resolved["fw.core"].location,
            "https://cdn.example/framework/1.70.0/fw/core.tgz"
        );
    }

    #[test]
    fn test_absolute_locations_are_kept() {
        let transport = HttpTransport::new(&endpoint("https://cdn.example/")).unwrap();
        let url = transport
            .resolve(transport.base(), "https://mirror.example/fw/core.tgz")
            .unwrap();
        assert_eq!(url.as_str(), "https://mirror.example/fw/core.tgz");
    }

    #[test]
    fn test_token_stays_on_endpoint_origin() {
        let anonymous = HttpTransport::new(&endpoint("https://repo.example/enterprise/")).unwrap();
        let transport = HttpTransport::new(&endpoint("https://repo.example/enterprise/"))
            .unwrap()
            .with_token(SecretString::from("secret".to_string()));

        let catalog = transport.resolve(transport.base(), "catalog.json").unwrap();
        let artifact = transport.resolve(&catalog, "/other/fw/core.tgz").unwrap();
        let mirror = transport
            .resolve(&catalog, "https://mirror.example/fw/core.tgz")
            .unwrap();
        let downgraded = transport
            .resolve(&catalog, "http://repo.example/enterprise/fw/core.tgz")
            .unwrap();

        assert!(transport.authorizes(&catalog));
        assert!(transport.authorizes(&artifact));
        assert!(!transport.authorizes(&mirror));
        assert!(!transport.authorizes(&downgraded));
        assert!(!anonymous.authorizes(&catalog));
    }

    #[test]
    fn test_documents_decode() {
        let index: VersionIndex = serde_json::from_str(r#"{"versions": ["1.70.0", "1.71.0"]}"#).unwrap();
        assert_eq!(index.versions.len(), 2);

        let integrity = trellis_core::Integrity::sha256(b"core");
        let catalog: CatalogIndex = serde_json::from_value(serde_json::json!({
            "releases": [{
                "version": "2.0.0",
                "libraries": {
                    "fw.core": {"location": "2.0.0/core.tgz", "integrity": integrity.to_string()}
                }
            }]
        }))
        .unwrap();
        assert_eq!(catalog.releases[0].libraries["fw.core"].integrity, integrity);
    }

    #[test]
    fn test_endpoint_default_timeout() {
        let parsed: Endpoint = serde_json::from_str(r#"{"baseUrl": "https://cdn.example/"}"#).unwrap();
        assert_eq!(parsed.request_timeout_secs, 60);
    }
}
