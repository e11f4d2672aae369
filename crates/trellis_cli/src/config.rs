//! CLI configuration file.
//!
//! ```json
//! {
//!   "cache": {"root": ".trellis/framework", "catalogMaxAgeSecs": 86400},
//!   "resolver": {"maxConcurrentFetches": 8, "offline": false},
//!   "policy": {"implied": {"application": ["fw.core"]}},
//!   "distributions": {
//!     "open-core": {"baseUrl": "https://cdn.example/open-core/"},
//!     "enterprise": {"baseUrl": "https://repo.example/enterprise/"}
//!   }
//! }
//! ```

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_core::Distribution;
use trellis_framework::{EnterpriseClient, Endpoint, FrameworkResolver, OpenCoreClient, ResolverConfig};
use trellis_project::LibraryPolicy;
use trellis_storage::{CacheConfig, CacheStore};

/// Environment variable holding the enterprise catalog token
pub const ENTERPRISE_TOKEN_VAR: &str = "TRELLIS_ENTERPRISE_TOKEN";

/// Everything the CLI can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CliConfig {
    /// Framework cache
    pub cache: CacheConfig,
    /// Resolver limits and retries
    pub resolver: ResolverConfig,
    /// Libraries implied by project type
    pub policy: LibraryPolicy,
    /// Catalog endpoint per distribution
    pub distributions: BTreeMap<Distribution, Endpoint>,
}

impl CliConfig {
    /// Read the config at `path`, or use defaults when there is none
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = tokio::fs::read(path)
            .await
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("invalid config {}", path.display()))?;
        debug!(path = %path.display(), distributions = config.distributions.len(), "config loaded");
        Ok(config)
    }

    /// Build a resolver with a client for every configured distribution
    ///
    /// The enterprise client is only registered when `enterprise_token` is set.
    pub fn resolver(&self, store: Arc<CacheStore>, enterprise_token: Option<SecretString>) -> Result<FrameworkResolver> {
        let mut resolver = FrameworkResolver::new(store, self.resolver.clone());
        for (distribution, endpoint) in &self.distributions {
            match distribution {
                Distribution::OpenCore => {
                    let client = OpenCoreClient::new(endpoint).wrap_err("failed to set up the open-core client")?;
                    resolver.register(Arc::new(client));
                }
                Distribution::Enterprise => match &enterprise_token {
                    Some(token) => {
                        let client = EnterpriseClient::new(endpoint, token.clone())
                            .wrap_err("failed to set up the enterprise client")?;
                        resolver.register(Arc::new(client));
                    }
                    None => warn!(
                        variable = ENTERPRISE_TOKEN_VAR,
                        "enterprise catalog configured without a token, skipping"
                    ),
                },
            }
        }
        Ok(resolver)
    }
}

/// Enterprise token from the environment, if set and not empty
pub fn enterprise_token() -> Option<SecretString> {
    std::env::var(ENTERPRISE_TOKEN_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .map(SecretString::from)
}
