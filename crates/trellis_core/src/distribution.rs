//! Framework distributions.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named source of framework releases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    /// Openly licensed subset of the framework
    #[default]
    OpenCore,
    /// Full enterprise distribution
    Enterprise,
}

impl Distribution {
    /// All known distributions
    pub const ALL: [Distribution; 2] = [Distribution::OpenCore, Distribution::Enterprise];

    /// Stable identifier, also used as the cache directory name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenCore => "open-core",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse a distribution name
    ///
    /// Accepts the identifier in any case, with `-`, `_` or no separator.
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown
    pub fn parse(s: &str) -> CoreResult<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "opencore" => Ok(Self::OpenCore),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(CoreError::UnknownDistribution {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distribution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
