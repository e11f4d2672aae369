//! Framework libraries implied by project type.

use crate::node::ProjectType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default name of the framework core library
pub const DEFAULT_CORE_LIBRARY: &str = "fw.core";

/// Mapping from project type to the framework libraries it always needs
///
/// By default only applications imply a library: the framework core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryPolicy {
    implied: BTreeMap<ProjectType, Vec<String>>,
}

impl Default for LibraryPolicy {
    fn default() -> Self {
        Self::empty().with_core_library(DEFAULT_CORE_LIBRARY)
    }
}

impl LibraryPolicy {
    /// Policy implying nothing for any type
    #[must_use]
    pub fn empty() -> Self {
        Self {
            implied: BTreeMap::new(),
        }
    }

    /// Make applications imply `name` as their core library
    #[must_use]
    pub fn with_core_library(self, name: impl Into<String>) -> Self {
        self.with_implied(ProjectType::Application, [name.into()])
    }

    /// Set the libraries implied by `project_type`
    #[must_use]
    pub fn with_implied<I, S>(mut self, project_type: ProjectType, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let libraries: Vec<String> = libraries.into_iter().map(Into::into).collect();
        if libraries.is_empty() {
            self.implied.remove(&project_type);
        } else {
            self.implied.insert(project_type, libraries);
        }
        self
    }

    /// Libraries implied by `project_type`
    #[must_use]
    pub fn implied(&self, project_type: ProjectType) -> &[String] {
        self.implied.get(&project_type).map(Vec::as_slice).unwrap_or_default()
    }
}
