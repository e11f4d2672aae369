//! Project nodes, raw and preprocessed.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use trellis_core::{Distribution, Integrity, Version};

/// Kind of project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// Deployable application
    Application,
    /// Reusable library
    Library,
    /// Library providing themes
    ThemeLibrary,
    /// Plain module copied as-is
    Module,
    /// Component nested inside an application
    Subcomponent,
}

impl ProjectType {
    /// All project types
    pub const ALL: [ProjectType; 5] = [
        ProjectType::Application,
        ProjectType::Library,
        ProjectType::ThemeLibrary,
        ProjectType::Module,
        ProjectType::Subcomponent,
    ];

    /// Name used in descriptors
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Library => "library",
            Self::ThemeLibrary => "theme-library",
            Self::Module => "module",
            Self::Subcomponent => "subcomponent",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported configuration schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpecVersion {
    major: u8,
    minor: u8,
}

impl SpecVersion {
    /// Every supported version, ascending
    pub const SUPPORTED: [SpecVersion; 11] = [
        SpecVersion::new(0, 1),
        SpecVersion::new(1, 0),
        SpecVersion::new(1, 1),
        SpecVersion::new(2, 0),
        SpecVersion::new(2, 1),
        SpecVersion::new(2, 2),
        SpecVersion::new(2, 3),
        SpecVersion::new(2, 4),
        SpecVersion::new(2, 5),
        SpecVersion::new(2, 6),
        SpecVersion::new(3, 0),
    ];

    /// Newest supported version
    pub const LATEST: SpecVersion = SpecVersion::new(3, 0);

    /// Create a version; not checked against [`SpecVersion::SUPPORTED`]
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse a supported version such as `"2.6"`
    ///
    /// Returns `None` for anything malformed or unsupported.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|version| version.to_string() == s)
    }

    /// Major component
    #[must_use]
    pub const fn major(&self) -> u8 {
        self.major
    }

    /// Minor component
    #[must_use]
    pub const fn minor(&self) -> u8 {
        self.minor
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for SpecVersion {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("unsupported specVersion '{}'", s))
    }
}

impl From<SpecVersion> for String {
    fn from(version: SpecVersion) -> Self {
        version.to_string()
    }
}

/// Node as produced by a translator, before any checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    /// Project id, unique within the tree
    pub id: String,
    /// Where the project lives
    pub path: PathBuf,
    /// Project kind
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    /// Configuration schema version, unchecked
    pub spec_version: String,
    /// Project configuration
    #[serde(default = "empty_object")]
    pub configuration: Value,
    /// Ids of direct dependencies, in declaration order
    #[serde(default)]
    pub dependency_ids: Vec<String>,
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl RawNode {
    /// Create a node with an empty configuration and no dependencies
    #[must_use]
    pub fn new(id: impl Into<String>, project_type: ProjectType, spec_version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            path: PathBuf::from(&id),
            id,
            project_type,
            spec_version: spec_version.into(),
            configuration: empty_object(),
            dependency_ids: Vec::new(),
        }
    }

    /// Set the path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the configuration
    #[must_use]
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    /// Set the dependency ids
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Translator output: a root id and every node found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTree {
    /// Id of the root project
    pub root: String,
    /// Nodes in translator order; duplicates allowed
    pub nodes: Vec<RawNode>,
}

impl RawTree {
    /// Create a raw tree
    #[must_use]
    pub fn new(root: impl Into<String>, nodes: Vec<RawNode>) -> Self {
        Self {
            root: root.into(),
            nodes,
        }
    }
}

/// Where a preprocessed node came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeOrigin {
    /// Produced by a translator
    Project,
    /// Injected for a resolved framework library
    Framework {
        /// Distribution the library came from
        distribution: Distribution,
        /// Pinned framework version
        version: Version,
        /// Verified artifact integrity
        integrity: Integrity,
    },
}

/// Validated node of a [`crate::ProjectTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    /// Project id
    pub id: String,
    /// Project location; the installed artifact for framework nodes
    pub path: PathBuf,
    /// Project kind
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    /// Configuration schema version
    pub spec_version: SpecVersion,
    /// Validated configuration
    pub configuration: Value,
    /// Ids of direct dependencies, in declaration order, unique
    pub dependency_ids: Vec<String>,
    /// Framework libraries this project needs
    pub framework_libraries: IndexSet<String>,
    /// Node provenance
    pub origin: NodeOrigin,
}

impl ProjectNode {
    /// Whether the node was injected for a framework library
    #[must_use]
    pub fn is_framework(&self) -> bool {
        matches!(self.origin, NodeOrigin::Framework { .. })
    }
}
