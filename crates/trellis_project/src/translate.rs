//! Translators: sources of raw project trees.
//!
//! [`StaticTranslator`] reads a JSON descriptor in one of two shapes.
//! The flat form lists every node with its dependency ids:
//!
//! ```json
//! {"root": "app", "nodes": [{"id": "app", "path": ".", "type": "application",
//!   "specVersion": "3.0", "dependencyIds": ["lib"]}, ...]}
//! ```
//!
//! The nested form spells dependencies out inline; a dependency may also be
//! a bare id referring to a node declared elsewhere in the document:
//!
//! ```json
//! {"id": "app", "type": "application", "specVersion": "3.0",
//!  "dependencies": [{"id": "lib", "type": "library", "specVersion": "2.6"}]}
//! ```
//!
//! Relative paths are resolved against the descriptor's directory.

use crate::node::{ProjectType, RawNode, RawTree, empty_object};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Translator error
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// Descriptor could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// Descriptor path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Descriptor is not a valid project tree
    #[error("Invalid project descriptor {origin}: {reason}")]
    Parse {
        /// Descriptor path, or `<inline>`
        origin: String,
        /// What is wrong
        reason: String,
    },
}

/// Produces the raw project tree
#[async_trait]
pub trait Translator: Send + Sync {
    /// Discover the root project and everything it depends on
    ///
    /// # Errors
    ///
    /// Returns error if the projects cannot be read
    async fn translate(&self) -> Result<RawTree, TranslateError>;
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline(Value),
}

/// Translator backed by a JSON descriptor
#[derive(Debug, Clone)]
pub struct StaticTranslator {
    source: Source,
    base_dir: PathBuf,
}

impl StaticTranslator {
    /// Read the descriptor at `path`
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            source: Source::File(path),
            base_dir,
        }
    }

    /// Use an in-memory descriptor; relative paths resolve against `base_dir`
    #[must_use]
    pub fn from_value(descriptor: Value, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Inline(descriptor),
            base_dir: base_dir.into(),
        }
    }

    /// Directory relative paths are resolved against
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn origin(&self) -> String {
        match &self.source {
            Source::File(path) => path.display().to_string(),
            Source::Inline(_) => "<inline>".to_string(),
        }
    }

    fn parse_error(&self, reason: impl Into<String>) -> TranslateError {
        TranslateError::Parse {
            origin: self.origin(),
            reason: reason.into(),
        }
    }

    fn lower(&self, descriptor: Descriptor) -> Result<RawTree, TranslateError> {
        let mut tree = match descriptor {
            Descriptor::Flat(tree) => tree,
            Descriptor::Nested(root) => flatten(root),
        };
        if tree.root.is_empty() {
            return Err(self.parse_error("root id is empty"));
        }
        if let Some(node) = tree.nodes.iter().find(|n| n.id.is_empty()) {
            return Err(self.parse_error(format!("node at '{}' has an empty id", node.path.display())));
        }
        for node in &mut tree.nodes {
            if node.path.is_relative() {
                node.path = self.base_dir.join(&node.path);
            }
        }
        Ok(tree)
    }
}

#[async_trait]
impl Translator for StaticTranslator {
    async fn translate(&self) -> Result<RawTree, TranslateError> {
        let descriptor: Descriptor = match &self.source {
            Source::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|source| TranslateError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_slice(&bytes).map_err(|e| self.parse_error(e.to_string()))?
            }
            Source::Inline(value) => {
                Descriptor::deserialize(value).map_err(|e| self.parse_error(e.to_string()))?
            }
        };
        let tree = self.lower(descriptor)?;
        debug!(origin = %self.origin(), root = %tree.root, nodes = tree.nodes.len(), "descriptor translated");
        Ok(tree)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Descriptor {
    Flat(RawTree),
    Nested(NestedNode),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NestedNode {
    id: String,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(rename = "type")]
    project_type: ProjectType,
    spec_version: String,
    #[serde(default = "empty_object")]
    configuration: Value,
    #[serde(default)]
    dependencies: Vec<NestedDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NestedDependency {
    Reference(String),
    Inline(NestedNode),
}

/// Flatten a nested descriptor, parents before their dependencies
fn flatten(root: NestedNode) -> RawTree {
    let root_id = root.id.clone();
    let mut nodes = Vec::new();
    let mut stack = vec![root];

    while let Some(nested) = stack.pop() {
        let mut dependency_ids = Vec::with_capacity(nested.dependencies.len());
        let mut inline = Vec::new();
        for dependency in nested.dependencies {
            match dependency {
                NestedDependency::Reference(id) => dependency_ids.push(id),
                NestedDependency::Inline(node) => {
                    dependency_ids.push(node.id.clone());
                    inline.push(node);
                }
            }
        }
        stack.extend(inline.into_iter().rev());

        let path = nested.path.unwrap_or_else(|| PathBuf::from(&nested.id));
        nodes.push(
            RawNode::new(nested.id, nested.project_type, nested.spec_version)
                .with_path(path)
                .with_configuration(nested.configuration)
                .with_dependencies(dependency_ids),
        );
    }

    RawTree::new(root_id, nodes)
}
