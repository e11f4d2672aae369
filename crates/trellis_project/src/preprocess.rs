//! Project tree preprocessing.
//!
//! Turns a translator's raw tree into a [`ProjectTree`]:
//!
//! 1. every node's spec version is checked;
//! 2. every configuration is validated, collecting all violations;
//! 3. the graph is walked from the root, rejecting cycles and dangling ids;
//! 4. framework libraries are derived per node and resolved in one request;
//! 5. resolved libraries are injected as nodes and the build order computed.
//!
//! Nothing is returned unless every step succeeds.

use crate::node::{NodeOrigin, ProjectNode, ProjectType, RawNode, RawTree, SpecVersion, empty_object};
use crate::policy::LibraryPolicy;
use crate::tree::{CycleError, ProjectTree};
use crate::validate::{ConfigValidator, StructuralValidator, ValidationReport};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use trellis_core::{Distribution, ResolvedLibrary, VersionSpec};
use trellis_framework::{LibraryResolver, ResolveError};

/// Preprocessing options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreprocessOptions {
    /// Distribution to use instead of the root's `framework.name`
    pub distribution: Option<Distribution>,
    /// Version specifier to use instead of the root's `framework.version`
    pub version: Option<String>,
    /// Libraries implied by project type
    pub policy: LibraryPolicy,
}

impl PreprocessOptions {
    /// Override the distribution
    #[must_use]
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// Override the version specifier
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the library policy
    #[must_use]
    pub fn with_policy(mut self, policy: LibraryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Preprocessing error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreprocessError {
    /// A node declares a spec version that is not supported
    #[error("Project '{node_id}' declares unsupported specVersion '{spec_version}'")]
    UnsupportedSpecVersion {
        /// Offending node
        node_id: String,
        /// Declared version
        spec_version: String,
    },

    /// One or more configurations are invalid
    #[error("Invalid project configuration ({} violations):\n{report}", .report.len())]
    Validation {
        /// Every violation found
        report: ValidationReport,
    },

    /// The dependency graph contains a cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A node depends on an id no translator produced
    #[error("Project '{from}' depends on unknown project '{to}'")]
    MissingDependency {
        /// Depending node
        from: String,
        /// Unknown id
        to: String,
    },

    /// The root id names no node
    #[error("Root project '{0}' is not part of the tree")]
    MissingRoot(String),

    /// The framework section of the root cannot be used
    #[error("Invalid framework configuration of '{node_id}': {reason}")]
    InvalidFramework {
        /// Node whose configuration was used
        node_id: String,
        /// What is wrong
        reason: String,
    },

    /// Framework libraries could not be resolved
    #[error("Framework resolution failed (required by {}): {cause}", .requested_by.join(", "))]
    Resolution {
        /// Nodes requiring the failing libraries
        requested_by: Vec<String>,
        /// Resolver failure
        cause: ResolveError,
    },
}

/// Project tree preprocessor
pub struct Preprocessor {
    validator: Arc<dyn ConfigValidator>,
    options: PreprocessOptions,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Create a preprocessor with the structural validator and default options
    #[must_use]
    pub fn new() -> Self {
        Self {
            validator: Arc::new(StructuralValidator::new()),
            options: PreprocessOptions::default(),
        }
    }

    /// Use another configuration validator
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ConfigValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Set options
    #[must_use]
    pub fn with_options(mut self, options: PreprocessOptions) -> Self {
        self.options = options;
        self
    }

    /// Options in use
    #[must_use]
    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// Preprocess `raw`, resolving framework libraries through `resolver`
    ///
    /// # Errors
    ///
    /// Returns the first structural failure (spec version, validation,
    /// cycle, dangling dependency) or the resolution failure; never a
    /// partial tree
    #[instrument(skip_all, fields(root = %raw.root, nodes = raw.nodes.len()))]
    pub async fn preprocess(
        &self,
        raw: RawTree,
        resolver: &dyn LibraryResolver,
    ) -> Result<ProjectTree, PreprocessError> {
        let root = raw.root;
        let raw_nodes = dedup(raw.nodes);
        if !raw_nodes.contains_key(&root) {
            return Err(PreprocessError::MissingRoot(root));
        }

        let spec_versions = check_spec_versions(&raw_nodes)?;
        self.validate(&raw_nodes, &spec_versions)?;

        let discovered = walk(&root, &raw_nodes)?;
        if discovered.len() < raw_nodes.len() {
            debug!(
                unreachable = raw_nodes.len() - discovered.len(),
                "dropping projects not reachable from the root"
            );
        }

        let mut nodes: IndexMap<String, ProjectNode> = IndexMap::with_capacity(discovered.len());
        for id in discovered {
            let raw_node = &raw_nodes[id.as_str()];
            let node = self.project_node(raw_node, spec_versions[id.as_str()]);
            nodes.insert(id, node);
        }

        let resolved = self.resolve_framework(&root, &nodes, resolver).await?;
        inject(&mut nodes, &resolved);

        let tree = ProjectTree::build(root, nodes)?;
        info!(
            nodes = tree.len(),
            framework_libraries = resolved.len(),
            "project tree preprocessed"
        );
        Ok(tree)
    }

    fn validate(
        &self,
        raw_nodes: &IndexMap<String, RawNode>,
        spec_versions: &HashMap<&str, SpecVersion>,
    ) -> Result<(), PreprocessError> {
        let mut report = ValidationReport::new();
        for node in raw_nodes.values() {
            let violations = self
                .validator
                .validate(&node.configuration, spec_versions[node.id.as_str()], node.project_type);
            report.add(&node.id, violations);
        }
        if report.is_empty() {
            Ok(())
        } else {
            Err(PreprocessError::Validation { report })
        }
    }

    fn project_node(&self, raw: &RawNode, spec_version: SpecVersion) -> ProjectNode {
        let dependency_ids: IndexSet<String> = raw.dependency_ids.iter().cloned().collect();
        let mut framework_libraries = declared_libraries(&raw.configuration);
        framework_libraries.extend(self.options.policy.implied(raw.project_type).iter().cloned());
        if !framework_libraries.is_empty() {
            debug!(project = %raw.id, libraries = ?framework_libraries, "framework libraries derived");
        }

        ProjectNode {
            id: raw.id.clone(),
            path: raw.path.clone(),
            project_type: raw.project_type,
            spec_version,
            configuration: raw.configuration.clone(),
            dependency_ids: dependency_ids.into_iter().collect(),
            framework_libraries,
            origin: NodeOrigin::Project,
        }
    }

    /// Resolve the union of all nodes' framework libraries
    async fn resolve_framework(
        &self,
        root: &str,
        nodes: &IndexMap<String, ProjectNode>,
        resolver: &dyn LibraryResolver,
    ) -> Result<BTreeMap<String, ResolvedLibrary>, PreprocessError> {
        let mut requested_by: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for node in nodes.values() {
            for library in &node.framework_libraries {
                requested_by.entry(library).or_default().push(node.id.clone());
            }
        }
        if requested_by.is_empty() {
            debug!("no framework libraries required");
            return Ok(BTreeMap::new());
        }

        let (distribution, spec) = self.framework_target(root, &nodes[root].configuration)?;
        let libraries: BTreeSet<String> = requested_by.keys().map(|l| l.to_string()).collect();
        info!(%distribution, %spec, libraries = libraries.len(), "resolving framework");

        resolver
            .resolve_libraries(distribution, &spec, &libraries)
            .await
            .map_err(|cause| {
                let requesters = match &cause {
                    ResolveError::UnknownLibrary { library, .. } => requested_by.get(library.as_str()).cloned(),
                    _ => None,
                };
                let requested_by = requesters.unwrap_or_else(|| {
                    let all: IndexSet<String> = requested_by.values().flatten().cloned().collect();
                    all.into_iter().collect()
                });
                PreprocessError::Resolution { requested_by, cause }
            })
    }

    /// Distribution and version: options first, then the root's
    /// `framework` section, then open-core at `latest`
    fn framework_target(
        &self,
        root: &str,
        configuration: &Value,
    ) -> Result<(Distribution, VersionSpec), PreprocessError> {
        let invalid = |reason: String| PreprocessError::InvalidFramework {
            node_id: root.to_string(),
            reason,
        };

        let distribution = match self.options.distribution {
            Some(distribution) => distribution,
            None => match configuration.pointer("/framework/name").and_then(Value::as_str) {
                Some(name) => Distribution::parse(name).map_err(|e| invalid(e.to_string()))?,
                None => Distribution::default(),
            },
        };

        let version = self
            .options
            .version
            .as_deref()
            .or_else(|| configuration.pointer("/framework/version").and_then(Value::as_str));
        let spec = match version {
            Some(version) => VersionSpec::parse(version).map_err(|e| invalid(e.to_string()))?,
            None => VersionSpec::Latest,
        };

        Ok((distribution, spec))
    }
}

/// Index nodes by id; the first occurrence of an id wins
fn dedup(nodes: Vec<RawNode>) -> IndexMap<String, RawNode> {
    let mut indexed = IndexMap::with_capacity(nodes.len());
    for node in nodes {
        if indexed.contains_key(&node.id) {
            debug!(project = %node.id, "ignoring duplicate project");
            continue;
        }
        indexed.insert(node.id.clone(), node);
    }
    indexed
}

fn check_spec_versions(raw_nodes: &IndexMap<String, RawNode>) -> Result<HashMap<&str, SpecVersion>, PreprocessError> {
    raw_nodes
        .values()
        .map(|node| match SpecVersion::parse(&node.spec_version) {
            Some(version) => Ok((node.id.as_str(), version)),
            None => Err(PreprocessError::UnsupportedSpecVersion {
                node_id: node.id.clone(),
                spec_version: node.spec_version.clone(),
            }),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first walk from `root` with an explicit stack
///
/// Returns node ids in discovery order. A node found on the current path is
/// a cycle; unmarked nodes are new, finished nodes are shared dependencies.
fn walk(root: &str, raw_nodes: &IndexMap<String, RawNode>) -> Result<Vec<String>, PreprocessError> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut discovered = vec![root.to_string()];
    let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
    marks.insert(root, Mark::InProgress);

    while let Some((id, next)) = stack.last_mut() {
        let deps = &raw_nodes[*id].dependency_ids;
        let Some(child) = deps.get(*next) else {
            marks.insert(*id, Mark::Done);
            stack.pop();
            continue;
        };
        *next += 1;
        let from = *id;

        match marks.get(child.as_str()) {
            None => {
                let Some((child_id, _)) = raw_nodes.get_key_value(child.as_str()) else {
                    return Err(PreprocessError::MissingDependency {
                        from: from.to_string(),
                        to: child.clone(),
                    });
                };
                marks.insert(child_id.as_str(), Mark::InProgress);
                discovered.push(child_id.clone());
                stack.push((child_id.as_str(), 0));
            }
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|(id, _)| *id == child.as_str()).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|(id, _)| id.to_string()).collect();
                path.push(child.clone());
                return Err(CycleError { path }.into());
            }
            Some(Mark::Done) => {}
        }
    }

    Ok(discovered)
}

/// Libraries named in `framework.libraries[].name` and `framework.themes[]`
fn declared_libraries(configuration: &Value) -> IndexSet<String> {
    let mut libraries = IndexSet::new();
    if let Some(entries) = configuration.pointer("/framework/libraries").and_then(Value::as_array) {
        let names = entries
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str));
        libraries.extend(names.map(str::to_string));
    }
    if let Some(themes) = configuration.pointer("/framework/themes").and_then(Value::as_array) {
        libraries.extend(themes.iter().filter_map(Value::as_str).map(str::to_string));
    }
    libraries
}

/// Add a node per resolved library and wire requesters to it
///
/// A project node whose id equals the library name satisfies the requirement
/// itself, and no node is injected for it.
fn inject(nodes: &mut IndexMap<String, ProjectNode>, resolved: &BTreeMap<String, ResolvedLibrary>) {
    for (name, library) in resolved {
        if nodes.contains_key(name) {
            debug!(library = %name, "framework library provided by a project");
            continue;
        }
        let node = ProjectNode {
            id: name.clone(),
            path: library.installed_path.clone(),
            project_type: ProjectType::Library,
            spec_version: SpecVersion::LATEST,
            configuration: empty_object(),
            dependency_ids: library.dependencies.clone(),
            framework_libraries: IndexSet::new(),
            origin: NodeOrigin::Framework {
                distribution: library.distribution,
                version: library.version.clone(),
                integrity: library.integrity,
            },
        };
        debug!(library = %name, version = %library.version, "injecting framework library");
        nodes.insert(name.clone(), node);
    }

    for node in nodes.values_mut() {
        let required: Vec<String> = node
            .framework_libraries
            .iter()
            .filter(|library| **library != node.id && !node.dependency_ids.contains(*library))
            .cloned()
            .collect();
        node.dependency_ids.extend(required);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use trellis_core::{Integrity, Version};

    /// Resolver answering from a fixed manifest: name -> dependencies
    struct FixedResolver {
        manifest: BTreeMap<String, Vec<String>>,
        requests: Mutex<Vec<(Distribution, String, BTreeSet<String>)>>,
    }

    impl FixedResolver {
        fn new(manifest: &[(&str, &[&str])]) -> Self {
            Self {
                manifest: manifest
                    .iter()
                    .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(Distribution, String, BTreeSet<String>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LibraryResolver for FixedResolver {
        async fn resolve_libraries(
            &self,
            distribution: Distribution,
            spec: &VersionSpec,
            libraries: &BTreeSet<String>,
        ) -> Result<BTreeMap<String, ResolvedLibrary>, ResolveError> {
            self.requests
                .lock()
                .unwrap()
                .push((distribution, spec.to_string(), libraries.clone()));
            let version = Version::new(1, 70, 5);
            let mut out = BTreeMap::new();
            let mut pending: Vec<String> = libraries.iter().cloned().collect();
            while let Some(name) = pending.pop() {
                if out.contains_key(&name) {
                    continue;
                }
                let deps = self.manifest.get(&name).cloned().ok_or_else(|| ResolveError::UnknownLibrary {
                    distribution,
                    library: name.clone(),
                    version: version.clone(),
                })?;
                pending.extend(deps.iter().cloned());
                out.insert(
                    name.clone(),
                    ResolvedLibrary {
                        distribution,
                        version: version.clone(),
                        library_name: name.clone(),
                        installed_path: PathBuf::from(format!("/cache/{}/artifact", name)),
                        integrity: Integrity::sha256(name.as_bytes()),
                        dependencies: deps,
                    },
                );
            }
            Ok(out)
        }
    }

    fn no_framework() -> FixedResolver {
        FixedResolver::new(&[])
    }

    fn lib(id: &str, deps: &[&str]) -> RawNode {
        RawNode::new(id, ProjectType::Library, "2.6")
            .with_configuration(json!({"metadata": {"name": id}}))
            .with_dependencies(deps.iter().copied())
    }

    fn app(id: &str, deps: &[&str], framework: Value) -> RawNode {
        RawNode::new(id, ProjectType::Application, "3.0")
            .with_configuration(json!({"metadata": {"name": id}, "framework": framework}))
            .with_dependencies(deps.iter().copied())
    }

    fn without_policy() -> Preprocessor {
        Preprocessor::new().with_options(PreprocessOptions::default().with_policy(LibraryPolicy::empty()))
    }

    #[tokio::test]
    async fn test_diamond_is_built_once() {
        let raw = RawTree::new(
            "app",
            vec![
                lib("app", &["left", "right"]),
                lib("left", &["base"]),
                lib("right", &["base"]),
                lib("base", &[]),
            ],
        );
        let tree = without_policy().preprocess(raw, &no_framework()).await.unwrap();

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.build_order(), &["base", "left", "right", "app"]);
        assert_eq!(tree.build_order().iter().filter(|id| *id == "base").count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_raw_nodes_keep_first() {
        let raw = RawTree::new(
            "app",
            vec![
                lib("app", &["dep"]),
                lib("dep", &[]).with_path("/first"),
                lib("dep", &[]).with_path("/second"),
            ],
        );
        let tree = without_policy().preprocess(raw, &no_framework()).await.unwrap();
        assert_eq!(tree.node("dep").unwrap().path, PathBuf::from("/first"));
    }

    #[tokio::test]
    async fn test_unsupported_spec_version_fails_fast() {
        let raw = RawTree::new(
            "app",
            vec![
                lib("app", &["old"]),
                RawNode::new("old", ProjectType::Library, "0.9").with_configuration(json!("not even an object")),
            ],
        );
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        assert_eq!(
            err,
            PreprocessError::UnsupportedSpecVersion {
                node_id: "old".to_string(),
                spec_version: "0.9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_violations_of_all_nodes_are_collected() {
        let raw = RawTree::new(
            "app",
            vec![
                lib("app", &["a", "b"]),
                RawNode::new("a", ProjectType::Library, "2.0").with_configuration(json!({"server": {}})),
                RawNode::new("b", ProjectType::Module, "2.0")
                    .with_configuration(json!({"metadata": {"name": "b"}, "customConfiguration": {}})),
            ],
        );
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        let PreprocessError::Validation { report } = err else {
            panic!("expected a validation error");
        };
        assert_eq!(report.for_node("a").len(), 2);
        assert_eq!(report.for_node("b").len(), 1);
        assert!(report.for_node("app").is_empty());
    }

    #[tokio::test]
    async fn test_cycle_path() {
        let raw = RawTree::new(
            "app",
            vec![lib("app", &["a"]), lib("a", &["b"]), lib("b", &["c"]), lib("c", &["a"])],
        );
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        assert_eq!(
            err,
            PreprocessError::Cycle(CycleError {
                path: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            })
        );
    }

    #[tokio::test]
    async fn test_self_dependency_is_a_cycle() {
        let raw = RawTree::new("app", vec![lib("app", &["app"])]);
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        assert!(matches!(err, PreprocessError::Cycle(c) if c.nodes() == ["app".to_string()]));
    }

    #[tokio::test]
    async fn test_missing_dependency_and_root() {
        let raw = RawTree::new("app", vec![lib("app", &["ghost"])]);
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        assert_eq!(
            err,
            PreprocessError::MissingDependency {
                from: "app".to_string(),
                to: "ghost".to_string()
            }
        );

        let raw = RawTree::new("nowhere", vec![lib("app", &[])]);
        let err = without_policy().preprocess(raw, &no_framework()).await.unwrap_err();
        assert_eq!(err, PreprocessError::MissingRoot("nowhere".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_nodes_are_dropped() {
        let raw = RawTree::new("app", vec![lib("app", &[]), lib("stray", &[])]);
        let tree = without_policy().preprocess(raw, &no_framework()).await.unwrap();
        assert!(!tree.contains("stray"));
    }

    #[tokio::test]
    async fn test_framework_libraries_are_injected() {
        let resolver = FixedResolver::new(&[
            ("fw.core", &[]),
            ("fw.m", &["fw.core"]),
            ("fw.theme.dark", &["fw.core"]),
        ]);
        let raw = RawTree::new(
            "app",
            vec![
                app(
                    "app",
                    &["widgets"],
                    json!({"name": "enterprise", "version": "^1.70.0", "themes": ["fw.theme.dark"]}),
                ),
                RawNode::new("widgets", ProjectType::Library, "2.6").with_configuration(json!({
                    "metadata": {"name": "widgets"},
                    "framework": {"name": "enterprise", "libraries": [{"name": "fw.m"}]}
                })),
            ],
        );
        let tree = Preprocessor::new().preprocess(raw, &resolver).await.unwrap();

        let requests = resolver.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Distribution::Enterprise);
        assert_eq!(requests[0].1, "^1.70.0");
        let wanted: Vec<&str> = requests[0].2.iter().map(String::as_str).collect();
        assert_eq!(wanted, vec!["fw.core", "fw.m", "fw.theme.dark"]);

        let app_node = tree.node("app").unwrap();
        assert_eq!(
            app_node.framework_libraries.iter().collect::<Vec<_>>(),
            vec!["fw.theme.dark", "fw.core"]
        );
        assert_eq!(app_node.dependency_ids, vec!["widgets", "fw.theme.dark", "fw.core"]);
        assert_eq!(tree.node("widgets").unwrap().dependency_ids, vec!["fw.m"]);

        let core = tree.node("fw.core").unwrap();
        assert!(core.is_framework());
        assert_eq!(core.path, PathBuf::from("/cache/fw.core/artifact"));
        assert_eq!(tree.node("fw.m").unwrap().dependency_ids, vec!["fw.core"]);

        let order = tree.build_order();
        let position = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(position("fw.core") < position("fw.m"));
        assert!(position("fw.m") < position("widgets"));
        assert!(position("widgets") < position("app"));
        assert!(position("fw.theme.dark") < position("app"));
    }

    #[tokio::test]
    async fn test_project_node_satisfies_library() {
        let resolver = FixedResolver::new(&[("fw.core", &[])]);
        let raw = RawTree::new(
            "app",
            vec![app("app", &["fw.core"], json!({"name": "open-core"})), lib("fw.core", &[])],
        );
        let tree = Preprocessor::new().preprocess(raw, &resolver).await.unwrap();

        let core = tree.node("fw.core").unwrap();
        assert!(!core.is_framework());
        assert_eq!(tree.node("app").unwrap().dependency_ids, vec!["fw.core"]);
        assert_eq!(tree.build_order(), &["fw.core", "app"]);
    }

    #[tokio::test]
    async fn test_options_override_root() {
        let resolver = FixedResolver::new(&[("fw.core", &[])]);
        let raw = RawTree::new("app", vec![app("app", &[], json!({"name": "enterprise", "version": "1.60"}))]);
        let options = PreprocessOptions::default()
            .with_distribution(Distribution::OpenCore)
            .with_version("1.70.5");
        Preprocessor::new()
            .with_options(options)
            .preprocess(raw, &resolver)
            .await
            .unwrap();

        let requests = resolver.requests();
        assert_eq!(requests[0].0, Distribution::OpenCore);
        assert_eq!(requests[0].1, "1.70.5");
    }

    #[tokio::test]
    async fn test_no_libraries_means_no_resolution() {
        let resolver = no_framework();
        let raw = RawTree::new("lib", vec![lib("lib", &[])]);
        Preprocessor::new().preprocess(raw, &resolver).await.unwrap();
        assert!(resolver.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_library_names_requesters() {
        let resolver = FixedResolver::new(&[("fw.core", &[])]);
        let raw = RawTree::new(
            "app",
            vec![
                app("app", &["widgets"], json!({"name": "open-core"})),
                RawNode::new("widgets", ProjectType::Library, "2.6").with_configuration(json!({
                    "metadata": {"name": "widgets"},
                    "framework": {"name": "open-core", "libraries": [{"name": "fw.ghost"}]}
                })),
            ],
        );
        let err = Preprocessor::new().preprocess(raw, &resolver).await.unwrap_err();
        match err {
            PreprocessError::Resolution { requested_by, cause } => {
                assert_eq!(requested_by, vec!["widgets"]);
                assert!(matches!(cause, ResolveError::UnknownLibrary { library, .. } if library == "fw.ghost"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_injection_cycle_is_reported() {
        let resolver = FixedResolver::new(&[("fw.a", &["fw.b"]), ("fw.b", &["fw.a"])]);
        let raw = RawTree::new(
            "app",
            vec![app("app", &[], json!({"name": "open-core", "libraries": [{"name": "fw.a"}]}))],
        );
        let options = PreprocessOptions::default().with_policy(LibraryPolicy::empty());
        let err = Preprocessor::new()
            .with_options(options)
            .preprocess(raw, &resolver)
            .await
            .unwrap_err();
        let PreprocessError::Cycle(cycle) = err else {
            panic!("expected a cycle");
        };
        let mut members = cycle.nodes().to_vec();
        members.sort();
        assert_eq!(members, vec!["fw.a", "fw.b"]);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn chain_cycle(n: usize) -> RawTree {
            let ids: Vec<String> = (0..n).map(|i| format!("p{}", i)).collect();
            let mut nodes = vec![lib("root", &[ids[0].as_str()])];
            for i in 0..n {
                let next = ids[(i + 1) % n].as_str();
                nodes.push(lib(&ids[i], &[next]));
            }
            RawTree::new("root", nodes)
        }

        proptest! {
            #[test]
            fn prop_cycle_of_length_n_is_named(n in 1usize..8) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let err = rt
                    .block_on(without_policy().preprocess(chain_cycle(n), &no_framework()))
                    .unwrap_err();
                let PreprocessError::Cycle(cycle) = err else {
                    panic!("expected cycle");
                };
                let mut members = cycle.nodes().to_vec();
                members.sort();
                let mut expected: Vec<String> = (0..n).map(|i| format!("p{}", i)).collect();
                expected.sort();
                prop_assert_eq!(members, expected);
                prop_assert_eq!(cycle.path.first(), cycle.path.last());
            }

            #[test]
            fn prop_acyclic_trees_are_ordered(edges in prop::collection::vec((0usize..10, 0usize..10), 0..30)) {
                let mut deps: Vec<Vec<String>> = vec![Vec::new(); 10];
                for (a, b) in edges {
                    if a < b {
                        deps[a].push(format!("n{}", b));
                    }
                }
                // n0 reaches every node so nothing is dropped
                for i in 1..10 {
                    deps[0].push(format!("n{}", i));
                }
                let nodes = (0..10)
                    .map(|i| {
                        let refs: Vec<&str> = deps[i].iter().map(String::as_str).collect();
                        lib(&format!("n{}", i), &refs)
                    })
                    .collect();

                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let tree = rt
                    .block_on(without_policy().preprocess(RawTree::new("n0", nodes), &no_framework()))
                    .unwrap();
                let order = tree.build_order();
                prop_assert_eq!(order.len(), 10);
                for node in tree.nodes() {
                    let own = order.iter().position(|id| id == &node.id).unwrap();
                    for dep in &node.dependency_ids {
                        let dep_pos = order.iter().position(|id| id == dep).unwrap();
                        prop_assert!(dep_pos < own);
                    }
                }
            }
        }
    }
}
