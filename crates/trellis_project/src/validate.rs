//! Project configuration validation.
//!
//! Validators report every problem they find rather than stopping at the
//! first one, so a single run shows the whole list.

use crate::node::{ProjectType, SpecVersion};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use trellis_core::{Distribution, VersionSpec};

/// One configuration problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer to the offending value; empty for the document itself
    pub path: String,
    /// Rule that failed
    pub keyword: String,
    /// Human readable description
    pub message: String,
    /// Rule parameters
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Violation {
    /// Create a violation without parameters
    #[must_use]
    pub fn new(path: impl Into<String>, keyword: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            keyword: keyword.into(),
            message: message.into(),
            params: Map::new(),
        }
    }

    /// Attach a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{} ({}): {}", path, self.keyword, self.message)
    }
}

/// Violations of a whole tree, grouped by node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    nodes: IndexMap<String, Vec<Violation>>,
}

impl ValidationReport {
    /// Create an empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the violations of one node
    pub fn add(&mut self, node_id: &str, violations: Vec<Violation>) {
        if violations.is_empty() {
            return;
        }
        self.nodes.entry(node_id.to_string()).or_default().extend(violations);
    }

    /// Violations of one node
    #[must_use]
    pub fn for_node(&self, node_id: &str) -> &[Violation] {
        self.nodes.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// All violations with their node ids
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Violation)> {
        self.nodes
            .iter()
            .flat_map(|(id, violations)| violations.iter().map(move |v| (id.as_str(), v)))
    }

    /// Total number of violations
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Whether nothing was reported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (node_id, violation)) in self.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}: {}", node_id, violation)?;
        }
        Ok(())
    }
}

/// Configuration validator capability
pub trait ConfigValidator: Send + Sync {
    /// Validate `configuration` of a `project_type` project declared with
    /// `spec_version`, returning every violation
    fn validate(&self, configuration: &Value, spec_version: SpecVersion, project_type: ProjectType) -> Vec<Violation>;
}

/// Configuration feature available from a given spec version on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGate {
    /// JSON pointer of the feature
    pub pointer: String,
    /// First spec version supporting it
    pub since: SpecVersion,
}

impl FeatureGate {
    /// Create a gate
    #[must_use]
    pub fn new(pointer: impl Into<String>, since: SpecVersion) -> Self {
        Self {
            pointer: pointer.into(),
            since,
        }
    }
}

const COMMON_KEYS: &[&str] = &["metadata", "resources", "builder", "customConfiguration"];

fn allowed_keys(project_type: ProjectType) -> Vec<&'static str> {
    let mut keys = COMMON_KEYS.to_vec();
    match project_type {
        ProjectType::Application => keys.extend(["framework", "server"]),
        ProjectType::Library | ProjectType::ThemeLibrary => keys.push("framework"),
        ProjectType::Module | ProjectType::Subcomponent => {}
    }
    keys
}

fn default_gates() -> Vec<FeatureGate> {
    vec![
        FeatureGate::new("/framework", SpecVersion::new(1, 0)),
        FeatureGate::new("/server/customMiddleware", SpecVersion::new(1, 0)),
        FeatureGate::new("/builder/customTasks", SpecVersion::new(1, 0)),
        FeatureGate::new("/builder/bundles", SpecVersion::new(2, 0)),
        FeatureGate::new("/customConfiguration", SpecVersion::new(2, 1)),
        FeatureGate::new("/builder/componentPreload/excludes", SpecVersion::new(2, 3)),
        FeatureGate::new("/builder/settings/includeDependency", SpecVersion::new(2, 5)),
        FeatureGate::new("/builder/minification", SpecVersion::new(2, 6)),
    ]
}

/// Rule-based validator for project configurations
///
/// Checks the document shape, the `metadata` and `framework` sections, and a
/// table of features that require a minimum spec version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralValidator {
    gates: Vec<FeatureGate>,
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self { gates: default_gates() }
    }
}

impl StructuralValidator {
    /// Create a validator with the default feature gates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the feature gate table
    #[must_use]
    pub fn with_gates(mut self, gates: Vec<FeatureGate>) -> Self {
        self.gates = gates;
        self
    }

    /// Add a feature gate
    #[must_use]
    pub fn with_gate(mut self, gate: FeatureGate) -> Self {
        self.gates.push(gate);
        self
    }

    /// Feature gate table
    #[must_use]
    pub fn gates(&self) -> &[FeatureGate] {
        &self.gates
    }

    fn check_keys(&self, config: &Map<String, Value>, project_type: ProjectType, out: &mut Vec<Violation>) {
        let allowed = allowed_keys(project_type);
        for key in config.keys() {
            if !allowed.contains(&key.as_str()) {
                out.push(
                    Violation::new(
                        format!("/{}", key),
                        "additionalProperties",
                        format!("'{}' is not allowed for {} projects", key, project_type),
                    )
                    .with_param("additionalProperty", key.as_str())
                    .with_param("allowed", json!(allowed)),
                );
            }
        }
    }

    fn check_metadata(&self, config: &Map<String, Value>, out: &mut Vec<Violation>) {
        match config.get("metadata") {
            None => out.push(
                Violation::new("", "required", "'metadata' is required").with_param("missingProperty", "metadata"),
            ),
            Some(Value::Object(metadata)) => match metadata.get("name") {
                None => out.push(
                    Violation::new("/metadata", "required", "'name' is required")
                        .with_param("missingProperty", "name"),
                ),
                Some(Value::String(name)) if name.trim().is_empty() => {
                    out.push(Violation::new("/metadata/name", "minLength", "must not be empty").with_param("limit", 1))
                }
                Some(Value::String(_)) => {}
                Some(_) => out.push(type_violation("/metadata/name", "string")),
            },
            Some(_) => out.push(type_violation("/metadata", "object")),
        }
    }

    fn check_framework(&self, config: &Map<String, Value>, out: &mut Vec<Violation>) {
        let framework = match config.get("framework") {
            None => return,
            Some(Value::Object(framework)) => framework,
            Some(_) => {
                out.push(type_violation("/framework", "object"));
                return;
            }
        };

        match framework.get("name") {
            None => out.push(
                Violation::new("/framework", "required", "'name' is required").with_param("missingProperty", "name"),
            ),
            Some(Value::String(name)) => {
                if Distribution::parse(name).is_err() {
                    let allowed: Vec<&str> = Distribution::ALL.iter().map(Distribution::as_str).collect();
                    out.push(
                        Violation::new(
                            "/framework/name",
                            "enum",
                            format!("'{}' is not a known distribution", name),
                        )
                        .with_param("allowedValues", json!(allowed)),
                    );
                }
            }
            Some(_) => out.push(type_violation("/framework/name", "string")),
        }

        match framework.get("version") {
            None => {}
            Some(Value::String(version)) => {
                if let Err(e) = VersionSpec::parse(version) {
                    out.push(
                        Violation::new("/framework/version", "format", e.to_string())
                            .with_param("format", "version-specifier"),
                    );
                }
            }
            Some(_) => out.push(type_violation("/framework/version", "string")),
        }

        match framework.get("libraries") {
            None => {}
            Some(Value::Array(libraries)) => {
                for (idx, library) in libraries.iter().enumerate() {
                    let path = format!("/framework/libraries/{}", idx);
                    match library {
                        Value::Object(entry) => match entry.get("name") {
                            Some(Value::String(name)) if !name.is_empty() => {}
                            Some(Value::String(_)) => out.push(
                                Violation::new(format!("{}/name", path), "minLength", "must not be empty")
                                    .with_param("limit", 1),
                            ),
                            Some(_) => out.push(type_violation(&format!("{}/name", path), "string")),
                            None => out.push(
                                Violation::new(path, "required", "'name' is required")
                                    .with_param("missingProperty", "name"),
                            ),
                        },
                        _ => out.push(type_violation(&path, "object")),
                    }
                }
            }
            Some(_) => out.push(type_violation("/framework/libraries", "array")),
        }

        match framework.get("themes") {
            None => {}
            Some(Value::Array(themes)) => {
                for (idx, theme) in themes.iter().enumerate() {
                    if !theme.is_string() {
                        out.push(type_violation(&format!("/framework/themes/{}", idx), "string"));
                    }
                }
            }
            Some(_) => out.push(type_violation("/framework/themes", "array")),
        }
    }

    fn check_gates(&self, configuration: &Value, spec_version: SpecVersion, out: &mut Vec<Violation>) {
        for gate in &self.gates {
            if spec_version < gate.since && configuration.pointer(&gate.pointer).is_some() {
                out.push(
                    Violation::new(
                        gate.pointer.clone(),
                        "specVersion",
                        format!("requires specVersion {} or higher", gate.since),
                    )
                    .with_param("minimum", gate.since.to_string())
                    .with_param("actual", spec_version.to_string()),
                );
            }
        }
    }
}

impl ConfigValidator for StructuralValidator {
    fn validate(&self, configuration: &Value, spec_version: SpecVersion, project_type: ProjectType) -> Vec<Violation> {
        let Some(config) = configuration.as_object() else {
            return vec![type_violation("", "object")];
        };

        let mut violations = Vec::new();
        self.check_keys(config, project_type, &mut violations);
        self.check_metadata(config, &mut violations);
        self.check_framework(config, &mut violations);
        self.check_gates(configuration, spec_version, &mut violations);
        violations
    }
}

fn type_violation(path: &str, expected: &str) -> Violation {
    Violation::new(path, "type", format!("must be {}", expected)).with_param("type", expected)
}
