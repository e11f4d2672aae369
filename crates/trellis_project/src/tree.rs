//! Preprocessed project tree and build order.

use crate::node::ProjectNode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Dependency cycle, listed from the repeated node back to itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    /// Node ids along the cycle; first and last are the same
    pub path: Vec<String>,
}

impl CycleError {
    /// Distinct nodes on the cycle
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        match self.path.split_last() {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => &self.path,
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dependency cycle: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Validated, acyclic project graph with its build order
///
/// Nodes are stored in discovery order; the build order lists every node
/// after all of its dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTree {
    root: String,
    nodes: IndexMap<String, ProjectNode>,
    build_order: Vec<String>,
}

impl ProjectTree {
    /// Order `nodes` and build the tree
    ///
    /// # Errors
    ///
    /// Returns the cycle if the nodes are not acyclic
    pub(crate) fn build(root: String, nodes: IndexMap<String, ProjectNode>) -> Result<Self, CycleError> {
        let build_order = topological_order(&nodes)?;
        Ok(Self {
            root,
            nodes,
            build_order,
        })
    }

    /// Root project id
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Root project
    #[must_use]
    pub fn root_node(&self) -> Option<&ProjectNode> {
        self.nodes.get(&self.root)
    }

    /// Look up a node
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&ProjectNode> {
        self.nodes.get(id)
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = &ProjectNode> {
        self.nodes.values()
    }

    /// Node ids, dependencies first
    #[must_use]
    pub fn build_order(&self) -> &[String] {
        &self.build_order
    }

    /// Nodes, dependencies first
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &ProjectNode> {
        self.build_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Direct dependents of `id`
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependency_ids.iter().any(|d| d == id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Whether the tree contains `id`
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Kahn's algorithm with ties broken by arena position
///
/// Dependencies that are not in `nodes` are ignored.
pub(crate) fn topological_order(nodes: &IndexMap<String, ProjectNode>) -> Result<Vec<String>, CycleError> {
    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (idx, node) in nodes.values().enumerate() {
        for dep in &node.dependency_ids {
            if let Some(dep_idx) = nodes.get_index_of(dep) {
                pending[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        return Err(cycle_among(nodes, &pending));
    }

    Ok(order
        .into_iter()
        .filter_map(|idx| nodes.get_index(idx).map(|(id, _)| id.clone()))
        .collect())
}

/// Find a cycle among nodes Kahn's algorithm could not release
///
/// Each such node still waits on another such node, so following the first
/// waiting dependency from any of them must revisit a node.
fn cycle_among(nodes: &IndexMap<String, ProjectNode>, pending: &[usize]) -> CycleError {
    let blocked = |idx: usize| pending[idx] > 0;
    let Some(start) = (0..nodes.len()).find(|&idx| blocked(idx)) else {
        return CycleError { path: Vec::new() };
    };

    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut walk = Vec::new();
    let mut current = start;
    loop {
        if let Some(&pos) = seen.get(&current) {
            let mut path: Vec<String> = walk[pos..]
                .iter()
                .filter_map(|&idx| nodes.get_index(idx).map(|(id, _)| id.clone()))
                .collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            return CycleError { path };
        }
        seen.insert(current, walk.len());
        walk.push(current);

        let next = nodes[current]
            .dependency_ids
            .iter()
            .filter_map(|dep| nodes.get_index_of(dep))
            .find(|&dep_idx| blocked(dep_idx));
        match next {
            Some(next) => current = next,
            None => return CycleError { path: Vec::new() },
        }
    }
}
