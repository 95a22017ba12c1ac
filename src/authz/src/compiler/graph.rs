//! Rule dependency graph with Kahn's algorithm for topological sorting
//!
//! Used at compile time to:
//! 1. Detect recursion between rules
//! 2. Fix an evaluation order where every rule follows the rules it references

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;

/// Graph-related errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Rules reference each other in a cycle
    #[error("Recursion detected: {0}")]
    CircularDependency(String),

    /// Rule path is declared twice
    #[error("Duplicate rule: {0}")]
    DuplicateRule(String),
}

/// Dependency graph over rule paths
///
/// Nodes are kept in ordered maps so the resolved order is deterministic for
/// a given bundle.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Rule path to the rule paths it depends on
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule node
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateRule`] if the path is already present.
    pub fn add_rule(&mut self, path: impl Into<String>) -> Result<(), GraphError> {
        let path = path.into();
        if self.nodes.contains_key(&path) {
            return Err(GraphError::DuplicateRule(path));
        }
        self.nodes.insert(path, BTreeSet::new());
        Ok(())
    }

    /// Record that `from` must be evaluated after `to`
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        if let Some(deps) = self.nodes.get_mut(from) {
            deps.insert(to.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of a rule
    pub fn dependencies(&self, path: &str) -> impl Iterator<Item = &String> {
        self.nodes.get(path).into_iter().flatten()
    }

    /// Topologically sorted rule paths, dependencies first
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CircularDependency`] naming one cycle if the
    /// rules are recursive.
    pub fn resolve_order(&self) -> Result<Vec<String>, GraphError> {
        let mut reverse_edges: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for (name, deps) in &self.nodes {
            in_degree.entry(name.as_str()).or_insert(0);
            for dep in deps {
                // Edges to unknown nodes are ignored
                if !self.nodes.contains_key(dep) {
                    continue;
                }
                reverse_edges.entry(dep.as_str()).or_default().push(name.as_str());
                *in_degree.entry(name.as_str()).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            sorted.push(current.to_string());

            if let Some(dependents) = reverse_edges.get(current) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let cycle = self
                .find_cycle()
                .map(|cycle| cycle.join(" -> "))
                .unwrap_or_else(|| "unknown cycle".to_string());
            return Err(GraphError::CircularDependency(cycle));
        }

        Ok(sorted)
    }

    /// Transitive dependencies of `roots`, including the roots themselves
    pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = roots.into_iter().collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.to_string()) {
                continue;
            }
            stack.extend(self.dependencies(current).map(String::as_str));
        }
        seen
    }

    /// First cycle found by depth-first search
    ///
    /// Three states per node: unvisited, on the DFS stack, done. Reaching a
    /// node that is on the stack closes a cycle.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        for start in self.nodes.keys() {
            if state.get(start.as_str()).copied().unwrap_or(0) == 0 {
                if let Some(cycle) = self.dfs_cycle(start, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        state: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match state.get(node) {
            Some(1) => {
                let start = path.iter().position(|n| *n == node)?;
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);

        if let Some(deps) = self.nodes.get(node) {
            for dep in deps.iter().filter(|d| self.nodes.contains_key(d.as_str())) {
                if let Some(cycle) = self.dfs_cycle(dep, state, path) {
                    return Some(cycle);
                }
            }
        }

        state.insert(node, 2);
        path.pop();
        None
    }
}
