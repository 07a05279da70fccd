//! Task dependency graph with cycle refusal
//!
//! Adjacency lists plus reverse adjacency lists, rebuilt on registry load
//! and maintained incrementally. Edge inserts that would close a cycle are
//! refused, and the offending cycle is returned for display.

use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Error raised when an edge insert is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The edge would close a cycle; the vertices of the cycle are listed
    /// in walk order, first vertex repeated at the end.
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Directed dependency graph over task ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// task id -> ids it depends on
    depends_on: HashMap<String, Vec<String>>,
    /// task id -> ids that depend on it (reverse edges)
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the graph from `(task id, depends_on)` pairs. Does not
    /// check for cycles; use `validate` after a bulk load.
    pub fn from_edges<'a>(
        edges: impl IntoIterator<Item = (&'a str, &'a [String])>,
    ) -> Self {
        let mut graph = Self::new();
        for (id, deps) in edges {
            for dep in deps {
                graph.insert_edge_unchecked(id, dep);
            }
        }
        graph
    }

    /// Add an edge `task -> depends_on`. Refuses self-dependencies and any
    /// edge that would close a cycle. Duplicate edges are a no-op.
    pub fn add_dependency(&mut self, task: &str, depends_on: &str) -> Result<(), GraphError> {
        if task == depends_on {
            return Err(GraphError::Cycle(vec![
                task.to_string(),
                task.to_string(),
            ]));
        }
        if self
            .depends_on
            .get(task)
            .map(|deps| deps.iter().any(|d| d == depends_on))
            .unwrap_or(false)
        {
            return Ok(());
        }
        // A path from `depends_on` back to `task` means the new edge closes
        // a cycle. Walk it to report the full cycle.
        if let Some(path) = self.path_between(depends_on, task) {
            let mut cycle = path;
            cycle.push(depends_on.to_string());
            return Err(GraphError::Cycle(cycle));
        }
        self.insert_edge_unchecked(task, depends_on);
        Ok(())
    }

    fn insert_edge_unchecked(&mut self, task: &str, depends_on: &str) {
        self.depends_on
            .entry(task.to_string())
            .or_default()
            .push(depends_on.to_string());
        self.dependents
            .entry(depends_on.to_string())
            .or_default()
            .push(task.to_string());
    }

    /// Remove an edge. Missing edges are a no-op.
    pub fn remove_dependency(&mut self, task: &str, depends_on: &str) {
        if let Some(deps) = self.depends_on.get_mut(task) {
            deps.retain(|d| d != depends_on);
        }
        if let Some(deps) = self.dependents.get_mut(depends_on) {
            deps.retain(|d| d != task);
        }
    }

    /// Remove a vertex and all its edges.
    pub fn remove_task(&mut self, task: &str) {
        if let Some(deps) = self.depends_on.remove(task) {
            for dep in deps {
                if let Some(rev) = self.dependents.get_mut(&dep) {
                    rev.retain(|d| d != task);
                }
            }
        }
        if let Some(dependents) = self.dependents.remove(task) {
            for dependent in dependents {
                if let Some(deps) = self.depends_on.get_mut(&dependent) {
                    deps.retain(|d| d != task);
                }
            }
        }
    }

    /// Immediate dependencies of a task (one hop).
    pub fn dependencies(&self, task: &str) -> Vec<String> {
        self.depends_on.get(task).cloned().unwrap_or_default()
    }

    /// Immediate dependents of a task (one hop, reverse edges).
    pub fn dependents(&self, task: &str) -> Vec<String> {
        self.dependents.get(task).cloned().unwrap_or_default()
    }

    /// BFS for a dependency path from `from` to `to`, returned as the
    /// vertex sequence including both endpoints.
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to.to_string()];
                let mut node = to;
                while let Some(parent) = parents.get(node) {
                    path.push(parent.to_string());
                    node = parent;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(deps) = self.depends_on.get(current) {
                for dep in deps {
                    if visited.insert(dep.as_str()) {
                        parents.insert(dep.as_str(), current);
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }
        None
    }

    /// Full-graph cycle check using DFS with gray/black coloring. Used
    /// after bulk loads; incremental inserts stay acyclic by construction.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut black: HashSet<&str> = HashSet::new();
        let mut gray: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        let mut nodes: Vec<&str> = self
            .depends_on
            .keys()
            .chain(self.dependents.keys())
            .map(|s| s.as_str())
            .collect();
        nodes.sort_unstable();
        nodes.dedup();

        for node in nodes {
            if !black.contains(node) {
                if let Some(cycle) = self.dfs_cycle(node, &mut black, &mut gray, &mut path) {
                    return Err(GraphError::Cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        black: &mut HashSet<&'a str>,
        gray: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        gray.insert(node);
        path.push(node);

        if let Some(deps) = self.depends_on.get(node) {
            for dep in deps {
                if gray.contains(dep.as_str()) {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !black.contains(dep.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(dep, black, gray, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        gray.remove(node);
        path.pop();
        black.insert(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("c/2", "c/1").unwrap();

        assert_eq!(graph.dependencies("c/2"), vec!["c/1"]);
        assert_eq!(graph.dependents("c/1"), vec!["c/2"]);
        assert!(graph.dependencies("c/1").is_empty());
    }

    #[test]
    fn test_self_dependency_refused_as_cycle() {
        let mut graph = DependencyGraph::new();
        let err = graph.add_dependency("c/1", "c/1").unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec!["c/1".into(), "c/1".into()]));
    }

    #[test]
    fn test_cycle_refused_with_vertices() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a/1", "b/1").unwrap();
        graph.add_dependency("b/1", "c/1").unwrap();

        let err = graph.add_dependency("c/1", "a/1").unwrap_err();
        match err {
            GraphError::Cycle(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a/1".to_string()));
                assert!(cycle.contains(&"b/1".to_string()));
                assert!(cycle.contains(&"c/1".to_string()));
            }
        }
        // The refused edge must not be persisted.
        assert!(graph.dependencies("c/1").is_empty());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("d/4", "d/2").unwrap();
        graph.add_dependency("d/4", "d/3").unwrap();
        graph.add_dependency("d/2", "d/1").unwrap();
        graph.add_dependency("d/3", "d/1").unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("c/2", "c/1").unwrap();
        graph.add_dependency("c/2", "c/1").unwrap();
        assert_eq!(graph.dependencies("c/2").len(), 1);
        assert_eq!(graph.dependents("c/1").len(), 1);
    }

    #[test]
    fn test_remove_dependency() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("c/2", "c/1").unwrap();
        graph.add_dependency("c/3", "c/1").unwrap();
        graph.remove_dependency("c/2", "c/1");

        assert!(graph.dependencies("c/2").is_empty());
        assert_eq!(graph.dependents("c/1"), vec!["c/3"]);
    }

    #[test]
    fn test_remove_task_clears_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("c/2", "c/1").unwrap();
        graph.add_dependency("c/3", "c/2").unwrap();
        graph.remove_task("c/2");

        assert!(graph.dependents("c/1").is_empty());
        assert!(graph.dependencies("c/3").is_empty());
    }

    #[test]
    fn test_validate_detects_preexisting_cycle() {
        let deps_a = vec!["b/1".to_string()];
        let deps_b = vec!["a/1".to_string()];
        let graph = DependencyGraph::from_edges([
            ("a/1", deps_a.as_slice()),
            ("b/1", deps_b.as_slice()),
        ]);
        assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
    }
}
