//! Dependency graph between targets.
//!
//! Design:
//! - Forward edges: target -> targets it depends on (waits for)
//! - Reverse edges: target -> targets that depend on it (waiting targets)
//! - Invariant: edges and reverse_edges must be kept in sync
//! - Declaration order is remembered so every ordering is deterministic

use std::collections::{HashMap, HashSet};

/// Targets involved in a dependency cycle, first node repeated at the end
/// (e.g. `["a", "b", "a"]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<String>);

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Node names in declaration order.
    nodes: Vec<String>,

    /// name -> declaration index
    index: HashMap<String, usize>,

    /// Forward edges: target -> targets it depends on
    edges: HashMap<String, HashSet<String>>,

    /// Reverse edges: target -> targets waiting for it
    reverse_edges: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Re-adding an existing name keeps its first position.
    pub fn add_node(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.index.contains_key(&name) {
            self.index.insert(name.clone(), self.nodes.len());
            self.nodes.push(name);
        }
    }

    /// `target` depends on `depends_on` ("target waits for depends_on").
    ///
    /// Both ends are registered as nodes if they are not already.
    pub fn add_dependency(&mut self, target: &str, depends_on: &str) {
        self.add_node(target);
        self.add_node(depends_on);
        self.edges
            .entry(target.to_string())
            .or_default()
            .insert(depends_on.to_string());
        self.reverse_edges
            .entry(depends_on.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependencies of `name`, in declaration order.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.sorted(self.edges.get(name))
    }

    /// Targets waiting for `name`, in declaration order.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.sorted(self.reverse_edges.get(name))
    }

    fn sorted(&self, set: Option<&HashSet<String>>) -> Vec<String> {
        let mut out: Vec<String> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
        out.sort_by_key(|n| self.index.get(n).copied().unwrap_or(usize::MAX));
        out
    }

    /// Group nodes into dependency levels with Kahn's algorithm.
    ///
    /// Level 0 holds nodes without dependencies; level N holds nodes whose
    /// dependencies all sit in levels < N. Within a level, declaration order.
    /// Returns the cycle when the graph is not a DAG.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, Cycle> {
        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.get(n).map_or(0, HashSet::len)))
            .collect();

        let mut current: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| indegree[n.as_str()] == 0)
            .cloned()
            .collect();

        let mut levels = Vec::new();
        let mut placed = 0usize;
        while !current.is_empty() {
            let mut next = Vec::new();
            for node in &current {
                for waiting in self.reverse_edges.get(node).into_iter().flatten() {
                    if let Some(d) = indegree.get_mut(waiting.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            next.push(waiting.clone());
                        }
                    }
                }
            }
            next.sort_by_key(|n| self.index[n]);
            placed += current.len();
            levels.push(std::mem::replace(&mut current, next));
        }

        if placed < self.nodes.len() {
            let remaining: HashSet<&str> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| *n)
                .collect();
            return Err(self.follow_cycle(&remaining));
        }
        Ok(levels)
    }

    /// Flattened topological order (levels concatenated).
    pub fn topological_order(&self) -> Result<Vec<String>, Cycle> {
        Ok(self.levels()?.into_iter().flatten().collect())
    }

    pub fn detect_cycle(&self) -> Option<Cycle> {
        self.levels().err()
    }

    /// Every node left after Kahn's pass still has a dependency inside the
    /// remaining set, so walking "first remaining dependency" must revisit a node.
    fn follow_cycle(&self, remaining: &HashSet<&str>) -> Cycle {
        let Some(start) = self.nodes.iter().find(|n| remaining.contains(n.as_str())) else {
            return Cycle(Vec::new());
        };

        let mut path: Vec<String> = Vec::new();
        let mut current = start.clone();
        loop {
            if let Some(pos) = path.iter().position(|n| *n == current) {
                let mut cycle = path.split_off(pos);
                cycle.push(current);
                return Cycle(cycle);
            }
            path.push(current.clone());
            let next = self
                .dependencies(&current)
                .into_iter()
                .find(|d| remaining.contains(d.as_str()));
            match next {
                Some(n) => current = n,
                None => return Cycle(path),
            }
        }
    }
}
