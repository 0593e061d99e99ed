//! Dependency maps and transitive closure.
//!
//! An [`AdjacencyGraph`] maps each node to the set of nodes it directly
//! depends on. [`AdjacencyGraph::closure`] flood-fills the transitive
//! dependencies of a seed with an explicit worklist: each node is enqueued at
//! most once, so the walk is linear in the number of edges reachable from the
//! seed and terminates on cyclic graphs.
//!
//! The worklist is abstracted by [`Worklist`] so callers can hand in either a
//! heap `Vec` or an arena-backed `bumpalo` vector.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::name::Name;

/// LIFO scratch storage for graph walks.
pub trait Worklist<T> {
    fn push_item(&mut self, item: T);
    fn pop_item(&mut self) -> Option<T>;
}

impl<T> Worklist<T> for Vec<T> {
    fn push_item(&mut self, item: T) {
        self.push(item);
    }

    fn pop_item(&mut self) -> Option<T> {
        self.pop()
    }
}

impl<T> Worklist<T> for bumpalo::collections::Vec<'_, T> {
    fn push_item(&mut self, item: T) {
        self.push(item);
    }

    fn pop_item(&mut self) -> Option<T> {
        self.pop()
    }
}

/// Directed dependency map: `node -> {nodes it depends on}`.
///
/// Ordered containers keep iteration deterministic, which keeps cycle
/// reports and debug output stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyGraph {
    edges: BTreeMap<Name, BTreeSet<Name>>,
}

impl AdjacencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `node` exists, even with no dependencies.
    pub fn add_node(&mut self, node: Name) {
        self.edges.entry(node).or_default();
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Both endpoints become nodes of the graph. Duplicate edges are ignored.
    pub fn add_edge(&mut self, dependent: Name, dependency: Name) {
        self.edges.entry(dependent).or_default().insert(dependency);
        self.add_node(dependency);
    }

    /// Direct dependencies of `node`.
    pub fn dependencies(&self, node: Name) -> impl Iterator<Item = Name> + '_ {
        self.edges.get(&node).into_iter().flatten().copied()
    }

    /// Check whether `dependent` directly depends on `dependency`.
    pub fn has_edge(&self, dependent: Name, dependency: Name) -> bool {
        self.edges
            .get(&dependent)
            .is_some_and(|deps| deps.contains(&dependency))
    }

    /// Check whether `node` is part of the graph.
    pub fn contains(&self, node: Name) -> bool {
        self.edges.contains_key(&node)
    }

    /// All nodes in ascending name order.
    pub fn nodes(&self) -> impl Iterator<Item = Name> + '_ {
        self.edges.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Remove every node and edge.
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Add everything reachable from `start` (including `start`) to `visited`.
    ///
    /// Nodes already in `visited` are not walked again, so repeated calls with
    /// different seeds accumulate the union of their closures. `worklist` must
    /// be empty on entry and is empty on return.
    pub fn closure<W: Worklist<Name>>(
        &self,
        start: Name,
        worklist: &mut W,
        visited: &mut HashSet<Name>,
    ) {
        if !visited.insert(start) {
            return;
        }
        worklist.push_item(start);
        while let Some(node) = worklist.pop_item() {
            for dependency in self.dependencies(node) {
                if visited.insert(dependency) {
                    worklist.push_item(dependency);
                }
            }
        }
    }

    /// Closure of a single node with freshly allocated scratch storage.
    pub fn closure_of(&self, start: Name) -> HashSet<Name> {
        self.closure_of_many([start])
    }

    /// Union of the closures of every seed.
    pub fn closure_of_many(&self, starts: impl IntoIterator<Item = Name>) -> HashSet<Name> {
        let mut worklist = Vec::new();
        let mut visited = HashSet::new();
        for start in starts {
            self.closure(start, &mut worklist, &mut visited);
        }
        visited
    }

    /// Find a node that can reach itself through one or more edges.
    ///
    /// Returns the smallest such node, or `None` for an acyclic graph.
    pub fn find_cycle(&self) -> Option<Name> {
        let mut worklist = Vec::new();
        let mut visited = HashSet::new();
        for node in self.nodes() {
            visited.clear();
            for dependency in self.dependencies(node) {
                self.closure(dependency, &mut worklist, &mut visited);
            }
            if visited.contains(&node) {
                return Some(node);
            }
        }
        None
    }
}
