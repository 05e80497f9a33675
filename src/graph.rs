//! Dependency graph analysis over anything with a `depends_on` list.
//!
//! The graph is an adjacency list keyed by node id, mapping to the raw,
//! unvalidated dependency ids in declaration order. Ids that point at no node
//! are leaves here; whether they resolve is the validation engine's concern.
//!
//! Iteration follows insertion order and each node's dependency order, so the
//! cycles reported for a given input are identical across runs.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::models::{ApiContract, DataModel, Entity, Task, TestCase};

/// A node that declares dependencies on other nodes by id.
pub trait DependencyNode {
    fn node_id(&self) -> String;
    fn dependencies(&self) -> &[String];
}

impl DependencyNode for Entity {
    fn node_id(&self) -> String {
        self.id()
    }

    fn dependencies(&self) -> &[String] {
        self.depends_on()
    }
}

macro_rules! sub_item_node {
    ($($ty:ty),*) => {
        $(
            impl DependencyNode for $ty {
                fn node_id(&self) -> String {
                    self.id.clone()
                }

                fn dependencies(&self) -> &[String] {
                    &self.depends_on
                }
            }
        )*
    };
}

sub_item_node!(Task, TestCase, ApiContract, DataModel);

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    adjacency: IndexMap<String, Vec<String>>,
}

#[derive(Default)]
struct Traversal {
    stack: Vec<String>,
    on_stack: HashSet<String>,
    done: HashSet<String>,
    /// Nodes in the order they finished, dependencies before dependents.
    finished: Vec<String>,
    cycles: Vec<Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes<'a, T, I>(nodes: I) -> Self
    where
        T: DependencyNode + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node.node_id(), node.dependencies().to_vec());
        }
        graph
    }

    /// Add or replace a node. A replaced node keeps its original position.
    pub fn add_node(&mut self, id: impl Into<String>, dependencies: Vec<String>) {
        self.adjacency.insert(id.into(), dependencies);
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes that list `id` as a dependency, in insertion order.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.adjacency
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == id))
            .map(|(node, _)| node.as_str())
            .collect()
    }

    /// Every cycle found by a depth-first walk from each node in turn.
    ///
    /// A cycle is reported as the path from its entry node back to itself,
    /// so the entry node appears at both ends: `[a, b, c, a]`, or `[a, a]`
    /// for a self dependency.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        self.traverse().cycles
    }

    pub fn has_cycles(&self) -> bool {
        !self.detect_cycles().is_empty()
    }

    /// Known nodes ordered so that every dependency precedes its dependents.
    pub fn topological_order(&self) -> Result<Vec<String>, Vec<Vec<String>>> {
        let traversal = self.traverse();
        if !traversal.cycles.is_empty() {
            return Err(traversal.cycles);
        }
        Ok(traversal
            .finished
            .into_iter()
            .filter(|id| self.adjacency.contains_key(id))
            .collect())
    }

    fn traverse(&self) -> Traversal {
        let mut state = Traversal::default();
        for root in self.adjacency.keys() {
            if !state.done.contains(root) {
                self.visit(root, &mut state);
            }
        }
        state
    }

    fn visit(&self, node: &str, state: &mut Traversal) {
        state.stack.push(node.to_string());
        state.on_stack.insert(node.to_string());

        for dep in self.dependencies_of(node) {
            if state.on_stack.contains(dep) {
                if let Some(start) = state.stack.iter().position(|n| n == dep) {
                    let mut cycle = state.stack[start..].to_vec();
                    cycle.push(dep.clone());
                    state.cycles.push(cycle);
                }
            } else if !state.done.contains(dep) {
                self.visit(dep, state);
            }
        }

        state.stack.pop();
        state.on_stack.remove(node);
        state.done.insert(node.to_string());
        state.finished.push(node.to_string());
    }
}

/// Cycles among `nodes`.
pub fn detect_cycles<'a, T, I>(nodes: I) -> Vec<Vec<String>>
where
    T: DependencyNode + 'a,
    I: IntoIterator<Item = &'a T>,
{
    DependencyGraph::from_nodes(nodes).detect_cycles()
}

/// `a -> b -> a`, for messages.
pub fn format_cycle(cycle: &[String]) -> String {
    cycle.join(" -> ")
}
