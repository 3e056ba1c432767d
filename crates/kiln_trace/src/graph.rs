//! Operation graph learned from a traced pass.
//!
//! Nodes are keyed by their slash-joined operation path, so the same id
//! under two parents is two nodes. Insertion order is discovery order.

use indexmap::{IndexMap, IndexSet};
use kiln_core::OperationId;
use serde::{Deserialize, Serialize};

/// One discovered operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Operation id
    pub id: OperationId,
    /// Parent path, `None` at the root
    pub parent: Option<String>,
    /// Child paths in discovery order
    pub children: IndexSet<String>,
}

/// Tree of operations keyed by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredGraph {
    nodes: IndexMap<String, Node>,
    roots: IndexSet<String>,
}

impl DiscoveredGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the edge `parent -> path`. Returns `true` if `path` is new.
    pub fn insert(&mut self, parent: Option<&str>, path: &str, id: &OperationId) -> bool {
        if self.nodes.contains_key(path) {
            return false;
        }
        match parent {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children.insert(path.to_string());
                } else {
                    // Parent lives outside this graph (forked context).
                    self.roots.insert(path.to_string());
                }
            }
            None => {
                self.roots.insert(path.to_string());
            }
        }
        self.nodes.insert(
            path.to_string(),
            Node {
                id: id.clone(),
                parent: parent.map(str::to_string),
                children: IndexSet::new(),
            },
        );
        true
    }

    /// Node at `path`
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    /// Whether `path` was seen
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Top-level paths
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }

    /// Children of `path`
    pub fn children(&self, path: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(path)
            .into_iter()
            .flat_map(|node| node.children.iter().map(String::as_str))
    }

    /// Every node with its path, in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(path, node)| (path.as_str(), node))
    }

    /// Paths in discovery order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was discovered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str) -> OperationId {
        OperationId::new(id).unwrap()
    }

    #[test]
    fn test_tree_shape() {
        let mut graph = DiscoveredGraph::new();
        assert!(graph.insert(None, "ci", &op("ci")));
        assert!(graph.insert(Some("ci"), "ci/build", &op("build")));
        assert!(graph.insert(Some("ci"), "ci/test", &op("test")));
        assert!(!graph.insert(Some("ci"), "ci/build", &op("build")));

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["ci"]);
        assert_eq!(
            graph.children("ci").collect::<Vec<_>>(),
            vec!["ci/build", "ci/test"]
        );
        assert_eq!(graph.children("ci/test").count(), 0);
        assert_eq!(graph.children("missing").count(), 0);
        assert_eq!(graph.get("ci/test").unwrap().parent.as_deref(), Some("ci"));
    }

    #[test]
    fn test_detached_parent_becomes_root() {
        let mut graph = DiscoveredGraph::new();
        graph.insert(Some("outer"), "outer/inner", &op("inner"));
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["outer/inner"]);
    }

    #[test]
    fn test_same_id_under_two_parents() {
        let mut graph = DiscoveredGraph::new();
        graph.insert(None, "a", &op("a"));
        graph.insert(None, "b", &op("b"));
        assert!(graph.insert(Some("a"), "a/x", &op("x")));
        assert!(graph.insert(Some("b"), "b/x", &op("x")));
        assert_eq!(graph.len(), 4);
    }
}
