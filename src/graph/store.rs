//! Resource graph storage
//!
//! Directed graph over accounts, regions and resources, backed by petgraph.
//! Nodes are addressed by [`NodeKey`]; edges may only be added between nodes
//! that already exist, and an identical edge is never added twice.

use super::model::{Account, EdgeType, Node, NodeKey};
use crate::error::GraphError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// In-memory resource graph
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    graph: DiGraph<Node, EdgeType>,
    /// Key → node index mapping
    index: HashMap<NodeKey, NodeIndex>,
    /// (kind, id) → keys in every region
    identities: HashMap<(String, String), BTreeSet<NodeKey>>,
    root: NodeKey,
}

/// Serializable edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EdgeExport {
    pub from: NodeKey,
    pub to: NodeKey,
    pub edge_type: EdgeType,
}

/// Serializable view of the whole graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphExport {
    pub root: NodeKey,
    pub nodes: Vec<Node>,
    pub edges: Vec<EdgeExport>,
}

impl ResourceGraph {
    /// Create a graph rooted at `account`
    pub fn new(account: Account) -> Self {
        let root = account.key();
        let mut graph = DiGraph::new();
        let idx = graph.add_node(Node::Account(account));
        let mut index = HashMap::new();
        index.insert(root.clone(), idx);
        Self {
            graph,
            index,
            identities: HashMap::new(),
            root,
        }
    }

    pub fn root(&self) -> &NodeKey {
        &self.root
    }

    pub fn account(&self) -> Option<&Account> {
        match self.node(&self.root) {
            Some(Node::Account(account)) => Some(account),
            _ => None,
        }
    }

    pub fn account_mut(&mut self) -> Option<&mut Account> {
        let idx = *self.index.get(&self.root)?;
        match self.graph.node_weight_mut(idx) {
            Some(Node::Account(account)) => Some(account),
            _ => None,
        }
    }

    /// Insert a node. A node with the same key replaces the previous weight.
    pub fn add_node(&mut self, node: Node) -> NodeKey {
        let key = node.key();
        match self.index.get(&key) {
            Some(&idx) => {
                tracing::debug!(node = %key, "Node inserted twice, replacing");
                self.graph[idx] = node;
            }
            None => {
                let idx = self.graph.add_node(node);
                self.index.insert(key.clone(), idx);
                self.identities
                    .entry((key.kind.clone(), key.id.clone()))
                    .or_default()
                    .insert(key.clone());
            }
        }
        key
    }

    /// Insert an edge between two existing nodes.
    ///
    /// Returns `Ok(false)` when the identical edge already exists.
    pub fn add_edge(
        &mut self,
        from: &NodeKey,
        to: &NodeKey,
        edge_type: EdgeType,
    ) -> Result<bool, GraphError> {
        let missing = |missing: &NodeKey| GraphError::MissingNode {
            from: from.clone(),
            to: to.clone(),
            missing: missing.clone(),
        };
        let from_idx = *self.index.get(from).ok_or_else(|| missing(from))?;
        let to_idx = *self.index.get(to).ok_or_else(|| missing(to))?;

        let exists = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .any(|edge| *edge.weight() == edge_type);
        if exists {
            return Ok(false);
        }

        self.graph.add_edge(from_idx, to_idx, edge_type);
        Ok(true)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.index.get(key).map(|&idx| &self.graph[idx])
    }

    /// Snapshot of all nodes
    pub fn nodes(&self) -> Vec<Node> {
        self.graph.node_weights().cloned().collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Sources of all incoming edges of `edge_type`
    pub fn predecessors(&self, key: &NodeKey, edge_type: EdgeType) -> Vec<NodeKey> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| *edge.weight() == edge_type)
            .map(|edge| self.graph[edge.source()].key())
            .collect()
    }

    /// Targets of all outgoing edges of `edge_type`
    pub fn successors(&self, key: &NodeKey, edge_type: EdgeType) -> Vec<NodeKey> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| *edge.weight() == edge_type)
            .map(|edge| self.graph[edge.target()].key())
            .collect()
    }

    /// All edges as (from, to, type)
    pub fn edges(&self) -> Vec<EdgeExport> {
        self.graph
            .edge_references()
            .map(|edge| EdgeExport {
                from: self.graph[edge.source()].key(),
                to: self.graph[edge.target()].key(),
                edge_type: *edge.weight(),
            })
            .collect()
    }

    /// Find a node by kind and id in any region, preferring `regions` in order
    pub fn find(&self, kind: &str, id: &str, regions: &[Option<&str>]) -> Option<NodeKey> {
        for region in regions {
            let key = NodeKey::resource(kind, *region, id);
            if self.contains(&key) {
                return Some(key);
            }
        }
        self.identities
            .get(&(kind.to_string(), id.to_string()))
            .and_then(|keys| keys.iter().next())
            .cloned()
    }

    pub fn export(&self) -> GraphExport {
        let mut nodes = self.nodes();
        nodes.sort_by_key(Node::key);
        let mut edges = self.edges();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        GraphExport {
            root: self.root.clone(),
            nodes,
            edges,
        }
    }
}
