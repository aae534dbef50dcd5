//! Graph construction and validation.
//!
//! [`GraphBuilder`] accumulates nodes and edges, rejects structural
//! mistakes at registration time (duplicate ids, unknown endpoints), and
//! produces an immutable [`Graph`] the engine executes. [`GraphBuilder::validate`]
//! is optional and advisory: it warns about orphan nodes and cycles but
//! never fails the build, because dynamic routing (`Goto`/`Many`) can
//! legitimately reach nodes no static edge points at.
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use stepgraph::graph::GraphBuilder;
//! use stepgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct S;
//!
//! struct Worker;
//!
//! #[async_trait]
//! impl Node<S> for Worker {
//!     async fn run(&self, _: NodeContext, _: S) -> Result<NodeOutput<S>, NodeError> {
//!         Ok(NodeOutput::stop())
//!     }
//! }
//!
//! # fn main() -> Result<(), stepgraph::graph::GraphError> {
//! let graph = GraphBuilder::new()
//!     .add_node("scan", Worker)?
//!     .add_node("report", Worker)?
//!     .connect("scan", "report")?
//!     .start_at("scan")?
//!     .build()?;
//! assert_eq!(graph.start().as_str(), "scan");
//! # Ok(())
//! # }
//! ```

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use thiserror::Error;

use super::edges::{Edge, EdgePredicate};
use crate::node::Node;
use crate::types::NodeId;

/// Structural graph errors, reported at registration time.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// A node id was registered twice.
    #[error("duplicate node id: `{node}`")]
    #[diagnostic(
        code(stepgraph::graph::duplicate_node),
        help("Each node id must be unique within a graph.")
    )]
    DuplicateNode { node: NodeId },

    /// An edge or the start designation referenced an unregistered node.
    #[error("unknown node: `{node}`")]
    #[diagnostic(
        code(stepgraph::graph::unknown_node),
        help("Register `{node}` with add_node before referencing it.")
    )]
    UnknownNode { node: NodeId },

    /// `build` was called without a start node.
    #[error("no start node designated")]
    #[diagnostic(
        code(stepgraph::graph::missing_start),
        help("Call start_at(node) before build().")
    )]
    MissingStart,
}

/// Builder for workflow graphs.
pub struct GraphBuilder<S> {
    nodes: FxHashMap<NodeId, Arc<dyn Node<S>>>,
    /// Insertion order of node registration, for deterministic validation
    /// output.
    node_order: Vec<NodeId>,
    edges_from: FxHashMap<NodeId, Vec<Edge<S>>>,
    start: Option<NodeId>,
}

impl<S> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for GraphBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("node_order", &self.node_order)
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl<S> GraphBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            node_order: Vec::new(),
            edges_from: FxHashMap::default(),
            start: None,
        }
    }

    /// Register a node. Duplicate ids are rejected.
    pub fn add_node(
        mut self,
        id: impl Into<NodeId>,
        node: impl Node<S> + 'static,
    ) -> Result<Self, GraphError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { node: id });
        }
        self.node_order.push(id.clone());
        self.nodes.insert(id, Arc::new(node));
        Ok(self)
    }

    /// Add an unconditional edge. Both endpoints must be registered.
    pub fn connect(
        self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
    ) -> Result<Self, GraphError> {
        self.push_edge(from.into(), to.into(), None)
    }

    /// Add a conditional edge. Predicates run in insertion order against
    /// the merged state; every matching edge is taken.
    pub fn connect_when(
        self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        when: EdgePredicate<S>,
    ) -> Result<Self, GraphError> {
        self.push_edge(from.into(), to.into(), Some(when))
    }

    /// Designate the entry node.
    pub fn start_at(mut self, id: impl Into<NodeId>) -> Result<Self, GraphError> {
        let id = id.into();
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::UnknownNode { node: id });
        }
        self.start = Some(id);
        Ok(self)
    }

    fn push_edge(
        mut self,
        from: NodeId,
        to: NodeId,
        when: Option<EdgePredicate<S>>,
    ) -> Result<Self, GraphError> {
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::UnknownNode { node: from });
        }
        if !self.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode { node: to });
        }
        let edge = match when {
            None => Edge::unconditional(from.clone(), to),
            Some(when) => Edge::conditional(from.clone(), to, when),
        };
        self.edges_from.entry(from).or_default().push(edge);
        Ok(self)
    }

    /// Walk the graph and warn about suspicious structure: nodes no static
    /// edge reaches from the start, and cycles (which rely on `max_steps`
    /// to terminate). Returns the warnings; also logs each one.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(start) = &self.start {
            let mut reachable = FxHashSet::default();
            let mut stack = vec![start.clone()];
            while let Some(id) = stack.pop() {
                if !reachable.insert(id.clone()) {
                    continue;
                }
                if let Some(edges) = self.edges_from.get(&id) {
                    stack.extend(edges.iter().map(|e| e.to.clone()));
                }
            }
            for id in &self.node_order {
                if !reachable.contains(id) {
                    warnings.push(format!(
                        "node `{id}` is unreachable from `{start}` via static edges \
                         (fine if a node routes to it dynamically)"
                    ));
                }
            }
        }

        if self.has_cycle() {
            warnings.push(
                "graph contains a cycle; execution terminates only through routing \
                 decisions or the max_steps ceiling"
                    .to_string(),
            );
        }

        for warning in &warnings {
            tracing::warn!(target: "stepgraph::graph", "{warning}");
        }
        warnings
    }

    fn has_cycle(&self) -> bool {
        // Iterative DFS with an explicit in-progress set.
        let mut visited = FxHashSet::default();
        let mut in_progress = FxHashSet::default();
        for root in &self.node_order {
            if visited.contains(root) {
                continue;
            }
            let mut stack = vec![(root.clone(), false)];
            while let Some((id, children_done)) = stack.pop() {
                if children_done {
                    in_progress.remove(&id);
                    continue;
                }
                if in_progress.contains(&id) {
                    return true;
                }
                if !visited.insert(id.clone()) {
                    continue;
                }
                in_progress.insert(id.clone());
                stack.push((id.clone(), true));
                if let Some(edges) = self.edges_from.get(&id) {
                    for edge in edges {
                        if in_progress.contains(&edge.to) {
                            return true;
                        }
                        if !visited.contains(&edge.to) {
                            stack.push((edge.to.clone(), false));
                        }
                    }
                }
            }
        }
        false
    }

    /// Finish construction. Requires a designated start node.
    pub fn build(self) -> Result<Graph<S>, GraphError> {
        let start = self.start.ok_or(GraphError::MissingStart)?;
        Ok(Graph {
            nodes: self.nodes,
            edges_from: self.edges_from,
            start,
        })
    }
}

/// Immutable, executable graph.
pub struct Graph<S> {
    nodes: FxHashMap<NodeId, Arc<dyn Node<S>>>,
    edges_from: FxHashMap<NodeId, Vec<Edge<S>>>,
    start: NodeId,
}

impl<S> std::fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").field("start", &self.start).finish_non_exhaustive()
    }
}

impl<S> Graph<S> {
    /// Look up a registered node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn Node<S>>> {
        self.nodes.get(id)
    }

    /// Whether a node id is registered.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Outgoing edges of a node, in insertion order.
    #[must_use]
    pub fn edges_from(&self, id: &NodeId) -> &[Edge<S>] {
        self.edges_from.get(id).map_or(&[], Vec::as_slice)
    }

    /// The designated entry node.
    #[must_use]
    pub fn start(&self) -> &NodeId {
        &self.start
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
