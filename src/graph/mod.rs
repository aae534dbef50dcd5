//! Workflow graph definition.
//!
//! A graph is a registry of named [`Node`](crate::node::Node)s, a set of
//! directed edges with optional predicates, and a designated entry node.
//! [`GraphBuilder`] validates structure while you build; the resulting
//! [`Graph`] is immutable and shared by reference across engine workers.

mod builder;
mod edges;

pub use builder::{Graph, GraphBuilder, GraphError};
pub use edges::{Edge, EdgePredicate};
