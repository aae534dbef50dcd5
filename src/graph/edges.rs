//! Edges and routing predicates.

use std::fmt;
use std::sync::Arc;

use crate::types::NodeId;

/// Predicate deciding whether an edge is taken for a given state.
///
/// Predicates are evaluated in edge insertion order and every matching
/// edge is taken, so a set of predicates can itself express a fan-out.
/// `None` on an edge means unconditional.
pub type EdgePredicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// A directed edge between two registered nodes.
#[derive(Clone)]
pub struct Edge<S> {
    pub from: NodeId,
    pub to: NodeId,
    pub when: Option<EdgePredicate<S>>,
}

impl<S> Edge<S> {
    #[must_use]
    pub fn unconditional(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            when: None,
        }
    }

    #[must_use]
    pub fn conditional(from: NodeId, to: NodeId, when: EdgePredicate<S>) -> Self {
        Self {
            from,
            to,
            when: Some(when),
        }
    }
}

impl<S> fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.when.is_some())
            .finish()
    }
}
