//! Node execution contract.
//!
//! A [`Node`] is one unit of computation in a workflow graph. It receives
//! an isolated copy of the accumulated state and the execution context,
//! does its work, and returns a [`NodeOutput`]: an optional state delta
//! plus a routing decision. Optional [`NodePolicy`] and [`NodeEffects`]
//! hooks declare per-node timeout/retry behavior and side-effect traits.
//!
//! # Design principles
//!
//! - **Stateless**: nodes hold configuration, not run state
//! - **Deterministic**: the same state snapshot must produce the same delta
//! - **Observable**: use the context to emit events and to wrap external
//!   calls in record/replay
//!
//! # Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use stepgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct CounterState {
//!     counter: i64,
//! }
//!
//! struct AddOne;
//!
//! #[async_trait]
//! impl Node<CounterState> for AddOne {
//!     async fn run(
//!         &self,
//!         _ctx: NodeContext,
//!         _state: CounterState,
//!     ) -> Result<NodeOutput<CounterState>, NodeError> {
//!         Ok(NodeOutput::edges().with_delta(CounterState { counter: 1 }))
//!     }
//! }
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::engine::CancelToken;
use crate::events::{Emitter, Event, EventKind};
use crate::replay::{RecordLog, ReplayError};
use crate::retry::RetryPolicy;
use crate::types::{NodeId, RunId};

/// Core trait for executable workflow nodes.
#[async_trait]
pub trait Node<S>: Send + Sync {
    /// Execute this node against an isolated state copy.
    async fn run(&self, ctx: NodeContext, state: S) -> Result<NodeOutput<S>, NodeError>;

    /// Per-node execution policy. The default inherits the engine's
    /// timeout and performs no retries.
    fn policy(&self) -> NodePolicy {
        NodePolicy::default()
    }

    /// Declared side effects. The default declares none.
    fn effects(&self) -> NodeEffects {
        NodeEffects::default()
    }
}

/// Routing decision returned by a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    /// This branch terminates; no successors.
    Stop,
    /// Exactly one successor.
    Goto(NodeId),
    /// Fan out to several successors, each with its own state snapshot.
    /// An empty list is equivalent to [`Next::Stop`].
    Many(Vec<NodeId>),
    /// Defer to the graph's edges: predicates are evaluated in insertion
    /// order and every matching edge is taken.
    Edges,
}

/// Result of a node execution: an optional delta plus routing.
#[derive(Clone, Debug)]
pub struct NodeOutput<S> {
    /// State delta to merge through the reducer. `None` merges nothing.
    pub delta: Option<S>,
    /// Where execution goes next.
    pub next: Next,
}

impl<S> NodeOutput<S> {
    /// Output with the given routing and no delta.
    #[must_use]
    pub fn new(next: Next) -> Self {
        Self { delta: None, next }
    }

    /// Terminate this branch.
    #[must_use]
    pub fn stop() -> Self {
        Self::new(Next::Stop)
    }

    /// Route to a single successor.
    #[must_use]
    pub fn goto(id: impl Into<NodeId>) -> Self {
        Self::new(Next::Goto(id.into()))
    }

    /// Fan out to several successors.
    #[must_use]
    pub fn many<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        Self::new(Next::Many(ids.into_iter().map(Into::into).collect()))
    }

    /// Let the graph's edge predicates decide the successors.
    #[must_use]
    pub fn edges() -> Self {
        Self::new(Next::Edges)
    }

    /// Attach a state delta.
    #[must_use]
    pub fn with_delta(mut self, delta: S) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// Per-node execution policy.
#[derive(Clone, Debug, Default)]
pub struct NodePolicy {
    /// Execution deadline for one attempt; `None` inherits the engine's
    /// `node_timeout` option.
    pub timeout: Option<Duration>,
    /// Retry policy; `None` means no retries.
    pub retry: Option<RetryPolicy>,
    /// When the engine runs with `CheckpointMode::LabelsOnly`, a step
    /// executed by this node commits a bundle carrying this label.
    pub checkpoint_label: Option<String>,
}

impl NodePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_checkpoint_label(mut self, label: impl Into<String>) -> Self {
        self.checkpoint_label = Some(label.into());
        self
    }
}

/// Declared side effects of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeEffects {
    /// The node's external calls go through the record/replay wrapper.
    pub recordable: bool,
    /// The node's recorded I/O must ride in checkpoint bundles, and a
    /// duplicate commit for its step must be skipped rather than re-run.
    pub requires_idempotency: bool,
}

impl NodeEffects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn recordable(mut self) -> Self {
        self.recordable = true;
        self
    }

    #[must_use]
    pub fn requires_idempotency(mut self) -> Self {
        self.requires_idempotency = true;
        self.recordable = true;
        self
    }
}

/// Execution context handed to a node for one attempt.
///
/// Carries the node's identity within the run, the event emitter, the
/// record/replay log, and the run's cancellation token.
#[derive(Clone)]
pub struct NodeContext {
    /// The run this execution belongs to.
    pub run_id: RunId,
    /// This node's identifier.
    pub node_id: NodeId,
    /// Step number of the work item being executed.
    pub step: u64,
    /// Zero-based attempt number (0 on first execution).
    pub attempt: u32,
    pub(crate) emitter: Arc<dyn Emitter>,
    pub(crate) recorder: Arc<RecordLog>,
    pub(crate) cancel: CancelToken,
}

impl NodeContext {
    /// Emit an event enriched with this context's run/step/node metadata.
    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        self.emitter.emit(Event::new(
            self.run_id.clone(),
            self.step,
            Some(self.node_id.clone()),
            kind,
            message,
        ));
    }

    /// Emit an `Error`-kind event without failing the node.
    pub fn emit_error(&self, message: impl Into<String>) {
        self.emit(EventKind::Error, message);
    }

    /// Route an external call through record/replay.
    ///
    /// In record mode the call executes and its `(request hash, response)`
    /// is appended to the run's recorded I/O under `(node, attempt)`. In
    /// replay mode the recording is served instead; strict replay fails on
    /// a hash mismatch or a missing entry.
    pub async fn recorded<F, Fut>(&self, request: &Value, call: F) -> Result<Value, NodeError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Value, NodeError>> + Send,
    {
        self.recorder
            .through(&self.node_id, self.attempt, request, call)
            .await
    }

    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve when the run is cancelled. Long-running nodes should race
    /// their work against this.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("step", &self.step)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Errors produced by node execution.
///
/// Transient variants (timeouts, rate limits, upstream 5xx) are eligible
/// for retry under the node's policy; everything else is terminal
/// immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// One attempt exceeded its deadline.
    #[error("node attempt timed out after {elapsed_ms} ms")]
    #[diagnostic(
        code(stepgraph::node::timeout),
        help("Raise the node's timeout in NodePolicy or the engine's node_timeout option.")
    )]
    Timeout { elapsed_ms: u64 },

    /// An upstream service throttled the call.
    #[error("rate limited: {message}")]
    #[diagnostic(code(stepgraph::node::rate_limited))]
    RateLimited { message: String },

    /// External provider or service error. Status codes >= 500 are
    /// treated as transient.
    #[error("upstream error ({provider}): {message}")]
    #[diagnostic(code(stepgraph::node::upstream))]
    Upstream {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Expected input data is missing from the state snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(stepgraph::node::missing_input),
        help("Check that an upstream node produced `{what}` before this node runs.")
    )]
    MissingInput { what: &'static str },

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(stepgraph::node::validation))]
    ValidationFailed(String),

    /// JSON (de)serialization error inside a node.
    #[error(transparent)]
    #[diagnostic(code(stepgraph::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Record/replay failure for a wrapped external call.
    #[error(transparent)]
    #[diagnostic(code(stepgraph::node::replay))]
    Replay(#[from] ReplayError),

    /// An edge predicate panicked while routing this node's successors.
    #[error("edge predicate panicked while routing: {detail}")]
    #[diagnostic(code(stepgraph::node::route_panic))]
    RoutePanic { detail: String },

    /// Any other node failure.
    #[error("{0}")]
    #[diagnostic(code(stepgraph::node::other))]
    Other(String),
}

impl NodeError {
    /// Whether this error belongs to the transient-external category
    /// (rate limit, timeout, upstream 5xx) the default retry predicate
    /// accepts.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Upstream { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }
}
