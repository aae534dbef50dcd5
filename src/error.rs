//! Engine-level error taxonomy.
//!
//! Errors fall into the categories the engine treats differently:
//! transient external failures (retried per policy, wrapped as
//! [`EngineError::Node`] once exhausted), logic errors (unknown target, no
//! matching route), budget errors (step ceiling, wall clock, backpressure),
//! replay drift, and internal invariant violations that indicate an
//! implementation bug.

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodeError;
use crate::store::StoreError;
use crate::types::NodeId;

/// Terminal errors surfaced by [`Engine::run`](crate::engine::Engine::run)
/// and [`Engine::resume`](crate::engine::Engine::resume).
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The global step ceiling was breached.
    #[error("step ceiling reached: {max_steps} steps")]
    #[diagnostic(
        code(stepgraph::engine::max_steps),
        help("Raise max_steps in EngineOptions or break the cycle that keeps scheduling work.")
    )]
    MaxSteps { max_steps: u64 },

    /// A node deferred routing to its edges but no edge predicate matched.
    #[error("no matching route out of node `{node}`")]
    #[diagnostic(
        code(stepgraph::engine::no_route),
        help("Add an unconditional edge from `{node}` or make a predicate cover this state.")
    )]
    NoRoute { node: NodeId },

    /// A routing decision targeted a node that is not registered.
    #[error("routing targeted unknown node `{node}`")]
    #[diagnostic(
        code(stepgraph::engine::node_unknown),
        help("Register `{node}` with GraphBuilder::add_node before routing to it.")
    )]
    NodeUnknown { node: NodeId },

    /// The run context was cancelled.
    #[error("run cancelled")]
    #[diagnostic(code(stepgraph::engine::cancelled))]
    Cancelled,

    /// The whole-run wall-clock budget elapsed.
    #[error("run exceeded wall-clock budget of {budget_ms} ms")]
    #[diagnostic(
        code(stepgraph::engine::wall_clock),
        help("Raise run_wall_clock_budget or reduce per-node latency.")
    )]
    WallClockBudget { budget_ms: u64 },

    /// An enqueue could not hand off a notification within the
    /// backpressure timeout.
    #[error("frontier backpressure: enqueue timed out after {timeout_ms} ms")]
    #[diagnostic(
        code(stepgraph::engine::backpressure),
        help("Raise queue_depth or backpressure_timeout, or reduce fan-out width.")
    )]
    Backpressure { timeout_ms: u64 },

    /// A replayed request's hash did not match the recording.
    #[error("replay mismatch for node `{node}` attempt {attempt}: request hash drifted")]
    #[diagnostic(
        code(stepgraph::engine::replay_mismatch),
        help("The node now issues a different request than when it was recorded; re-record the run.")
    )]
    ReplayMismatch { node: NodeId, attempt: u32 },

    /// Replay required a recording that does not exist.
    #[error("replay missing recording for node `{node}` attempt {attempt}")]
    #[diagnostic(
        code(stepgraph::engine::replay_missing),
        help("The recording set does not cover this call; re-record or use lenient replay.")
    )]
    ReplayMissing { node: NodeId, attempt: u32 },

    /// A duplicate checkpoint commit was observed outside the resume path.
    /// Inside resume it is swallowed as success-with-skip and never
    /// surfaces.
    #[error("duplicate checkpoint commit observed for step {step}")]
    #[diagnostic(code(stepgraph::engine::duplicate_commit))]
    DuplicateCommit { step: u64 },

    /// The frontier notification channel and heap disagreed. This is a
    /// hard bug in the engine, never a user error.
    #[error("frontier desync: notification received with an empty heap")]
    #[diagnostic(
        code(stepgraph::engine::frontier_desync),
        help("This indicates an engine bug; please report it with the run's event log.")
    )]
    FrontierDesync,

    /// A node failed terminally (non-retryable, or retries exhausted).
    #[error("node `{node}` failed: {source}")]
    #[diagnostic(code(stepgraph::engine::node))]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },

    /// The persistence backend failed.
    #[error(transparent)]
    #[diagnostic(code(stepgraph::engine::store))]
    Store(#[from] StoreError),

    /// State could not be serialized for persistence or key derivation.
    #[error("state serialization failed: {0}")]
    #[diagnostic(code(stepgraph::engine::serde))]
    Serde(#[from] serde_json::Error),
}

/// A failed run: the terminal error together with the state merged up to
/// the failure boundary.
///
/// Every delta committed before the error is reflected in `state`; if the
/// engine checkpoints, that boundary is also durable and
/// [`Engine::resume`](crate::engine::Engine::resume) retries from it.
/// `state` is `None` only when a resume failed before any checkpoint was
/// restored; a started run always carries its partial state.
pub struct RunError<S> {
    /// The first terminal error the run produced.
    pub source: EngineError,
    /// Accumulated state at the failure boundary.
    pub state: Option<S>,
}

impl<S> RunError<S> {
    pub(crate) fn new(source: EngineError, state: S) -> Self {
        Self {
            source,
            state: Some(state),
        }
    }

    pub(crate) fn without_state(source: EngineError) -> Self {
        Self {
            source,
            state: None,
        }
    }

    /// Accumulated state at the failure boundary, if the run started.
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// Discard the partial state, keeping only the error.
    pub fn into_error(self) -> EngineError {
        self.source
    }
}

impl<S> std::fmt::Debug for RunError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunError")
            .field("source", &self.source)
            .field("state", &self.state.as_ref().map(|_| "<state>"))
            .finish()
    }
}

impl<S> std::fmt::Display for RunError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl<S> std::error::Error for RunError<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
