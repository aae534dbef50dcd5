//! Engine run configuration.
//!
//! Functional options bound at engine construction. Defaults favor
//! determinism and safety: sequential execution, a generous step ceiling,
//! checkpointing off, replay off.

use std::fmt;
use std::time::Duration;

use crate::state::StateCopier;
use crate::types::{CheckpointMode, ReplayMode};

/// Configuration for an [`Engine`](crate::engine::Engine).
pub struct EngineOptions<S> {
    /// Global ceiling on scheduled steps; breaching it ends the run with
    /// `EngineError::MaxSteps`. Zero fails any non-empty run immediately.
    pub max_steps: u64,
    /// Worker pool size. `0` degenerates to a single sequential worker,
    /// which trivially preserves deterministic order; the right setting
    /// for tests.
    pub max_concurrent: usize,
    /// Capacity of the frontier's notification channel.
    pub queue_depth: usize,
    /// Per-node execution deadline when the node's policy does not
    /// override it.
    pub node_timeout: Duration,
    /// Whole-run deadline.
    pub run_wall_clock_budget: Duration,
    /// Maximum wait for queue capacity on enqueue. Zero means the
    /// non-blocking fast path only.
    pub backpressure_timeout: Duration,
    pub checkpoint_mode: CheckpointMode,
    pub replay_mode: ReplayMode,
    /// Optional user-supplied deep copy, replacing `Clone` for branch
    /// isolation.
    pub copier: Option<StateCopier<S>>,
}

impl<S> Default for EngineOptions<S> {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_concurrent: 0,
            queue_depth: 1024,
            node_timeout: Duration::from_secs(30),
            run_wall_clock_budget: Duration::from_secs(300),
            backpressure_timeout: Duration::from_secs(5),
            checkpoint_mode: CheckpointMode::Off,
            replay_mode: ReplayMode::Off,
            copier: None,
        }
    }
}

impl<S> Clone for EngineOptions<S> {
    fn clone(&self) -> Self {
        Self {
            max_steps: self.max_steps,
            max_concurrent: self.max_concurrent,
            queue_depth: self.queue_depth,
            node_timeout: self.node_timeout,
            run_wall_clock_budget: self.run_wall_clock_budget,
            backpressure_timeout: self.backpressure_timeout,
            checkpoint_mode: self.checkpoint_mode,
            replay_mode: self.replay_mode,
            copier: self.copier.clone(),
        }
    }
}

impl<S> fmt::Debug for EngineOptions<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("max_steps", &self.max_steps)
            .field("max_concurrent", &self.max_concurrent)
            .field("queue_depth", &self.queue_depth)
            .field("node_timeout", &self.node_timeout)
            .field("run_wall_clock_budget", &self.run_wall_clock_budget)
            .field("backpressure_timeout", &self.backpressure_timeout)
            .field("checkpoint_mode", &self.checkpoint_mode)
            .field("replay_mode", &self.replay_mode)
            .field("custom_copier", &self.copier.is_some())
            .finish()
    }
}

impl<S> EngineOptions<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    #[must_use]
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    #[must_use]
    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    #[must_use]
    pub fn with_run_wall_clock_budget(mut self, budget: Duration) -> Self {
        self.run_wall_clock_budget = budget;
        self
    }

    #[must_use]
    pub fn with_backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_checkpoint_mode(mut self, mode: CheckpointMode) -> Self {
        self.checkpoint_mode = mode;
        self
    }

    #[must_use]
    pub fn with_replay_mode(mut self, mode: ReplayMode) -> Self {
        self.replay_mode = mode;
        self
    }

    #[must_use]
    pub fn with_copier(mut self, copier: StateCopier<S>) -> Self {
        self.copier = Some(copier);
        self
    }
}
