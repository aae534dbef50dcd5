//! Core identifier types for the stepgraph engine.
//!
//! This module defines the fundamental identifiers used throughout the
//! system: [`NodeId`] for graph nodes and [`RunId`] for engine runs, plus
//! the configuration enums that select checkpoint and replay behavior.
//!
//! Both identifiers serialize as plain strings so persisted checkpoints
//! stay human-readable and forward-compatible.
//!
//! # Examples
//!
//! ```rust
//! use stepgraph::types::{NodeId, RunId};
//!
//! let review: NodeId = "review".into();
//! assert_eq!(review.as_str(), "review");
//!
//! let run = RunId::generate();
//! assert!(!run.as_str().is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// Node ids are user-chosen strings, unique within a graph. Common patterns
/// include function names, service names, or step descriptions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a single engine run.
///
/// A run id names one invocation of [`Engine::run`](crate::engine::Engine::run)
/// and keys everything the run persists: step rows, checkpoint bundles,
/// recorded I/O. The run-scoped RNG seed is derived from it, so reusing a
/// run id reproduces the same jitter sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Create a run id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random run id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Selects when the engine commits checkpoint bundles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Never persist checkpoints. Runs are not resumable.
    #[default]
    Off,
    /// Commit a bundle after every completed step.
    EveryStep,
    /// Commit only after nodes that declare a checkpoint label in their
    /// [`NodePolicy`](crate::node::NodePolicy).
    LabelsOnly,
}

/// Selects how recorded I/O is consumed during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Execute external calls live, recording them for recordable nodes.
    #[default]
    Off,
    /// Serve external calls from recordings; a request hash mismatch or a
    /// missing recording is a terminal error.
    Strict,
    /// Serve external calls from recordings where present; tolerate hash
    /// drift (with a warning) and fall back to live execution when a
    /// recording is missing.
    Lenient,
}
