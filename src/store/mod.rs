//! Persistence contract.
//!
//! The engine needs four capabilities from a store: per-step state rows,
//! atomic checkpoint bundles with idempotency-key enforcement, and an
//! event outbox for exactly-once event delivery. [`Store`] aggregates them
//! because the engine only ever needs the composite; implementations are
//! free to split internally.
//!
//! The atomic-commit contract for [`Store::save_checkpoint`]:
//!
//! 1. insert the idempotency key into a unique-key table,
//! 2. insert the bundle row,
//! 3. commit, all in one transaction.
//!
//! If step 1 hits an existing key the transaction aborts with
//! [`StoreError::DuplicateCommit`]; the engine treats that as
//! success-with-skip. Uniqueness must come from the store's own index
//! under at least read-committed isolation; an application-level
//! check-then-insert races and is forbidden.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::CheckpointBundle;
use crate::events::Event;
use crate::types::{NodeId, RunId};

/// One persisted step: the merged state after a node committed.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub run_id: RunId,
    pub step: u64,
    pub node_id: NodeId,
    pub state: Value,
    pub saved_at: DateTime<Utc>,
}

/// A not-yet-delivered event in the outbox.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub event: Event,
}

/// Errors from store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The checkpoint's idempotency key already exists: the step was
    /// committed by a prior process.
    #[error("duplicate checkpoint commit: {key}")]
    #[diagnostic(code(stepgraph::store::duplicate))]
    DuplicateCommit { key: String },

    /// Nothing persisted for this run.
    #[error("run not found: {run_id}")]
    #[diagnostic(
        code(stepgraph::store::not_found),
        help("Check that run `{run_id}` was executed with checkpointing enabled against this store.")
    )]
    NotFound { run_id: RunId },

    /// Backend failure (database, filesystem).
    #[error("store backend error: {message}")]
    #[diagnostic(code(stepgraph::store::backend))]
    Backend { message: String },

    /// Persisted data failed to (de)serialize.
    #[error("store serialization error: {0}")]
    #[diagnostic(code(stepgraph::store::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence consumed by the engine. State crosses this boundary as
/// opaque JSON.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist the merged state after a step.
    async fn save_step(&self, run_id: &RunId, step: u64, node_id: &NodeId, state: &Value)
    -> Result<()>;

    /// Load the most recent step row for a run, if any.
    async fn load_latest(&self, run_id: &RunId) -> Result<Option<StepRecord>>;

    /// Atomically commit a checkpoint bundle. Returns
    /// [`StoreError::DuplicateCommit`] when the idempotency key exists.
    async fn save_checkpoint(&self, bundle: &CheckpointBundle) -> Result<()>;

    /// Load a bundle: the one for `step` when given, else the latest.
    async fn load_checkpoint(
        &self,
        run_id: &RunId,
        step: Option<u64>,
    ) -> Result<Option<CheckpointBundle>>;

    /// Append events to the outbox for later exactly-once delivery.
    async fn enqueue_events(&self, events: &[Event]) -> Result<()>;

    /// Events not yet marked emitted, oldest first, up to `limit`.
    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Mark outbox entries as delivered.
    async fn mark_events_emitted(&self, ids: &[i64]) -> Result<()>;
}
