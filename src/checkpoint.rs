//! Checkpoint bundles and the idempotency-key derivation.
//!
//! A bundle is the atomic persistence unit for one committed step: the
//! merged state, the frontier of still-scheduled work, the run's RNG seed,
//! and the recorded I/O, all under one deterministic idempotency key. The
//! store writes a bundle in a single transaction keyed by that value, so a
//! re-committed step after a crash is detected as a duplicate and skipped.
//!
//! State travels as opaque JSON here; the engine converts the typed state
//! at the boundary (the persisted shapes stay decoupled from in-memory
//! ones).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::replay::RecordedIo;
use crate::types::{NodeId, RunId};

/// A scheduled-but-not-completed work item, in persisted form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedWorkItem {
    pub node_id: NodeId,
    pub step: u64,
    pub order_key: u64,
    pub state: Value,
    pub attempt: u32,
    pub parent: Option<NodeId>,
}

/// One atomically persisted checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBundle {
    pub run_id: RunId,
    pub step: u64,
    pub created_at: DateTime<Utc>,
    pub label: Option<String>,
    /// Merged state after this step, serialized as opaque JSON.
    pub state: Value,
    /// Run-scoped RNG seed, restored on resume so jitter stays
    /// reproducible.
    pub rng_seed: u64,
    /// Frontier snapshot sorted by ascending `order_key`.
    pub frontier: Vec<PersistedWorkItem>,
    pub recorded_ios: Vec<RecordedIo>,
    /// `"sha256:" + 64 hex chars`, unique-enforced by the store.
    pub idempotency_key: String,
}

impl CheckpointBundle {
    /// Assemble a bundle: sorts the frontier by `order_key`, stamps the
    /// creation time, and derives the idempotency key.
    #[must_use]
    pub fn compose(
        run_id: RunId,
        step: u64,
        label: Option<String>,
        state: Value,
        rng_seed: u64,
        mut frontier: Vec<PersistedWorkItem>,
        recorded_ios: Vec<RecordedIo>,
    ) -> Self {
        frontier.sort_by_key(|item| item.order_key);
        let idempotency_key = idempotency_key(&run_id, step, &frontier);
        Self {
            run_id,
            step,
            created_at: Utc::now(),
            label,
            state,
            rng_seed,
            frontier,
            recorded_ios,
            idempotency_key,
        }
    }

    /// Recompute the idempotency key from the bundle's own contents.
    /// Equal to the stored key for any bundle built by [`compose`](Self::compose).
    #[must_use]
    pub fn recompute_key(&self) -> String {
        idempotency_key(&self.run_id, self.step, &self.frontier)
    }
}

/// Deterministic commit identity for `(run, step, frontier)`.
///
/// `sha256(run_id || be64(step) || for each frontier item sorted by
/// order_key: node_id || be64(order_key) || state_json)`, rendered as
/// `"sha256:" + hex`.
#[must_use]
pub fn idempotency_key(run_id: &RunId, step: u64, frontier: &[PersistedWorkItem]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_str().as_bytes());
    hasher.update(step.to_be_bytes());
    let mut sorted: Vec<&PersistedWorkItem> = frontier.iter().collect();
    sorted.sort_by_key(|item| item.order_key);
    for item in sorted {
        hasher.update(item.node_id.as_str().as_bytes());
        hasher.update(item.order_key.to_be_bytes());
        hasher.update(item.state.to_string().as_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
