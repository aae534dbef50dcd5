//! In-memory store. Volatile, process-local; suitable for tests and
//! ephemeral runs. The idempotency-key set plays the role of the unique
//! index a SQL backend provides.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use super::{OutboxEntry, Result, Store, StoreError, StepRecord};
use crate::checkpoint::CheckpointBundle;
use crate::events::Event;
use crate::types::{NodeId, RunId};

#[derive(Default)]
struct Inner {
    steps: FxHashMap<RunId, Vec<StepRecord>>,
    checkpoints: FxHashMap<RunId, Vec<CheckpointBundle>>,
    idempotency_keys: FxHashSet<String>,
    outbox: Vec<(OutboxEntry, bool)>,
    next_outbox_id: i64,
}

/// Volatile [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed checkpoints for a run (test/diagnostic aid).
    #[must_use]
    pub fn checkpoint_count(&self, run_id: &RunId) -> usize {
        self.inner
            .read()
            .checkpoints
            .get(run_id)
            .map_or(0, Vec::len)
    }

    /// Number of persisted step rows for a run.
    #[must_use]
    pub fn step_count(&self, run_id: &RunId) -> usize {
        self.inner.read().steps.get(run_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_step(
        &self,
        run_id: &RunId,
        step: u64,
        node_id: &NodeId,
        state: &Value,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.steps.entry(run_id.clone()).or_default().push(StepRecord {
            run_id: run_id.clone(),
            step,
            node_id: node_id.clone(),
            state: state.clone(),
            saved_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_latest(&self, run_id: &RunId) -> Result<Option<StepRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .steps
            .get(run_id)
            .and_then(|rows| rows.iter().max_by_key(|r| r.step))
            .cloned())
    }

    async fn save_checkpoint(&self, bundle: &CheckpointBundle) -> Result<()> {
        let mut inner = self.inner.write();
        // Key insertion and bundle insertion succeed or fail together
        // under the single write lock, mirroring the SQL transaction.
        if !inner.idempotency_keys.insert(bundle.idempotency_key.clone()) {
            return Err(StoreError::DuplicateCommit {
                key: bundle.idempotency_key.clone(),
            });
        }
        inner
            .checkpoints
            .entry(bundle.run_id.clone())
            .or_default()
            .push(bundle.clone());
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        run_id: &RunId,
        step: Option<u64>,
    ) -> Result<Option<CheckpointBundle>> {
        let inner = self.inner.read();
        let bundles = match inner.checkpoints.get(run_id) {
            Some(b) => b,
            None => return Ok(None),
        };
        let found = match step {
            Some(step) => bundles.iter().filter(|b| b.step == step).last(),
            None => bundles.iter().max_by_key(|b| b.step),
        };
        Ok(found.cloned())
    }

    async fn enqueue_events(&self, events: &[Event]) -> Result<()> {
        let mut inner = self.inner.write();
        for event in events {
            let id = inner.next_outbox_id;
            inner.next_outbox_id += 1;
            inner.outbox.push((
                OutboxEntry {
                    id,
                    event: event.clone(),
                },
                false,
            ));
        }
        Ok(())
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .outbox
            .iter()
            .filter(|(_, emitted)| !emitted)
            .take(limit)
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn mark_events_emitted(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write();
        for (entry, emitted) in &mut inner.outbox {
            if ids.contains(&entry.id) {
                *emitted = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;

    fn bundle(run: &str, step: u64) -> CheckpointBundle {
        CheckpointBundle::compose(
            RunId::from(run),
            step,
            None,
            json!({"step": step}),
            0,
            vec![],
            vec![],
        )
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let store = MemoryStore::new();
        let b = bundle("r1", 1);
        store.save_checkpoint(&b).await.unwrap();
        let err = store.save_checkpoint(&b).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCommit { .. }));
        assert_eq!(store.checkpoint_count(&RunId::from("r1")), 1);
    }

    #[tokio::test]
    async fn latest_checkpoint_wins_without_step_filter() {
        let store = MemoryStore::new();
        store.save_checkpoint(&bundle("r1", 1)).await.unwrap();
        store.save_checkpoint(&bundle("r1", 3)).await.unwrap();
        store.save_checkpoint(&bundle("r1", 2)).await.unwrap();

        let latest = store
            .load_checkpoint(&RunId::from("r1"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, 3);

        let specific = store
            .load_checkpoint(&RunId::from("r1"), Some(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(specific.step, 2);
    }

    #[tokio::test]
    async fn steps_track_latest_by_number() {
        let store = MemoryStore::new();
        let run = RunId::from("r1");
        store
            .save_step(&run, 1, &NodeId::from("a"), &json!({"c": 1}))
            .await
            .unwrap();
        store
            .save_step(&run, 2, &NodeId::from("b"), &json!({"c": 2}))
            .await
            .unwrap();
        let latest = store.load_latest(&run).await.unwrap().unwrap();
        assert_eq!(latest.step, 2);
        assert_eq!(latest.node_id, NodeId::from("b"));
    }

    #[tokio::test]
    async fn outbox_marks_entries_emitted() {
        let store = MemoryStore::new();
        let ev = Event::new(RunId::from("r"), 1, None, EventKind::Checkpoint, "saved");
        store.enqueue_events(&[ev.clone(), ev]).await.unwrap();

        let pending = store.pending_events(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        store.mark_events_emitted(&[pending[0].id]).await.unwrap();
        let pending = store.pending_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
