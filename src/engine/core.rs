//! Shared per-run machinery: the live set, the commit gate, completion
//! detection, and guaranteed error delivery.
//!
//! Every scheduled item holds an entry in the *live set* (a `BTreeMap`
//! keyed by `(order_key, seq)`, with the item's persisted form as the
//! payload) from enqueue until its delta merges or it fails terminally.
//! The set serves three masters at once:
//!
//! - **Commit gate**: a finished item merges its delta only when it is the
//!   minimum of the live set, so sibling deltas merge in ascending
//!   order-key order and the commit sequence is identical for any worker
//!   pool size.
//! - **Completion detection**: the worker that removes the last entry
//!   flips the done flag via compare-and-set and wakes the engine. No
//!   polling anywhere.
//! - **Checkpoint snapshots**: the frontier recorded in a bundle is the
//!   live set at the instant of the commit's merge, which is exactly the
//!   work whose deltas the bundle's state does not yet contain.
//!
//! Error delivery pairs a first-error slot with a signal channel sized to
//! the worker pool: any failure path writes the slot once (first writer
//! wins) and nudges the channel; the run loop therefore never misses an
//! error, and the caller receives exactly one.

use parking_lot::Mutex as ParkingMutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, watch};

use super::cancel::CancelToken;
use super::options::EngineOptions;
use crate::checkpoint::PersistedWorkItem;
use crate::error::EngineError;
use crate::events::{Emitter, Event, EventKind};
use crate::frontier::{Frontier, FrontierError, WorkItem};
use crate::graph::Graph;
use crate::reducers::Reducer;
use crate::replay::RecordLog;
use crate::state::{RunState, copy_state};
use crate::store::Store;
use crate::types::RunId;

pub(crate) struct RunCore<S> {
    pub graph: Arc<Graph<S>>,
    pub reducer: Arc<dyn Reducer<S>>,
    pub store: Arc<dyn Store>,
    pub emitter: Arc<dyn Emitter>,
    pub options: EngineOptions<S>,
    pub run_id: RunId,
    pub rng_seed: u64,
    pub recorder: Arc<RecordLog>,
    pub frontier: Frontier<S>,
    pub state: ParkingMutex<S>,
    live: ParkingMutex<BTreeMap<(u64, u64), PersistedWorkItem>>,
    gate: Notify,
    pub in_flight: AtomicUsize,
    steps_created: AtomicU64,
    seq: AtomicU64,
    done: AtomicBool,
    pub done_notify: Notify,
    pub cancel: CancelToken,
    first_error: ParkingMutex<Option<EngineError>>,
    err_tx: flume::Sender<()>,
    pub err_rx: flume::Receiver<()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: RunState> RunCore<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<Graph<S>>,
        reducer: Arc<dyn Reducer<S>>,
        store: Arc<dyn Store>,
        emitter: Arc<dyn Emitter>,
        options: EngineOptions<S>,
        run_id: RunId,
        initial_state: S,
        recorder: Arc<RecordLog>,
        rng_seed: u64,
        step_floor: u64,
        cancel: CancelToken,
    ) -> Self {
        let frontier = Frontier::new(options.queue_depth);
        // Sized so every worker can signal a failure without blocking.
        let (err_tx, err_rx) = flume::bounded(options.max_concurrent.max(1) * 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            graph,
            reducer,
            store,
            emitter,
            options,
            run_id,
            rng_seed,
            recorder,
            frontier,
            state: ParkingMutex::new(initial_state),
            live: ParkingMutex::new(BTreeMap::new()),
            gate: Notify::new(),
            in_flight: AtomicUsize::new(0),
            steps_created: AtomicU64::new(step_floor),
            seq: AtomicU64::new(0),
            done: AtomicBool::new(false),
            done_notify: Notify::new(),
            cancel,
            first_error: ParkingMutex::new(None),
            err_tx,
            err_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Copy a state through the configured copier.
    pub fn copy(&self, state: &S) -> S {
        copy_state(state, self.options.copier.as_ref())
    }

    /// Allocate the next step number (1-based).
    pub fn next_step(&self) -> u64 {
        self.steps_created.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate the next frontier insertion sequence.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Register a brand-new item in the live set and queue it.
    pub async fn schedule(&self, item: WorkItem<S>) -> Result<(), EngineError> {
        let persisted = PersistedWorkItem {
            node_id: item.node_id.clone(),
            step: item.step,
            order_key: item.order_key,
            state: serde_json::to_value(&item.state)?,
            attempt: item.attempt,
            parent: item.parent.clone(),
        };
        self.live.lock().insert(item.key(), persisted);
        self.enqueue(item).await
    }

    /// Put a retried item back on the queue; its live entry persists with
    /// the bumped attempt counter.
    pub async fn requeue(&self, item: WorkItem<S>) -> Result<(), EngineError> {
        if let Some(entry) = self.live.lock().get_mut(&item.key()) {
            entry.attempt = item.attempt;
        }
        self.enqueue(item).await
    }

    /// Queue an item whose live entry is already registered (successors go
    /// through [`complete_merge`](Self::complete_merge) first).
    pub async fn enqueue(&self, item: WorkItem<S>) -> Result<(), EngineError> {
        self.frontier
            .enqueue(item, self.options.backpressure_timeout)
            .await
            .map_err(|e| match e {
                FrontierError::Backpressure { timeout_ms } => {
                    EngineError::Backpressure { timeout_ms }
                }
                FrontierError::Desync => EngineError::FrontierDesync,
            })
    }

    /// Block until `key` is the minimum live entry, i.e. every delta that
    /// must merge before this one has committed.
    pub async fn wait_gate(&self, key: (u64, u64)) -> Result<(), EngineError> {
        loop {
            let notified = self.gate.notified();
            tokio::pin!(notified);
            // Register before checking, or a notify_waiters between the
            // check and the await is lost.
            notified.as_mut().enable();
            {
                let live = self.live.lock();
                match live.first_key_value() {
                    Some((min, _)) if *min == key => return Ok(()),
                    // The waiter's own entry is always present; an empty
                    // set here would mean it was removed early. Proceed
                    // rather than wedge.
                    None => return Ok(()),
                    _ => {}
                }
            }
            tokio::select! {
                () = &mut notified => {}
                () = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    /// Atomically finish a merge: register the committing item's
    /// successors, capture the checkpoint frontier (everything whose delta
    /// is still unmerged: the successors included, the committing item
    /// excluded), and retire the item's live entry.
    ///
    /// All three must happen under one lock, or a concurrently committing
    /// sibling could pair its state with a frontier that still lists this
    /// item, and a resume from that bundle would merge the delta twice.
    pub fn complete_merge(
        &self,
        key: (u64, u64),
        successors: &[((u64, u64), PersistedWorkItem)],
    ) -> Vec<PersistedWorkItem> {
        let (snapshot, now_empty) = {
            let mut live = self.live.lock();
            for (successor_key, persisted) in successors {
                live.insert(*successor_key, persisted.clone());
            }
            live.remove(&key);
            let snapshot = live.values().cloned().collect();
            (snapshot, live.is_empty())
        };
        self.gate.notify_waiters();
        if now_empty {
            self.flag_done();
        }
        snapshot
    }

    /// Retire an item that will never merge (terminal failure, shutdown).
    /// The last retirement flips the done flag (compare-and-set) and
    /// wakes the engine.
    pub fn finish_item(&self, key: (u64, u64)) {
        let now_empty = {
            let mut live = self.live.lock();
            live.remove(&key);
            live.is_empty()
        };
        self.gate.notify_waiters();
        if now_empty {
            self.flag_done();
        }
    }

    fn flag_done(&self) {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.done_notify.notify_one();
            self.signal_shutdown();
        }
    }

    /// Record a terminal error: first writer fills the slot, everyone
    /// nudges the signal channel, and the run is cancelled so workers
    /// drain.
    pub fn terminal(&self, error: EngineError) {
        let message = error.to_string();
        let first = {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(error);
                true
            } else {
                false
            }
        };
        if first {
            self.emitter.emit(
                Event::new(self.run_id.clone(), 0, None, EventKind::Error, message)
                    .with_meta(
                        "in_flight",
                        serde_json::json!(self.in_flight.load(Ordering::Acquire)),
                    )
                    .with_meta("queued", serde_json::json!(self.frontier.len())),
            );
        }
        let _ = self.err_tx.try_send(());
        self.cancel.cancel();
        self.signal_shutdown();
    }

    /// Take the first terminal error, if any.
    pub fn take_error(&self) -> Option<EngineError> {
        self.first_error.lock().take()
    }

    /// Whether any work is still scheduled.
    pub fn has_live_items(&self) -> bool {
        !self.live.lock().is_empty()
    }

    /// Unblock everything for teardown.
    pub fn release_workers(&self) {
        self.signal_shutdown();
        self.gate.notify_waiters();
    }
}
