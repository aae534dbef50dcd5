//! The frontier: pending work, ordered and bounded.
//!
//! The frontier pairs a binary heap with a bounded notification channel.
//! The heap is the single source of truth for ordering; the channel
//! carries tokens only, one per queued item. `enqueue` pushes under the
//! heap lock and then sends a token; `dequeue` receives a token and pops
//! under the lock. A token with an empty heap means the two structures
//! desynchronized, a hard engine bug surfaced as
//! [`FrontierError::Desync`], never silently absorbed.
//!
//! Backpressure: the token channel's capacity is `queue_depth`. An enqueue
//! that cannot hand off its token within the backpressure timeout fails;
//! items are never silently dropped.

use miette::Diagnostic;
use parking_lot::Mutex as ParkingMutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::types::NodeId;

/// An instruction to execute one node against one state snapshot.
///
/// Owned by the frontier until dequeued, then by a worker until the item
/// completes. The only mutation over an item's lifetime is the `attempt`
/// increment on retry.
#[derive(Clone, Debug)]
pub struct WorkItem<S> {
    pub node_id: NodeId,
    /// Unique, increasing step number assigned at creation.
    pub step: u64,
    /// Merge-order key; see [`crate::ordering`].
    pub order_key: u64,
    /// Frontier insertion sequence, the tie-break for equal order keys.
    pub seq: u64,
    /// Isolated state snapshot this execution starts from.
    pub state: S,
    /// Zero-based attempt counter.
    pub attempt: u32,
    pub parent: Option<NodeId>,
}

impl<S> WorkItem<S> {
    /// The item's position in the global merge order.
    #[must_use]
    pub fn key(&self) -> (u64, u64) {
        (self.order_key, self.seq)
    }
}

/// Frontier failures.
#[derive(Debug, Error, Diagnostic)]
pub enum FrontierError {
    /// The notification channel stayed full past the backpressure timeout.
    #[error("enqueue timed out after {timeout_ms} ms waiting for queue capacity")]
    #[diagnostic(
        code(stepgraph::frontier::backpressure),
        help("Raise queue_depth or backpressure_timeout, or reduce fan-out width.")
    )]
    Backpressure { timeout_ms: u64 },

    /// A notification token arrived with an empty heap. Indicates an
    /// engine bug.
    #[error("frontier desync: notification token with empty heap")]
    #[diagnostic(code(stepgraph::frontier::desync))]
    Desync,
}

struct HeapEntry<S>(WorkItem<S>);

impl<S> PartialEq for HeapEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.0.key() == other.0.key()
    }
}

impl<S> Eq for HeapEntry<S> {}

impl<S> PartialOrd for HeapEntry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for HeapEntry<S> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the std max-heap pops the minimum key first.
        other.0.key().cmp(&self.0.key())
    }
}

/// Priority queue of pending work plus its bounded notification channel.
pub struct Frontier<S> {
    heap: ParkingMutex<BinaryHeap<HeapEntry<S>>>,
    notify_tx: flume::Sender<()>,
    notify_rx: flume::Receiver<()>,
}

impl<S: Send> Frontier<S> {
    /// Create a frontier whose notification channel holds `queue_depth`
    /// tokens.
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        let (notify_tx, notify_rx) = flume::bounded(queue_depth.max(1));
        Self {
            heap: ParkingMutex::new(BinaryHeap::new()),
            notify_tx,
            notify_rx,
        }
    }

    /// Push an item and hand off its notification token.
    ///
    /// With a zero timeout only the non-blocking fast path is attempted.
    pub async fn enqueue(&self, item: WorkItem<S>, timeout: Duration) -> Result<(), FrontierError> {
        self.heap.lock().push(HeapEntry(item));
        if timeout.is_zero() {
            self.notify_tx
                .try_send(())
                .map_err(|_| FrontierError::Backpressure { timeout_ms: 0 })
        } else {
            match tokio::time::timeout(timeout, self.notify_tx.send_async(())).await {
                Ok(Ok(())) => Ok(()),
                _ => Err(FrontierError::Backpressure {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    }

    /// Wait for a token and pop the minimum-key item.
    ///
    /// Returns `Ok(None)` once `shutdown` flips to `true` (or its sender
    /// is gone). A token received against an empty heap is
    /// [`FrontierError::Desync`].
    pub async fn dequeue(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<WorkItem<S>>, FrontierError> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(None);
                    }
                }
                token = self.notify_rx.recv_async() => {
                    if token.is_err() {
                        return Ok(None);
                    }
                    let mut heap = self.heap.lock();
                    return match heap.pop() {
                        Some(entry) => Ok(Some(entry.0)),
                        None => Err(FrontierError::Desync),
                    };
                }
            }
        }
    }

    /// Number of queued (not yet dequeued) items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    #[cfg(test)]
    fn inject_token(&self) {
        self.notify_tx.try_send(()).expect("token capacity in test");
    }
}

impl<S: Send + Clone> Frontier<S> {
    /// Queued items in ascending merge order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkItem<S>> {
        let heap = self.heap.lock();
        let mut items: Vec<WorkItem<S>> = heap.iter().map(|e| e.0.clone()).collect();
        items.sort_by_key(WorkItem::key);
        items
    }
}
