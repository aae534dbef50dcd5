//! Buffered emitter: bounded intake, background forwarding, history queries.
//!
//! Workers call [`Emitter::emit`] on the hot path; the event lands in a
//! bounded in-memory buffer guarded by a mutex. On overflow the oldest
//! event is dropped and a counter incremented; emission never blocks a
//! worker. A background task drains the buffer in batches to the attached
//! [`EventSink`]s.
//!
//! The emitter also keeps a queryable history indexed by run, node, kind,
//! and step, which the test suite and diagnostics lean on.

use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task;

use super::emitter::{EmitError, Emitter};
use super::event::{Event, EventKind};
use super::sink::EventSink;
use crate::types::{NodeId, RunId};

const DEFAULT_BUFFER_CAPACITY: usize = 1024;
const DRAIN_INTERVAL: Duration = Duration::from_millis(25);

/// Filter for history queries. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub run_id: Option<RunId>,
    pub node_id: Option<NodeId>,
    pub kind: Option<EventKind>,
    pub step: Option<u64>,
}

impl EventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn run(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.run_id.as_ref().is_none_or(|r| *r == event.run_id)
            && self
                .node_id
                .as_ref()
                .is_none_or(|n| event.node_id.as_ref() == Some(n))
            && self.kind.is_none_or(|k| k == event.kind)
            && self.step.is_none_or(|s| s == event.step)
    }
}

#[derive(Default)]
struct History {
    events: Vec<Event>,
    by_run: FxHashMap<RunId, Vec<usize>>,
    by_node: FxHashMap<NodeId, Vec<usize>>,
    by_kind: FxHashMap<EventKind, Vec<usize>>,
    by_step: FxHashMap<u64, Vec<usize>>,
}

impl History {
    fn push(&mut self, event: Event) {
        let idx = self.events.len();
        self.by_run.entry(event.run_id.clone()).or_default().push(idx);
        if let Some(node) = &event.node_id {
            self.by_node.entry(node.clone()).or_default().push(idx);
        }
        self.by_kind.entry(event.kind).or_default().push(idx);
        self.by_step.entry(event.step).or_default().push(idx);
        self.events.push(event);
    }

    /// Intersect starting from the most selective index, then verify the
    /// remaining fields per candidate.
    fn query(&self, filter: &EventFilter) -> Vec<Event> {
        let candidate_lists: Vec<&Vec<usize>> = [
            filter.run_id.as_ref().and_then(|r| self.by_run.get(r)),
            filter.node_id.as_ref().and_then(|n| self.by_node.get(n)),
            filter.kind.and_then(|k| self.by_kind.get(&k)),
            filter.step.and_then(|s| self.by_step.get(&s)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let has_index_filter = filter.run_id.is_some()
            || filter.node_id.is_some()
            || filter.kind.is_some()
            || filter.step.is_some();
        if has_index_filter && candidate_lists.is_empty() {
            return Vec::new();
        }

        match candidate_lists.into_iter().min_by_key(|l| l.len()) {
            Some(narrowest) => narrowest
                .iter()
                .map(|&i| &self.events[i])
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            None => self.events.clone(),
        }
    }
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

struct Inner {
    capacity: usize,
    buffer: ParkingMutex<VecDeque<Event>>,
    dropped: AtomicU64,
    history: ParkingMutex<History>,
    sinks: ParkingMutex<Vec<Box<dyn EventSink>>>,
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
    worker: ParkingMutex<Option<Worker>>,
}

/// Bounded, non-blocking, query-capable emitter.
#[derive(Clone)]
pub struct BufferedEmitter {
    inner: Arc<Inner>,
}

impl Default for BufferedEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl BufferedEmitter {
    /// Create an emitter with the given buffer capacity (0 falls back to
    /// the default).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_BUFFER_CAPACITY
        } else {
            capacity
        };
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                buffer: ParkingMutex::new(VecDeque::with_capacity(capacity)),
                dropped: AtomicU64::new(0),
                history: ParkingMutex::new(History::default()),
                sinks: ParkingMutex::new(Vec::new()),
                wake_tx,
                wake_rx,
                worker: ParkingMutex::new(None),
            }),
        }
    }

    /// Attach a sink. Events drained after this call reach it.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.inner.sinks.lock().push(Box::new(sink));
    }

    /// Start the background drain task. Idempotent.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = inner.wake_rx.recv_async() => {}
                    _ = tokio::time::sleep(DRAIN_INTERVAL) => {}
                }
                Self::drain(&inner);
            }
            Self::drain(&inner);
        });
        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the background task, draining whatever remains.
    pub async fn stop(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.await;
        }
        Self::drain(&self.inner);
    }

    /// Number of events dropped to overflow since construction.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Query the delivered history.
    #[must_use]
    pub fn query(&self, filter: &EventFilter) -> Vec<Event> {
        self.inner.history.lock().query(filter)
    }

    /// All delivered events in arrival order.
    #[must_use]
    pub fn history(&self) -> Vec<Event> {
        self.inner.history.lock().events.clone()
    }

    fn drain(inner: &Inner) {
        let batch: Vec<Event> = {
            let mut buffer = inner.buffer.lock();
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        Self::deliver(inner, batch);
    }

    fn deliver(inner: &Inner, events: Vec<Event>) {
        let mut sinks = inner.sinks.lock();
        for event in &events {
            for sink in sinks.iter_mut() {
                if let Err(err) = sink.handle(event) {
                    tracing::warn!(sink = %sink.name(), error = %err, "event sink error");
                }
            }
        }
        drop(sinks);
        let mut history = inner.history.lock();
        for event in events {
            history.push(event);
        }
    }
}

#[async_trait]
impl Emitter for BufferedEmitter {
    fn emit(&self, event: Event) {
        {
            let mut buffer = self.inner.buffer.lock();
            if buffer.len() >= self.inner.capacity {
                buffer.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(event);
        }
        let _ = self.inner.wake_tx.try_send(());
    }

    async fn emit_batch(&self, events: Vec<Event>) -> Result<(), EmitError> {
        Self::deliver(&self.inner, events);
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        Self::drain(&self.inner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(run: &str, step: u64, node: &str, kind: EventKind) -> Event {
        Event::new(RunId::from(run), step, Some(NodeId::from(node)), kind, "m")
    }

    #[tokio::test]
    async fn overflow_drops_oldest_with_metric() {
        let emitter = BufferedEmitter::new(2);
        emitter.emit(ev("r", 1, "a", EventKind::NodeStart));
        emitter.emit(ev("r", 2, "b", EventKind::NodeStart));
        emitter.emit(ev("r", 3, "c", EventKind::NodeStart));
        assert_eq!(emitter.dropped(), 1);
        emitter.flush().await.unwrap();
        let history = emitter.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].step, 2);
    }

    #[tokio::test]
    async fn query_intersects_indexes() {
        let emitter = BufferedEmitter::new(16);
        emitter.emit(ev("r1", 1, "a", EventKind::NodeStart));
        emitter.emit(ev("r1", 1, "a", EventKind::NodeEnd));
        emitter.emit(ev("r1", 2, "b", EventKind::NodeStart));
        emitter.emit(ev("r2", 1, "a", EventKind::NodeStart));
        emitter.flush().await.unwrap();

        let got = emitter.query(
            &EventFilter::new()
                .run("r1")
                .node("a")
                .kind(EventKind::NodeEnd),
        );
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, EventKind::NodeEnd);

        let all_r1 = emitter.query(&EventFilter::new().run("r1"));
        assert_eq!(all_r1.len(), 3);

        let none = emitter.query(&EventFilter::new().run("r3"));
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn background_worker_forwards_to_sinks() {
        let emitter = BufferedEmitter::new(16);
        let sink = crate::events::sink::MemorySink::new();
        emitter.add_sink(sink.clone());
        emitter.start();
        emitter.emit(ev("r", 1, "a", EventKind::Route));
        emitter.stop().await;
        assert_eq!(sink.snapshot().len(), 1);
    }
}
