//! Output targets for the buffered emitter.
//!
//! A sink consumes full [`Event`] objects and decides how to serialize or
//! forward them. Sinks may block; the buffered emitter only calls them from
//! its background task, never from engine workers.

use parking_lot::Mutex as ParkingMutex;
use std::any::type_name;
use std::io::{self, Result as IoResult, Write};
use std::sync::Arc;

use super::event::Event;

/// Abstraction over an output target that consumes full Event objects.
pub trait EventSink: Send + Sync {
    /// Handle a structured event. The sink decides how to render it.
    fn handle(&mut self, event: &Event) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// Sink forwarding events into the `tracing` subscriber.
///
/// Each event becomes one `info!` record under the `stepgraph::events`
/// target with the run, step, node, and kind as fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        tracing::info!(
            target: "stepgraph::events",
            run = %event.run_id,
            step = event.step,
            node = event.node_id.as_ref().map(|n| n.as_str()).unwrap_or("-"),
            kind = %event.kind,
            "{}",
            event.message
        );
        Ok(())
    }

    fn name(&self) -> String {
        "TracingSink".to_string()
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<Event>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events. Clones the internal buffer so
    /// callers can inspect state without holding the mutex.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> String {
        "MemorySink".to_string()
    }
}

/// JSON Lines sink for machine-readable structured logging.
///
/// One JSON object per line, suited to log aggregation systems, stream
/// processing, and structured assertions in automation.
pub struct JsonLinesSink {
    handle: Box<dyn io::Write + Send + Sync>,
}

impl JsonLinesSink {
    /// Create a sink over any writer.
    #[must_use]
    pub fn new(handle: Box<dyn io::Write + Send + Sync>) -> Self {
        Self { handle }
    }

    /// Write JSON lines to stdout.
    #[must_use]
    pub fn to_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write JSON lines to a file (created or truncated).
    pub fn to_file(path: impl AsRef<std::path::Path>) -> IoResult<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        let json = event
            .to_json_string()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.handle, "{json}")?;
        self.handle.flush()
    }

    fn name(&self) -> String {
        "JsonLinesSink".to_string()
    }
}

/// Channel-based sink for streaming events to async consumers.
///
/// Forwards each event into a flume channel; useful for live dashboards,
/// SSE endpoints, or test harnesses that want to await events.
pub struct ChannelSink {
    tx: flume::Sender<Event>,
}

impl ChannelSink {
    /// Create a sink that forwards events to the given channel.
    #[must_use]
    pub fn new(tx: flume::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &Event) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }

    fn name(&self) -> String {
        "ChannelSink".to_string()
    }
}
