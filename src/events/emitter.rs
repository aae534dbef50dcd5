//! Emitter contract and the null implementation.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use super::event::Event;

/// Errors from batch emission or flushing.
#[derive(Debug, Error, Diagnostic)]
pub enum EmitError {
    /// A sink rejected events.
    #[error("event sink `{sink}` failed: {message}")]
    #[diagnostic(code(stepgraph::events::sink))]
    Sink { sink: String, message: String },

    /// The emitter's background worker is gone.
    #[error("emitter worker unavailable")]
    #[diagnostic(
        code(stepgraph::events::worker),
        help("The background forwarding task stopped; events are no longer being drained.")
    )]
    WorkerUnavailable,
}

/// Destination for engine events.
///
/// `emit` must never block the calling worker: implementations buffer or
/// drop (with a metric), they do not wait. Batch delivery and flushing are
/// async and run off the hot path.
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Accept a single event without blocking.
    fn emit(&self, event: Event);

    /// Deliver a batch to the underlying sinks.
    async fn emit_batch(&self, events: Vec<Event>) -> Result<(), EmitError>;

    /// Drain everything buffered to the sinks.
    async fn flush(&self) -> Result<(), EmitError>;
}

/// Emitter that discards everything. Production opt-out.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEmitter;

impl NullEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Emitter for NullEmitter {
    fn emit(&self, _event: Event) {}

    async fn emit_batch(&self, _events: Vec<Event>) -> Result<(), EmitError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), EmitError> {
        Ok(())
    }
}
