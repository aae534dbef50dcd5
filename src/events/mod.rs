//! Observability event stream.
//!
//! Engine workers emit structured [`Event`]s at node start/end, on
//! retries, routing, errors, and checkpoint commits. Emission is
//! non-blocking from the worker's perspective; the buffered emitter owns
//! the bounded buffer and the background task that fans batches out to
//! sinks. See the module docs on [`buffer`] and [`outbox`] for delivery
//! semantics.

pub mod buffer;
pub mod emitter;
pub mod event;
pub mod outbox;
pub mod sink;

pub use buffer::{BufferedEmitter, EventFilter};
pub use emitter::{EmitError, Emitter, NullEmitter};
pub use event::{Event, EventKind};
pub use outbox::OutboxRelay;
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, TracingSink};
