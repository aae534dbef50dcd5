//! The execution engine.
//!
//! [`Engine`] binds a compiled [`Graph`](crate::graph::Graph) to a
//! reducer, a store, an emitter, and options, and drives runs through a
//! worker pool over the shared frontier. One engine can execute any
//! number of runs; each run gets its own frontier, state lock, RNG seed,
//! and record/replay log.
//!
//! # Examples
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use stepgraph::engine::Engine;
//! use stepgraph::graph::GraphBuilder;
//! use stepgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct Tally {
//!     count: i64,
//! }
//!
//! struct Bump;
//!
//! #[async_trait]
//! impl Node<Tally> for Bump {
//!     async fn run(&self, _: NodeContext, _: Tally) -> Result<NodeOutput<Tally>, NodeError> {
//!         Ok(NodeOutput::stop().with_delta(Tally { count: 1 }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_node("bump", Bump)?
//!     .start_at("bump")?
//!     .build()?;
//!
//! let engine = Engine::new(graph, |state: &mut Tally, delta: Tally| {
//!     state.count += delta.count;
//! });
//! let final_state = engine.run("run-1", Tally::default()).await?;
//! assert_eq!(final_state.count, 1);
//! # Ok(())
//! # }
//! ```

mod cancel;
mod core;
mod options;
mod run;
mod worker;

pub use cancel::CancelToken;
pub use options::EngineOptions;

use std::sync::Arc;

use crate::events::{Emitter, NullEmitter};
use crate::graph::Graph;
use crate::reducers::Reducer;
use crate::state::RunState;
use crate::store::{MemoryStore, Store};

/// Stateful workflow execution engine, parameterized over the state type.
pub struct Engine<S> {
    graph: Arc<Graph<S>>,
    reducer: Arc<dyn Reducer<S>>,
    store: Arc<dyn Store>,
    emitter: Arc<dyn Emitter>,
    options: EngineOptions<S>,
}

impl<S: RunState> Engine<S> {
    /// Create an engine with an in-memory store, a null emitter, and
    /// default options. Swap collaborators with the `with_*` methods.
    pub fn new(graph: Graph<S>, reducer: impl Reducer<S> + 'static) -> Self {
        Self {
            graph: Arc::new(graph),
            reducer: Arc::new(reducer),
            store: Arc::new(MemoryStore::new()),
            emitter: Arc::new(NullEmitter::new()),
            options: EngineOptions::default(),
        }
    }

    /// Replace the persistence backend.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    /// Replace the event emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Replace the run configuration.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions<S>) -> Self {
        self.options = options;
        self
    }

    /// The engine's store, for inspection or sharing with an outbox relay.
    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// The engine's graph.
    #[must_use]
    pub fn graph(&self) -> &Graph<S> {
        &self.graph
    }

    /// The engine's options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions<S> {
        &self.options
    }
}
