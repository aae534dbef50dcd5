//! # stepgraph: deterministic graph workflow execution
//!
//! stepgraph is an in-process orchestration engine for stateful,
//! graph-shaped workflows over a user-supplied typed state. Nodes (LLM
//! calls, tool invocations, plain logic, fan-outs) are connected by
//! conditional edges; the engine drives each run deterministically,
//! persists progress after every step, resumes from any checkpoint, and
//! commits each step exactly once across process crashes.
//!
//! ## Core concepts
//!
//! - **Nodes**: async units of work receiving an isolated state snapshot
//!   and returning a delta plus a routing decision
//! - **Reducer**: pure merge function folding deltas into the accumulated
//!   state, applied in deterministic order-key order
//! - **Frontier**: priority queue of pending work with ordering
//!   guarantees and bounded backpressure
//! - **Checkpoints**: atomic bundles with idempotency keys; duplicate
//!   commits on resume are skipped, never re-run
//! - **Record/replay**: external calls captured per `(node, attempt)` and
//!   served back bit-for-bit
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use stepgraph::engine::Engine;
//! use stepgraph::graph::GraphBuilder;
//! use stepgraph::node::{Node, NodeContext, NodeError, NodeOutput};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct Review {
//!     findings: Vec<String>,
//! }
//!
//! struct Scan;
//!
//! #[async_trait]
//! impl Node<Review> for Scan {
//!     async fn run(&self, _ctx: NodeContext, _: Review) -> Result<NodeOutput<Review>, NodeError> {
//!         Ok(NodeOutput::stop().with_delta(Review {
//!             findings: vec!["unused import".into()],
//!         }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_node("scan", Scan)?
//!     .start_at("scan")?
//!     .build()?;
//!
//! let engine = Engine::new(graph, |state: &mut Review, delta: Review| {
//!     state.findings.extend(delta.findings);
//! });
//!
//! let final_state = engine.run("review-42", Review::default()).await?;
//! assert_eq!(final_state.findings.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`graph`] - node registry, edges, validation
//! - [`node`] - the node contract, routing decisions, execution context
//! - [`reducers`] - merge strategies, including JSON policy tables
//! - [`engine`] - construction, options, run/resume
//! - [`frontier`] - the ordered work queue
//! - [`checkpoint`] / [`store`] - bundles, idempotency keys, persistence
//! - [`replay`] - record/replay of external I/O
//! - [`events`] - the observability event stream
//! - [`retry`] - retry policies and backoff
//! - [`llm`] - the chat-model collaborator contract

pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod frontier;
pub mod graph;
pub mod llm;
pub mod node;
pub mod ordering;
pub mod reducers;
pub mod replay;
pub mod retry;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;

pub use engine::{CancelToken, Engine, EngineOptions};
pub use error::{EngineError, RunError};
pub use graph::{Graph, GraphBuilder, GraphError};
pub use node::{Next, Node, NodeContext, NodeEffects, NodeError, NodeOutput, NodePolicy};
pub use types::{CheckpointMode, NodeId, ReplayMode, RunId};
