use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stepgraph::engine::Engine;
use stepgraph::events::BufferedEmitter;
use stepgraph::graph::Graph;

/// Test state: a counter, an ordered visit log, and a note map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub counter: i64,
    pub visits: Vec<String>,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

impl FlowState {
    pub fn with_counter(counter: i64) -> Self {
        Self {
            counter,
            ..Default::default()
        }
    }
}

/// Field-wise reducer: counters sum, visit logs append, notes merge with
/// delta keys winning.
pub fn reduce(state: &mut FlowState, delta: FlowState) {
    state.counter += delta.counter;
    state.visits.extend(delta.visits);
    state.notes.extend(delta.notes);
}

/// Engine over [`FlowState`] with defaults (memory store, null emitter).
pub fn engine(graph: Graph<FlowState>) -> Engine<FlowState> {
    Engine::new(graph, reduce)
}

/// Engine wired to a buffered emitter so tests can query event history.
pub fn engine_with_events(graph: Graph<FlowState>) -> (Engine<FlowState>, BufferedEmitter) {
    let emitter = BufferedEmitter::new(4096);
    let engine = Engine::new(graph, reduce).with_emitter(Arc::new(emitter.clone()));
    (engine, emitter)
}
