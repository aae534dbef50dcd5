//! Event stream shape: lifecycle coverage, query indexes, and the
//! non-blocking overflow contract.

mod common;

use std::sync::Arc;

use stepgraph::engine::EngineOptions;
use stepgraph::events::{BufferedEmitter, EventFilter, EventKind, MemorySink};
use stepgraph::graph::GraphBuilder;
use stepgraph::node::Next;
use stepgraph::types::CheckpointMode;

use common::*;

fn linear_graph() -> stepgraph::graph::Graph<FlowState> {
    GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Goto("b".into())))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Stop))
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn lifecycle_events_cover_every_step() {
    let (engine, emitter) = engine_with_events(linear_graph());
    engine.run("ev-1", FlowState::default()).await.unwrap();

    let history = emitter.history();
    let starts = history.iter().filter(|e| e.kind == EventKind::NodeStart).count();
    let ends = history.iter().filter(|e| e.kind == EventKind::NodeEnd).count();
    let routes = history.iter().filter(|e| e.kind == EventKind::Route).count();
    assert_eq!(starts, 2);
    assert_eq!(ends, 2);
    assert_eq!(routes, 1, "only a routes onward; b stops");

    // node_end carries duration and the post-merge state hash.
    let end = history
        .iter()
        .find(|e| e.kind == EventKind::NodeEnd)
        .unwrap();
    assert!(end.metadata.contains_key("duration_ms"));
    assert!(end.metadata.contains_key("state_hash"));
}

#[tokio::test]
async fn per_node_queries_use_the_index() {
    let (engine, emitter) = engine_with_events(linear_graph());
    engine.run("ev-2", FlowState::default()).await.unwrap();
    engine.run("ev-2b", FlowState::default()).await.unwrap();

    let b_events = emitter.query(&EventFilter::new().run("ev-2").node("b"));
    assert!(!b_events.is_empty());
    assert!(b_events.iter().all(|e| {
        e.run_id.as_str() == "ev-2" && e.node_id.as_ref().map(|n| n.as_str()) == Some("b")
    }));
}

#[tokio::test]
async fn checkpoint_events_fire_per_commit() {
    let graph = linear_graph();
    let emitter = BufferedEmitter::new(1024);
    let engine = stepgraph::engine::Engine::new(graph, reduce)
        .with_emitter(Arc::new(emitter.clone()))
        .with_options(EngineOptions::new().with_checkpoint_mode(CheckpointMode::EveryStep));
    engine.run("ev-3", FlowState::default()).await.unwrap();

    let checkpoints = emitter.query(&EventFilter::new().run("ev-3").kind(EventKind::Checkpoint));
    assert_eq!(checkpoints.len(), 2);
    assert!(checkpoints.iter().all(|e| {
        e.metadata["idempotency_key"]
            .as_str()
            .is_some_and(|k| k.starts_with("sha256:"))
    }));
}

#[tokio::test]
async fn sinks_receive_forwarded_batches() {
    let sink = MemorySink::new();
    let emitter = BufferedEmitter::new(1024);
    emitter.add_sink(sink.clone());

    let engine = stepgraph::engine::Engine::new(linear_graph(), reduce)
        .with_emitter(Arc::new(emitter.clone()));
    engine.run("ev-4", FlowState::default()).await.unwrap();

    // The engine flushes on completion; the sink saw everything the
    // history did.
    assert_eq!(sink.snapshot().len(), emitter.history().len());
}

#[tokio::test]
async fn overflow_drops_oldest_and_counts() {
    use stepgraph::events::{Emitter, Event};
    use stepgraph::types::RunId;

    let emitter = BufferedEmitter::new(4);
    for step in 0..10u64 {
        emitter.emit(Event::new(
            RunId::from("ev-5"),
            step,
            None,
            EventKind::Route,
            "tick",
        ));
    }
    assert_eq!(emitter.dropped(), 6);
    emitter.flush().await.unwrap();
    let history = emitter.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].step, 6, "oldest events were dropped first");
}
