//! Linear graph execution: sequential chains merge every delta exactly
//! once and emit the expected lifecycle events.

mod common;

use stepgraph::events::EventKind;
use stepgraph::events::EventFilter;
use stepgraph::graph::GraphBuilder;
use stepgraph::node::Next;

use common::*;

#[tokio::test]
async fn two_node_chain_counts_to_two() {
    let graph = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Goto("b".into())))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Stop))
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap();

    let (engine, emitter) = engine_with_events(graph);
    let final_state = engine
        .run("linear-1", FlowState::with_counter(0))
        .await
        .unwrap();

    assert_eq!(final_state.counter, 2);
    assert_eq!(final_state.visits, vec!["a", "b"]);

    let ends = emitter.query(&EventFilter::new().run("linear-1").kind(EventKind::NodeEnd));
    assert_eq!(ends.len(), 2, "exactly one node_end per executed node");
    let starts = emitter.query(&EventFilter::new().run("linear-1").kind(EventKind::NodeStart));
    assert_eq!(starts.len(), 2);
}

#[tokio::test]
async fn unconditional_edges_route_like_goto() {
    let graph = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Edges))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Edges))
        .unwrap()
        .connect("a", "b")
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap();

    let final_state = engine(graph)
        .run("linear-2", FlowState::default())
        .await
        .unwrap();
    assert_eq!(final_state.visits, vec!["a", "b"]);
}

#[tokio::test]
async fn conditional_edges_run_in_insertion_order_taking_all_matches() {
    use std::sync::Arc;

    let graph = GraphBuilder::new()
        .add_node("router", Visit::new("router", Next::Edges))
        .unwrap()
        .add_node("small", Visit::new("small", Next::Stop))
        .unwrap()
        .add_node("large", Visit::new("large", Next::Stop))
        .unwrap()
        .connect_when("router", "small", Arc::new(|s: &FlowState| s.counter < 10))
        .unwrap()
        .connect_when("router", "large", Arc::new(|s: &FlowState| s.counter >= 1))
        .unwrap()
        .start_at("router")
        .unwrap()
        .build()
        .unwrap();

    // After router's delta merges, counter == 1: both predicates match,
    // so both edges are taken (predicate fan-out).
    let final_state = engine(graph)
        .run("linear-3", FlowState::default())
        .await
        .unwrap();
    assert_eq!(final_state.counter, 3);
    assert!(final_state.visits.contains(&"small".to_string()));
    assert!(final_state.visits.contains(&"large".to_string()));
}

#[tokio::test]
async fn initial_state_feeds_the_first_node() {
    let graph = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap();

    let final_state = engine(graph)
        .run("linear-4", FlowState::with_counter(40))
        .await
        .unwrap();
    assert_eq!(final_state.counter, 41);
}
