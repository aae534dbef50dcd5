//! Graph builder validation: structural rejection at registration time,
//! advisory warnings from validate().

mod common;

use std::sync::Arc;

use stepgraph::graph::{GraphBuilder, GraphError};
use stepgraph::node::Next;

use common::*;

#[test]
fn duplicate_node_ids_are_rejected() {
    let err = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .add_node("a", Visit::new("a-again", Next::Stop))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateNode { .. }));
}

#[test]
fn edges_require_registered_endpoints() {
    let err = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .connect("a", "missing")
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { .. }));

    let err = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .connect("missing", "a")
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { .. }));
}

#[test]
fn start_must_be_registered() {
    let err = GraphBuilder::<FlowState>::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .start_at("missing")
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { .. }));
}

#[test]
fn build_requires_a_start_node() {
    let err = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Stop))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::MissingStart));
}

#[test]
fn validate_warns_on_orphans_and_cycles() {
    let builder = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Edges))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Edges))
        .unwrap()
        .add_node("island", Visit::new("island", Next::Stop))
        .unwrap()
        .connect("a", "b")
        .unwrap()
        .connect("b", "a")
        .unwrap()
        .start_at("a")
        .unwrap();

    let warnings = builder.validate();
    assert!(warnings.iter().any(|w| w.contains("island")));
    assert!(warnings.iter().any(|w| w.contains("cycle")));
}

#[test]
fn clean_graphs_validate_without_warnings() {
    let builder = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Edges))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Stop))
        .unwrap()
        .connect("a", "b")
        .unwrap()
        .start_at("a")
        .unwrap();
    assert!(builder.validate().is_empty());
}

#[test]
fn conditional_edges_register_like_plain_ones() {
    let graph = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Edges))
        .unwrap()
        .add_node("b", Visit::new("b", Next::Stop))
        .unwrap()
        .connect_when("a", "b", Arc::new(|s: &FlowState| s.counter > 0))
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edges_from(&"a".into()).len(), 1);
    assert!(graph.edges_from(&"b".into()).is_empty());
}
