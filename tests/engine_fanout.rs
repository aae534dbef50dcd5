//! Fan-out determinism: sibling deltas merge in ascending order-key
//! order, bit-identically for any worker pool size.

mod common;

use stepgraph::engine::EngineOptions;
use stepgraph::graph::{Graph, GraphBuilder};
use stepgraph::node::Next;
use stepgraph::ordering;

use common::*;

fn fanout_graph(children: &[&str]) -> Graph<FlowState> {
    let mut builder = GraphBuilder::new()
        .add_node(
            "a",
            Visit::new(
                "a",
                Next::Many(children.iter().map(|c| (*c).into()).collect()),
            ),
        )
        .unwrap();
    for child in children {
        builder = builder
            .add_node(*child, Visit::new(*child, Next::Stop))
            .unwrap();
    }
    builder.start_at("a").unwrap().build().unwrap()
}

/// The order the engine must merge the children of `run_id`'s root
/// fan-out, derived from the documented key chain.
fn expected_child_order(run_id: &str, children: &[&str]) -> Vec<String> {
    let parent = ordering::root_key(run_id);
    let mut keyed: Vec<(u64, &str)> = children
        .iter()
        .enumerate()
        .map(|(index, name)| (ordering::child_key(parent, index as u64), *name))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, name)| name.to_string()).collect()
}

#[tokio::test]
async fn sibling_deltas_merge_in_order_key_order() {
    let children = ["b", "c", "d"];
    let run_id = "fanout-1";

    let final_state = engine(fanout_graph(&children))
        .run(run_id, FlowState::default())
        .await
        .unwrap();

    assert_eq!(final_state.counter, 4);
    let mut expected = vec!["a".to_string()];
    expected.extend(expected_child_order(run_id, &children));
    assert_eq!(final_state.visits, expected);
}

#[tokio::test]
async fn merge_order_is_identical_for_any_pool_size() {
    let children = ["b", "c", "d", "e", "f", "g"];
    let run_id = "fanout-2";

    let mut outcomes = Vec::new();
    for pool in [0usize, 1, 2, 4, 8] {
        let engine = engine(fanout_graph(&children))
            .with_options(EngineOptions::new().with_max_concurrent(pool));
        let state = engine.run(run_id, FlowState::default()).await.unwrap();
        outcomes.push((pool, state));
    }

    let (_, reference) = &outcomes[0];
    for (pool, state) in &outcomes {
        assert_eq!(
            state, reference,
            "pool size {pool} diverged from sequential execution"
        );
    }
}

#[tokio::test]
async fn nested_fanouts_stay_deterministic() {
    // a fans to b and c; b fans to d and e. Merge order must follow the
    // key chain, never wall-clock completion.
    let build = |pool: usize| {
        let graph = GraphBuilder::new()
            .add_node(
                "a",
                Visit::new("a", Next::Many(vec!["b".into(), "c".into()])),
            )
            .unwrap()
            .add_node(
                "b",
                Visit::new("b", Next::Many(vec!["d".into(), "e".into()])),
            )
            .unwrap()
            .add_node("c", Visit::new("c", Next::Stop))
            .unwrap()
            .add_node("d", Visit::new("d", Next::Stop))
            .unwrap()
            .add_node("e", Visit::new("e", Next::Stop))
            .unwrap()
            .start_at("a")
            .unwrap()
            .build()
            .unwrap();
        engine(graph).with_options(EngineOptions::new().with_max_concurrent(pool))
    };

    let sequential = build(0).run("fanout-3", FlowState::default()).await.unwrap();
    let parallel = build(6).run("fanout-3", FlowState::default()).await.unwrap();

    assert_eq!(sequential.counter, 5);
    assert_eq!(sequential, parallel);
}

#[tokio::test]
async fn empty_fanout_terminates_the_branch() {
    let graph = GraphBuilder::new()
        .add_node("a", Visit::new("a", Next::Many(Vec::new())))
        .unwrap()
        .start_at("a")
        .unwrap()
        .build()
        .unwrap();

    let final_state = engine(graph)
        .run("fanout-4", FlowState::default())
        .await
        .unwrap();
    assert_eq!(final_state.counter, 1);
    assert_eq!(final_state.visits, vec!["a"]);
}
