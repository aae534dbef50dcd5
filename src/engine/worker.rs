//! Worker loop: dequeue, execute, retry, commit, route.
//!
//! Workers compete on the frontier. For each item: run the node with a
//! per-node deadline against the item's own state snapshot; on failure
//! consult the retry policy, sleep the jittered backoff, and re-enqueue
//! the same item with `attempt + 1`; on success wait for the commit gate,
//! merge the delta, expand routing into new work items, persist, and emit
//! events.
//!
//! Routing runs against a tentative copy of the merged state, so an edge
//! predicate that panics leaves the accumulated state untouched and the
//! failure behaves like any other node error (retryable per policy).

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use super::core::RunCore;
use crate::error::EngineError;
use crate::events::{Event, EventKind};
use crate::frontier::WorkItem;
use crate::node::{Next, NodeContext, NodeEffects, NodeError, NodeOutput, NodePolicy};
use crate::ordering;
use crate::replay::ReplayError;
use crate::retry::RetryPolicy;
use crate::state::RunState;
use crate::store::StoreError;
use crate::types::{CheckpointMode, NodeId};

/// Why a commit attempt did not complete.
enum CommitFail {
    /// Behaves like a node failure: eligible for retry.
    Retryable(NodeError),
    /// Ends the run.
    Fatal(EngineError),
}

pub(crate) async fn worker_loop<S: RunState>(core: Arc<RunCore<S>>, worker_index: usize) {
    let mut rng = StdRng::seed_from_u64(ordering::worker_seed(core.rng_seed, worker_index));
    let mut shutdown = core.shutdown_watch();
    loop {
        let item = match core.frontier.dequeue(&mut shutdown).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                core.terminal(EngineError::FrontierDesync);
                break;
            }
        };
        core.in_flight.fetch_add(1, Ordering::AcqRel);
        process_item(&core, &mut rng, item).await;
        core.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn process_item<S: RunState>(core: &Arc<RunCore<S>>, rng: &mut StdRng, item: WorkItem<S>) {
    let key = item.key();

    if item.step > core.options.max_steps {
        core.terminal(EngineError::MaxSteps {
            max_steps: core.options.max_steps,
        });
        core.finish_item(key);
        return;
    }

    if core.cancel.is_cancelled() {
        core.terminal(EngineError::Cancelled);
        core.finish_item(key);
        return;
    }

    let Some(node) = core.graph.node(&item.node_id).cloned() else {
        core.terminal(EngineError::NodeUnknown {
            node: item.node_id.clone(),
        });
        core.finish_item(key);
        return;
    };

    if item.attempt == 0 {
        core.emitter.emit(
            Event::new(
                core.run_id.clone(),
                item.step,
                Some(item.node_id.clone()),
                EventKind::NodeStart,
                "node started",
            )
            .with_meta("order_key", json!(item.order_key)),
        );
    }

    let started = Instant::now();
    let policy = node.policy();
    let timeout = policy.timeout.unwrap_or(core.options.node_timeout);
    let ctx = NodeContext {
        run_id: core.run_id.clone(),
        node_id: item.node_id.clone(),
        step: item.step,
        attempt: item.attempt,
        emitter: Arc::clone(&core.emitter),
        recorder: Arc::clone(&core.recorder),
        cancel: core.cancel.clone(),
    };

    let attempt = async {
        let snapshot = core.copy(&item.state);
        match tokio::time::timeout(timeout, node.run(ctx, snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout {
                elapsed_ms: timeout.as_millis() as u64,
            }),
        }
    }
    .await;

    let failure = match attempt {
        Ok(output) => match commit(core, &item, &policy, node.effects(), output, started).await {
            // The merge retired the live entry; nothing left to do.
            Ok(()) => return,
            Err(CommitFail::Retryable(err)) => err,
            Err(CommitFail::Fatal(err)) => {
                core.terminal(err);
                core.finish_item(key);
                return;
            }
        },
        Err(err) => err,
    };

    let retry = policy.retry.clone().unwrap_or_else(RetryPolicy::never);
    if !schedule_retry(core, rng, item, &retry, failure).await {
        core.finish_item(key);
    }
}

/// Try to schedule a retry. Returns `true` when the item went back on the
/// queue (its live entry stays put); `false` means the failure was
/// terminal and the caller retires the item.
async fn schedule_retry<S: RunState>(
    core: &Arc<RunCore<S>>,
    rng: &mut StdRng,
    mut item: WorkItem<S>,
    retry: &RetryPolicy,
    error: NodeError,
) -> bool {
    let next_attempt = item.attempt + 1;
    let eligible =
        !core.cancel.is_cancelled() && retry.should_retry(&error) && next_attempt < retry.max_attempts;
    if !eligible {
        core.terminal(terminal_node_error(&item.node_id, error));
        return false;
    }

    let delay = retry.backoff_delay(item.attempt, rng);
    core.emitter.emit(
        Event::new(
            core.run_id.clone(),
            item.step,
            Some(item.node_id.clone()),
            EventKind::Retry,
            format!("retrying after {} ms", delay.as_millis()),
        )
        .with_meta("attempt", json!(next_attempt))
        .with_meta("delay_ms", json!(delay.as_millis() as u64))
        .with_meta("error", json!(error.to_string())),
    );

    // No retries after cancellation; the sleep races the cancel signal.
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = core.cancel.cancelled() => {
            core.terminal(EngineError::Cancelled);
            return false;
        }
    }

    item.attempt = next_attempt;
    match core.requeue(item).await {
        Ok(()) => true,
        Err(err) => {
            core.terminal(err);
            false
        }
    }
}

fn terminal_node_error(node: &NodeId, error: NodeError) -> EngineError {
    match error {
        NodeError::Replay(ReplayError::Mismatch { node, attempt }) => {
            EngineError::ReplayMismatch { node, attempt }
        }
        NodeError::Replay(ReplayError::Missing { node, attempt }) => {
            EngineError::ReplayMissing { node, attempt }
        }
        source => EngineError::Node {
            node: node.clone(),
            source,
        },
    }
}

async fn commit<S: RunState>(
    core: &Arc<RunCore<S>>,
    item: &WorkItem<S>,
    policy: &NodePolicy,
    effects: NodeEffects,
    output: NodeOutput<S>,
    started: Instant,
) -> Result<(), CommitFail> {
    // Cancellation is terminal: in-flight commits may finish but no new
    // one begins.
    if core.cancel.is_cancelled() {
        return Err(CommitFail::Fatal(EngineError::Cancelled));
    }
    core.wait_gate(item.key()).await.map_err(CommitFail::Fatal)?;

    let had_delta = output.delta.is_some();
    // Merge and route on a tentative copy: a routing failure must leave
    // the accumulated state untouched so the item can retry cleanly.
    let (targets, successor_states, merged_snapshot) = {
        let mut state = core.state.lock();
        let mut tentative = core.copy(&state);
        if let Some(delta) = output.delta {
            core.reducer.apply(&mut tentative, delta);
        }
        let targets = resolve_targets(core, &item.node_id, &output.next, &tentative)?;
        let successor_states: Vec<S> = targets.iter().map(|_| core.copy(&tentative)).collect();
        let merged_snapshot = core.copy(&tentative);
        *state = tentative;
        (targets, successor_states, merged_snapshot)
    };

    let state_json = serde_json::to_value(&merged_snapshot)
        .map_err(|e| CommitFail::Fatal(EngineError::Serde(e)))?;
    let state_hash = format!("{:016x}", ordering::fnv1a64(state_json.to_string().as_bytes()));

    // Every successor starts from the just-merged state, so its persisted
    // snapshot is the same JSON.
    let mut successor_items = Vec::with_capacity(targets.len());
    let mut successor_entries = Vec::with_capacity(targets.len());
    for (index, (target, state)) in targets.iter().zip(successor_states).enumerate() {
        let successor = WorkItem {
            node_id: target.clone(),
            step: core.next_step(),
            order_key: ordering::child_key(item.order_key, index as u64),
            seq: core.next_seq(),
            state,
            attempt: 0,
            parent: Some(item.node_id.clone()),
        };
        successor_entries.push((
            successor.key(),
            crate::checkpoint::PersistedWorkItem {
                node_id: successor.node_id.clone(),
                step: successor.step,
                order_key: successor.order_key,
                state: state_json.clone(),
                attempt: 0,
                parent: successor.parent.clone(),
            },
        ));
        successor_items.push(successor);
    }

    // One atomic window: successors become live, this item's delta is
    // merged-and-retired, and the bundle frontier is captured.
    let frontier_snapshot = core.complete_merge(item.key(), &successor_entries);

    for successor in successor_items {
        core.enqueue(successor).await.map_err(CommitFail::Fatal)?;
    }

    if !targets.is_empty() {
        core.emitter.emit(
            Event::new(
                core.run_id.clone(),
                item.step,
                Some(item.node_id.clone()),
                EventKind::Route,
                format!("routed to {} successor(s)", targets.len()),
            )
            .with_meta(
                "targets",
                json!(targets.iter().map(NodeId::as_str).collect::<Vec<_>>()),
            ),
        );
    }

    persist_step(core, item, policy, effects, &state_json, frontier_snapshot)
        .await
        .map_err(CommitFail::Fatal)?;

    core.emitter.emit(
        Event::new(
            core.run_id.clone(),
            item.step,
            Some(item.node_id.clone()),
            EventKind::NodeEnd,
            "node completed",
        )
        .with_meta("duration_ms", json!(started.elapsed().as_millis() as u64))
        .with_meta("attempt", json!(item.attempt))
        .with_meta("merged_delta", json!(had_delta))
        .with_meta("state_hash", json!(state_hash)),
    );

    Ok(())
}

fn resolve_targets<S: RunState>(
    core: &Arc<RunCore<S>>,
    node_id: &NodeId,
    next: &Next,
    merged: &S,
) -> Result<Vec<NodeId>, CommitFail> {
    let targets = match next {
        Next::Stop => Vec::new(),
        Next::Goto(id) => vec![id.clone()],
        // An empty fan-out terminates the branch like Stop.
        Next::Many(ids) => ids.clone(),
        Next::Edges => {
            let edges = core.graph.edges_from(node_id);
            if edges.is_empty() {
                // A sink node deferring to edges simply stops.
                Vec::new()
            } else {
                let mut taken = Vec::new();
                for edge in edges {
                    let matched = match &edge.when {
                        None => true,
                        Some(predicate) => {
                            std::panic::catch_unwind(AssertUnwindSafe(|| predicate(merged)))
                                .map_err(|payload| {
                                    CommitFail::Retryable(NodeError::RoutePanic {
                                        detail: panic_detail(payload.as_ref()),
                                    })
                                })?
                        }
                    };
                    if matched {
                        taken.push(edge.to.clone());
                    }
                }
                if taken.is_empty() {
                    return Err(CommitFail::Fatal(EngineError::NoRoute {
                        node: node_id.clone(),
                    }));
                }
                taken
            }
        }
    };

    for target in &targets {
        if !core.graph.contains(target) {
            return Err(CommitFail::Fatal(EngineError::NodeUnknown {
                node: target.clone(),
            }));
        }
    }
    Ok(targets)
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn persist_step<S: RunState>(
    core: &Arc<RunCore<S>>,
    item: &WorkItem<S>,
    policy: &NodePolicy,
    effects: NodeEffects,
    state_json: &serde_json::Value,
    frontier_snapshot: Vec<crate::checkpoint::PersistedWorkItem>,
) -> Result<(), EngineError> {
    if core.options.checkpoint_mode == CheckpointMode::Off {
        return Ok(());
    }

    core.store
        .save_step(&core.run_id, item.step, &item.node_id, state_json)
        .await?;

    // A node requiring idempotent commits always gets a bundle, even
    // under labels-only checkpointing.
    let label = match core.options.checkpoint_mode {
        CheckpointMode::Off => unreachable!("handled above"),
        CheckpointMode::EveryStep => policy.checkpoint_label.clone(),
        CheckpointMode::LabelsOnly => {
            if policy.checkpoint_label.is_none() && !effects.requires_idempotency {
                return Ok(());
            }
            policy.checkpoint_label.clone()
        }
    };

    let bundle = crate::checkpoint::CheckpointBundle::compose(
        core.run_id.clone(),
        item.step,
        label,
        state_json.clone(),
        core.rng_seed,
        frontier_snapshot,
        core.recorder.recorded_ios(),
    );

    let (message, skipped) = match core.store.save_checkpoint(&bundle).await {
        Ok(()) => ("checkpoint committed".to_string(), false),
        // Already committed by a prior process: success with skip.
        Err(StoreError::DuplicateCommit { .. }) => {
            ("duplicate checkpoint skipped".to_string(), true)
        }
        Err(err) => return Err(err.into()),
    };

    core.emitter.emit(
        Event::new(
            core.run_id.clone(),
            item.step,
            Some(item.node_id.clone()),
            EventKind::Checkpoint,
            message,
        )
        .with_meta("idempotency_key", json!(bundle.idempotency_key))
        .with_meta("skipped", json!(skipped))
        .with_meta("frontier_len", json!(bundle.frontier.len())),
    );
    Ok(())
}
