//! Run and resume entry points.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::instrument;

use super::cancel::CancelToken;
use super::core::RunCore;
use super::worker::worker_loop;
use super::Engine;
use crate::checkpoint::PersistedWorkItem;
use crate::error::{EngineError, RunError};
use crate::frontier::WorkItem;
use crate::ordering;
use crate::replay::RecordLog;
use crate::state::RunState;
use crate::types::{ReplayMode, RunId};

impl<S: RunState> Engine<S> {
    /// Execute a run to completion: seed the frontier with the graph's
    /// start node and return the final merged state, or the first terminal
    /// error paired with the state merged so far.
    pub async fn run(
        &self,
        run_id: impl Into<RunId>,
        initial_state: S,
    ) -> Result<S, RunError<S>> {
        self.run_with_cancellation(run_id, initial_state, CancelToken::new())
            .await
    }

    /// [`run`](Self::run) with an externally held cancellation token.
    /// Cancelling it ends the run with `EngineError::Cancelled`.
    #[instrument(skip(self, run_id, initial_state, cancel), fields(run = tracing::field::Empty))]
    pub async fn run_with_cancellation(
        &self,
        run_id: impl Into<RunId>,
        initial_state: S,
        cancel: CancelToken,
    ) -> Result<S, RunError<S>> {
        let run_id = run_id.into();
        tracing::Span::current().record("run", run_id.as_str());

        let rng_seed = ordering::run_seed(run_id.as_str());
        let recorder = Arc::new(match self.options.replay_mode {
            ReplayMode::Off => RecordLog::recording(),
            mode => RecordLog::with_mode(mode, Vec::new()),
        });

        let core = self.build_core(run_id.clone(), initial_state, recorder, rng_seed, 0, cancel);

        let root = WorkItem {
            node_id: self.graph.start().clone(),
            step: core.next_step(),
            order_key: ordering::root_key(run_id.as_str()),
            seq: core.next_seq(),
            state: core.copy(&core.state.lock()),
            attempt: 0,
            parent: None,
        };
        if let Err(err) = core.schedule(root).await {
            let state = core.state.lock().clone();
            return Err(RunError::new(err, state));
        }

        self.drive(core).await
    }

    /// Resume a run from its latest committed checkpoint.
    pub async fn resume(&self, run_id: impl Into<RunId>) -> Result<S, RunError<S>> {
        self.resume_inner(run_id.into(), None).await
    }

    /// Resume a run from the checkpoint committed at a specific step.
    /// Steps after that bundle re-execute; their commit attempts land on
    /// already-used idempotency keys and are skipped.
    pub async fn resume_at(
        &self,
        run_id: impl Into<RunId>,
        step: u64,
    ) -> Result<S, RunError<S>> {
        self.resume_inner(run_id.into(), Some(step)).await
    }

    #[instrument(skip(self), fields(run = %run_id))]
    async fn resume_inner(&self, run_id: RunId, step: Option<u64>) -> Result<S, RunError<S>> {
        let bundle = self
            .store
            .load_checkpoint(&run_id, step)
            .await
            .map_err(|e| RunError::without_state(e.into()))?
            .ok_or_else(|| {
                RunError::without_state(EngineError::Store(crate::store::StoreError::NotFound {
                    run_id: run_id.clone(),
                }))
            })?;

        let state: S = serde_json::from_value(bundle.state.clone())
            .map_err(|e| RunError::without_state(EngineError::Serde(e)))?;

        // The recorded-I/O log is cumulative: the latest bundle carries a
        // superset of every earlier one. Replaying from an early
        // checkpoint still serves recordings captured by later steps.
        let recordings = if self.options.replay_mode == ReplayMode::Off || step.is_none() {
            bundle.recorded_ios.clone()
        } else {
            match self.store.load_checkpoint(&run_id, None).await {
                Ok(Some(latest)) => latest.recorded_ios,
                _ => bundle.recorded_ios.clone(),
            }
        };
        let recorder = Arc::new(RecordLog::with_mode(self.options.replay_mode, recordings));

        // Fresh step ids must not collide with persisted ones.
        let step_floor = bundle
            .frontier
            .iter()
            .map(|item| item.step)
            .chain(std::iter::once(bundle.step))
            .max()
            .unwrap_or(bundle.step);

        let core = self.build_core(
            run_id,
            state,
            recorder,
            bundle.rng_seed,
            step_floor,
            CancelToken::new(),
        );

        // Re-enqueue the persisted frontier ascending, assigning fresh
        // insertion sequences in the same order.
        let mut frontier = bundle.frontier;
        frontier.sort_by_key(|item| item.order_key);
        for persisted in frontier {
            let item = match restore_item(&core, persisted) {
                Ok(item) => item,
                Err(err) => {
                    let state = core.state.lock().clone();
                    return Err(RunError::new(err, state));
                }
            };
            if let Err(err) = core.schedule(item).await {
                let state = core.state.lock().clone();
                return Err(RunError::new(err, state));
            }
        }

        if !core.has_live_items() {
            // The run had already finished; nothing to re-execute.
            let state = core.state.lock().clone();
            return Ok(state);
        }

        self.drive(core).await
    }

    fn build_core(
        &self,
        run_id: RunId,
        initial_state: S,
        recorder: Arc<RecordLog>,
        rng_seed: u64,
        step_floor: u64,
        cancel: CancelToken,
    ) -> Arc<RunCore<S>> {
        Arc::new(RunCore::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.reducer),
            Arc::clone(&self.store),
            Arc::clone(&self.emitter),
            self.options.clone(),
            run_id,
            initial_state,
            recorder,
            rng_seed,
            step_floor,
            cancel,
        ))
    }

    async fn drive(&self, core: Arc<RunCore<S>>) -> Result<S, RunError<S>> {
        let worker_count = core.options.max_concurrent.max(1);
        let mut workers = JoinSet::new();
        for index in 0..worker_count {
            workers.spawn(worker_loop(Arc::clone(&core), index));
        }

        let budget = core.options.run_wall_clock_budget;
        let finished = tokio::time::timeout(budget, async {
            tokio::select! {
                () = core.done_notify.notified() => {}
                _ = core.err_rx.recv_async() => {}
                () = core.cancel.cancelled() => {
                    core.terminal(EngineError::Cancelled);
                }
            }
        })
        .await;

        if finished.is_err() {
            core.terminal(EngineError::WallClockBudget {
                budget_ms: budget.as_millis() as u64,
            });
        }

        // Drain: unblock queued waiters and join every worker so no task
        // outlives the run.
        core.release_workers();
        while workers.join_next().await.is_some() {}

        let _ = self.emitter.flush().await;

        let state = core.state.lock().clone();
        match core.take_error() {
            Some(error) => Err(RunError::new(error, state)),
            None => Ok(state),
        }
    }
}

fn restore_item<S: RunState>(
    core: &Arc<RunCore<S>>,
    persisted: PersistedWorkItem,
) -> Result<WorkItem<S>, EngineError> {
    let state: S = serde_json::from_value(persisted.state)?;
    Ok(WorkItem {
        node_id: persisted.node_id,
        step: persisted.step,
        order_key: persisted.order_key,
        seq: core.next_seq(),
        state,
        attempt: persisted.attempt,
        parent: persisted.parent,
    })
}
