//! Record and replay of external I/O.
//!
//! Every external call a recordable node makes goes through
//! [`NodeContext::recorded`](crate::node::NodeContext::recorded), which
//! lands here. In record mode the call executes and its request hash plus
//! response are appended to the run's recorded I/O. In replay mode the
//! recording is looked up by `(node, attempt)`: strict replay verifies the
//! request hash bit-for-bit, lenient replay tolerates drift and falls back
//! to live execution for missing entries.
//!
//! The lookup index is built once when a checkpoint bundle is restored and
//! is read-only afterwards; only the append log takes a lock.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::node::NodeError;
use crate::types::{NodeId, ReplayMode};

/// One captured external call, keyed by `(node, attempt)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedIo {
    pub node_id: NodeId,
    pub attempt: u32,
    /// `"sha256:" + hex` digest of the canonical request JSON.
    pub request_hash: String,
    pub response: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Hash of a request payload, in the persisted `"sha256:..."` form.
///
/// `serde_json` renders maps with sorted keys, so structurally equal
/// requests hash identically regardless of construction order.
#[must_use]
pub fn request_hash(request: &Value) -> String {
    let canonical = request.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Replay failures. Both signal drift between the code under replay and
/// the recording set, and are terminal.
#[derive(Debug, Error, Diagnostic)]
pub enum ReplayError {
    /// The recording exists but was made for a different request.
    #[error("recorded request hash mismatch for node `{node}` attempt {attempt}")]
    #[diagnostic(
        code(stepgraph::replay::mismatch),
        help("The node now issues a different request than when recorded; re-record the run.")
    )]
    Mismatch { node: NodeId, attempt: u32 },

    /// No recording exists for this call.
    #[error("no recording for node `{node}` attempt {attempt}")]
    #[diagnostic(
        code(stepgraph::replay::missing),
        help("The recording set does not cover this call; re-record or run lenient replay.")
    )]
    Missing { node: NodeId, attempt: u32 },
}

/// The run's record/replay log.
pub struct RecordLog {
    mode: ReplayMode,
    loaded: Vec<RecordedIo>,
    index: FxHashMap<(NodeId, u32), usize>,
    appended: ParkingMutex<Vec<RecordedIo>>,
    live_calls: AtomicU64,
}

impl RecordLog {
    /// Fresh log in record mode (no recordings to serve).
    #[must_use]
    pub fn recording() -> Self {
        Self::with_mode(ReplayMode::Off, Vec::new())
    }

    /// Log restored from a checkpoint bundle, serving `ios` under the
    /// given replay mode.
    #[must_use]
    pub fn with_mode(mode: ReplayMode, ios: Vec<RecordedIo>) -> Self {
        let index = ios
            .iter()
            .enumerate()
            .map(|(i, io)| ((io.node_id.clone(), io.attempt), i))
            .collect();
        Self {
            mode,
            loaded: ios,
            index,
            appended: ParkingMutex::new(Vec::new()),
            live_calls: AtomicU64::new(0),
        }
    }

    /// The configured replay mode.
    #[must_use]
    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    /// Number of external calls actually executed (zero for a fully
    /// covered strict replay).
    #[must_use]
    pub fn live_calls(&self) -> u64 {
        self.live_calls.load(Ordering::Relaxed)
    }

    /// Everything the run has recorded: restored entries followed by new
    /// appends, in capture order.
    #[must_use]
    pub fn recorded_ios(&self) -> Vec<RecordedIo> {
        let mut all = self.loaded.clone();
        all.extend(self.appended.lock().iter().cloned());
        all
    }

    pub(crate) async fn through<F, Fut>(
        &self,
        node: &NodeId,
        attempt: u32,
        request: &Value,
        call: F,
    ) -> Result<Value, NodeError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Value, NodeError>> + Send,
    {
        let hash = request_hash(request);
        match self.mode {
            ReplayMode::Off => self.execute_live(node, attempt, hash, call).await,
            ReplayMode::Strict => match self.lookup(node, attempt) {
                Some(io) if io.request_hash == hash => Ok(io.response.clone()),
                Some(_) => Err(ReplayError::Mismatch {
                    node: node.clone(),
                    attempt,
                }
                .into()),
                None => Err(ReplayError::Missing {
                    node: node.clone(),
                    attempt,
                }
                .into()),
            },
            ReplayMode::Lenient => match self.lookup(node, attempt) {
                Some(io) => {
                    if io.request_hash != hash {
                        tracing::warn!(
                            node = %node,
                            attempt,
                            "lenient replay: request hash drifted, serving recording anyway"
                        );
                    }
                    Ok(io.response.clone())
                }
                None => {
                    tracing::warn!(
                        node = %node,
                        attempt,
                        "lenient replay: no recording, executing live"
                    );
                    self.execute_live(node, attempt, hash, call).await
                }
            },
        }
    }

    async fn execute_live<F, Fut>(
        &self,
        node: &NodeId,
        attempt: u32,
        hash: String,
        call: F,
    ) -> Result<Value, NodeError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Value, NodeError>> + Send,
    {
        self.live_calls.fetch_add(1, Ordering::Relaxed);
        let response = call().await?;
        self.appended.lock().push(RecordedIo {
            node_id: node.clone(),
            attempt,
            request_hash: hash,
            response: response.clone(),
            recorded_at: Utc::now(),
        });
        Ok(response)
    }

    fn lookup(&self, node: &NodeId, attempt: u32) -> Option<&RecordedIo> {
        self.index
            .get(&(node.clone(), attempt))
            .map(|&i| &self.loaded[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorded(node: &str, attempt: u32, request: &Value, response: Value) -> RecordedIo {
        RecordedIo {
            node_id: NodeId::from(node),
            attempt,
            request_hash: request_hash(request),
            response,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_mode_executes_and_appends() {
        let log = RecordLog::recording();
        let request = json!({"q": "hello"});
        let out = log
            .through(&NodeId::from("n"), 0, &request, || async {
                Ok(json!({"a": 1}))
            })
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));
        assert_eq!(log.live_calls(), 1);
        let ios = log.recorded_ios();
        assert_eq!(ios.len(), 1);
        assert_eq!(ios[0].request_hash, request_hash(&request));
    }

    #[tokio::test]
    async fn strict_replay_serves_recording_without_calling() {
        let request = json!({"q": "hello"});
        let log = RecordLog::with_mode(
            ReplayMode::Strict,
            vec![recorded("n", 0, &request, json!("cached"))],
        );
        let out = log
            .through(&NodeId::from("n"), 0, &request, || async {
                panic!("must not execute live")
            })
            .await
            .unwrap();
        assert_eq!(out, json!("cached"));
        assert_eq!(log.live_calls(), 0);
    }

    #[tokio::test]
    async fn strict_replay_detects_mismatch_and_missing() {
        let recorded_req = json!({"q": "old"});
        let log = RecordLog::with_mode(
            ReplayMode::Strict,
            vec![recorded("n", 0, &recorded_req, json!("cached"))],
        );

        let drifted = json!({"q": "new"});
        let err = log
            .through(&NodeId::from("n"), 0, &drifted, || async { Ok(json!(0)) })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Replay(ReplayError::Mismatch { .. })));

        let err = log
            .through(&NodeId::from("n"), 1, &recorded_req, || async { Ok(json!(0)) })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Replay(ReplayError::Missing { .. })));
    }

    #[tokio::test]
    async fn lenient_replay_falls_back_to_live_on_missing() {
        let log = RecordLog::with_mode(ReplayMode::Lenient, vec![]);
        let out = log
            .through(&NodeId::from("n"), 0, &json!({}), || async {
                Ok(json!("live"))
            })
            .await
            .unwrap();
        assert_eq!(out, json!("live"));
        assert_eq!(log.live_calls(), 1);
    }

    #[test]
    fn request_hash_is_order_insensitive() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(request_hash(&a), request_hash(&b));
        assert!(request_hash(&a).starts_with("sha256:"));
        assert_eq!(request_hash(&a).len(), "sha256:".len() + 64);
    }
}
