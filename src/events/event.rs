//! Structured execution events.
//!
//! The engine emits one event stream per process: node lifecycle
//! (`NodeStart`, `NodeEnd`, `Retry`), routing decisions (`Route`),
//! terminal failures (`Error`), and checkpoint commits (`Checkpoint`).
//! Events are plain serde data so sinks can forward them to logs, files,
//! channels, or external collectors without knowing engine internals.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{NodeId, RunId};

/// Category of an execution event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A node began its first attempt.
    NodeStart,
    /// A node completed and its delta was merged.
    NodeEnd,
    /// A failed attempt is being retried.
    Retry,
    /// Routing expanded a node's successors.
    Route,
    /// A terminal error was recorded.
    Error,
    /// A checkpoint bundle was committed (or skipped as a duplicate).
    Checkpoint,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeStart => "node_start",
            Self::NodeEnd => "node_end",
            Self::Retry => "retry",
            Self::Route => "route",
            Self::Error => "error",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(s)
    }
}

/// One structured event in a run's execution history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub run_id: RunId,
    pub step: u64,
    /// Absent for run-scoped events (e.g. a wall-clock budget error).
    pub node_id: Option<NodeId>,
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub metadata: FxHashMap<String, Value>,
    pub at: DateTime<Utc>,
}

impl Event {
    /// Build an event with empty metadata.
    #[must_use]
    pub fn new(
        run_id: RunId,
        step: u64,
        node_id: Option<NodeId>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            step,
            node_id,
            kind,
            message: message.into(),
            metadata: FxHashMap::default(),
            at: Utc::now(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Render the event as one compact JSON line.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(
                f,
                "[{}] step={} node={} {}: {}",
                self.run_id, self.step, node, self.kind, self.message
            ),
            None => write!(
                f,
                "[{}] step={} {}: {}",
                self.run_id, self.step, self.kind, self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_round_trip() {
        let ev = Event::new(
            RunId::from("r1"),
            3,
            Some(NodeId::from("scan")),
            EventKind::NodeEnd,
            "merged delta",
        )
        .with_meta("duration_ms", serde_json::json!(12));
        let json = ev.to_json_string().unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn display_includes_kind_and_node() {
        let ev = Event::new(
            RunId::from("r1"),
            1,
            Some(NodeId::from("a")),
            EventKind::Retry,
            "attempt 2",
        );
        let line = ev.to_string();
        assert!(line.contains("retry"));
        assert!(line.contains("node=a"));
    }
}
