//! Per-key merge policies for JSON map states.
//!
//! Many workflows keep their state as a `serde_json::Value` object and
//! want different merge semantics per key: counters sum, logs append,
//! metadata maps shallow-merge, everything else takes the last write.
//! [`JsonReducer`] encodes that policy table as a [`Reducer`] over
//! `serde_json::Value`, so such states need no hand-written reducer.

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::Reducer;

/// How a single key merges when both sides carry it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// The delta's value replaces the previous one.
    #[default]
    LastWrite,
    /// Arrays concatenate; a non-array delta is pushed onto the previous
    /// array.
    Append,
    /// Objects shallow-merge, delta keys winning.
    MergeMap,
    /// Numbers add.
    SumCounter,
}

impl MergePolicy {
    fn merge(self, prev: &mut Value, delta: Value) {
        match self {
            Self::LastWrite => *prev = delta,
            Self::Append => match (prev, delta) {
                (Value::Array(list), Value::Array(tail)) => list.extend(tail),
                (Value::Array(list), single) => list.push(single),
                (prev, delta) => *prev = delta,
            },
            Self::MergeMap => match (prev, delta) {
                (Value::Object(map), Value::Object(updates)) => {
                    for (k, v) in updates {
                        map.insert(k, v);
                    }
                }
                (prev, delta) => *prev = delta,
            },
            Self::SumCounter => {
                let sum = prev.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
                // Preserve integer representation when both sides were integral.
                *prev = if sum.fract() == 0.0 && sum.abs() < (1u64 << 53) as f64 {
                    Value::from(sum as i64)
                } else {
                    Value::from(sum)
                };
            }
        }
    }
}

/// Policy-table reducer for object-shaped `serde_json::Value` states.
///
/// Keys present in the delta but absent from the state are inserted as-is.
/// Keys without a registered policy use the default policy (last-write
/// unless overridden).
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use stepgraph::reducers::{JsonReducer, MergePolicy, Reducer};
///
/// let reducer = JsonReducer::new()
///     .policy("findings", MergePolicy::Append)
///     .policy("files_seen", MergePolicy::SumCounter);
///
/// let mut state = json!({"findings": ["a"], "files_seen": 2});
/// reducer.apply(&mut state, json!({"findings": ["b"], "files_seen": 3}));
/// assert_eq!(state, json!({"findings": ["a", "b"], "files_seen": 5}));
/// ```
#[derive(Clone, Debug, Default)]
pub struct JsonReducer {
    policies: FxHashMap<String, MergePolicy>,
    default_policy: MergePolicy,
}

impl JsonReducer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a merge policy for one key.
    #[must_use]
    pub fn policy(mut self, key: impl Into<String>, policy: MergePolicy) -> Self {
        self.policies.insert(key.into(), policy);
        self
    }

    /// Policy applied to keys without an explicit registration.
    #[must_use]
    pub fn default_policy(mut self, policy: MergePolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

impl Reducer<Value> for JsonReducer {
    fn apply(&self, state: &mut Value, delta: Value) {
        let Value::Object(updates) = delta else {
            // Non-object deltas replace the state wholesale.
            *state = delta;
            return;
        };
        if !state.is_object() {
            *state = Value::Object(serde_json::Map::new());
        }
        let map = state.as_object_mut().expect("state coerced to object above");
        for (key, value) in updates {
            match map.get_mut(&key) {
                Some(prev) => {
                    let policy = self.policies.get(&key).copied().unwrap_or(self.default_policy);
                    policy.merge(prev, value);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_write_replaces() {
        let reducer = JsonReducer::new();
        let mut state = json!({"status": "scanning"});
        reducer.apply(&mut state, json!({"status": "done"}));
        assert_eq!(state, json!({"status": "done"}));
    }

    #[test]
    fn append_concatenates_and_wraps_scalars() {
        let reducer = JsonReducer::new().policy("log", MergePolicy::Append);
        let mut state = json!({"log": ["a"]});
        reducer.apply(&mut state, json!({"log": ["b", "c"]}));
        reducer.apply(&mut state, json!({"log": "d"}));
        assert_eq!(state, json!({"log": ["a", "b", "c", "d"]}));
    }

    #[test]
    fn map_merge_is_shallow_with_delta_winning() {
        let reducer = JsonReducer::new().policy("meta", MergePolicy::MergeMap);
        let mut state = json!({"meta": {"a": 1, "b": 2}});
        reducer.apply(&mut state, json!({"meta": {"b": 3, "c": 4}}));
        assert_eq!(state, json!({"meta": {"a": 1, "b": 3, "c": 4}}));
    }

    #[test]
    fn counters_sum_and_stay_integral() {
        let reducer = JsonReducer::new().policy("n", MergePolicy::SumCounter);
        let mut state = json!({"n": 2});
        reducer.apply(&mut state, json!({"n": 3}));
        assert_eq!(state, json!({"n": 5}));
        assert!(state["n"].is_i64());
    }

    #[test]
    fn unknown_keys_insert_and_default_policy_applies() {
        let reducer = JsonReducer::new().default_policy(MergePolicy::Append);
        let mut state = json!({});
        reducer.apply(&mut state, json!({"fresh": [1]}));
        reducer.apply(&mut state, json!({"fresh": [2]}));
        assert_eq!(state, json!({"fresh": [1, 2]}));
    }

    #[test]
    fn merge_order_determines_last_write_result() {
        let reducer = JsonReducer::new();
        let mut state = json!({});
        reducer.apply(&mut state, json!({"winner": "b"}));
        reducer.apply(&mut state, json!({"winner": "c"}));
        assert_eq!(state["winner"], "c");
    }
}
