//! State requirements and branch isolation.
//!
//! The engine is generic over a user-supplied state type. [`RunState`] is a
//! blanket trait collecting everything a state must support: cloning (used
//! for branch isolation), serde (used for checkpoint bundles and
//! idempotency keys), and thread mobility.
//!
//! Branch isolation: before a node runs, the engine hands it an isolated
//! copy of the accumulated state. The default copy is the type's `Clone`,
//! which for owned Rust data is already a deep, structural copy. When
//! `Clone` is expensive or the state holds shared containers, supply a
//! custom [`StateCopier`] through
//! [`EngineOptions::with_copier`](crate::engine::EngineOptions::with_copier);
//! mutations through a worker's copy must never reach the engine's copy.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Requirements on an engine state type.
///
/// Implemented automatically for every type meeting the bounds; user code
/// never implements this directly.
///
/// # Examples
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct ReviewState {
///     files_seen: u64,
///     findings: Vec<String>,
/// }
/// // ReviewState: stepgraph::state::RunState holds by the blanket impl.
/// ```
pub trait RunState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> RunState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// User-supplied deep-copy function, overriding the default `Clone`.
pub type StateCopier<S> = Arc<dyn Fn(&S) -> S + Send + Sync>;

/// Copy a state through the configured copier, falling back to `Clone`.
pub(crate) fn copy_state<S: RunState>(state: &S, copier: Option<&StateCopier<S>>) -> S {
    match copier {
        Some(copier) => copier(state),
        None => state.clone(),
    }
}
