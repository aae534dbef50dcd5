//! Tracing bootstrap.
//!
//! Installs an env-filtered fmt subscriber. Call once at process start;
//! libraries embedding stepgraph will usually install their own
//! subscriber instead.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber, honoring `RUST_LOG` (with
/// `.env` files loaded) and defaulting to `info` for this crate. Safe to
/// call more than once; only the first call installs.
pub fn init() {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stepgraph=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
