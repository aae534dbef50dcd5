//! Outbox relay: exactly-once event delivery out of the store.
//!
//! Events written to the store's outbox survive crashes; the relay drains
//! them into an emitter and marks them emitted only after delivery, so a
//! crash between the two repeats delivery rather than losing it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task;

use super::emitter::Emitter;
use crate::store::Store;

const DEFAULT_BATCH: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background relay from a [`Store`] outbox to an [`Emitter`].
pub struct OutboxRelay {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<task::JoinHandle<()>>,
}

impl OutboxRelay {
    /// Spawn the relay. It polls `store.pending_events`, forwards each
    /// batch to `emitter`, and acknowledges delivered ids.
    #[must_use]
    pub fn spawn(store: Arc<dyn Store>, emitter: Arc<dyn Emitter>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                if let Err(err) = Self::drain_once(&store, &emitter).await {
                    tracing::warn!(error = %err, "outbox relay drain failed");
                }
            }
            // Final sweep on shutdown.
            if let Err(err) = Self::drain_once(&store, &emitter).await {
                tracing::warn!(error = %err, "outbox relay final drain failed");
            }
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn drain_once(
        store: &Arc<dyn Store>,
        emitter: &Arc<dyn Emitter>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let pending = store.pending_events(DEFAULT_BATCH).await?;
            if pending.is_empty() {
                return Ok(());
            }
            let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
            let events = pending.into_iter().map(|p| p.event).collect();
            emitter.emit_batch(events).await?;
            store.mark_events_emitted(&ids).await?;
        }
    }

    /// Stop the relay after one final drain.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for OutboxRelay {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
