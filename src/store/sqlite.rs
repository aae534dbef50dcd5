/*!
SQLite store

Durable [`Store`] implementation over `sqlx`. Checkpoint commits run in a
single transaction: the idempotency key row goes into a table with a
primary-key index, then the bundle row is written, then the transaction
commits. A unique violation on the key aborts the whole transaction and
surfaces as [`StoreError::DuplicateCommit`], which the engine swallows as
success-with-skip.

Bundles are stored as one JSON column rather than exploded relational
rows; the persisted shape is [`CheckpointBundle`]'s serde form, so this
module stays focused on database I/O.

When the `sqlite-migrations` feature is enabled the embedded migrations
(`sqlx::migrate!("./migrations")`) run on connect; without it, schema
management is external.
*/

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::{OutboxEntry, Result, Store, StoreError, StepRecord};
use crate::checkpoint::CheckpointBundle;
use crate::events::Event;
use crate::types::{NodeId, RunId};

/// Durable SQLite-backed store.
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn backend_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `"sqlite://stepgraph.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Ensure the underlying file exists; SqlitePool does not create it.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| backend_err("connect", e))?;
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| backend_err("migrate", e))?;
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect using `STEPGRAPH_SQLITE_URL` (falling back to
    /// `sqlite://stepgraph.db`), with `.env` files honored.
    pub async fn connect_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var("STEPGRAPH_SQLITE_URL")
            .unwrap_or_else(|_| "sqlite://stepgraph.db".to_string());
        Self::connect(&url).await
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, state), err)]
    async fn save_step(
        &self,
        run_id: &RunId,
        step: u64,
        node_id: &NodeId,
        state: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO steps (run_id, step, node_id, state_json, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(run_id.as_str())
        .bind(step as i64)
        .bind(node_id.as_str())
        .bind(state.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("insert step", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, run_id: &RunId) -> Result<Option<StepRecord>> {
        let row = sqlx::query(
            r#"
            SELECT step, node_id, state_json, saved_at
            FROM steps WHERE run_id = ?1
            ORDER BY step DESC LIMIT 1
            "#,
        )
        .bind(run_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend_err("select latest step", e))?;

        let Some(row) = row else { return Ok(None) };
        let state_json: String = row.get("state_json");
        let saved_at: String = row.get("saved_at");
        Ok(Some(StepRecord {
            run_id: run_id.clone(),
            step: row.get::<i64, _>("step") as u64,
            node_id: NodeId::from(row.get::<String, _>("node_id")),
            state: serde_json::from_str(&state_json)?,
            saved_at: Self::parse_time(&saved_at),
        }))
    }

    #[instrument(skip(self, bundle), err)]
    async fn save_checkpoint(&self, bundle: &CheckpointBundle) -> Result<()> {
        let bundle_json = serde_json::to_string(bundle)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("tx begin", e))?;

        // Key first: the primary-key index is the idempotency gate.
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, run_id, step)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&bundle.idempotency_key)
        .bind(bundle.run_id.as_str())
        .bind(bundle.step as i64)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let dup = is_unique_violation(&e);
            tx.rollback().await.ok();
            return Err(if dup {
                StoreError::DuplicateCommit {
                    key: bundle.idempotency_key.clone(),
                }
            } else {
                backend_err("insert idempotency key", e)
            });
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (run_id, step, label, bundle_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(bundle.run_id.as_str())
        .bind(bundle.step as i64)
        .bind(bundle.label.as_deref())
        .bind(bundle_json)
        .bind(bundle.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend_err("insert checkpoint", e))?;

        tx.commit().await.map_err(|e| backend_err("tx commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_checkpoint(
        &self,
        run_id: &RunId,
        step: Option<u64>,
    ) -> Result<Option<CheckpointBundle>> {
        let row = match step {
            Some(step) => {
                sqlx::query(
                    r#"SELECT bundle_json FROM checkpoints WHERE run_id = ?1 AND step = ?2"#,
                )
                .bind(run_id.as_str())
                .bind(step as i64)
                .fetch_optional(&*self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT bundle_json FROM checkpoints WHERE run_id = ?1
                    ORDER BY step DESC LIMIT 1
                    "#,
                )
                .bind(run_id.as_str())
                .fetch_optional(&*self.pool)
                .await
            }
        }
        .map_err(|e| backend_err("select checkpoint", e))?;

        let Some(row) = row else { return Ok(None) };
        let bundle_json: String = row.get("bundle_json");
        Ok(Some(serde_json::from_str(&bundle_json)?))
    }

    #[instrument(skip(self, events), err)]
    async fn enqueue_events(&self, events: &[Event]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("tx begin", e))?;
        for event in events {
            sqlx::query(r#"INSERT INTO event_outbox (event_json) VALUES (?1)"#)
                .bind(serde_json::to_string(event)?)
                .execute(&mut *tx)
                .await
                .map_err(|e| backend_err("insert outbox event", e))?;
        }
        tx.commit().await.map_err(|e| backend_err("tx commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn pending_events(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_json FROM event_outbox
            WHERE emitted = 0 ORDER BY id ASC LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend_err("select pending events", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let event_json: String = row.get("event_json");
            entries.push(OutboxEntry {
                id: row.get("id"),
                event: serde_json::from_str(&event_json)?,
            });
        }
        Ok(entries)
    }

    #[instrument(skip(self), err)]
    async fn mark_events_emitted(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("tx begin", e))?;
        for id in ids {
            sqlx::query(r#"UPDATE event_outbox SET emitted = 1 WHERE id = ?1"#)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| backend_err("mark event emitted", e))?;
        }
        tx.commit().await.map_err(|e| backend_err("tx commit", e))?;
        Ok(())
    }
}
