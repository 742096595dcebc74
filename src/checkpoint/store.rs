//! Checkpoint persistence (SQLite) with optimistic versioning and TTL.

use crate::ProfileId;
use crate::checkpoint::throttle::ThroughputBudget;
use crate::error::{CheckpointError, Result};
use crate::history::ChatMessage;
use anyhow::Context as _;
use chrono::Utc;
use sqlx::{Row as _, SqlitePool};
use std::time::Duration;

/// A durable snapshot of one conversation: the ordered message sequence plus
/// the version observed at load time.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub thread_id: ProfileId,
    pub messages: Vec<ChatMessage>,
    /// Version the caller loaded. A save commits only if the stored version
    /// still matches. 0 means no checkpoint existed.
    pub version: i64,
}

impl Checkpoint {
    /// Fresh empty state for a new (or expired) conversation.
    pub fn empty(thread_id: impl Into<ProfileId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            version: 0,
        }
    }
}

/// Durable conversation state keyed by thread id.
///
/// Writes are serialized per key through optimistic versioning: of two
/// concurrent load-mutate-save cycles against the same thread, exactly one
/// commits; the other observes [`CheckpointError::Conflict`] and must rerun
/// its cycle from a fresh load. Commits are single statements, so a failed
/// save leaves the previously committed row untouched.
pub struct CheckpointStore {
    pool: SqlitePool,
    budget: ThroughputBudget,
    ttl: Duration,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool, budget: ThroughputBudget, ttl: Duration) -> Self {
        Self { pool, budget, ttl }
    }

    /// Load the checkpoint for a thread. A missing or expired row yields a
    /// fresh empty state — the normal new-conversation path, not an error.
    pub async fn load(&self, thread_id: &str) -> Result<Checkpoint> {
        self.budget.acquire_read().await?;

        let row = sqlx::query("SELECT version, messages, expires_at FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(Checkpoint::empty(thread_id));
        };

        let expires_at: i64 = row.try_get("expires_at").map_err(backend)?;
        if expires_at <= Utc::now().timestamp() {
            tracing::debug!(thread_id, "checkpoint expired, starting fresh");
            return Ok(Checkpoint::empty(thread_id));
        }

        let version: i64 = row.try_get("version").map_err(backend)?;
        let blob: String = row.try_get("messages").map_err(backend)?;
        let messages: Vec<ChatMessage> = serde_json::from_str(&blob)
            .with_context(|| format!("corrupt checkpoint blob for thread {thread_id}"))?;

        Ok(Checkpoint {
            thread_id: thread_id.to_string(),
            messages,
            version,
        })
    }

    /// Commit a mutated checkpoint and refresh its absolute expiry.
    ///
    /// Succeeds only when the stored version still equals
    /// `checkpoint.version`, or when the stored row has expired (an expired
    /// row counts as absent, but its version still advances so the sequence
    /// a thread observes stays monotonic). Returns the committed version.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<i64> {
        self.budget.acquire_write().await?;

        let now = Utc::now().timestamp();
        let expires_at = now + self.ttl.as_secs() as i64;
        let blob = serde_json::to_string(&checkpoint.messages)
            .context("failed to serialize checkpoint messages")?;

        let committed: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO checkpoints (thread_id, version, messages, expires_at)
            VALUES (?1, 1, ?2, ?3)
            ON CONFLICT(thread_id) DO UPDATE SET
                version = checkpoints.version + 1,
                messages = excluded.messages,
                expires_at = excluded.expires_at,
                updated_at = CURRENT_TIMESTAMP
            WHERE checkpoints.version = ?4 OR checkpoints.expires_at <= ?5
            RETURNING version
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(&blob)
        .bind(expires_at)
        .bind(checkpoint.version)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        committed.ok_or_else(|| {
            CheckpointError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: checkpoint.version,
            }
            .into()
        })
    }

    /// Active arm of the lazy TTL: bulk-delete rows whose expiry elapsed.
    /// Returns the number of reclaimed checkpoints.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.budget.acquire_write().await?;

        let result = sqlx::query("DELETE FROM checkpoints WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }
}

fn backend(error: sqlx::Error) -> crate::Error {
    CheckpointError::Backend(error.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::error::Error;

    async fn setup_store(ttl: Duration) -> CheckpointStore {
        let db = Db::connect_in_memory()
            .await
            .expect("in-memory db should connect");
        let budget = ThroughputBudget::new(1000, 1000, Duration::from_millis(100));
        CheckpointStore::new(db.sqlite, budget, ttl)
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_empty_state() {
        let store = setup_store(Duration::from_secs(3600)).await;

        let checkpoint = store.load("p1").await.expect("load");
        assert_eq!(checkpoint.version, 0);
        assert!(checkpoint.messages.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_with_version_one() {
        let store = setup_store(Duration::from_secs(3600)).await;

        let mut checkpoint = store.load("p1").await.expect("load");
        checkpoint.messages.push(ChatMessage::human("hello"));
        let committed = store.save(&checkpoint).await.expect("save");
        assert_eq!(committed, 1);

        let loaded = store.load("p1").await.expect("reload");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.messages, vec![ChatMessage::human("hello")]);
    }

    #[tokio::test]
    async fn versions_increase_monotonically_across_cycles() {
        let store = setup_store(Duration::from_secs(3600)).await;

        for expected in 1..=4 {
            let mut checkpoint = store.load("p1").await.expect("load");
            checkpoint.messages.push(ChatMessage::human(format!("m{expected}")));
            let committed = store.save(&checkpoint).await.expect("save");
            assert_eq!(committed, expected);
        }
    }

    #[tokio::test]
    async fn stale_base_version_conflicts_instead_of_overwriting() {
        let store = setup_store(Duration::from_secs(3600)).await;

        // Two cycles load the same (empty) base.
        let mut first = store.load("p1").await.expect("load first");
        let mut second = store.load("p1").await.expect("load second");

        first.messages.push(ChatMessage::human("first"));
        store.save(&first).await.expect("first save wins");

        second.messages.push(ChatMessage::human("second"));
        assert_eq!(second.version, 0);
        let error = store
            .save(&second)
            .await
            .expect_err("second save must observe a conflict");
        assert!(matches!(
            error,
            Error::Checkpoint(CheckpointError::Conflict { expected: 0, .. })
        ));

        // The winning write is untouched.
        let loaded = store.load("p1").await.expect("reload");
        assert_eq!(loaded.messages, vec![ChatMessage::human("first")]);

        // Retrying from a fresh load succeeds.
        let mut retried = store.load("p1").await.expect("retry load");
        retried.messages.push(ChatMessage::human("second"));
        assert_eq!(store.save(&retried).await.expect("retry save"), 2);
    }

    #[tokio::test]
    async fn expired_checkpoint_loads_as_empty_state() {
        let store = setup_store(Duration::from_secs(0)).await;

        let mut checkpoint = store.load("p1").await.expect("load");
        checkpoint.messages.push(ChatMessage::human("old news"));
        store.save(&checkpoint).await.expect("save");

        let loaded = store.load("p1").await.expect("reload");
        assert_eq!(loaded.version, 0);
        assert!(loaded.messages.is_empty());
    }

    #[tokio::test]
    async fn saving_over_an_expired_row_keeps_the_version_monotonic() {
        let store = setup_store(Duration::from_secs(0)).await;

        let mut checkpoint = store.load("p1").await.expect("load");
        checkpoint.messages.push(ChatMessage::human("first life"));
        assert_eq!(store.save(&checkpoint).await.expect("save"), 1);

        // The row expired immediately; the next cycle sees an empty state
        // but its commit still advances the stored version.
        let mut revived = store.load("p1").await.expect("reload");
        assert_eq!(revived.version, 0);
        revived.messages.push(ChatMessage::human("second life"));
        assert_eq!(store.save(&revived).await.expect("save again"), 2);
    }

    #[tokio::test]
    async fn sweep_reclaims_only_expired_rows() {
        let db = Db::connect_in_memory().await.expect("connect");
        let budget = ThroughputBudget::new(1000, 1000, Duration::from_millis(100));

        let expired = CheckpointStore::new(db.sqlite.clone(), budget.clone(), Duration::from_secs(0));
        let live = CheckpointStore::new(db.sqlite.clone(), budget, Duration::from_secs(3600));

        let mut dead = Checkpoint::empty("dead");
        dead.messages.push(ChatMessage::human("gone"));
        expired.save(&dead).await.expect("save expired");

        let mut kept = Checkpoint::empty("kept");
        kept.messages.push(ChatMessage::human("here"));
        live.save(&kept).await.expect("save live");

        assert_eq!(live.sweep_expired().await.expect("sweep"), 1);
        assert_eq!(live.load("kept").await.expect("load").version, 1);
    }
}
