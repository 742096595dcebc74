//! SQLite connection lifetime and schema.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Database handle. Constructed once at startup, shared by the stores for
/// the life of the process or batch, released with [`Db::close`].
#[derive(Debug, Clone)]
pub struct Db {
    pub sqlite: SqlitePool,
}

impl Db {
    /// Open (creating if needed) the database under `data_dir` and ensure
    /// the schema exists.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("switchboard.db"))
            .create_if_missing(true);

        let sqlite = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite")?;

        init_schema(&sqlite).await?;

        Ok(Self { sqlite })
    }

    /// In-memory database, used by tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let sqlite = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory SQLite")?;

        init_schema(&sqlite).await?;

        Ok(Self { sqlite })
    }

    /// Release the pool. Call on the way out of the process or batch scope.
    pub async fn close(&self) {
        self.sqlite.close().await;
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channel_bindings (
            profile_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (profile_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create channel_bindings table")?;

    // One channel identity resolves to at most one profile.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_bindings_user ON channel_bindings (user_id)",
    )
    .execute(pool)
    .await
    .context("failed to create channel_bindings user index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            messages TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create checkpoints table")?;

    Ok(())
}
