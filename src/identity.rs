//! Channel identity resolution (SQLite).

use crate::ProfileId;
use crate::error::{IdentityError, Result};
use anyhow::Context as _;
use serde::Serialize;
use sqlx::{Row as _, SqlitePool};

/// A channel-scoped identity bound to a profile.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelBinding {
    pub user_id: String,
    pub channel: String,
}

/// Resolves channel user ids to canonical profiles and back.
///
/// Backed by the `channel_bindings` table: primary key `(profile_id,
/// user_id)` plus a unique index on `user_id`, so a channel identity can
/// never resolve to more than one profile.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up the profile for a channel user id via the `user_id` index.
    ///
    /// `Ok(None)` means no profile is registered — an expected condition,
    /// reported distinctly from the store being unreachable.
    pub async fn resolve(&self, user_id: &str) -> Result<Option<ProfileId>> {
        sqlx::query_scalar::<_, String>(
            "SELECT profile_id FROM channel_bindings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| IdentityError::Unavailable(error.to_string()).into())
    }

    /// All channel bindings registered for a profile (primary-key scan).
    pub async fn bindings(&self, profile_id: &str) -> Result<Vec<ChannelBinding>> {
        let rows = sqlx::query(
            "SELECT user_id, channel FROM channel_bindings WHERE profile_id = ? ORDER BY user_id",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| IdentityError::Unavailable(error.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(ChannelBinding {
                    user_id: row.try_get("user_id").context("failed to read user_id")?,
                    channel: row.try_get("channel").context("failed to read channel")?,
                })
            })
            .collect()
    }

    /// Register a channel identity for a profile, updating the channel type
    /// if the pair already exists. A user id already bound to a different
    /// profile is rejected — bindings are many-to-one.
    pub async fn bind(&self, profile_id: &str, user_id: &str, channel: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO channel_bindings (profile_id, user_id, channel)
            VALUES (?, ?, ?)
            ON CONFLICT(profile_id, user_id) DO UPDATE SET channel = excluded.channel
            "#,
        )
        .bind(profile_id)
        .bind(user_id)
        .bind(channel)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_error)) if db_error.code().as_deref() == Some("2067") => {
                Err(anyhow::anyhow!(
                    "user {user_id} is already bound to a different profile"
                )
                .into())
            }
            Err(error) => Err(anyhow::anyhow!("failed to register binding: {error}").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn setup_store() -> IdentityStore {
        let db = Db::connect_in_memory()
            .await
            .expect("in-memory db should connect");
        IdentityStore::new(db.sqlite)
    }

    #[tokio::test]
    async fn every_bound_channel_id_resolves_to_the_same_profile() {
        let store = setup_store().await;
        store.bind("p1", "u1", "whatsapp").await.expect("bind u1");
        store.bind("p1", "u2", "email").await.expect("bind u2");

        assert_eq!(store.resolve("u1").await.expect("resolve u1"), Some("p1".to_string()));
        assert_eq!(store.resolve("u2").await.expect("resolve u2"), Some("p1".to_string()));
    }

    #[tokio::test]
    async fn unknown_user_is_none_not_an_error() {
        let store = setup_store().await;

        assert_eq!(store.resolve("nobody").await.expect("resolve"), None);
    }

    #[tokio::test]
    async fn bindings_returns_all_channels_for_a_profile() {
        let store = setup_store().await;
        store.bind("p1", "u1", "whatsapp").await.expect("bind u1");
        store.bind("p1", "u2", "email").await.expect("bind u2");
        store.bind("p2", "u3", "whatsapp").await.expect("bind u3");

        let bindings = store.bindings("p1").await.expect("bindings");
        assert_eq!(
            bindings,
            vec![
                ChannelBinding { user_id: "u1".into(), channel: "whatsapp".into() },
                ChannelBinding { user_id: "u2".into(), channel: "email".into() },
            ]
        );
    }

    #[tokio::test]
    async fn rebinding_the_same_pair_updates_the_channel() {
        let store = setup_store().await;
        store.bind("p1", "u1", "whatsapp").await.expect("bind");
        store.bind("p1", "u1", "sms").await.expect("rebind");

        let bindings = store.bindings("p1").await.expect("bindings");
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].channel, "sms");
    }

    #[tokio::test]
    async fn binding_a_user_to_a_second_profile_is_rejected() {
        let store = setup_store().await;
        store.bind("p1", "u1", "whatsapp").await.expect("bind");

        let error = store
            .bind("p2", "u1", "whatsapp")
            .await
            .expect_err("second profile must be rejected");

        assert!(error.to_string().contains("already bound"));
    }
}
