//! SQLite implementation of the usage-ledger contract.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use common::crypto::KeyHash;
use common::linked_data::BlockId;
use common::usage::{UsageError, UsageStore, UserUsage, WriterUsage};

use crate::database::Database;

fn db(e: sqlx::Error) -> UsageError {
    UsageError::Default(e.into())
}

fn key_hash(bytes: &[u8]) -> Result<KeyHash, UsageError> {
    KeyHash::try_from(bytes).map_err(|e| UsageError::Default(anyhow::anyhow!(e)))
}

/// The usage ledger, persisted in SQLite.
///
/// Updates that must hit exactly one row (confirming usage, recording
/// a writer footprint) verify the affected row count and surface a
/// mismatch as a fatal state error rather than proceeding on a ledger
/// that has drifted.
#[derive(Debug, Clone)]
pub struct SqlUsageStore {
    db: Database,
}

impl SqlUsageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageStore for SqlUsageStore {
    async fn add_user_if_absent(&self, username: &str) -> Result<(), UsageError> {
        let mut tx = self.db.pool().begin().await.map_err(db)?;
        sqlx::query("INSERT OR IGNORE INTO users (name) VALUES (?)")
            .bind(username)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        sqlx::query(
            "INSERT OR IGNORE INTO userusage (user_id, total_bytes, errored)
             SELECT id, 0, 0 FROM users WHERE name = ?",
        )
        .bind(username)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn add_writer(&self, username: &str, writer: &KeyHash) -> Result<(), UsageError> {
        let key = writer.to_bytes().to_vec();
        let mut tx = self.db.pool().begin().await.map_err(db)?;
        sqlx::query("INSERT OR IGNORE INTO writers (key_hash) VALUES (?)")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        sqlx::query(
            "INSERT OR IGNORE INTO writerusage (writer_id, user_id, target, direct_bytes)
             SELECT w.id, u.id, NULL, 0 FROM writers w, users u
             WHERE w.key_hash = ? AND u.name = ?",
        )
        .bind(&key)
        .bind(username)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        sqlx::query(
            "INSERT OR IGNORE INTO pendingusage (writer_id, user_id, pending_bytes)
             SELECT w.id, u.id, 0 FROM writers w, users u
             WHERE w.key_hash = ? AND u.name = ?",
        )
        .bind(&key)
        .bind(username)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn add_pending_usage(
        &self,
        username: &str,
        writer: &KeyHash,
        delta_bytes: u64,
    ) -> Result<(), UsageError> {
        let result = sqlx::query(
            "UPDATE pendingusage SET pending_bytes = pending_bytes + ?
             WHERE writer_id = (SELECT id FROM writers WHERE key_hash = ?)
               AND user_id = (SELECT id FROM users WHERE name = ?)",
        )
        .bind(delta_bytes as i64)
        .bind(writer.to_bytes().to_vec())
        .bind(username)
        .execute(self.db.pool())
        .await
        .map_err(db)?;
        if result.rows_affected() != 1 {
            return Err(UsageError::RowCount("pendingusage"));
        }
        Ok(())
    }

    async fn confirm_usage(
        &self,
        username: &str,
        writer: &KeyHash,
        delta_bytes: u64,
        errored: bool,
    ) -> Result<(), UsageError> {
        let mut tx = self.db.pool().begin().await.map_err(db)?;
        let updated = sqlx::query(
            "UPDATE userusage SET total_bytes = total_bytes + ?, errored = ?
             WHERE user_id = (SELECT id FROM users WHERE name = ?)",
        )
        .bind(delta_bytes as i64)
        .bind(errored)
        .bind(username)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if updated.rows_affected() != 1 {
            return Err(UsageError::RowCount("userusage"));
        }
        let cleared = sqlx::query(
            "UPDATE pendingusage SET pending_bytes = 0
             WHERE writer_id = (SELECT id FROM writers WHERE key_hash = ?)",
        )
        .bind(writer.to_bytes().to_vec())
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if cleared.rows_affected() != 1 {
            return Err(UsageError::RowCount("pendingusage"));
        }
        tx.commit().await.map_err(db)?;
        debug!(user = username, delta = delta_bytes, errored, "confirmed usage");
        Ok(())
    }

    async fn update_writer_usage(
        &self,
        writer: &KeyHash,
        target: Option<BlockId>,
        owned: HashSet<KeyHash>,
        retained_bytes: u64,
    ) -> Result<(), UsageError> {
        let key = writer.to_bytes().to_vec();
        let mut tx = self.db.pool().begin().await.map_err(db)?;
        let updated = sqlx::query(
            "UPDATE writerusage SET target = ?, direct_bytes = ?
             WHERE writer_id = (SELECT id FROM writers WHERE key_hash = ?)",
        )
        .bind(target.map(|t| t.to_bytes()))
        .bind(retained_bytes as i64)
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if updated.rows_affected() != 1 {
            return Err(UsageError::RowCount("writerusage"));
        }
        // the owned set is replaced wholesale
        sqlx::query(
            "DELETE FROM ownedkeys
             WHERE parent_id = (SELECT id FROM writers WHERE key_hash = ?)",
        )
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        for owned_key in owned {
            let owned_bytes = owned_key.to_bytes().to_vec();
            sqlx::query("INSERT OR IGNORE INTO writers (key_hash) VALUES (?)")
                .bind(&owned_bytes)
                .execute(&mut *tx)
                .await
                .map_err(db)?;
            sqlx::query(
                "INSERT INTO ownedkeys (parent_id, owned_id)
                 SELECT p.id, o.id FROM writers p, writers o
                 WHERE p.key_hash = ? AND o.key_hash = ?",
            )
            .bind(&key)
            .bind(&owned_bytes)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn user_usage(&self, username: &str) -> Result<UserUsage, UsageError> {
        let row = sqlx::query(
            "SELECT u.id, uu.total_bytes, uu.errored
             FROM users u JOIN userusage uu ON uu.user_id = u.id
             WHERE u.name = ?",
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db)?
        .ok_or_else(|| UsageError::UnknownUser(username.to_string()))?;

        let user_id: i64 = row.get("id");
        let mut usage = UserUsage {
            total_bytes: row.get::<i64, _>("total_bytes") as u64,
            errored: row.get("errored"),
            pending: HashMap::new(),
        };

        let pending = sqlx::query(
            "SELECT w.key_hash, p.pending_bytes
             FROM pendingusage p JOIN writers w ON w.id = p.writer_id
             WHERE p.user_id = ? AND p.pending_bytes > 0",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db)?;
        for row in pending {
            let writer = key_hash(&row.get::<Vec<u8>, _>("key_hash"))?;
            usage
                .pending
                .insert(writer, row.get::<i64, _>("pending_bytes") as u64);
        }
        Ok(usage)
    }

    async fn writer_usage(&self, writer: &KeyHash) -> Result<WriterUsage, UsageError> {
        let key = writer.to_bytes().to_vec();
        let row = sqlx::query(
            "SELECT u.name, wu.target, wu.direct_bytes
             FROM writers w
             JOIN writerusage wu ON wu.writer_id = w.id
             JOIN users u ON u.id = wu.user_id
             WHERE w.key_hash = ?",
        )
        .bind(&key)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db)?
        .ok_or(UsageError::UnknownWriter(*writer))?;

        let target = row
            .get::<Option<Vec<u8>>, _>("target")
            .map(|bytes| BlockId::from_bytes(&bytes))
            .transpose()
            .map_err(|e| UsageError::Default(anyhow::anyhow!(e)))?;

        Ok(WriterUsage {
            owner: row.get("name"),
            target,
            direct_bytes: row.get::<i64, _>("direct_bytes") as u64,
            owned: self.direct_owned(writer).await?,
        })
    }

    async fn direct_owned(&self, writer: &KeyHash) -> Result<HashSet<KeyHash>, UsageError> {
        let rows = sqlx::query(
            "SELECT ow.key_hash
             FROM ownedkeys o
             JOIN writers p ON p.id = o.parent_id
             JOIN writers ow ON ow.id = o.owned_id
             WHERE p.key_hash = ?",
        )
        .bind(writer.to_bytes().to_vec())
        .fetch_all(self.db.pool())
        .await
        .map_err(db)?;
        rows.iter()
            .map(|row| key_hash(&row.get::<Vec<u8>, _>("key_hash")))
            .collect()
    }

    async fn all_users(&self) -> Result<Vec<String>, UsageError> {
        let rows = sqlx::query("SELECT name FROM users ORDER BY name")
            .fetch_all(self.db.pool())
            .await
            .map_err(db)?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn store() -> SqlUsageStore {
        SqlUsageStore::new(Database::in_memory().await.unwrap())
    }

    fn key(tag: u8) -> KeyHash {
        KeyHash::from([tag; 32])
    }

    #[tokio::test]
    async fn test_add_user_is_idempotent() {
        let store = store().await;
        store.add_user_if_absent("alice").await.unwrap();
        store.add_user_if_absent("alice").await.unwrap();
        assert_eq!(store.all_users().await.unwrap(), vec!["alice"]);
        assert_eq!(store.user_usage("alice").await.unwrap(), UserUsage::default());
    }

    #[tokio::test]
    async fn test_pending_then_confirm_balances() {
        let store = store().await;
        let writer = key(1);
        store.add_user_if_absent("alice").await.unwrap();
        store.add_writer("alice", &writer).await.unwrap();

        store.add_pending_usage("alice", &writer, 1000).await.unwrap();
        let usage = store.user_usage("alice").await.unwrap();
        assert_eq!(usage.total_bytes, 0);
        assert_eq!(usage.pending[&writer], 1000);
        assert_eq!(usage.total_with_pending(), 1000);

        store.confirm_usage("alice", &writer, 1000, false).await.unwrap();
        let usage = store.user_usage("alice").await.unwrap();
        assert_eq!(usage.total_bytes, 1000);
        assert!(usage.pending.is_empty());
        assert!(!usage.errored);
    }

    #[tokio::test]
    async fn test_failed_write_confirms_zero_and_flags_error() {
        let store = store().await;
        let writer = key(1);
        store.add_user_if_absent("alice").await.unwrap();
        store.add_writer("alice", &writer).await.unwrap();

        store.add_pending_usage("alice", &writer, 500).await.unwrap();
        store.confirm_usage("alice", &writer, 0, true).await.unwrap();

        let usage = store.user_usage("alice").await.unwrap();
        assert_eq!(usage.total_bytes, 0);
        assert!(usage.pending.is_empty());
        assert!(usage.errored);
    }

    #[tokio::test]
    async fn test_confirm_leaves_other_writers_pending() {
        let store = store().await;
        store.add_user_if_absent("alice").await.unwrap();
        store.add_writer("alice", &key(1)).await.unwrap();
        store.add_writer("alice", &key(2)).await.unwrap();

        store.add_pending_usage("alice", &key(1), 100).await.unwrap();
        store.add_pending_usage("alice", &key(2), 200).await.unwrap();
        store.confirm_usage("alice", &key(1), 100, false).await.unwrap();

        let usage = store.user_usage("alice").await.unwrap();
        assert_eq!(usage.total_bytes, 100);
        assert_eq!(usage.pending, HashMap::from([(key(2), 200)]));
    }

    #[tokio::test]
    async fn test_pending_for_unregistered_writer_is_fatal() {
        let store = store().await;
        store.add_user_if_absent("alice").await.unwrap();
        let result = store.add_pending_usage("alice", &key(9), 100).await;
        assert!(matches!(result, Err(UsageError::RowCount("pendingusage"))));
    }

    #[tokio::test]
    async fn test_unknown_user_errors() {
        let store = store().await;
        assert!(matches!(
            store.user_usage("nobody").await,
            Err(UsageError::UnknownUser(_))
        ));
        assert!(matches!(
            store.writer_usage(&key(1)).await,
            Err(UsageError::UnknownWriter(_))
        ));
    }

    #[tokio::test]
    async fn test_owned_keys_rewritten_wholesale() {
        let store = store().await;
        let writer = key(1);
        store.add_user_if_absent("alice").await.unwrap();
        store.add_writer("alice", &writer).await.unwrap();

        let target = BlockId::raw(b"tree root v1");
        store
            .update_writer_usage(&writer, Some(target), HashSet::from([key(2), key(3)]), 4096)
            .await
            .unwrap();
        let usage = store.writer_usage(&writer).await.unwrap();
        assert_eq!(usage.owner, "alice");
        assert_eq!(usage.target, Some(target));
        assert_eq!(usage.direct_bytes, 4096);
        assert_eq!(usage.owned, HashSet::from([key(2), key(3)]));

        // a later update replaces the previous owned set entirely
        store
            .update_writer_usage(&writer, Some(target), HashSet::from([key(4)]), 8192)
            .await
            .unwrap();
        let usage = store.writer_usage(&writer).await.unwrap();
        assert_eq!(usage.owned, HashSet::from([key(4)]));
        assert_eq!(store.direct_owned(&writer).await.unwrap(), HashSet::from([key(4)]));
    }

    #[tokio::test]
    async fn test_update_unregistered_writer_is_fatal() {
        let store = store().await;
        let result = store
            .update_writer_usage(&key(7), None, HashSet::new(), 0)
            .await;
        assert!(matches!(result, Err(UsageError::RowCount("writerusage"))));
    }
}
