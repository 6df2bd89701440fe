//! Per-user storage quota table.

use sqlx::Row;

use crate::database::Database;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("no quota recorded for user {0}")]
    Missing(String),
    #[error("quota error: {0}")]
    Default(#[from] anyhow::Error),
}

fn db(e: sqlx::Error) -> QuotaError {
    QuotaError::Default(e.into())
}

/// Quota assignments, persisted in SQLite.
///
/// Reading the quota of a user who was never assigned one is a state
/// error: quota checks must not silently treat an absent row as zero
/// or as unlimited.
#[derive(Debug, Clone)]
pub struct SqlQuotas {
    db: Database,
}

impl SqlQuotas {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn set_quota(&self, username: &str, quota_bytes: u64) -> Result<(), QuotaError> {
        sqlx::query(
            "INSERT INTO freequotas (name, quota_bytes) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET quota_bytes = excluded.quota_bytes",
        )
        .bind(username)
        .bind(quota_bytes as i64)
        .execute(self.db.pool())
        .await
        .map_err(db)?;
        Ok(())
    }

    pub async fn quota(&self, username: &str) -> Result<u64, QuotaError> {
        let row = sqlx::query("SELECT quota_bytes FROM freequotas WHERE name = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db)?
            .ok_or_else(|| QuotaError::Missing(username.to_string()))?;
        Ok(row.get::<i64, _>("quota_bytes") as u64)
    }

    pub async fn has_quota(&self, username: &str) -> Result<bool, QuotaError> {
        let row = sqlx::query("SELECT 1 FROM freequotas WHERE name = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db)?;
        Ok(row.is_some())
    }

    /// Remove a user's quota, returning whether one existed.
    pub async fn remove_quota(&self, username: &str) -> Result<bool, QuotaError> {
        let result = sqlx::query("DELETE FROM freequotas WHERE name = ?")
            .bind(username)
            .execute(self.db.pool())
            .await
            .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list(&self) -> Result<Vec<(String, u64)>, QuotaError> {
        let rows = sqlx::query("SELECT name, quota_bytes FROM freequotas ORDER BY name")
            .fetch_all(self.db.pool())
            .await
            .map_err(db)?;
        Ok(rows
            .iter()
            .map(|row| (row.get("name"), row.get::<i64, _>("quota_bytes") as u64))
            .collect())
    }

    pub async fn count(&self) -> Result<u64, QuotaError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM freequotas")
            .fetch_one(self.db.pool())
            .await
            .map_err(db)?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}
