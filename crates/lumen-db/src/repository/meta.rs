//! # Sync Meta Repository
//!
//! Process-wide key/value store. Currently holds the timestamp of the last
//! completed sync pass, persisted across restarts.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;

/// Key for the last completed sync pass timestamp.
const LAST_SYNC_KEY: &str = "last_sync_at";

/// Repository for the `sync_meta` table.
#[derive(Debug, Clone)]
pub struct MetaRepository {
    pool: SqlitePool,
}

impl MetaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetaRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Timestamp of the last completed sync pass, if any pass ever finished.
    pub async fn last_sync_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let value = self.get(LAST_SYNC_KEY).await?;
        Ok(value
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set(LAST_SYNC_KEY, &at.to_rfc3339()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_last_sync_roundtrip() {
        let db = Database::connect(&DbConfig::in_memory()).await.unwrap();
        let meta = db.meta();

        assert!(meta.last_sync_at().await.unwrap().is_none());

        let at = Utc::now();
        meta.set_last_sync_at(at).await.unwrap();

        let stored = meta.last_sync_at().await.unwrap().unwrap();
        assert_eq!(stored.timestamp_millis(), at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = Database::connect(&DbConfig::in_memory()).await.unwrap();
        let meta = db.meta();

        meta.set("device_label", "till-1").await.unwrap();
        meta.set("device_label", "till-2").await.unwrap();
        assert_eq!(meta.get("device_label").await.unwrap().as_deref(), Some("till-2"));
    }
}
