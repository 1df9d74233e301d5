//! # Local Record Repository
//!
//! The engine's mirror of entity business payloads. The queue writes this
//! table inside its enqueue/resolve transactions; this repository is the
//! read path plus direct writes for remote-applied data.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::DbResult;

/// A mirrored business record.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct LocalRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    pub fn payload_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Repository for the `local_records` table.
#[derive(Debug, Clone)]
pub struct LocalRecordRepository {
    pool: SqlitePool,
}

impl LocalRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LocalRecordRepository { pool }
    }

    pub async fn upsert(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
        updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO local_records (entity_type, entity_id, payload, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (entity_type, entity_id)
             DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(serde_json::to_string(payload)?)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, entity_type: &str, entity_id: &str) -> DbResult<Option<LocalRecord>> {
        let record = sqlx::query_as::<_, LocalRecord>(
            "SELECT * FROM local_records WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn delete(&self, entity_type: &str, entity_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM local_records WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_get_delete() {
        let db = Database::connect(&DbConfig::in_memory()).await.unwrap();
        let records = db.records();

        records
            .upsert("product", "p-1", &json!({"name": "Coke"}), Utc::now())
            .await
            .unwrap();
        records
            .upsert("product", "p-1", &json!({"name": "Pepsi"}), Utc::now())
            .await
            .unwrap();

        let record = records.get("product", "p-1").await.unwrap().unwrap();
        assert_eq!(record.payload_json().unwrap(), json!({"name": "Pepsi"}));

        assert!(records.delete("product", "p-1").await.unwrap());
        assert!(records.get("product", "p-1").await.unwrap().is_none());
        assert!(!records.delete("product", "p-1").await.unwrap());
    }
}
