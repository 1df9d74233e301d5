//! # Sync Queue Repository
//!
//! Durable, coalesced queue of outstanding local mutations, plus the
//! per-entity `sync_state` rows that mirror each entry's lifecycle.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   enqueue ──▶ pending ──▶ (attempt) ──▶ synced (row deleted)            │
//! │                 ▲  │                       │                            │
//! │                 │  ├──▶ error ─────────────┘  (backoff, then retried)   │
//! │                 │  │                                                    │
//! │                 │  └──▶ conflict ──▶ resolve_conflict                   │
//! │                 │             │         │                               │
//! │                 └─────────────┴─────────┘ (use_local → pending,         │
//! │                                            use_remote → row deleted)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Coalescing
//! At most one live entry exists per `(entity_type, entity_id)`. A second
//! local mutation folds into the existing row instead of appending:
//!
//! - `delete` supersedes anything and resets the attempt counter
//! - `update` after an unsent `create` stays a `create` (the remote has
//!   never seen the entity) and keeps the attempt counter
//! - same-kind mutations refresh the payload and keep the attempt counter
//! - a mutation against a `conflict` entry is rejected until resolved
//!
//! Coalescing also clears `in_flight`, so an entry refreshed while its old
//! version is on the wire ignores that delivery's terminal mark and stays
//! `pending` for the next pass.
//!
//! Every write here is transactional across `sync_queue`, `sync_state` and
//! `local_records`, so a crash never leaves the three tables disagreeing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lumen_core::{ConflictResolution, OperationKind, QueueEntry, RemoteRecord, SyncStatus};

use crate::error::{DbError, DbResult};

// =============================================================================
// Entity Sync State
// =============================================================================

/// Per-entity synchronization metadata, kept in the `sync_state` table.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct EntitySyncState {
    pub entity_type: String,
    pub entity_id: String,
    pub status: SyncStatus,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the sync queue and entity sync state.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Records a local mutation: mirrors the payload into `local_records`,
    /// folds the mutation into the queue and flags the entity `pending`.
    ///
    /// One transaction covers all three tables.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: OperationKind,
        payload: &Value,
        updated_at: DateTime<Utc>,
    ) -> DbResult<QueueEntry> {
        let payload_text = serde_json::to_string(payload)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM sync_queue WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&mut *tx)
        .await?;

        let entry_id = match existing {
            Some(existing) => {
                if existing.status == SyncStatus::Conflict {
                    return Err(DbError::ConflictPending {
                        entity_type: entity_type.to_string(),
                        entity_id: entity_id.to_string(),
                    });
                }

                let (effective_op, attempts) = coalesce(existing.operation, operation, existing.attempts);

                debug!(
                    entity_type,
                    entity_id,
                    previous = ?existing.operation,
                    incoming = ?operation,
                    effective = ?effective_op,
                    "coalescing queue entry"
                );

                sqlx::query(
                    "UPDATE sync_queue
                     SET operation = ?, payload = ?, captured_updated_at = ?,
                         status = 'pending', attempts = ?, retryable = 1,
                         last_error = NULL, remote_snapshot = NULL, in_flight = 0
                     WHERE id = ?",
                )
                .bind(effective_op)
                .bind(&payload_text)
                .bind(updated_at)
                .bind(attempts)
                .bind(&existing.id)
                .execute(&mut *tx)
                .await?;

                existing.id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO sync_queue
                         (id, entity_type, entity_id, operation, payload,
                          captured_updated_at, status, attempts, retryable, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, 1, ?)",
                )
                .bind(&id)
                .bind(entity_type)
                .bind(entity_id)
                .bind(operation)
                .bind(&payload_text)
                .bind(updated_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        // Mirror the business payload. A delete removes the mirror row.
        match operation {
            OperationKind::Delete => {
                sqlx::query("DELETE FROM local_records WHERE entity_type = ? AND entity_id = ?")
                    .bind(entity_type)
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await?;
            }
            OperationKind::Create | OperationKind::Update => {
                sqlx::query(
                    "INSERT INTO local_records (entity_type, entity_id, payload, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (entity_type, entity_id)
                     DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                )
                .bind(entity_type)
                .bind(entity_id)
                .bind(&payload_text)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        upsert_state(&mut tx, entity_type, entity_id, SyncStatus::Pending, updated_at, None).await?;

        let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(&entry_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(entry)
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// FIFO batch of entries eligible for delivery.
    ///
    /// Conflict entries never drain; `cutoff` freezes the pass so entries
    /// enqueued mid-pass wait for the next one.
    pub async fn due_batch(&self, limit: i64, cutoff: DateTime<Utc>) -> DbResult<Vec<QueueEntry>> {
        self.due_batch_after(limit, cutoff, None).await
    }

    /// Like [`due_batch`](Self::due_batch), but resumes after a cursor so a
    /// pass can page through a queue larger than one batch. The cursor is
    /// the `(created_at, id)` key of the last entry of the previous page;
    /// it advances strictly, so a pass terminates even when entries are
    /// skipped or fail in place.
    pub async fn due_batch_after(
        &self,
        limit: i64,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, String)>,
    ) -> DbResult<Vec<QueueEntry>> {
        let entries = match after {
            Some((created_at, id)) => {
                sqlx::query_as::<_, QueueEntry>(
                    "SELECT * FROM sync_queue
                     WHERE status IN ('pending', 'error') AND created_at <= ?
                       AND (created_at, id) > (?, ?)
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?",
                )
                .bind(cutoff)
                .bind(created_at)
                .bind(&id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, QueueEntry>(
                    "SELECT * FROM sync_queue
                     WHERE status IN ('pending', 'error') AND created_at <= ?
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?",
                )
                .bind(cutoff)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(entries)
    }

    /// Marks the entry as being delivered right now.
    ///
    /// The `in_flight` flag survives a crash; [`recover_interrupted`]
    /// (Self::recover_interrupted) turns stale flags back into retryable
    /// errors on startup.
    pub async fn mark_attempt_started(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE sync_queue SET in_flight = 1, attempted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("queue entry", id));
        }
        Ok(())
    }

    // =========================================================================
    // Terminal Marks
    // =========================================================================

    /// Confirms delivery: removes the entry and flags the entity `synced`.
    ///
    /// Guarded on `in_flight`: a mutation that coalesced into the entry
    /// mid-attempt cleared the flag, and the delivered version no longer
    /// matches the queue. The refreshed entry then stays `pending` for the
    /// next pass instead of being dropped.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("queue entry", id))?;

        let deleted = sqlx::query("DELETE FROM sync_queue WHERE id = ? AND in_flight = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "delivered version superseded mid-attempt, entry kept"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE sync_state SET status = 'synced', synced_at = ?
             WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(now)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(entity_type = %entry.entity_type, entity_id = %entry.entity_id, "entry synced");
        Ok(())
    }

    /// Records a failed attempt with its classification.
    ///
    /// Guarded on `in_flight` like [`mark_synced`](Self::mark_synced): a
    /// superseded entry must not be parked with a stale classification.
    pub async fn mark_failed(&self, id: &str, error: &str, retryable: bool) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("queue entry", id))?;

        let updated = sqlx::query(
            "UPDATE sync_queue
             SET status = 'error', attempts = attempts + 1, retryable = ?,
                 last_error = ?, attempted_at = ?, in_flight = 0
             WHERE id = ? AND in_flight = 1",
        )
        .bind(retryable)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "failure applies to a superseded version, entry kept pending"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE sync_state SET status = 'error' WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        warn!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            attempts = entry.attempts + 1,
            retryable,
            error,
            "sync attempt failed"
        );
        Ok(())
    }

    /// Flags the entry as a conflict, preserving the remote snapshot so the
    /// resolve path can apply it later without another fetch.
    ///
    /// Guarded on `in_flight`: a conflict detected against a superseded
    /// version is stale, and the refreshed entry re-evaluates next pass.
    pub async fn mark_conflict(&self, id: &str, remote: &RemoteRecord) -> DbResult<()> {
        let snapshot = serde_json::to_string(remote)?;
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("queue entry", id))?;

        let updated = sqlx::query(
            "UPDATE sync_queue
             SET status = 'conflict', remote_snapshot = ?, attempted_at = ?, in_flight = 0
             WHERE id = ? AND in_flight = 1",
        )
        .bind(&snapshot)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "conflict detected against a superseded version, entry kept pending"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE sync_state SET status = 'conflict' WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        warn!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            "conflict detected, awaiting resolution"
        );
        Ok(())
    }

    // =========================================================================
    // Conflict Resolution
    // =========================================================================

    /// Applies an explicit resolution to a conflict entry.
    ///
    /// `UseLocal` rewinds the entry to `pending` with a fresh attempt
    /// counter and advances the capture point to the resolution time, so
    /// redelivery beats the remote version the operator already saw.
    /// `UseRemote` applies the stored remote snapshot to `local_records`,
    /// flags the entity `synced` and removes the entry.
    pub async fn resolve_conflict(&self, id: &str, resolution: ConflictResolution) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let entry = sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("queue entry", id))?;

        if entry.status != SyncStatus::Conflict {
            return Err(DbError::InvalidState(format!(
                "entry {id} is {}, not conflict",
                entry.status
            )));
        }

        match resolution {
            ConflictResolution::UseLocal => {
                sqlx::query(
                    "UPDATE sync_queue
                     SET status = 'pending', attempts = 0, retryable = 1,
                         captured_updated_at = ?, last_error = NULL, remote_snapshot = NULL
                     WHERE id = ?",
                )
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE sync_state SET status = 'pending'
                     WHERE entity_type = ? AND entity_id = ?",
                )
                .bind(&entry.entity_type)
                .bind(&entry.entity_id)
                .execute(&mut *tx)
                .await?;
            }
            ConflictResolution::UseRemote => {
                let snapshot = entry.remote_snapshot.as_deref().ok_or_else(|| {
                    DbError::InvalidState(format!("conflict entry {id} has no remote snapshot"))
                })?;
                let remote: RemoteRecord = serde_json::from_str(snapshot)?;
                let payload_text = serde_json::to_string(&remote.payload)?;

                sqlx::query(
                    "INSERT INTO local_records (entity_type, entity_id, payload, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (entity_type, entity_id)
                     DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                )
                .bind(&entry.entity_type)
                .bind(&entry.entity_id)
                .bind(&payload_text)
                .bind(remote.updated_at)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM sync_queue WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "UPDATE sync_state SET status = 'synced', updated_at = ?, synced_at = ?
                     WHERE entity_type = ? AND entity_id = ?",
                )
                .bind(remote.updated_at)
                .bind(now)
                .bind(&entry.entity_type)
                .bind(&entry.entity_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            resolution = ?resolution,
            "conflict resolved"
        );
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rewinds every `error` entry to `pending` for immediate redelivery,
    /// including permanent failures. Returns the number of entries reset.
    pub async fn retry_failed(&self) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE sync_state SET status = 'pending'
             WHERE (entity_type, entity_id) IN
                   (SELECT entity_type, entity_id FROM sync_queue WHERE status = 'error')",
        )
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE sync_queue
             SET status = 'pending', retryable = 1, attempted_at = NULL
             WHERE status = 'error'",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let reset = result.rows_affected();
        if reset > 0 {
            info!(count = reset, "failed entries reset for retry");
        }
        Ok(reset)
    }

    /// Startup recovery: entries left `in_flight` by a crash mid-attempt
    /// become retryable errors, never silent drops or duplicates.
    pub async fn recover_interrupted(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_queue
             SET status = 'error', in_flight = 0, retryable = 1,
                 attempts = attempts + 1,
                 last_error = 'interrupted: process exited during delivery'
             WHERE in_flight = 1",
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            sqlx::query(
                "UPDATE sync_state SET status = 'error'
                 WHERE (entity_type, entity_id) IN
                       (SELECT entity_type, entity_id FROM sync_queue WHERE status = 'error')",
            )
            .execute(&self.pool)
            .await?;
            warn!(count = recovered, "recovered interrupted queue entries");
        }
        Ok(recovered)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: &str) -> DbResult<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("queue entry", id))
    }

    pub async fn entry_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM sync_queue WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Entries whose status is in the given set.
    pub async fn count(&self, statuses: &[SyncStatus]) -> DbResult<i64> {
        if statuses.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!("SELECT COUNT(*) FROM sync_queue WHERE status IN ({placeholders})");

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for status in statuses {
            query = query.bind(*status);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    /// Outstanding work: `pending` plus `error` entries.
    pub async fn pending_count(&self) -> DbResult<i64> {
        self.count(&[SyncStatus::Pending, SyncStatus::Error]).await
    }

    pub async fn list_conflicts(&self) -> DbResult<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM sync_queue WHERE status = 'conflict' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn entity_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Option<EntitySyncState>> {
        let state = sqlx::query_as::<_, EntitySyncState>(
            "SELECT * FROM sync_state WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }
}

// =============================================================================
// Coalescing Rules
// =============================================================================

/// Folds an incoming mutation into an existing entry's operation kind.
///
/// Returns the effective operation and attempt counter.
fn coalesce(
    existing: OperationKind,
    incoming: OperationKind,
    attempts: i64,
) -> (OperationKind, i64) {
    match (existing, incoming) {
        // Delete supersedes everything; prior failures are irrelevant to it.
        (_, OperationKind::Delete) => (OperationKind::Delete, 0),
        // The remote has never seen the entity: stays a create.
        (OperationKind::Create, OperationKind::Update) => (OperationKind::Create, attempts),
        // Same kind: refresh in place.
        (e, i) if e == i => (e, attempts),
        // Kind changed (e.g. update after a queued delete was coalesced
        // away by a re-create): start the counter over.
        (_, i) => (i, 0),
    }
}

async fn upsert_state(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entity_type: &str,
    entity_id: &str,
    status: SyncStatus,
    updated_at: DateTime<Utc>,
    synced_at: Option<DateTime<Utc>>,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO sync_state (entity_type, entity_id, status, updated_at, synced_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (entity_type, entity_id)
         DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(status)
    .bind(updated_at)
    .bind(synced_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn setup() -> Database {
        Database::connect(&DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_entry_and_mirror() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"name": "Coke"}), Utc::now())
            .await
            .unwrap();

        assert_eq!(entry.status, SyncStatus::Pending);
        assert_eq!(entry.operation, OperationKind::Create);
        assert_eq!(entry.attempts, 0);
        assert!(entry.retryable);

        let record = db.records().get("product", "p-1").await.unwrap().unwrap();
        assert_eq!(record.payload_json().unwrap(), json!({"name": "Coke"}));

        let state = queue.entity_state("product", "p-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_coalescing_keeps_single_entry_per_entity() {
        let db = setup().await;
        let queue = db.queue();

        queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap();
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 3}), Utc::now())
            .await
            .unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let entry = queue.entry_for_entity("product", "p-1").await.unwrap().unwrap();
        // Update after an unsent create stays a create.
        assert_eq!(entry.operation, OperationKind::Create);
        assert_eq!(entry.payload_json().unwrap(), json!({"v": 3}));
    }

    #[tokio::test]
    async fn test_update_after_create_keeps_attempts() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "timeout", true).await.unwrap();

        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap();

        let entry = queue.entry_for_entity("product", "p-1").await.unwrap().unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.status, SyncStatus::Pending);
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn test_delete_supersedes_and_resets_attempts() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "timeout", true).await.unwrap();

        queue
            .enqueue("product", "p-1", OperationKind::Delete, &json!({}), Utc::now())
            .await
            .unwrap();

        let entry = queue.entry_for_entity("product", "p-1").await.unwrap().unwrap();
        assert_eq!(entry.operation, OperationKind::Delete);
        assert_eq!(entry.attempts, 0);

        // The local mirror is gone.
        assert!(db.records().get("product", "p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_against_conflict_is_rejected() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload: json!({"v": 9}),
            updated_at: Utc::now(),
        };
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_conflict(&entry.id, &remote).await.unwrap();

        let err = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConflictPending { .. }));
    }

    #[tokio::test]
    async fn test_mark_synced_removes_entry_and_updates_state() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_synced(&entry.id).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 0);
        let state = queue.entity_state("product", "p-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Synced);
        assert!(state.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_failed_increments_attempts() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "http 500", true).await.unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "http 500", true).await.unwrap();

        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.status, SyncStatus::Error);
        assert_eq!(entry.last_error.as_deref(), Some("http 500"));
        assert!(entry.retryable);
        assert!(entry.attempted_at.is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_marked_non_retryable() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "http 422", false).await.unwrap();

        let entry = queue.get(&entry.id).await.unwrap();
        assert!(!entry.retryable);

        // Manual retry resets it.
        assert_eq!(queue.retry_failed().await.unwrap(), 1);
        let entry = queue.get(&entry.id).await.unwrap();
        assert!(entry.retryable);
        assert_eq!(entry.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_retry_failed_is_idempotent_and_touches_only_errors() {
        let db = setup().await;
        let queue = db.queue();

        let failed = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&failed.id).await.unwrap();
        queue.mark_failed(&failed.id, "http 500", true).await.unwrap();

        let pending = queue
            .enqueue("product", "p-2", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();

        assert_eq!(queue.retry_failed().await.unwrap(), 1);
        assert_eq!(queue.retry_failed().await.unwrap(), 0);

        let pending = queue.get(&pending.id).await.unwrap();
        assert_eq!(pending.status, SyncStatus::Pending);
        assert_eq!(pending.attempts, 0);
    }

    #[tokio::test]
    async fn test_due_batch_is_fifo_and_skips_conflicts() {
        let db = setup().await;
        let queue = db.queue();

        let first = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        queue
            .enqueue("product", "p-2", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let third = queue
            .enqueue("product", "p-3", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();

        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-2".into(),
            payload: json!({}),
            updated_at: Utc::now(),
        };
        let p2 = queue.entry_for_entity("product", "p-2").await.unwrap().unwrap();
        queue.mark_attempt_started(&p2.id).await.unwrap();
        queue.mark_conflict(&p2.id, &remote).await.unwrap();

        let batch = queue.due_batch(10, Utc::now()).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), third.id.as_str()]);
    }

    #[tokio::test]
    async fn test_due_batch_respects_cutoff() {
        let db = setup().await;
        let queue = db.queue();

        let cutoff = Utc::now() - chrono::Duration::seconds(10);
        queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();

        assert!(queue.due_batch(10, cutoff).await.unwrap().is_empty());
        assert_eq!(queue.due_batch(10, Utc::now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_batch_after_pages_through_queue() {
        let db = setup().await;
        let queue = db.queue();

        for i in 0..3 {
            queue
                .enqueue("product", &format!("p-{i}"), OperationKind::Create, &json!({}), Utc::now())
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let cutoff = Utc::now();

        let first = queue.due_batch_after(2, cutoff, None).await.unwrap();
        assert_eq!(first.len(), 2);

        let cursor = first.last().map(|e| (e.created_at, e.id.clone()));
        let second = queue.due_batch_after(2, cutoff, cursor).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entity_id, "p-2");

        let cursor = second.last().map(|e| (e.created_at, e.id.clone()));
        assert!(queue.due_batch_after(2, cutoff, cursor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mid_attempt_coalesce_survives_mark_synced() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();

        // v2 lands while v1 is on the wire.
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap();

        queue.mark_synced(&entry.id).await.unwrap();

        // The refreshed entry survives and carries v2 into the next pass.
        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, SyncStatus::Pending);
        assert_eq!(entry.payload_json().unwrap(), json!({"v": 2}));
        assert!(!entry.in_flight);

        let state = queue.entity_state("product", "p-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_mid_attempt_coalesce_ignores_stale_failure() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap();

        queue.mark_failed(&entry.id, "http 422", false).await.unwrap();

        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, SyncStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.retryable);
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn test_mid_attempt_coalesce_ignores_stale_conflict() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 2}), Utc::now())
            .await
            .unwrap();

        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload: json!({"v": 9}),
            updated_at: Utc::now(),
        };
        queue.mark_conflict(&entry.id, &remote).await.unwrap();

        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, SyncStatus::Pending);
        assert!(entry.remote_snapshot.is_none());

        // Not conflict-flagged, so further mutations are still accepted.
        queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 3}), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_conflict_use_local_rewinds_to_pending() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_failed(&entry.id, "http 500", true).await.unwrap();
        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload: json!({"v": 9}),
            updated_at: Utc::now(),
        };
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_conflict(&entry.id, &remote).await.unwrap();

        queue
            .resolve_conflict(&entry.id, ConflictResolution::UseLocal)
            .await
            .unwrap();

        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, SyncStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.remote_snapshot.is_none());
        // Local payload untouched.
        assert_eq!(
            db.records().get("product", "p-1").await.unwrap().unwrap().payload_json().unwrap(),
            json!({"v": 1})
        );
    }

    #[tokio::test]
    async fn test_resolve_conflict_use_remote_applies_snapshot() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        let remote_updated = Utc::now();
        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload: json!({"v": 9}),
            updated_at: remote_updated,
        };
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_conflict(&entry.id, &remote).await.unwrap();

        queue
            .resolve_conflict(&entry.id, ConflictResolution::UseRemote)
            .await
            .unwrap();

        assert!(queue.entry_for_entity("product", "p-1").await.unwrap().is_none());
        let record = db.records().get("product", "p-1").await.unwrap().unwrap();
        assert_eq!(record.payload_json().unwrap(), json!({"v": 9}));

        let state = queue.entity_state("product", "p-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_resolve_non_conflict_entry_is_invalid() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();

        let err = queue
            .resolve_conflict(&entry.id, ConflictResolution::UseLocal)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_recover_interrupted_turns_in_flight_into_error() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Create, &json!({}), Utc::now())
            .await
            .unwrap();
        queue.mark_attempt_started(&entry.id).await.unwrap();

        assert_eq!(queue.recover_interrupted().await.unwrap(), 1);

        let entry = queue.get(&entry.id).await.unwrap();
        assert_eq!(entry.status, SyncStatus::Error);
        assert!(!entry.in_flight);
        assert!(entry.retryable);
        assert_eq!(entry.attempts, 1);

        // Idempotent on a clean queue.
        assert_eq!(queue.recover_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_conflicts() {
        let db = setup().await;
        let queue = db.queue();

        let entry = queue
            .enqueue("product", "p-1", OperationKind::Update, &json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        let remote = RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload: json!({"v": 2}),
            updated_at: Utc::now(),
        };
        queue.mark_attempt_started(&entry.id).await.unwrap();
        queue.mark_conflict(&entry.id, &remote).await.unwrap();

        let conflicts = queue.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].remote_snapshot_json().unwrap()["payload"], json!({"v": 2}));

        assert_eq!(queue.count(&[SyncStatus::Conflict]).await.unwrap(), 1);
        assert_eq!(queue.count(&[SyncStatus::Pending]).await.unwrap(), 0);
        assert_eq!(queue.count(&[]).await.unwrap(), 0);
    }
}
