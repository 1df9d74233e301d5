//! # Sync Domain Types
//!
//! Core types shared by the queue, the orchestrator, and the UI layer.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Domain Types                               │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   QueueEntry    │   │  RemoteRecord   │   │   SyncReport    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  entity_id      │   │  synced         │       │
//! │  │  entity_type/id │   │  payload (JSON) │   │  skipped        │       │
//! │  │  operation      │   │  updated_at     │   │  failed         │       │
//! │  │  payload        │   │  (authoritative)│   │  conflicted     │       │
//! │  │  status         │   └─────────────────┘   │  errors[]       │       │
//! │  │  attempts       │                         └─────────────────┘       │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncStatus    │   │  OperationKind  │   │  ServiceStatus  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Pending        │   │  Create         │   │  is_online      │       │
//! │  │  Synced         │   │  Update         │   │  is_syncing     │       │
//! │  │  Error          │   │  Delete         │   └─────────────────┘       │
//! │  │  Conflict       │   └─────────────────┘                             │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Coalescing Invariant
//! While an entity is not `Synced`, exactly one live `QueueEntry` exists for
//! it. A later local mutation supersedes (replaces the payload of) the queued
//! entry instead of appending a second one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Sync Status
// =============================================================================

/// Synchronization status of an entity / its queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local mutation waiting to be pushed.
    Pending,
    /// Confirmed by the remote authority; no outstanding queue entry.
    Synced,
    /// Last push attempt failed (transient or permanent).
    Error,
    /// Local and remote diverged; requires explicit resolution.
    Conflict,
}

impl SyncStatus {
    /// Stable string form used in SQL `IN (...)` filters.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// The kind of mutation an outstanding queue entry intends to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Failure Kind
// =============================================================================

/// Classification of a failed remote call, used by the retry policy.
///
/// ## Classification Rules
/// - Transient: network errors, timeouts, HTTP 5xx → retried with backoff
/// - Permanent: HTTP 4xx validation/authorization → terminal `Error`,
///   only a corrected local edit or a manual retry moves it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

// =============================================================================
// Queue Entry
// =============================================================================

/// One outstanding intent to reconcile one entity with the remote authority.
///
/// Entries are coalesced per `(entity_type, entity_id)`: a later mutation
/// replaces the payload of the live entry rather than enqueueing a second
/// one. An entry is removed only when its status becomes `Synced`; a
/// `Conflict` entry persists until explicitly resolved.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct QueueEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Type of entity being synced: "product", "sale", "inventory", etc.
    pub entity_type: String,

    /// ID of the entity being synced.
    pub entity_id: String,

    /// The mutation this entry will deliver.
    pub operation: OperationKind,

    /// JSON snapshot of the entity's business fields, captured at enqueue.
    pub payload: String,

    /// The entity's local `updated_at` at the moment of enqueue.
    /// The resolver compares this against the remote record's `updated_at`.
    #[ts(as = "String")]
    pub captured_updated_at: DateTime<Utc>,

    /// Mirrors the entity's sync status while the entry is outstanding.
    pub status: SyncStatus,

    /// Number of delivery attempts so far.
    pub attempts: i64,

    /// False once a permanent failure was recorded; blocks auto-retry.
    pub retryable: bool,

    /// Summary of the last failure, if any.
    pub last_error: Option<String>,

    /// The authoritative record captured when a conflict was detected,
    /// kept alongside the local payload for manual resolution.
    pub remote_snapshot: Option<String>,

    /// Set while a delivery attempt is in progress; used to recover
    /// entries interrupted by a crash.
    pub in_flight: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// When delivery was last attempted.
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Parses the payload snapshot as JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Parses the stored remote snapshot, if one was captured.
    pub fn remote_snapshot_json(&self) -> Option<serde_json::Value> {
        self.remote_snapshot
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

// =============================================================================
// Remote Record
// =============================================================================

/// The authoritative view of an entity as returned by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub entity_type: String,
    pub entity_id: String,
    /// Business fields as the remote knows them.
    pub payload: serde_json::Value,
    /// The remote's own modification timestamp.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Conflict Resolution Choice
// =============================================================================

/// The externally chosen way out of a `Conflict` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local payload: the entry returns to `Pending` for redelivery.
    UseLocal,
    /// Accept the remote snapshot: it is applied locally and the entry
    /// is removed.
    UseRemote,
}

// =============================================================================
// Sync Report
// =============================================================================

/// Per-entry error descriptor carried in a [`SyncReport`].
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EntryError {
    pub entry_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    /// Whether the failure was classified transient (will auto-retry).
    pub retryable: bool,
}

/// Immutable outcome of one orchestrator pass.
///
/// Only the most recent report is retained; per-entry failures are captured
/// here instead of being raised to the caller of `sync()`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncReport {
    /// Entries confirmed by the remote and removed from the queue.
    pub synced: u32,
    /// Entries not attempted this pass (backoff not elapsed, permanent
    /// failures awaiting manual retry).
    pub skipped: u32,
    /// Entries whose delivery attempt failed.
    pub failed: u32,
    /// Entries that diverged from the remote and now await resolution.
    pub conflicted: u32,
    /// Entry-level failure details.
    pub errors: Vec<EntryError>,
    /// True when the pass stopped early (connectivity lost mid-pass).
    pub aborted: bool,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    /// Starts an empty report for a pass beginning now.
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        SyncReport {
            synced: 0,
            skipped: 0,
            failed: 0,
            conflicted: 0,
            errors: Vec::new(),
            aborted: false,
            started_at,
            finished_at: started_at,
        }
    }

    /// Total entries examined during the pass.
    pub fn total(&self) -> u32 {
        self.synced + self.skipped + self.failed + self.conflicted
    }
}

// =============================================================================
// Service Status
// =============================================================================

/// Process-wide sync status, overwritten atomically on every transition and
/// broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServiceStatus {
    /// Current reachability of the remote authority.
    pub is_online: bool,
    /// Whether an orchestrator pass is running.
    pub is_syncing: bool,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        ServiceStatus {
            is_online: false,
            is_syncing: false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
