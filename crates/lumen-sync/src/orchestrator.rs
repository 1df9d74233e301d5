//! # Sync Orchestrator
//!
//! Drives reconciliation passes: drains the queue, consults the resolver
//! and records outcomes.
//!
//! ## Pass Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Sync Pass                                  │
//! │                                                                         │
//! │  cutoff = now ──▶ due batches, paged to empty (FIFO, no conflicts)     │
//! │                       │                                                 │
//! │        for each entry │  (sequential; per-entity order preserved)      │
//! │                       ▼                                                 │
//! │        backoff not elapsed / parked? ──▶ skip                          │
//! │                       │                                                 │
//! │        mark_attempt_started ──▶ fetch remote ──▶ resolver.decide        │
//! │                       │                              │                  │
//! │                       │            ┌─────────────────┼────────────┐    │
//! │                       │            ▼                 ▼            ▼    │
//! │                       │      AlreadyConsistent   Push(kind)   Conflict │
//! │                       │            │                 │            │    │
//! │                       │       mark_synced     create/update/  mark_   │
//! │                       │                        delete, then    conflict│
//! │                       │                        mark_synced/            │
//! │                       │                        mark_failed             │
//! │                       ▼                                                 │
//! │        network-class failure ──▶ mark offline, abort remaining pass    │
//! │                                                                         │
//! │  completed pass ──▶ persist last_sync_at ──▶ SyncReport                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Passes are serialized: an explicit sync waits for a running pass, while
//! automatic triggers fold into a rerun flag the pass holder drains before
//! releasing the lock. Entries enqueued after the cutoff wait for the next
//! pass, so a pass always terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lumen_core::{
    ConflictResolver, Decision, EntryError, PushKind, QueueEntry, RetryPolicy, SyncReport,
};
use lumen_db::Database;

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::remote::{outbound_record, RemoteAuthority, RemoteError};
use crate::status::StatusPublisher;

// =============================================================================
// Entry Outcome
// =============================================================================

enum EntryOutcome {
    Synced,
    Conflicted,
    Failed {
        message: String,
        retryable: bool,
        connection_lost: bool,
    },
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Executes sync passes against the remote authority.
pub struct SyncOrchestrator {
    db: Arc<Database>,
    remote: Arc<dyn RemoteAuthority>,
    connectivity: ConnectivityMonitor,
    publisher: Arc<StatusPublisher>,
    resolver: ConflictResolver,
    retry: RetryPolicy,
    batch_size: i64,

    /// Serializes passes; held for the whole pass.
    pass_lock: Mutex<()>,
    /// Set when a trigger arrives mid-pass; the pass holder reruns once.
    rerun: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn RemoteAuthority>,
        connectivity: ConnectivityMonitor,
        publisher: Arc<StatusPublisher>,
        retry: RetryPolicy,
        batch_size: i64,
    ) -> Self {
        SyncOrchestrator {
            db,
            remote,
            connectivity,
            publisher,
            resolver: ConflictResolver::new(),
            retry,
            batch_size,
            pass_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
        }
    }

    /// Runs a pass now, waiting for any in-progress pass to finish first.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let _guard = self.pass_lock.lock().await;
        self.run_while_triggered().await
    }

    /// Runs a pass if none is in progress; otherwise flags the running
    /// pass to go around again and returns `None`.
    pub async fn try_sync(&self) -> SyncResult<Option<SyncReport>> {
        match self.pass_lock.try_lock() {
            Ok(_guard) => self.run_while_triggered().await.map(Some),
            Err(_) => {
                debug!("pass in progress, folding trigger into rerun");
                self.rerun.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    /// Pass loop for the lock holder: drains rerun requests that arrived
    /// while a pass was running, then reports the last pass.
    async fn run_while_triggered(&self) -> SyncResult<SyncReport> {
        loop {
            let report = self.run_pass().await?;
            if report.aborted || !self.rerun.swap(false, Ordering::SeqCst) {
                return Ok(report);
            }
        }
    }

    /// One full pass. Caller must hold `pass_lock`.
    async fn run_pass(&self) -> SyncResult<SyncReport> {
        let cutoff = Utc::now();
        let mut report = SyncReport::begin(cutoff);

        self.publisher.set_syncing(true);
        let result = self.drain_due(&mut report).await;
        self.publisher.set_syncing(false);
        result?;

        report.finished_at = Utc::now();

        if !report.aborted {
            self.db.meta().set_last_sync_at(report.finished_at).await?;
        }

        info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            conflicted = report.conflicted,
            aborted = report.aborted,
            "sync pass complete"
        );

        Ok(report)
    }

    /// Pages through every due entry up to the pass cutoff. The cursor
    /// advances strictly past skipped and failed-in-place entries, so the
    /// loop terminates even when nothing leaves the queue.
    async fn drain_due(&self, report: &mut SyncReport) -> SyncResult<()> {
        let mut cursor: Option<(chrono::DateTime<Utc>, String)> = None;

        loop {
            let batch = self
                .db
                .queue()
                .due_batch_after(self.batch_size, report.started_at, cursor)
                .await?;
            if batch.is_empty() {
                return Ok(());
            }
            debug!(count = batch.len(), "drained due batch");
            cursor = batch.last().map(|e| (e.created_at, e.id.clone()));

            for entry in &batch {
                if !self.retry.should_retry(entry) || !self.retry.is_due(entry, Utc::now()) {
                    report.skipped += 1;
                    continue;
                }

                match self.process_entry(entry).await? {
                    EntryOutcome::Synced => report.synced += 1,
                    EntryOutcome::Conflicted => report.conflicted += 1,
                    EntryOutcome::Failed {
                        message,
                        retryable,
                        connection_lost,
                    } => {
                        report.failed += 1;
                        report.errors.push(EntryError {
                            entry_id: entry.id.clone(),
                            entity_type: entry.entity_type.clone(),
                            entity_id: entry.entity_id.clone(),
                            message,
                            retryable,
                        });

                        if connection_lost {
                            warn!("connection lost mid-pass, remaining entries wait");
                            report.aborted = true;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Delivers one entry. Database errors bubble up; remote failures are
    /// recorded on the entry and reported as an outcome.
    async fn process_entry(&self, entry: &QueueEntry) -> SyncResult<EntryOutcome> {
        let queue = self.db.queue();
        queue.mark_attempt_started(&entry.id).await?;

        let local_payload = match entry.payload_json() {
            Ok(payload) => payload,
            Err(e) => {
                // A payload that no longer parses will never deliver.
                let message = format!("stored payload is not valid JSON: {e}");
                queue.mark_failed(&entry.id, &message, false).await?;
                return Ok(EntryOutcome::Failed {
                    message,
                    retryable: false,
                    connection_lost: false,
                });
            }
        };

        let remote = match self.remote.fetch(&entry.entity_type, &entry.entity_id).await {
            Ok(remote) => {
                self.connectivity.set_online(true);
                remote
            }
            Err(e) => return self.record_failure(entry, e).await,
        };

        let decision = self.resolver.decide(
            entry.operation,
            entry.captured_updated_at,
            &local_payload,
            remote.as_ref(),
        );

        match decision {
            Decision::AlreadyConsistent => {
                queue.mark_synced(&entry.id).await?;
                Ok(EntryOutcome::Synced)
            }
            Decision::Conflict => {
                // decide() only yields Conflict when a remote record exists.
                if let Some(ref remote_record) = remote {
                    queue.mark_conflict(&entry.id, remote_record).await?;
                }
                Ok(EntryOutcome::Conflicted)
            }
            Decision::Push(kind) => {
                let record = outbound_record(&entry.entity_type, &entry.entity_id, local_payload);
                let push = match kind {
                    PushKind::Create => self.remote.create(&record).await.map(|_| ()),
                    PushKind::Update => self.remote.update(&record).await.map(|_| ()),
                    PushKind::Delete => {
                        self.remote.delete(&entry.entity_type, &entry.entity_id).await
                    }
                };

                match push {
                    Ok(()) => {
                        self.connectivity.set_online(true);
                        queue.mark_synced(&entry.id).await?;
                        Ok(EntryOutcome::Synced)
                    }
                    Err(e) => self.record_failure(entry, e).await,
                }
            }
        }
    }

    async fn record_failure(
        &self,
        entry: &QueueEntry,
        error: RemoteError,
    ) -> SyncResult<EntryOutcome> {
        let retryable = error.is_transient();
        let message = error.to_string();
        self.db.queue().mark_failed(&entry.id, &message, retryable).await?;

        let connection_lost = matches!(error, RemoteError::Network(_) | RemoteError::Timeout(_));
        if connection_lost {
            self.connectivity.set_online(false);
        }

        Ok(EntryOutcome::Failed {
            message,
            retryable,
            connection_lost,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
