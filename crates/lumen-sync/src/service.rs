//! # Sync Service
//!
//! The single entry point an application embeds. Owns the orchestrator,
//! connectivity monitor and status publisher, and runs the background loop
//! that triggers passes.
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncService                                    │
//! │                                                                         │
//! │  APPLICATION SURFACE                  BACKGROUND LOOP                   │
//! │  ───────────────────                  ───────────────                   │
//! │  record_local_mutation ──┐            tokio::select! {                  │
//! │  sync / request_sync ────┼─trigger──▶   interval tick                   │
//! │  retry_failed ───────────┘              offline→online edge             │
//! │  resolve_conflict                       mutation trigger                │
//! │  pending_count / conflicts              shutdown                        │
//! │  status / subscribe                   } ──▶ orchestrator.try_sync()     │
//! │  last_sync_at                                                           │
//! │                                                                         │
//! │  Startup: recover entries left in-flight by a crash, then first pass.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use lumen_core::{
    ConflictResolution, OperationKind, QueueEntry, ServiceStatus, SyncReport,
};
use lumen_db::Database;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::SyncOrchestrator;
use crate::remote::{HttpRemoteAuthority, RemoteAuthority, RemoteError};
use crate::status::{StatusPublisher, Subscription};

// =============================================================================
// Sync Service
// =============================================================================

/// Embedded sync engine facade.
pub struct SyncService {
    config: SyncConfig,
    db: Arc<Database>,
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: ConnectivityMonitor,
    publisher: Arc<StatusPublisher>,

    /// Wakes the background loop after a local mutation.
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Option<mpsc::Receiver<()>>,

    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SyncService {
    /// Builder entry point.
    pub fn builder(config: SyncConfig) -> SyncServiceBuilder {
        SyncServiceBuilder::new(config)
    }

    fn new(
        config: SyncConfig,
        db: Arc<Database>,
        remote: Arc<dyn RemoteAuthority>,
    ) -> Self {
        let publisher = StatusPublisher::new();
        let connectivity = ConnectivityMonitor::new(publisher.clone());

        let orchestrator = Arc::new(SyncOrchestrator::new(
            db.clone(),
            remote,
            connectivity.clone(),
            publisher.clone(),
            config.retry_policy(),
            config.sync.batch_size,
        ));

        let (trigger_tx, trigger_rx) = mpsc::channel(8);

        SyncService {
            config,
            db,
            orchestrator,
            connectivity,
            publisher,
            trigger_tx,
            trigger_rx: Some(trigger_rx),
            shutdown_tx: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the background loop.
    ///
    /// Recovers entries a crash left mid-delivery, then runs passes on the
    /// configured interval, on offline→online transitions and after local
    /// mutations.
    pub async fn start(&mut self) -> SyncResult<()> {
        self.config.validate()?;

        let trigger_rx = self.trigger_rx.take().ok_or(SyncError::AlreadyStarted)?;

        let recovered = self.db.queue().recover_interrupted().await?;
        if recovered > 0 {
            info!(count = recovered, "requeued entries interrupted by shutdown");
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(Self::run_loop(
            self.orchestrator.clone(),
            self.connectivity.watch(),
            trigger_rx,
            shutdown_rx,
            self.config.sync_interval(),
        ));

        info!(
            device_id = %self.config.device.id,
            device_name = %self.config.device.name,
            interval_secs = self.config.sync.sync_interval_secs,
            "sync service started"
        );
        Ok(())
    }

    /// Stops the background loop. A pass already in progress finishes its
    /// current entry transactionally; the rest waits for the next start.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        info!("sync service stopped");
    }

    /// Background trigger loop.
    async fn run_loop(
        orchestrator: Arc<SyncOrchestrator>,
        mut conn_rx: watch::Receiver<bool>,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
        interval: std::time::Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let triggered = tokio::select! {
                _ = ticker.tick() => true,

                changed = conn_rx.changed() => {
                    match changed {
                        // Only the offline→online edge starts a pass.
                        Ok(()) => *conn_rx.borrow_and_update(),
                        Err(_) => false,
                    }
                }

                Some(()) = trigger_rx.recv() => true,

                _ = shutdown_rx.recv() => break,
            };

            if triggered {
                if let Err(e) = orchestrator.try_sync().await {
                    error!(error = %e, "sync pass failed");
                }
            }
        }

        info!("sync loop stopped");
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Records a local create/update/delete and queues it for delivery.
    ///
    /// The write is immediate and local; delivery happens in the
    /// background. A trigger nudges the loop so an online till syncs
    /// within moments of the mutation.
    pub async fn record_local_mutation(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: OperationKind,
        payload: &Value,
    ) -> SyncResult<QueueEntry> {
        let entry = self
            .db
            .queue()
            .enqueue(entity_type, entity_id, operation, payload, Utc::now())
            .await?;

        self.request_sync();
        Ok(entry)
    }

    // =========================================================================
    // Sync Control
    // =========================================================================

    /// Runs a pass now and waits for its report. Any in-progress pass
    /// completes first.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.orchestrator.sync().await
    }

    /// Asks the background loop for a pass without waiting.
    pub fn request_sync(&self) {
        // A full channel means a pass is already queued up.
        let _ = self.trigger_tx.try_send(());
    }

    /// Feeds an external reachability hint (e.g. an OS network-change
    /// event). The engine also infers connectivity from call outcomes, so
    /// this only accelerates reaction to an outage ending.
    pub fn report_connectivity(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Resets all failed entries (including parked permanent failures) for
    /// immediate redelivery.
    pub async fn retry_failed_operations(&self) -> SyncResult<u64> {
        let reset = self.db.queue().retry_failed().await?;
        if reset > 0 {
            self.request_sync();
        }
        Ok(reset)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub async fn list_conflicts(&self) -> SyncResult<Vec<QueueEntry>> {
        Ok(self.db.queue().list_conflicts().await?)
    }

    /// Applies an operator's choice to a conflict entry. Choosing local
    /// schedules redelivery; choosing remote applies the stored snapshot.
    pub async fn resolve_conflict(
        &self,
        entry_id: &str,
        resolution: ConflictResolution,
    ) -> SyncResult<()> {
        self.db.queue().resolve_conflict(entry_id, resolution).await?;
        if resolution == ConflictResolution::UseLocal {
            self.request_sync();
        }
        Ok(())
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Current online/syncing snapshot.
    pub fn status(&self) -> ServiceStatus {
        self.publisher.current()
    }

    /// Registers a status listener; see [`StatusPublisher::subscribe`].
    pub fn subscribe(
        &self,
        listener: impl Fn(ServiceStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.publisher.subscribe(listener)
    }

    /// Entries awaiting delivery (pending plus retryable errors).
    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.db.queue().pending_count().await?)
    }

    /// Entries in any of the given statuses, for UI badge counts.
    pub async fn count(&self, statuses: &[lumen_core::SyncStatus]) -> SyncResult<i64> {
        Ok(self.db.queue().count(statuses).await?)
    }

    /// Timestamp of the last completed pass, persisted across restarts.
    pub async fn last_sync_at(&self) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.db.meta().last_sync_at().await?)
    }

    /// The database handle, for embedding applications that share it.
    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncService`].
pub struct SyncServiceBuilder {
    config: SyncConfig,
    db: Option<Arc<Database>>,
    remote: Option<Arc<dyn RemoteAuthority>>,
}

impl SyncServiceBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncServiceBuilder {
            config,
            db: None,
            remote: None,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Overrides the remote authority (tests, alternative transports).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn build(self) -> SyncResult<SyncService> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("database required".into()))?;

        self.config.validate()?;

        let remote: Arc<dyn RemoteAuthority> = match self.remote {
            Some(remote) => remote,
            None => {
                if self.config.remote.base_url.is_empty() {
                    warn!("remote.base_url not configured, engine will queue locally only");
                }
                Arc::new(
                    HttpRemoteAuthority::new(
                        self.config.remote.base_url.clone(),
                        self.config.request_timeout(),
                        self.config.remote.api_token.clone(),
                    )
                    .map_err(|e: RemoteError| SyncError::InvalidConfig(e.to_string()))?,
                )
            }
        };

        Ok(SyncService::new(self.config, db, remote))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
