//! # Lumen POS Sync Engine
//!
//! Local-first synchronization between a till's SQLite store and the
//! remote authority. Writes always land locally first; this crate drains
//! the resulting queue whenever the backend is reachable.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           lumen-sync                                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        SyncService                               │  │
//! │  │                                                                  │  │
//! │  │  • Facade the application embeds                                 │  │
//! │  │  • Records local mutations into the durable queue                │  │
//! │  │  • Runs the background trigger loop                              │  │
//! │  │  • Surfaces conflicts and status                                 │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connectivity   │  │SyncOrchestrator│  │   StatusPublisher      │    │
//! │  │ Monitor        │  │                │  │                        │    │
//! │  │                │  │ Drains queue,  │  │ Pushes online/syncing  │    │
//! │  │ Tracks remote  │  │ resolves, logs │  │ snapshots to UI        │    │
//! │  │ reachability   │  │ outcomes       │  │ listeners              │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                     ┌────────────────┐                                  │
//! │                     │ RemoteAuthority│   HTTP (reqwest) in production,  │
//! │                     │     trait      │   in-memory fakes in tests       │
//! │                     └────────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Policy (conflict resolution, backoff) lives in `lumen-core`; durable
//! state lives in `lumen-db`. This crate wires them to the network and the
//! clock.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod orchestrator;
pub mod remote;
pub mod service;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DeviceSettings, RemoteSettings, SyncConfig, SyncSettings};
pub use connectivity::ConnectivityMonitor;
pub use error::{SyncError, SyncResult};
pub use orchestrator::SyncOrchestrator;
pub use remote::{HttpRemoteAuthority, RemoteAuthority, RemoteError, RemoteResult};
pub use service::{SyncService, SyncServiceBuilder};
pub use status::{StatusPublisher, Subscription};

// Re-export the pure types callers need at the surface.
pub use lumen_core::{
    ConflictResolution, EntryError, OperationKind, QueueEntry, ServiceStatus, SyncReport,
    SyncStatus,
};
pub use lumen_db::{Database, DbConfig};
