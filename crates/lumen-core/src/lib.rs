//! # lumen-core: Pure Sync Logic for Lumen POS
//!
//! This crate contains the I/O-free heart of the sync engine: the domain
//! types shared across the workspace, the conflict resolver, and the retry
//! policy. Everything in here is deterministic and testable without mocks.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Lumen POS Layering                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    lumen-core (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │  ┌───────────────┐   ┌───────────────┐   ┌──────────────────┐  │   │
//! │  │  │    types      │   │   resolver    │   │      retry       │  │   │
//! │  │  │               │   │               │   │                  │  │   │
//! │  │  │ QueueEntry    │   │ local-vs-     │   │ exponential      │  │   │
//! │  │  │ SyncStatus    │   │ remote        │   │ backoff with     │  │   │
//! │  │  │ SyncReport    │   │ comparison    │   │ fixed cap        │  │   │
//! │  │  │ ServiceStatus │   │               │   │                  │  │   │
//! │  │  └───────────────┘   └───────────────┘   └──────────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       ▲                        ▲                                        │
//! │       │                        │                                        │
//! │  lumen-db (persistence)   lumen-sync (orchestration)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`types`] - Queue entries, statuses, reports, remote records
//! - [`resolver`] - Deterministic conflict resolution policy
//! - [`retry`] - Backoff schedule and retry eligibility

// =============================================================================
// Module Declarations
// =============================================================================

pub mod resolver;
pub mod retry;
pub mod types;

// =============================================================================
// Re-exports
// =============================================================================

pub use resolver::{business_fields_equal, ConflictResolver, Decision, PushKind};
pub use retry::RetryPolicy;
pub use types::{
    ConflictResolution, EntryError, FailureKind, OperationKind, QueueEntry, RemoteRecord,
    ServiceStatus, SyncReport, SyncStatus,
};
