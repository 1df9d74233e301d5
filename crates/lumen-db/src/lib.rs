//! # Lumen POS Persistence Layer
//!
//! SQLite-backed storage for the local-first sync engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            lumen-db                                     │
//! │                                                                         │
//! │   Database (pool + migrations)                                          │
//! │      │                                                                  │
//! │      ├──▶ SyncQueueRepository    sync_queue + sync_state                │
//! │      ├──▶ LocalRecordRepository  local_records                          │
//! │      └──▶ MetaRepository         sync_meta                              │
//! │                                                                         │
//! │   All queue transitions are transactional across tables.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::{
    EntitySyncState, LocalRecord, LocalRecordRepository, MetaRepository, SyncQueueRepository,
};
