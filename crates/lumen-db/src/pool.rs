//! # Database Connection Management
//!
//! Owns the SQLite connection pool and hands out repositories.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──▶ Database::connect ──▶ migrations ──▶ repositories         │
//! │                                                                         │
//! │  • WAL journal mode (concurrent readers while syncing)                  │
//! │  • busy_timeout so short write contention blocks instead of failing    │
//! │  • foreign keys enforced                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::{LocalRecordRepository, MetaRepository, SyncQueueRepository};

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file; `None` means in-memory.
    pub path: Option<PathBuf>,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Pool acquire timeout.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            path: Some(PathBuf::from("lumen.db")),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        DbConfig {
            path: Some(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            // A single connection: each :memory: connection would otherwise
            // get its own empty database.
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the connection pool.
///
/// Cheap to clone; all repositories borrow the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database, configures SQLite pragmas and runs migrations.
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let options = match &config.path {
            Some(path) => {
                debug!(path = %path.display(), "opening sqlite database");
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5))
                    .foreign_keys(true)
            }
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run(&pool).await?;

        info!(
            max_connections = config.max_connections,
            in_memory = config.path.is_none(),
            "database ready"
        );

        Ok(Database { pool })
    }

    /// Raw pool access for ad-hoc queries in tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Verifies the connection is usable.
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    pub fn queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool.clone())
    }

    pub fn records(&self) -> LocalRecordRepository {
        LocalRecordRepository::new(self.pool.clone())
    }

    pub fn meta(&self) -> MetaRepository {
        MetaRepository::new(self.pool.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
