//! # Schema Migrations
//!
//! Migrations are embedded into the binary at compile time from
//! `migrations/sqlite/` at the workspace root. They run automatically when a
//! [`Database`](crate::Database) is opened, so a fresh install and an upgrade
//! follow the same path.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded SQLite migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies any pending migrations.
pub async fn run(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!("database migrations applied");
    Ok(())
}
