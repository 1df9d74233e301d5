//! # Database Error Types
//!
//! Error taxonomy for the persistence layer.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DbError Variants                                 │
//! │                                                                         │
//! │  Infrastructure          Data                  State                    │
//! │  ──────────────          ────                  ─────                    │
//! │  ConnectionFailed        NotFound              ConflictPending          │
//! │  MigrationFailed         UniqueViolation       InvalidState             │
//! │  PoolExhausted           Serialization                                  │
//! │  QueryFailed                                                            │
//! │  TransactionFailed                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Database operation errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to open or connect to the database file.
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed to apply.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// No free connection in the pool within the acquire timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A query failed to execute.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A multi-statement transaction could not be committed.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A unique constraint was violated.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A new local mutation arrived for an entity whose queue entry is
    /// flagged as a conflict; the conflict must be resolved first.
    #[error("entity {entity_type}/{entity_id} has an unresolved conflict")]
    ConflictPending {
        entity_type: String,
        entity_id: String,
    },

    /// The row exists but is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A stored JSON payload could not be parsed or produced.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::not_found("row", "unknown"),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::UniqueViolation(db_err.to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DbError::ConnectionFailed(err.to_string()),
            _ => DbError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Convenience result alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
