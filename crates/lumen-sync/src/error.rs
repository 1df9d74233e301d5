//! # Sync Error Types
//!
//! Error taxonomy for the sync engine.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Failure Classification                              │
//! │                                                                         │
//! │  TRANSIENT (retry with backoff)       PERMANENT (park until edited)    │
//! │  ──────────────────────────────       ──────────────────────────────   │
//! │  • Network unreachable                • Validation rejection (4xx)     │
//! │  • Request timeout                    • Authentication failure         │
//! │  • Server error (5xx)                 • Malformed payload              │
//! │                                                                         │
//! │  Transient errors keep the entry retryable; permanent errors park it  │
//! │  until a corrected local edit or a manual retry.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors from sync engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be read or written.
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config could not be rendered back to TOML.
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Underlying persistence failure.
    #[error("database error: {0}")]
    Database(#[from] lumen_db::DbError),

    /// The remote authority rejected or failed a call.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Payload could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `start()` was called twice on the same service instance.
    #[error("sync service already started")]
    AlreadyStarted,
}

impl SyncError {
    /// Whether the condition is worth retrying automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Database(_) => true,
            _ => false,
        }
    }
}

/// Convenience result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
