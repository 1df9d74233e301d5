//! # Remote Authority Client
//!
//! The seam between the sync engine and the authoritative backend.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RemoteAuthority                                   │
//! │                                                                         │
//! │  fetch(type, id)          ──▶  authoritative record, None if absent     │
//! │  create(record)           ──▶  stored record as the remote sees it      │
//! │  update(record)           ──▶  stored record as the remote sees it      │
//! │  delete(type, id)         ──▶  () once the remote no longer has it      │
//! │                                                                         │
//! │  Every failure carries a transient/permanent classification so the     │
//! │  orchestrator can decide between backoff and parking the entry.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The production implementation is [`HttpRemoteAuthority`]; tests use
//! in-memory fakes.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use lumen_core::{FailureKind, RemoteRecord};

// =============================================================================
// Remote Error
// =============================================================================

/// Failures from the remote authority.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The remote could not be reached at all.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The remote failed internally (HTTP 5xx).
    #[error("server error (status {status})")]
    Server { status: u16 },

    /// The remote rejected the payload (HTTP 4xx other than auth).
    #[error("validation rejected (status {status}): {message}")]
    Validation { status: u16, message: String },

    /// Credentials are missing or no longer valid.
    #[error("unauthorized (status {status})")]
    Unauthorized { status: u16 },

    /// The response body was not the JSON shape we expect.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl RemoteError {
    /// Classifies the failure for the retry policy.
    pub fn classify(&self) -> FailureKind {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) | RemoteError::Server { .. } => {
                FailureKind::Transient
            }
            RemoteError::Validation { .. }
            | RemoteError::Unauthorized { .. }
            | RemoteError::MalformedResponse(_) => FailureKind::Permanent,
        }
    }

    /// Transient failures are retried with backoff; permanent ones park
    /// the entry until a corrected edit or manual retry.
    pub fn is_transient(&self) -> bool {
        self.classify().is_transient()
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_connect() {
            RemoteError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            status_to_error(status, err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

fn status_to_error(status: StatusCode, message: String) -> RemoteError {
    let code = status.as_u16();
    if status.is_server_error() {
        RemoteError::Server { status: code }
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RemoteError::Unauthorized { status: code }
    } else {
        RemoteError::Validation {
            status: code,
            message,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Remote Authority Trait
// =============================================================================

/// Authoritative backend operations the orchestrator needs.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Fetches the authoritative record; `Ok(None)` when the remote has
    /// no record for this entity (HTTP 404 is not an error here).
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> RemoteResult<Option<RemoteRecord>>;

    /// Creates the record on the remote.
    async fn create(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord>;

    /// Replaces the record on the remote.
    async fn update(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord>;

    /// Deletes the record on the remote. Deleting an absent record is
    /// success: the desired end state holds.
    async fn delete(&self, entity_type: &str, entity_id: &str) -> RemoteResult<()>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// REST client for the remote authority.
///
/// Routes follow `{base_url}/entities/{entity_type}/{entity_id}`.
pub struct HttpRemoteAuthority {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteAuthority {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: std::time::Duration,
        api_token: Option<String>,
    ) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(HttpRemoteAuthority {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn entity_url(&self, entity_type: &str, entity_id: &str) -> String {
        format!("{}/entities/{}/{}", self.base_url, entity_type, entity_id)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn parse_record(&self, response: reqwest::Response) -> RemoteResult<RemoteRecord> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;
        serde_json::from_value(body).map_err(|e| RemoteError::MalformedResponse(e.to_string()))
    }

    async fn check_status(&self, response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_to_error(status, message))
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let url = self.entity_url(entity_type, entity_id);
        debug!(%url, "fetching remote record");

        let response = self.with_auth(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = self.check_status(response).await?;
        Ok(Some(self.parse_record(response).await?))
    }

    async fn create(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        let url = self.entity_url(&record.entity_type, &record.entity_id);
        debug!(%url, "creating remote record");

        let response = self
            .with_auth(self.client.post(&url))
            .json(record)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        self.parse_record(response).await
    }

    async fn update(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        let url = self.entity_url(&record.entity_type, &record.entity_id);
        debug!(%url, "updating remote record");

        let response = self
            .with_auth(self.client.put(&url))
            .json(record)
            .send()
            .await?;
        let response = self.check_status(response).await?;
        self.parse_record(response).await
    }

    async fn delete(&self, entity_type: &str, entity_id: &str) -> RemoteResult<()> {
        let url = self.entity_url(entity_type, entity_id);
        debug!(%url, "deleting remote record");

        let response = self.with_auth(self.client.delete(&url)).send().await?;

        // Absent already: the desired end state holds.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        self.check_status(response).await?;
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Builds the wire record for a queued payload.
pub fn outbound_record(entity_type: &str, entity_id: &str, payload: Value) -> RemoteRecord {
    RemoteRecord {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        payload,
        updated_at: Utc::now(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
