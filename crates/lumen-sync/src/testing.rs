//! In-memory remote authority and tracing setup for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lumen_core::RemoteRecord;

use crate::remote::{RemoteAuthority, RemoteError, RemoteResult};

/// Installs a per-process tracing subscriber honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Failure injection for [`FakeRemote`].
#[derive(Clone, Copy)]
pub(crate) enum FailureMode {
    None,
    /// Every call fails as unreachable.
    Network,
    /// Writes are rejected as invalid; reads succeed.
    Validation,
}

/// HashMap-backed remote with failure injection.
pub(crate) struct FakeRemote {
    records: Mutex<HashMap<(String, String), RemoteRecord>>,
    mode: Mutex<FailureMode>,
    writes: std::sync::atomic::AtomicU64,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FakeRemote {
            records: Mutex::new(HashMap::new()),
            mode: Mutex::new(FailureMode::None),
            writes: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Successful create/update/delete calls observed.
    pub(crate) fn write_count(&self) -> u64 {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) fn set_mode(&self, mode: FailureMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub(crate) fn seed(&self, record: RemoteRecord) {
        self.records.lock().unwrap().insert(
            (record.entity_type.clone(), record.entity_id.clone()),
            record,
        );
    }

    pub(crate) fn get(&self, entity_type: &str, entity_id: &str) -> Option<RemoteRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
    }

    fn check_write(&self) -> RemoteResult<()> {
        match *self.mode.lock().unwrap() {
            FailureMode::None => {
                self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
            FailureMode::Network => Err(RemoteError::Network("connection refused".into())),
            FailureMode::Validation => Err(RemoteError::Validation {
                status: 422,
                message: "rejected".into(),
            }),
        }
    }
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn fetch(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> RemoteResult<Option<RemoteRecord>> {
        if matches!(*self.mode.lock().unwrap(), FailureMode::Network) {
            return Err(RemoteError::Network("connection refused".into()));
        }
        Ok(self.get(entity_type, entity_id))
    }

    async fn create(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        self.check_write()?;
        self.seed(record.clone());
        Ok(record.clone())
    }

    async fn update(&self, record: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        self.check_write()?;
        self.seed(record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, entity_type: &str, entity_id: &str) -> RemoteResult<()> {
        self.check_write()?;
        self.records
            .lock()
            .unwrap()
            .remove(&(entity_type.to_string(), entity_id.to_string()));
        Ok(())
    }
}
