//! Repository modules, one per table group.

pub mod meta;
pub mod queue;
pub mod records;

pub use meta::MetaRepository;
pub use queue::{EntitySyncState, SyncQueueRepository};
pub use records::{LocalRecord, LocalRecordRepository};
