//! daybook-core - Offline-first reconciliation core for Daybook
//!
//! This crate keeps a local journal and its cloud counterpart eventually
//! consistent without duplicating user data: content fingerprints for
//! identity comparison, a durable migration ledger, duplicate-detection
//! heuristics, and an offline write queue replayed by the sync engine
//! when connectivity returns.

pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod models;
pub mod remote;
pub mod storage;
pub mod sync;

mod util;

pub use dedup::DuplicateDetector;
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use ledger::MigrationLedger;
pub use models::{
    LocalEntry, LocalId, MigrationRecord, MigrationReport, QueueItem, RemoteId, SyncReport,
    SyncStatus,
};
pub use remote::{AnalysisStore, EntryStore, RemoteEntry, RemoteError, SupabaseEntryStore};
pub use storage::{KvStore, MemoryKvStore, SqliteKvStore};
pub use sync::{OfflineQueue, SyncConfig, SyncEngine};
