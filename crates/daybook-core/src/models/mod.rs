//! Data models for Daybook reconciliation

mod entry;
mod migration;
mod queue;

pub use entry::{derive_title, LocalEntry, LocalId, RemoteId};
pub use migration::MigrationRecord;
pub use queue::{MigrationReport, QueueItem, SyncReport, SyncStatus};
