//! Local durable key-value persistence.
//!
//! Both the migration ledger and the offline queue persist their state
//! through this seam. The contract is synchronous: a storage-unavailable
//! condition is an unrecoverable local environment error, so callers only
//! deal with per-operation failures.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use crate::error::Result;

/// Storage key for the migration ledger state
pub const LEDGER_KEY: &str = "daybook.migration_ledger";
/// Storage key for the offline queue state
pub const QUEUE_KEY: &str = "daybook.offline_queue";

/// Synchronous durable key-value persistence.
///
/// Implementations must make every `set` immediately durable; the ledger
/// and queue trade write-amplification for crash-safety.
pub trait KvStore: Send + Sync + 'static {
    /// Read the value for `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Durably write `value` under `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key` if present
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}
