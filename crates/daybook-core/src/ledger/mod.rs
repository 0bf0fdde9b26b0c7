//! Migration ledger: the source of truth for "has this already been moved."
//!
//! One record per migrated entry maps local identity to remote identity
//! and the content fingerprint taken at migration time. Lookups answer
//! both "was this local entry migrated unchanged" and "was this content
//! migrated under any identity" — the latter catches migrations performed
//! before a local cache reset handed out new local ids.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::models::{LocalId, MigrationRecord, RemoteId};
use crate::storage::{KvStore, LEDGER_KEY};
use crate::util::unix_timestamp_ms;

/// Durable local-to-remote migration bookkeeping.
///
/// Every mutating call writes through to the injected store before it
/// returns; the ledger's entire value proposition is never asking the
/// user to confirm a migration twice, so it trades write-amplification
/// for crash-safety.
pub struct MigrationLedger<S: KvStore> {
    store: S,
    records: Mutex<HashMap<LocalId, MigrationRecord>>,
}

impl<S: KvStore> MigrationLedger<S> {
    /// Load the ledger from the given store.
    ///
    /// Unreadable or corrupt persisted state degrades to an empty ledger
    /// (fail-open toward re-migration rather than toward data loss).
    pub fn new(store: S) -> Self {
        let records = load_records(&store);
        Self {
            store,
            records: Mutex::new(records),
        }
    }

    /// Record (or replace) the migration of `local_id` to `remote_id`.
    ///
    /// Keyed by `local_id`: re-migration overwrites the prior record, it
    /// never duplicates.
    pub fn record_migration(
        &self,
        local_id: LocalId,
        remote_id: RemoteId,
        content: &str,
    ) -> Result<()> {
        let record = MigrationRecord {
            local_id,
            remote_id,
            fingerprint: fingerprint(content),
            migrated_at: unix_timestamp_ms(),
        };

        let mut records = self.lock();
        let previous = records.insert(local_id, record);
        if let Err(error) = self.persist(&records) {
            // Roll back so memory never claims durability we don't have
            match previous {
                Some(previous) => records.insert(local_id, previous),
                None => records.remove(&local_id),
            };
            return Err(error);
        }

        tracing::debug!(%local_id, "Recorded migration");
        Ok(())
    }

    /// True iff a record exists for `local_id` and its stored fingerprint
    /// matches the given content.
    ///
    /// An entry edited locally after a prior migration fingerprints
    /// differently and is correctly reported as not migrated, so it can
    /// be re-synced.
    #[must_use]
    pub fn is_local_migrated(&self, local_id: &LocalId, content: &str) -> bool {
        let fp = fingerprint(content);
        self.lock()
            .get(local_id)
            .is_some_and(|record| record.fingerprint == fp)
    }

    /// True iff any record's fingerprint matches the given content,
    /// regardless of local identity.
    #[must_use]
    pub fn is_content_migrated(&self, content: &str) -> bool {
        self.record_for_content(content).is_some()
    }

    /// Find the migration record whose fingerprint matches the given
    /// content, if any.
    #[must_use]
    pub fn record_for_content(&self, content: &str) -> Option<MigrationRecord> {
        let fp = fingerprint(content);
        self.lock()
            .values()
            .find(|record| record.fingerprint == fp)
            .cloned()
    }

    /// Remote identity recorded for `local_id`, if migrated.
    #[must_use]
    pub fn remote_for_local(&self, local_id: &LocalId) -> Option<RemoteId> {
        self.lock()
            .get(local_id)
            .map(|record| record.remote_id.clone())
    }

    /// Local identity recorded for `remote_id`, if migrated.
    #[must_use]
    pub fn local_for_remote(&self, remote_id: &RemoteId) -> Option<LocalId> {
        self.lock()
            .values()
            .find(|record| &record.remote_id == remote_id)
            .map(|record| record.local_id)
    }

    /// All local ids with a migration record. Used by cleanup routines.
    #[must_use]
    pub fn migrated_local_ids(&self) -> HashSet<LocalId> {
        self.lock().keys().copied().collect()
    }

    /// Number of migration records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no migrations have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Destructively clear all records.
    ///
    /// Administrative/diagnostic only; never part of the normal sync flow.
    pub fn reset(&self) -> Result<()> {
        let mut records = self.lock();
        self.store.remove(LEDGER_KEY)?;
        records.clear();
        tracing::warn!("Migration ledger reset");
        Ok(())
    }

    fn persist(&self, records: &HashMap<LocalId, MigrationRecord>) -> Result<()> {
        let rows: Vec<&MigrationRecord> = records.values().collect();
        let json = serde_json::to_string(&rows)?;
        self.store.set(LEDGER_KEY, &json)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LocalId, MigrationRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_records<S: KvStore>(store: &S) -> HashMap<LocalId, MigrationRecord> {
    let raw = match store.get(LEDGER_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return HashMap::new(),
        Err(error) => {
            tracing::warn!("Failed to read migration ledger, assuming empty: {error}");
            return HashMap::new();
        }
    };

    match serde_json::from_str::<Vec<MigrationRecord>>(&raw) {
        Ok(rows) => rows
            .into_iter()
            .map(|record| (record.local_id, record))
            .collect(),
        Err(error) => {
            tracing::warn!("Corrupt migration ledger state, assuming empty: {error}");
            HashMap::new()
        }
    }
}
