//! Duplicate detection between local entries and the remote store.
//!
//! The migration ledger is the primary signal. The fuzzy fallback exists
//! only to catch entries migrated before the ledger existed or through an
//! out-of-band path; it is deliberately conservative (short time window,
//! minimum length) so a genuinely distinct entry is never silently
//! dropped from migration.

use crate::ledger::MigrationLedger;
use crate::models::{LocalEntry, LocalId};
use crate::remote::RemoteEntry;
use crate::storage::KvStore;

/// Characters compared by the fuzzy prefix match
const FUZZY_PREFIX_CHARS: usize = 100;
/// Both contents must exceed this many characters for the prefix match
/// to apply, so trivial/empty entries never fuzzy-match
const FUZZY_MIN_CONTENT_CHARS: usize = 10;
/// Creation timestamps must differ by less than this for a prefix match
const FUZZY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Decides whether a candidate local entry is already represented remotely.
pub struct DuplicateDetector<'a, S: KvStore> {
    ledger: &'a MigrationLedger<S>,
}

impl<'a, S: KvStore> DuplicateDetector<'a, S> {
    #[must_use]
    pub const fn new(ledger: &'a MigrationLedger<S>) -> Self {
        Self { ledger }
    }

    /// Filter `local_entries` down to those not yet represented remotely.
    ///
    /// The survivors are the candidates for migration.
    #[must_use]
    pub fn filter_unmigrated(
        &self,
        local_entries: &[LocalEntry],
        remote_entries: &[RemoteEntry],
    ) -> Vec<LocalEntry> {
        local_entries
            .iter()
            .filter(|entry| {
                !self.is_duplicate(&entry.id, &entry.content, entry.created_at, remote_entries)
            })
            .cloned()
            .collect()
    }

    /// Whether one candidate is already represented remotely.
    ///
    /// Short-circuits on the first positive signal:
    /// 1. the ledger has this local id with matching content,
    /// 2. the ledger has this content under another identity,
    /// 3. the fuzzy fallback matches a live remote entry.
    #[must_use]
    pub fn is_duplicate(
        &self,
        local_id: &LocalId,
        content: &str,
        created_at: i64,
        remote_entries: &[RemoteEntry],
    ) -> bool {
        if self.ledger.is_local_migrated(local_id, content) {
            return true;
        }
        if self.ledger.is_content_migrated(content) {
            return true;
        }
        remote_entries
            .iter()
            .any(|remote| matches_remote(content, created_at, remote))
    }
}

/// Fuzzy fallback: exact trimmed-content equality, or prefix equality
/// within the creation-time window.
///
/// The minimum-length guard covers both branches: trivially short entries
/// ("hi", "ok") never match here even when identical, because excluding
/// one of them would silently drop a distinct entry from migration.
fn matches_remote(content: &str, created_at: i64, remote: &RemoteEntry) -> bool {
    let local = content.trim();
    let other = remote.content.trim();

    if local.chars().count() <= FUZZY_MIN_CONTENT_CHARS
        || other.chars().count() <= FUZZY_MIN_CONTENT_CHARS
    {
        return false;
    }

    if local == other {
        return true;
    }

    let prefixes_match = local
        .chars()
        .take(FUZZY_PREFIX_CHARS)
        .eq(other.chars().take(FUZZY_PREFIX_CHARS));

    prefixes_match && (created_at - remote.created_at).abs() < FUZZY_WINDOW_MS
}
