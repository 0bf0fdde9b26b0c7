//! Offline write queue and sync engine.
//!
//! Writes that cannot reach the remote store land in a durable queue and
//! are replayed sequentially once connectivity returns. Each item moves
//! through a small state machine (`pending → syncing → synced`, with
//! bounded retries back to `pending` and a terminal `failed`), and every
//! queue mutation writes through to local storage so a crash never loses
//! a captured entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dedup::DuplicateDetector;
use crate::error::{Error, Result};
use crate::ledger::MigrationLedger;
use crate::models::{
    derive_title, LocalEntry, LocalId, MigrationReport, QueueItem, SyncReport, SyncStatus,
};
use crate::remote::{AnalysisStore, EntryStore, RemoteEntry};
use crate::storage::{KvStore, QUEUE_KEY};
use crate::util::{normalize_text_option, unix_timestamp_ms};

/// Default retry budget per queue item
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts before an item is parked as `failed`
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SyncConfig {
    /// Set the per-item retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Durable write-ahead queue for entries captured while disconnected.
pub struct OfflineQueue<S: KvStore> {
    store: S,
    items: Mutex<Vec<QueueItem>>,
}

impl<S: KvStore> OfflineQueue<S> {
    /// Load the queue from the given store.
    ///
    /// Items left in `syncing` by a crashed pass revert to `pending`;
    /// unreadable or corrupt persisted state degrades to an empty queue.
    pub fn new(store: S) -> Self {
        let mut items = load_items(&store);

        let mut stale = 0;
        for item in &mut items {
            if item.sync_status == SyncStatus::Syncing {
                item.sync_status = SyncStatus::Pending;
                stale += 1;
            }
        }
        let queue = Self {
            store,
            items: Mutex::new(items),
        };
        if stale > 0 {
            tracing::info!("Reverted {stale} stale in-flight queue items to pending");
            if let Err(error) = queue.persist(&queue.lock()) {
                tracing::warn!("Failed to persist queue normalization: {error}");
            }
        }
        queue
    }

    /// Capture a write that could not reach the remote store.
    ///
    /// Purely local: assigns a fresh id, appends to the durable queue and
    /// returns immediately. A storage failure here means the entry did
    /// not durably persist, so it surfaces as an error instead of being
    /// silently dropped.
    pub fn save_entry(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
        user_id: impl Into<String>,
        pending_analysis: Option<serde_json::Value>,
    ) -> Result<QueueItem> {
        let content = content.into();
        let title =
            normalize_text_option(Some(title.into())).unwrap_or_else(|| derive_title(&content));

        let item = QueueItem {
            id: LocalId::new(),
            title,
            content,
            user_id: user_id.into(),
            pending_analysis,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            last_sync_attempt: None,
            created_at: unix_timestamp_ms(),
        };

        self.with_items(|items| {
            items.push(item.clone());
            Ok(())
        })?;

        tracing::debug!(id = %item.id, "Captured offline entry");
        Ok(item)
    }

    /// Snapshot of all queue items.
    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().clone()
    }

    /// Pending items owned by `user_id`, in capture order.
    #[must_use]
    pub fn pending_for_user(&self, user_id: &str) -> Vec<QueueItem> {
        self.lock()
            .iter()
            .filter(|item| item.user_id == user_id && item.sync_status == SyncStatus::Pending)
            .cloned()
            .collect()
    }

    /// Failed items owned by `user_id`, surfaced for manual intervention.
    #[must_use]
    pub fn failed_for_user(&self, user_id: &str) -> Vec<QueueItem> {
        self.lock()
            .iter()
            .filter(|item| item.user_id == user_id && item.sync_status == SyncStatus::Failed)
            .cloned()
            .collect()
    }

    /// Number of pending items for `user_id`.
    #[must_use]
    pub fn pending_count(&self, user_id: &str) -> usize {
        self.lock()
            .iter()
            .filter(|item| item.user_id == user_id && item.sync_status == SyncStatus::Pending)
            .count()
    }

    /// True when `user_id` has at least one pending item.
    #[must_use]
    pub fn has_pending(&self, user_id: &str) -> bool {
        self.pending_count(user_id) > 0
    }

    /// Total queue length across users and statuses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Reset `failed` items for `user_id` back to `pending` with a fresh
    /// retry budget. Returns how many items were reset.
    pub fn retry_failed(&self, user_id: &str) -> Result<usize> {
        let reset = self.with_items(|items| {
            let mut reset = 0;
            for item in items
                .iter_mut()
                .filter(|item| item.user_id == user_id && item.sync_status == SyncStatus::Failed)
            {
                item.sync_status = SyncStatus::Pending;
                item.retry_count = 0;
                reset += 1;
            }
            Ok(reset)
        })?;

        if reset > 0 {
            tracing::info!("Reset {reset} failed queue items to pending");
        }
        Ok(reset)
    }

    /// Mark an item as in-flight and stamp the attempt time.
    fn mark_syncing(&self, id: &LocalId) -> Result<()> {
        self.with_items(|items| {
            let item = find_item(items, id)?;
            item.sync_status = SyncStatus::Syncing;
            item.last_sync_attempt = Some(unix_timestamp_ms());
            Ok(())
        })
    }

    /// Remove an item whose remote write was confirmed.
    ///
    /// Synced items are not retained: reaching `synced` is the terminal
    /// transition out of the queue.
    fn complete(&self, id: &LocalId) -> Result<()> {
        self.with_items(|items| {
            let before = items.len();
            items.retain(|item| &item.id != id);
            if items.len() == before {
                return Err(Error::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Apply the retry transition after a failed attempt and return the
    /// item's new status.
    fn record_failure(&self, id: &LocalId, max_retries: u32) -> Result<SyncStatus> {
        self.with_items(|items| {
            let item = find_item(items, id)?;
            item.retry_count += 1;
            item.last_sync_attempt = Some(unix_timestamp_ms());
            item.sync_status = if item.retry_count >= max_retries {
                SyncStatus::Failed
            } else {
                SyncStatus::Pending
            };
            Ok(item.sync_status)
        })
    }

    /// Mutate the queue and write through; restores the previous state
    /// when either the mutation or the write fails.
    fn with_items<T>(&self, mutate: impl FnOnce(&mut Vec<QueueItem>) -> Result<T>) -> Result<T> {
        let mut items = self.lock();
        let snapshot = items.clone();

        let value = match mutate(&mut items) {
            Ok(value) => value,
            Err(error) => {
                *items = snapshot;
                return Err(error);
            }
        };

        if let Err(error) = self.persist(&items) {
            *items = snapshot;
            return Err(error);
        }
        Ok(value)
    }

    fn persist(&self, items: &[QueueItem]) -> Result<()> {
        let json = serde_json::to_string(items)?;
        self.store.set(QUEUE_KEY, &json)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_item<'a>(items: &'a mut [QueueItem], id: &LocalId) -> Result<&'a mut QueueItem> {
    items
        .iter_mut()
        .find(|item| &item.id == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn load_items<S: KvStore>(store: &S) -> Vec<QueueItem> {
    let raw = match store.get(QUEUE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(error) => {
            tracing::warn!("Failed to read offline queue, assuming empty: {error}");
            return Vec::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(error) => {
            tracing::warn!("Corrupt offline queue state, assuming empty: {error}");
            Vec::new()
        }
    }
}

/// Replays queued writes against the remote store and keeps the
/// migration ledger consistent with what actually reached the cloud.
pub struct SyncEngine<S: KvStore> {
    queue: OfflineQueue<S>,
    ledger: MigrationLedger<S>,
    entries: Arc<dyn EntryStore>,
    analyses: Option<Arc<dyn AnalysisStore>>,
    config: SyncConfig,
    sync_in_flight: AtomicBool,
    shutting_down: AtomicBool,
}

impl<S: KvStore> SyncEngine<S> {
    #[must_use]
    pub fn new(
        queue: OfflineQueue<S>,
        ledger: MigrationLedger<S>,
        entries: Arc<dyn EntryStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            entries,
            analyses: None,
            config,
            sync_in_flight: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Attach a best-effort analysis store; failures from it never fail
    /// a sync pass.
    #[must_use]
    pub fn with_analysis_store(mut self, analyses: Arc<dyn AnalysisStore>) -> Self {
        self.analyses = Some(analyses);
        self
    }

    /// The underlying offline queue.
    pub const fn queue(&self) -> &OfflineQueue<S> {
        &self.queue
    }

    /// The underlying migration ledger.
    pub const fn ledger(&self) -> &MigrationLedger<S> {
        &self.ledger
    }

    /// Stop advancing to further queue items; an in-flight remote write
    /// is allowed to complete.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Replay all pending items for `user_id` sequentially.
    ///
    /// Only one pass runs at a time: an overlapping invocation (manual
    /// trigger during an auto-triggered pass) coalesces into a no-op
    /// report rather than double-submitting in-flight items. Remote I/O
    /// is awaited item by item, never fanned out.
    pub async fn sync_pending_entries(&self, user_id: &str) -> SyncReport {
        if self.sync_in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("Sync pass already running, coalescing");
            return SyncReport::empty();
        }
        let _guard = InFlightGuard(&self.sync_in_flight);

        // The live remote list feeds the duplicate gate that makes a
        // crashed pass idempotent. Ledger lookups still apply if the
        // list is unavailable, so degrade rather than abort.
        let remote_entries = match self.entries.list_entries().await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("Could not list remote entries, syncing without them: {error}");
                Vec::new()
            }
        };

        let pending = self.queue.pending_for_user(user_id);
        tracing::info!("Starting sync pass: {} pending items", pending.len());

        let mut report = SyncReport::empty();
        for item in pending {
            if self.shutting_down.load(Ordering::SeqCst) {
                tracing::info!("Shutdown requested, stopping sync pass");
                break;
            }

            if let Err(error) = self.queue.mark_syncing(&item.id) {
                report.errors.push(format!("{}: {error}", item.title));
                report.failed_count += 1;
                continue;
            }

            if self.resolve_already_remote(&item, &remote_entries) {
                match self.queue.complete(&item.id) {
                    Ok(()) => report.synced_count += 1,
                    Err(error) => {
                        report.errors.push(format!("{}: {error}", item.title));
                        report.failed_count += 1;
                    }
                }
                continue;
            }

            match self.entries.create_entry(&item.title, &item.content).await {
                Ok(remote_entry) => {
                    self.attach_analysis(&item, &remote_entry).await;
                    if let Err(error) =
                        self.ledger
                            .record_migration(item.id, remote_entry.id, &item.content)
                    {
                        // The remote write stands; the duplicate gate
                        // covers the missing record on the next pass.
                        tracing::warn!("Failed to record migration for {}: {error}", item.title);
                    }
                    match self.queue.complete(&item.id) {
                        Ok(()) => report.synced_count += 1,
                        Err(error) => {
                            report.errors.push(format!("{}: {error}", item.title));
                            report.failed_count += 1;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!("Remote write failed for {}: {error}", item.title);
                    report.errors.push(format!("{}: {error}", item.title));
                    report.failed_count += 1;
                    match self.queue.record_failure(&item.id, self.config.max_retries) {
                        Ok(SyncStatus::Failed) => {
                            tracing::warn!(
                                "Entry {} exhausted its retry budget, parked as failed",
                                item.title
                            );
                        }
                        Ok(_) => {}
                        Err(error) => report.errors.push(format!("{}: {error}", item.title)),
                    }
                }
            }
        }

        report.success = report.failed_count == 0;
        tracing::info!(
            "Sync pass finished: {} synced, {} failed",
            report.synced_count,
            report.failed_count
        );
        report
    }

    /// Bulk-migrate previously local-only entries to the remote store.
    ///
    /// Entries the duplicate detector recognizes are skipped; the rest
    /// are created remotely and recorded in the ledger. Listing the
    /// remote entries is a hard prerequisite here — without it the
    /// pre-ledger fuzzy gate cannot run and re-running a migration could
    /// duplicate the user's journal.
    pub async fn migrate_local_entries(&self, entries: &[LocalEntry]) -> Result<MigrationReport> {
        let remote_entries = self.entries.list_entries().await?;

        let detector = DuplicateDetector::new(&self.ledger);
        let candidates = detector.filter_unmigrated(entries, &remote_entries);

        let mut report = MigrationReport {
            skipped_count: entries.len() - candidates.len(),
            ..MigrationReport::default()
        };
        tracing::info!(
            "Migrating {} of {} local entries ({} already remote)",
            candidates.len(),
            entries.len(),
            report.skipped_count
        );

        for entry in candidates {
            if self.shutting_down.load(Ordering::SeqCst) {
                tracing::info!("Shutdown requested, stopping migration");
                break;
            }

            match self.entries.create_entry(&entry.title, &entry.content).await {
                Ok(remote_entry) => {
                    if let Err(error) =
                        self.ledger
                            .record_migration(entry.id, remote_entry.id, &entry.content)
                    {
                        tracing::warn!("Failed to record migration for {}: {error}", entry.title);
                    }
                    report.migrated_count += 1;
                }
                Err(error) => {
                    report.errors.push(format!("{}: {error}", entry.title));
                    report.failed_count += 1;
                }
            }
        }

        Ok(report)
    }

    /// Auto-sync on connectivity edges.
    ///
    /// Triggers a pass the instant the signal transitions offline→online
    /// while pending items exist; never polls on a timer. The task ends
    /// when the signal's sender is dropped (process teardown).
    pub fn spawn_auto_sync(
        self: &Arc<Self>,
        mut online: watch::Receiver<bool>,
        user_id: impl Into<String>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let user_id = user_id.into();
        // Baseline captured before the task starts, so a transition that
        // races task startup still reads as an edge
        let mut was_online = *online.borrow();

        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online && engine.queue.has_pending(&user_id) {
                    tracing::info!("Connectivity restored, replaying offline queue");
                    let report = engine.sync_pending_entries(&user_id).await;
                    tracing::debug!(
                        synced = report.synced_count,
                        failed = report.failed_count,
                        "Auto-sync pass finished"
                    );
                }
                was_online = is_online;
            }
        })
    }

    /// Crash-recovery gate: treat an item as already synced when its
    /// remote counterpart demonstrably exists, repairing the ledger
    /// pairing when a crash interrupted the previous pass between the
    /// remote write and the queue removal.
    fn resolve_already_remote(&self, item: &QueueItem, remote_entries: &[RemoteEntry]) -> bool {
        let detector = DuplicateDetector::new(&self.ledger);
        if !detector.is_duplicate(&item.id, &item.content, item.created_at, remote_entries) {
            return false;
        }

        tracing::info!("Entry {} already exists remotely, skipping write", item.title);
        if self.ledger.remote_for_local(&item.id).is_none() {
            let recovered = self
                .ledger
                .record_for_content(&item.content)
                .map(|record| record.remote_id)
                .or_else(|| {
                    remote_entries
                        .iter()
                        .find(|remote| remote.content.trim() == item.content.trim())
                        .map(|remote| remote.id.clone())
                });
            if let Some(remote_id) = recovered {
                if let Err(error) = self
                    .ledger
                    .record_migration(item.id, remote_id, &item.content)
                {
                    tracing::warn!("Failed to repair ledger for {}: {error}", item.title);
                }
            }
        }
        true
    }

    async fn attach_analysis(&self, item: &QueueItem, remote_entry: &RemoteEntry) {
        let (Some(analyses), Some(payload)) = (&self.analyses, &item.pending_analysis) else {
            return;
        };
        if let Err(error) = analyses.attach_analysis(&remote_entry.id, payload).await {
            // Best-effort: the entry itself synced fine
            tracing::warn!("Failed to attach analysis for {}: {error}", item.title);
        }
    }
}

/// Clears the in-flight flag when a sync pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::models::RemoteId;
    use crate::remote::{RemoteError, RemoteResult};
    use crate::storage::MemoryKvStore;

    struct MockRemote {
        entries: Mutex<Vec<RemoteEntry>>,
        create_calls: AtomicUsize,
        fail_next_creates: AtomicUsize,
        create_delay: Option<Duration>,
        fail_listing: AtomicBool,
    }

    impl MockRemote {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                create_calls: AtomicUsize::new(0),
                fail_next_creates: AtomicUsize::new(0),
                create_delay: None,
                fail_listing: AtomicBool::new(false),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.create_delay = Some(delay);
            self
        }

        fn seed(&self, id: &str, content: &str, created_at: i64) {
            self.entries.lock().unwrap().push(RemoteEntry {
                id: RemoteId::new(id),
                title: String::new(),
                content: content.to_string(),
                created_at,
            });
        }

        fn fail_creates(&self, count: usize) {
            self.fail_next_creates.store(count, Ordering::SeqCst);
        }

        fn create_calls(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        fn contents(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|entry| entry.content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EntryStore for MockRemote {
        async fn create_entry(&self, title: &str, content: &str) -> RemoteResult<RemoteEntry> {
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            let call = self.create_calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.fail_next_creates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next_creates.store(remaining - 1, Ordering::SeqCst);
                return Err(RemoteError::Api("connection reset (503)".to_string()));
            }

            let entry = RemoteEntry {
                id: RemoteId::new(format!("remote-{call}")),
                title: title.to_string(),
                content: content.to_string(),
                created_at: unix_timestamp_ms(),
            };
            self.entries.lock().unwrap().push(entry.clone());
            Ok(entry)
        }

        async fn list_entries(&self) -> RemoteResult<Vec<RemoteEntry>> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(RemoteError::Api("service unavailable (503)".to_string()));
            }
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    struct MockAnalyses {
        attach_calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockAnalyses {
        fn new() -> Self {
            Self {
                attach_calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AnalysisStore for MockAnalyses {
        async fn attach_analysis(
            &self,
            _remote_id: &RemoteId,
            _payload: &serde_json::Value,
        ) -> RemoteResult<()> {
            self.attach_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(RemoteError::Api("analysis table unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn engine_over(
        store: &MemoryKvStore,
        remote: &Arc<MockRemote>,
        config: SyncConfig,
    ) -> Arc<SyncEngine<MemoryKvStore>> {
        Arc::new(SyncEngine::new(
            OfflineQueue::new(store.clone()),
            MigrationLedger::new(store.clone()),
            Arc::clone(remote) as Arc<dyn EntryStore>,
            config,
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_round_trip() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        let item = engine
            .queue()
            .save_entry("T1", "hello world", "user-1", None)
            .unwrap();
        assert_eq!(engine.queue().pending_count("user-1"), 1);

        let report = engine.sync_pending_entries("user-1").await;
        assert!(report.success);
        assert_eq!(report.synced_count, 1);
        assert_eq!(report.failed_count, 0);
        assert!(engine.queue().is_empty());

        // Ledger maps the offline id to the new remote id
        let remote_id = engine.ledger().remote_for_local(&item.id).unwrap();
        assert_eq!(engine.ledger().local_for_remote(&remote_id), Some(item.id));
        assert_eq!(remote.contents(), vec!["hello world".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_preserves_capture_order() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        for content in ["first entry of the day", "second entry of the day"] {
            engine
                .queue()
                .save_entry("", content, "user-1", None)
                .unwrap();
        }

        engine.sync_pending_entries("user-1").await;
        assert_eq!(
            remote.contents(),
            vec![
                "first entry of the day".to_string(),
                "second entry of the day".to_string()
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_only_touches_requested_user() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        engine
            .queue()
            .save_entry("", "entry for user one", "user-1", None)
            .unwrap();
        engine
            .queue()
            .save_entry("", "entry for user two", "user-2", None)
            .unwrap();

        let report = engine.sync_pending_entries("user-1").await;
        assert_eq!(report.synced_count, 1);
        assert_eq!(engine.queue().pending_count("user-2"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_budget_then_failed() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());
        remote.fail_creates(usize::MAX);

        engine
            .queue()
            .save_entry("Stuck", "this entry will not make it", "user-1", None)
            .unwrap();

        // Three attempts consume the default budget
        for expected_failures in 1..=3 {
            let report = engine.sync_pending_entries("user-1").await;
            assert!(!report.success);
            assert_eq!(report.failed_count, 1);
            assert_eq!(report.errors.len(), 1);
            assert!(report.errors[0].starts_with("Stuck:"));
            assert_eq!(remote.create_calls(), expected_failures);
        }

        let failed = engine.queue().failed_for_user("user-1");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 3);
        assert!(failed[0].last_sync_attempt.is_some());

        // Automatic passes never touch a failed item
        let report = engine.sync_pending_entries("user-1").await;
        assert!(report.success);
        assert_eq!(remote.create_calls(), 3);

        // Manual intervention restores it to pending with a fresh budget
        assert_eq!(engine.queue().retry_failed("user-1").unwrap(), 1);
        let pending = engine.queue().pending_for_user("user-1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transient_failure_recovers() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());
        remote.fail_creates(1);

        engine
            .queue()
            .save_entry("", "written during a network blip", "user-1", None)
            .unwrap();

        let first = engine.sync_pending_entries("user-1").await;
        assert_eq!(first.failed_count, 1);
        assert_eq!(engine.queue().pending_count("user-1"), 1);

        let second = engine.sync_pending_entries("user-1").await;
        assert_eq!(second.synced_count, 1);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_crash_after_ledger_write_does_not_duplicate() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        // Simulate a pass that crashed after the remote write and ledger
        // record but before queue removal
        let item = engine
            .queue()
            .save_entry("T1", "an entry that already reached the cloud", "user-1", None)
            .unwrap();
        remote.seed("remote-9", &item.content, item.created_at);
        engine
            .ledger()
            .record_migration(item.id, RemoteId::new("remote-9"), &item.content)
            .unwrap();

        let report = engine.sync_pending_entries("user-1").await;
        assert_eq!(report.synced_count, 1);
        assert_eq!(remote.create_calls(), 0);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_crash_before_ledger_write_repairs_pairing() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        // Crash landed between the remote write and the ledger record:
        // the content exists remotely but the ledger knows nothing
        let item = engine
            .queue()
            .save_entry("T1", "an entry that already reached the cloud", "user-1", None)
            .unwrap();
        remote.seed("remote-42", &item.content, item.created_at);

        let report = engine.sync_pending_entries("user-1").await;
        assert_eq!(report.synced_count, 1);
        assert_eq!(remote.create_calls(), 0);
        assert_eq!(
            engine.ledger().remote_for_local(&item.id),
            Some(RemoteId::new("remote-42"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_passes_coalesce() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new().with_delay(Duration::from_millis(50)));
        let engine = engine_over(&store, &remote, SyncConfig::default());

        engine
            .queue()
            .save_entry("", "written while both triggers fired", "user-1", None)
            .unwrap();

        let (a, b) = tokio::join!(
            engine.sync_pending_entries("user-1"),
            engine.sync_pending_entries("user-1"),
        );

        // Exactly one pass did the work; the other was a no-op
        assert_eq!(a.synced_count + b.synced_count, 1);
        assert_eq!(remote.create_calls(), 1);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_failure_degrades_to_ledger_gate() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());
        remote.fail_listing.store(true, Ordering::SeqCst);

        engine
            .queue()
            .save_entry("", "listing is down but writes work", "user-1", None)
            .unwrap();

        let report = engine.sync_pending_entries("user-1").await;
        assert_eq!(report.synced_count, 1);
        assert_eq!(remote.create_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_analysis_attach_is_best_effort() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let analyses = Arc::new(MockAnalyses::new());
        analyses.fail.store(true, Ordering::SeqCst);

        let engine = Arc::new(
            SyncEngine::new(
                OfflineQueue::new(store.clone()),
                MigrationLedger::new(store.clone()),
                Arc::clone(&remote) as Arc<dyn EntryStore>,
                SyncConfig::default(),
            )
            .with_analysis_store(Arc::clone(&analyses) as Arc<dyn AnalysisStore>),
        );

        engine
            .queue()
            .save_entry(
                "",
                "entry with a pending analysis",
                "user-1",
                Some(serde_json::json!({"emotion": "calm"})),
            )
            .unwrap();

        let report = engine.sync_pending_entries("user-1").await;
        assert!(report.success);
        assert_eq!(report.synced_count, 1);
        assert_eq!(analyses.attach_calls.load(Ordering::SeqCst), 1);
        assert!(engine.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrate_local_entries_skips_on_rerun() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        let entries = vec![
            LocalEntry::new("A", "the first entry worth migrating"),
            LocalEntry::new("B", "the second entry worth migrating"),
        ];

        let first = engine.migrate_local_entries(&entries).await.unwrap();
        assert_eq!(first.migrated_count, 2);
        assert_eq!(first.skipped_count, 0);

        // Re-run with the same entries against the now-updated remote list
        let second = engine.migrate_local_entries(&entries).await.unwrap();
        assert_eq!(second.migrated_count, 0);
        assert_eq!(second.skipped_count, 2);
        assert_eq!(remote.create_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrate_requires_remote_listing() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());
        remote.fail_listing.store(true, Ordering::SeqCst);

        let entries = vec![LocalEntry::new("A", "cannot check for duplicates")];
        assert!(engine.migrate_local_entries(&entries).await.is_err());
        assert_eq!(remote.create_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrate_collects_partial_failures() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());
        remote.fail_creates(1);

        let entries = vec![
            LocalEntry::new("A", "this one hits the failure"),
            LocalEntry::new("B", "this one goes through fine"),
        ];

        let report = engine.migrate_local_entries(&entries).await.unwrap();
        assert_eq!(report.migrated_count, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auto_sync_fires_on_reconnect() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        let (tx, rx) = watch::channel(false);
        let handle = engine.spawn_auto_sync(rx, "user-1");

        engine
            .queue()
            .save_entry("", "written while offline", "user-1", None)
            .unwrap();

        tx.send(true).unwrap();

        // Wait for the edge-triggered pass to drain the queue
        let mut drained = false;
        for _ in 0..200 {
            if engine.queue().is_empty() {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(drained, "auto-sync did not drain the queue");
        assert_eq!(remote.create_calls(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auto_sync_ignores_online_to_offline_edge() {
        let store = MemoryKvStore::new();
        let remote = Arc::new(MockRemote::new());
        let engine = engine_over(&store, &remote, SyncConfig::default());

        let (tx, rx) = watch::channel(true);
        let handle = engine.spawn_auto_sync(rx, "user-1");

        engine
            .queue()
            .save_entry("", "captured while still online", "user-1", None)
            .unwrap();

        // online → offline must not trigger a pass
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.create_calls(), 0);
        assert_eq!(engine.queue().pending_count("user-1"), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[test]
    fn test_save_entry_derives_title() {
        let queue = OfflineQueue::new(MemoryKvStore::new());
        let item = queue
            .save_entry("  ", "First line becomes the title\nbody", "user-1", None)
            .unwrap();
        assert_eq!(item.title, "First line becomes the title");
        assert_eq!(item.sync_status, SyncStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.last_sync_attempt.is_none());
    }

    #[test]
    fn test_queue_survives_rebuild_over_same_store() {
        let store = MemoryKvStore::new();
        {
            let queue = OfflineQueue::new(store.clone());
            queue
                .save_entry("T", "durably captured", "user-1", None)
                .unwrap();
        }

        let reopened = OfflineQueue::new(store);
        assert_eq!(reopened.pending_count("user-1"), 1);
    }

    #[test]
    fn test_stale_syncing_items_revert_to_pending() {
        let store = MemoryKvStore::new();
        let queue = OfflineQueue::new(store.clone());
        let item = queue
            .save_entry("T", "interrupted mid-flight", "user-1", None)
            .unwrap();
        queue.mark_syncing(&item.id).unwrap();

        // Rebuild over the same store, as after a crash
        let reopened = OfflineQueue::new(store);
        let items = reopened.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_corrupt_queue_state_assumed_empty() {
        let store = MemoryKvStore::new();
        store.set(QUEUE_KEY, "[{broken").unwrap();

        let queue = OfflineQueue::new(store);
        assert!(queue.is_empty());
    }
}
