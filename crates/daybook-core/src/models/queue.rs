//! Offline queue item model and sync result types

use serde::{Deserialize, Serialize};

use crate::models::LocalId;

/// Per-item sync status.
///
/// `pending → syncing → synced` on success; `syncing → pending` while the
/// retry budget lasts, then `syncing → failed` until manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

/// A pending write awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Locally generated id; doubles as the entry's local identity
    pub id: LocalId,
    /// Entry title
    pub title: String,
    /// Entry markdown content
    pub content: String,
    /// Owning user
    pub user_id: String,
    /// AI analysis result to replay alongside the entry, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_analysis: Option<serde_json::Value>,
    /// Current position in the sync state machine
    pub sync_status: SyncStatus,
    /// Number of failed sync attempts so far
    pub retry_count: u32,
    /// Timestamp of the most recent attempt (Unix ms), absent if never attempted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_attempt: Option<i64>,
    /// When the write was captured (Unix ms)
    pub created_at: i64,
}

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// True when no item failed during the pass
    pub success: bool,
    /// Items confirmed remotely (including crash-recovered duplicates)
    pub synced_count: usize,
    /// Items that failed this pass
    pub failed_count: usize,
    /// Human-readable per-item error descriptions, keyed by entry title
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Report for a pass that had nothing to do (or was coalesced away).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// Aggregate result of a bulk migration of local-only entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Entries created remotely during this run
    pub migrated_count: usize,
    /// Entries excluded by the duplicate detector
    pub skipped_count: usize,
    /// Entries whose remote write failed
    pub failed_count: usize,
    /// Human-readable per-entry error descriptions
    pub errors: Vec<String>,
}
