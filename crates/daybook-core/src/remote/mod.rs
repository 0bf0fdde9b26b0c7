//! Remote store contracts.
//!
//! The reconciliation core talks to the cloud through these narrow
//! traits; the surrounding application decides which backend implements
//! them. `SupabaseEntryStore` is the production implementation.

mod supabase;

pub use supabase::SupabaseEntryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RemoteId;

/// Errors from the remote store boundary.
///
/// The sync engine does not distinguish transient from permanent remote
/// failures; both consume the retry budget.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// An entry as the remote store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Remote-assigned identifier
    pub id: RemoteId,
    /// Entry title
    pub title: String,
    /// Entry markdown content
    pub content: String,
    /// Remote creation timestamp (Unix ms)
    pub created_at: i64,
}

/// Remote journal entry storage.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Create an entry remotely, returning the stored row.
    async fn create_entry(&self, title: &str, content: &str) -> RemoteResult<RemoteEntry>;

    /// List the caller's entries.
    async fn list_entries(&self) -> RemoteResult<Vec<RemoteEntry>>;
}

/// Remote analysis storage. Best-effort: the sync engine swallows
/// failures from this boundary.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Attach an AI analysis payload to a remote entry.
    async fn attach_analysis(
        &self,
        remote_id: &RemoteId,
        payload: &serde_json::Value,
    ) -> RemoteResult<()>;
}
