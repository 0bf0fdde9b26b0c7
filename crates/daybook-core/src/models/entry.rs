//! Journal entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::unix_timestamp_ms;

/// Maximum characters taken from the first content line for a derived title
const DERIVED_TITLE_MAX_CHARS: usize = 50;

/// A unique identifier for a locally created entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier assigned by the remote store on successful creation.
///
/// Opaque to this crate; the remote backend decides its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A journal entry as it exists locally.
///
/// An entry has exactly one `LocalId` if it ever existed locally, and at
/// most one `RemoteId`. A local/remote pairing, once established, is
/// permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Identifier assigned at local creation time
    pub id: LocalId,
    /// Identifier assigned by the remote store; absent until synced
    pub remote_id: Option<RemoteId>,
    /// Short title, derived from content when not explicit
    pub title: String,
    /// Markdown content
    pub content: String,
    /// Creation timestamp (Unix ms), immutable after creation
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl LocalEntry {
    /// Create a new local entry, deriving the title from content when
    /// the given title is blank.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let title = title.into();
        let title = if title.trim().is_empty() {
            derive_title(&content)
        } else {
            title.trim().to_string()
        };
        let now = unix_timestamp_ms();
        Self {
            id: LocalId::new(),
            remote_id: None,
            title,
            content,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if entry content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Derive a title from the first line of content, truncated.
///
/// Returns `"Untitled"` for blank content.
#[must_use]
pub fn derive_title(content: &str) -> String {
    let first_line = content
        .trim()
        .lines()
        .next()
        .unwrap_or("")
        .trim_start_matches('#')
        .trim();

    if first_line.is_empty() {
        "Untitled".to_string()
    } else {
        first_line.chars().take(DERIVED_TITLE_MAX_CHARS).collect()
    }
}
