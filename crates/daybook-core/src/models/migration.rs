//! Migration record model

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::models::{LocalId, RemoteId};

/// One row per successfully migrated/synced entry.
///
/// Created the instant a local entry is confirmed written remotely.
/// Never mutated except full replacement on re-migration; deleted only
/// by an explicit ledger reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Local identity of the migrated entry
    pub local_id: LocalId,
    /// Remote identity assigned at migration time
    pub remote_id: RemoteId,
    /// Fingerprint of the trimmed content at migration time
    pub fingerprint: Fingerprint,
    /// When the migration was recorded (Unix ms)
    pub migrated_at: i64,
}
