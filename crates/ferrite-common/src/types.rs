use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
    pub versioning: VersioningState,
}

/// Versioning mode of a bucket. Only the mode, not the rest of bucket
/// policy, influences the erasure-coded core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningState {
    Unversioned,
    Enabled,
    Suspended,
}

impl VersioningState {
    pub fn is_versioned(self) -> bool {
        matches!(self, VersioningState::Enabled)
    }
}

/// Transition / tiering state carried on a version's `FileInfo`. The tier
/// driver itself is an external collaborator; the core only threads this
/// enum through metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    None,
    Pending,
    Complete,
}

/// Opaque replication state carried on `FileInfo`. The replication
/// pipeline itself is out of scope; the core only stores and forwards
/// this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    #[default]
    None,
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub version_id: Option<String>,
    pub is_latest: bool,
    pub delete_marker: bool,
    pub replication_status: ReplicationStatus,
    pub transition_status: TransitionStatus,
}
