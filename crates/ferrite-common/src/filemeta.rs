//! The per-drive view of one object version (`FileInfo`) and the small
//! structs it is built from. This is the shared currency that
//! `ferrite-meta` serializes, `ferrite-quorum` compares across drives, and
//! `ferrite-object` mutates.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ReplicationStatus, TransitionStatus};

/// One part of a (possibly multipart) object, as recorded in `FileInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPartInfo {
    pub number: i32,
    pub etag: String,
    pub size: i64,
    pub actual_size: i64,
    pub mod_time: Option<DateTime<Utc>>,
    /// Offset of this part's first byte within the decoded object stream,
    /// populated lazily the first time a range read needs it.
    pub index: Option<Vec<i64>>,
}

/// Per-part bitrot algorithm/hash pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitrotAlgorithm {
    HighwayHash256,
    Blake2b256,
}

impl Default for BitrotAlgorithm {
    fn default() -> Self {
        BitrotAlgorithm::HighwayHash256
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitrotChecksum {
    pub algorithm: BitrotAlgorithm,
    pub hash: Vec<u8>,
}

/// Erasure parameters recorded on a version: identical on every drive
/// holding a valid record, except `index_in_set` and `distribution`'s
/// reading of it, which are drive-relative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureInfo {
    pub algorithm: String,
    pub data_blocks: usize,
    pub parity_blocks: usize,
    pub block_size: u64,
    /// This drive's 1-based position in the set.
    pub index_in_set: usize,
    /// Permutation of `[1..N]`: drive `i` stores the shard whose index is
    /// `distribution[i]`.
    pub distribution: Vec<usize>,
    pub checksums: Vec<BitrotChecksum>,
}

/// Transition/tiering fields, set by the Transition/Restore operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionState {
    pub status: Option<TransitionStatus>,
    pub transitioned_object_name: Option<String>,
    pub transition_tier: Option<String>,
    pub transition_version_id: Option<String>,
    pub expire_restored: bool,
}

/// The full per-drive view of one object version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub volume: String,
    pub name: String,
    pub version_id: String,
    pub is_latest: bool,
    pub deleted: bool,
    /// Set when this record is itself a free-version marker reserved for
    /// later tier reclamation.
    pub mark_deleted: bool,
    pub data_dir: String,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    /// The on-disk modtime as observed when this record was read; distinct
    /// from `mod_time`, the version's logical modtime.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub disk_mtime: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
    pub erasure: Option<ErasureInfo>,
    pub inline_data: bool,
    pub data: Option<Bytes>,
    pub transition: TransitionState,
    pub replication_status: ReplicationStatus,
}

impl FileInfo {
    pub fn is_delete_marker(&self) -> bool {
        self.deleted && !self.mark_deleted
    }

    /// `read_quorum = data_blocks`; falls back to the configured default
    /// parity when no erasure params are present on this record.
    pub fn read_quorum(&self, default_parity: usize) -> usize {
        self.erasure
            .as_ref()
            .map(|e| e.data_blocks)
            .unwrap_or(default_parity)
    }

    /// `write_quorum = data_blocks + 1` when `data_blocks == parity_blocks`,
    /// else `data_blocks`.
    pub fn write_quorum(&self, default_parity: usize) -> usize {
        match &self.erasure {
            Some(e) => {
                debug_assert!(e.parity_blocks <= e.data_blocks);
                if e.data_blocks == e.parity_blocks {
                    e.data_blocks + 1
                } else {
                    e.data_blocks
                }
            }
            None => default_parity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}
