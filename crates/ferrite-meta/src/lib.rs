//! `xl.meta` binary envelope: a self-versioning document with two
//! historical layouts. V2 is a magic header plus a msgpack-encoded list of
//! `(header, body)` version records; V1 is a single bare msgpack `FileInfo`
//! with no header at all. The V2 layout (magic `"XL2 "`, u16 major/minor,
//! msgpack version array) is the real on-disk format this module
//! implements; V1 is read-only, converted on the fly and never rewritten
//! in place.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ferrite_common::filemeta::{
    BitrotAlgorithm, BitrotChecksum, ErasureInfo, FileInfo, ObjectPartInfo, TransitionState,
};
use ferrite_common::types::ReplicationStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic 4 bytes at the start of every V2 `xl.meta` file. A file whose
/// first 4 bytes don't match this is assumed to be a bare V1 msgpack
/// `FileInfo` blob.
pub const XL_HEADER: [u8; 4] = *b"XL2 ";
pub const XL_VERSION_MAJOR: u16 = 1;
pub const XL_VERSION_MINOR: u16 = 0;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("xl.meta: truncated header")]
    TruncatedHeader,
    #[error("xl.meta: unknown major version {0}, refusing to downgrade-read")]
    UnknownMajorVersion(u16),
    #[error("xl.meta: msgpack decode failed: {0}")]
    Decode(String),
    #[error("xl.meta: msgpack encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, MetaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Object,
    DeleteMarker,
}

/// Flags bitset carried on every version header. Unknown bits are
/// preserved byte-for-byte across a read-modify-write cycle so a
/// forward-upgraded deployment's flags are never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VersionFlags(pub u8);

impl VersionFlags {
    pub const INLINE_DATA: u8 = 1 << 0;
    pub const FREE_VERSION: u8 = 1 << 1;
    pub const DELETE_MARKER: u8 = 1 << 2;

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XlMetaHeader {
    pub version_id: String,
    /// Monotonic counter disambiguating same-modtime writes.
    pub sequence: u64,
    pub mod_time: DateTime<Utc>,
    pub flags: VersionFlags,
    pub version_type: VersionType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XlMetaBody {
    pub erasure: Option<ErasureInfo>,
    pub parts: Vec<ObjectPartInfo>,
    pub metadata: HashMap<String, String>,
    pub inline_data: Option<Vec<u8>>,
    pub transition: TransitionState,
    pub replication_status: ReplicationStatus,
    pub size: i64,
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XlMetaVersionRecord {
    pub header: XlMetaHeader,
    pub body: XlMetaBody,
}

/// In-memory form of an `xl.meta` file: a list of version records plus any
/// trailing bytes this reader didn't understand, carried opaquely so the
/// next write round-trips them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XlMetaV2 {
    pub versions: Vec<XlMetaVersionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_trailer: Vec<u8>,
}

impl XlMetaV2 {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + 256);
        out.extend_from_slice(&XL_HEADER);
        out.extend_from_slice(&XL_VERSION_MAJOR.to_le_bytes());
        out.extend_from_slice(&XL_VERSION_MINOR.to_le_bytes());
        let body = rmp_serde::to_vec_named(&(&self.versions, &self.unknown_trailer))
            .map_err(|e| MetaError::Encode(e.to_string()))?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= 8 && bytes[..4] == XL_HEADER {
            let major = u16::from_le_bytes([bytes[4], bytes[5]]);
            if major > XL_VERSION_MAJOR {
                return Err(MetaError::UnknownMajorVersion(major));
            }
            let (versions, unknown_trailer): (Vec<XlMetaVersionRecord>, Vec<u8>) =
                rmp_serde::from_slice(&bytes[8..]).map_err(|e| MetaError::Decode(e.to_string()))?;
            return Ok(Self {
                versions,
                unknown_trailer,
            });
        }
        if bytes.is_empty() {
            return Err(MetaError::TruncatedHeader);
        }
        // V1 legacy: a bare msgpack `FileInfo`-shaped document. Converted
        // on the fly; never rewritten in place.
        let legacy: LegacyFileInfo =
            rmp_serde::from_slice(bytes).map_err(|e| MetaError::Decode(e.to_string()))?;
        Ok(Self {
            versions: vec![legacy.into_version_record()],
            unknown_trailer: Vec::new(),
        })
    }
}

/// V1 on-disk shape: no header envelope, no flags bitset, a single
/// implicit "latest" version.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyFileInfo {
    version_id: String,
    mod_time: DateTime<Utc>,
    deleted: bool,
    data_dir: String,
    size: i64,
    metadata: HashMap<String, String>,
    parts: Vec<ObjectPartInfo>,
    erasure: Option<ErasureInfo>,
    inline_data: Option<Vec<u8>>,
}

impl LegacyFileInfo {
    fn into_version_record(self) -> XlMetaVersionRecord {
        let mut flags = VersionFlags::default();
        flags.set(VersionFlags::INLINE_DATA, self.inline_data.is_some());
        flags.set(VersionFlags::DELETE_MARKER, self.deleted);
        XlMetaVersionRecord {
            header: XlMetaHeader {
                version_id: self.version_id,
                sequence: 0,
                mod_time: self.mod_time,
                flags,
                version_type: if self.deleted {
                    VersionType::DeleteMarker
                } else {
                    VersionType::Object
                },
            },
            body: XlMetaBody {
                erasure: self.erasure,
                parts: self.parts,
                metadata: self.metadata,
                inline_data: self.inline_data,
                transition: TransitionState::default(),
                replication_status: ReplicationStatus::default(),
                size: self.size,
                data_dir: self.data_dir,
            },
        }
    }
}

/// Convert one version record to the shared `FileInfo` currency used by
/// `ferrite-quorum`/`ferrite-object`.
pub fn to_file_info(record: &XlMetaVersionRecord, volume: &str, name: &str) -> FileInfo {
    FileInfo {
        volume: volume.to_string(),
        name: name.to_string(),
        version_id: record.header.version_id.clone(),
        is_latest: false,
        deleted: record.header.version_type == VersionType::DeleteMarker,
        mark_deleted: record.header.flags.has(VersionFlags::FREE_VERSION),
        data_dir: record.body.data_dir.clone(),
        size: record.body.size,
        mod_time: record.header.mod_time,
        disk_mtime: None,
        metadata: record.body.metadata.clone(),
        parts: record.body.parts.clone(),
        erasure: record.body.erasure.clone(),
        inline_data: record.header.flags.has(VersionFlags::INLINE_DATA),
        data: record.body.inline_data.clone().map(bytes::Bytes::from),
        transition: record.body.transition.clone(),
        replication_status: record.body.replication_status,
    }
}

/// The inverse of `to_file_info`, used when writing a new version.
pub fn from_file_info(fi: &FileInfo, sequence: u64) -> XlMetaVersionRecord {
    let mut flags = VersionFlags::default();
    flags.set(VersionFlags::INLINE_DATA, fi.inline_data);
    flags.set(VersionFlags::FREE_VERSION, fi.mark_deleted);
    flags.set(VersionFlags::DELETE_MARKER, fi.deleted);
    XlMetaVersionRecord {
        header: XlMetaHeader {
            version_id: fi.version_id.clone(),
            sequence,
            mod_time: fi.mod_time,
            flags,
            version_type: if fi.deleted {
                VersionType::DeleteMarker
            } else {
                VersionType::Object
            },
        },
        body: XlMetaBody {
            erasure: fi.erasure.clone(),
            parts: fi.parts.clone(),
            metadata: fi.metadata.clone(),
            inline_data: fi.data.as_ref().map(|b| b.to_vec()),
            transition: fi.transition.clone(),
            replication_status: fi.replication_status,
            size: fi.size,
            data_dir: fi.data_dir.clone(),
        },
    }
}

pub fn bitrot_checksum(algorithm: BitrotAlgorithm, hash: Vec<u8>) -> BitrotChecksum {
    BitrotChecksum { algorithm, hash }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::filemeta::ErasureInfo as FiErasureInfo;

    fn sample_file_info() -> FileInfo {
        FileInfo {
            volume: "bucket".into(),
            name: "object".into(),
            version_id: "v1".into(),
            is_latest: true,
            deleted: false,
            mark_deleted: false,
            data_dir: "data-dir-uuid".into(),
            size: 42,
            mod_time: Utc::now(),
            disk_mtime: None,
            metadata: HashMap::new(),
            parts: vec![],
            erasure: Some(FiErasureInfo {
                algorithm: "reed-solomon".into(),
                data_blocks: 4,
                parity_blocks: 2,
                block_size: 1024 * 1024,
                index_in_set: 1,
                distribution: vec![1, 2, 3, 4, 5, 6],
                checksums: vec![],
            }),
            inline_data: false,
            data: None,
            transition: TransitionState::default(),
            replication_status: ReplicationStatus::default(),
        }
    }

    #[test]
    fn v2_round_trips_through_encode_decode() {
        let fi = sample_file_info();
        let record = from_file_info(&fi, 1);
        let doc = XlMetaV2 {
            versions: vec![record],
            unknown_trailer: Vec::new(),
        };
        let bytes = doc.encode().unwrap();
        assert_eq!(&bytes[..4], &XL_HEADER);

        let decoded = XlMetaV2::decode(&bytes).unwrap();
        assert_eq!(decoded.versions.len(), 1);
        let round_tripped = to_file_info(&decoded.versions[0], &fi.volume, &fi.name);
        assert_eq!(round_tripped.version_id, fi.version_id);
        assert_eq!(round_tripped.size, fi.size);
        assert_eq!(round_tripped.data_dir, fi.data_dir);
    }

    #[test]
    fn legacy_v1_bytes_are_converted_not_rejected() {
        let legacy = LegacyFileInfo {
            version_id: "null".into(),
            mod_time: Utc::now(),
            deleted: false,
            data_dir: "dir".into(),
            size: 7,
            metadata: HashMap::new(),
            parts: vec![],
            erasure: None,
            inline_data: Some(vec![1, 2, 3]),
        };
        let bytes = rmp_serde::to_vec_named(&legacy).unwrap();
        let decoded = XlMetaV2::decode(&bytes).unwrap();
        assert_eq!(decoded.versions.len(), 1);
        assert!(decoded.versions[0].header.flags.has(VersionFlags::INLINE_DATA));
    }
}
