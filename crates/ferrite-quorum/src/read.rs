//! Reading a version across an erasure set.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use ferrite_common::error::{FerriteError, Result};
use ferrite_common::filemeta::FileInfo;
use ferrite_common::time::within_modtime_delta;
use ferrite_meta::XlMetaV2;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use uuid::Uuid;

use crate::dangling::{is_dangling, DrivePresence};
use crate::drive::DriveEndpoint;

/// Tolerance for step 8's on-disk-modtime agreement check. `ferrite-meta`
/// doesn't currently stamp `disk_mtime` on decode (that's a filesystem
/// attribute the drive layer would add), so this only matters once a
/// caller populates it; kept here so `read_version` doesn't need to know
/// the constant's provenance.
pub const DISK_MTIME_TOLERANCE: ChronoDuration = ChronoDuration::seconds(1);

/// Outcome of a successful `read_version`: the canonical record plus,
/// ordered by the record's `distribution` permutation, which positions
/// are online (agree with the selected modtime) versus should be treated
/// as heal targets.
#[derive(Debug, Clone)]
pub struct ReadVersionResult {
    pub file_info: FileInfo,
    pub online: Vec<bool>,
}

/// Fan out `read_raw_metadata` to every drive, classify the results, and
/// resolve to one canonical `FileInfo`.
///
/// `is_meta_bucket` controls whether `UnexpectedEof`-class errors are
/// additionally treated as benign when reducing to read quorum.
pub async fn read_version(
    drives: &[Arc<dyn DriveEndpoint>],
    volume: &str,
    path: &str,
    version_id: Option<&str>,
    default_parity: usize,
    is_meta_bucket: bool,
) -> Result<ReadVersionResult> {
    let total = drives.len();
    let mut pending = FuturesUnordered::new();
    for (index, drive) in drives.iter().enumerate() {
        let drive = Arc::clone(drive);
        let volume = volume.to_string();
        let path = path.to_string();
        let version_id = version_id.map(|v| v.to_string());
        pending.push(async move {
            let record = match drive.read_raw_metadata(&volume, &path).await {
                Ok(raw) => decode_matching_version(&raw, &volume, &path, version_id.as_deref()),
                Err(err) => Err(err),
            };
            (index, record)
        });
    }

    let mut records = vec![None; total];
    while let Some((index, record)) = pending.next().await {
        records[index] = Some(record);
    }

    let presence: Vec<DrivePresence> = records
        .iter()
        .map(|record| match record {
            Some(Ok(file_info)) => DrivePresence {
                file_info: Some(file_info.clone()),
                not_found: false,
            },
            Some(Err(err)) => DrivePresence {
                file_info: None,
                not_found: matches!(
                    err,
                    FerriteError::FileNotFound { .. } | FerriteError::VersionNotFound { .. }
                ),
            },
            None => DrivePresence {
                file_info: None,
                not_found: false,
            },
        })
        .collect();

    let read_quorum = presence
        .iter()
        .filter_map(|p| p.file_info.as_ref())
        .next()
        .map(|fi| fi.read_quorum(default_parity))
        .unwrap_or(default_parity);

    let (selected, dangling) = is_dangling(&presence, read_quorum);

    let Some(canonical) = selected else {
        if dangling && !is_meta_bucket {
            purge_dangling(drives, volume, path, is_meta_bucket).await;
        }
        return Err(FerriteError::ReadQuorum {
            bucket: volume.to_string(),
            object: path.to_string(),
            have: presence.iter().filter(|p| p.file_info.is_some()).count(),
            need: read_quorum,
        });
    };

    let distribution = canonical
        .erasure
        .as_ref()
        .map(|e| e.distribution.clone())
        .unwrap_or_else(|| (1..=total).collect());

    let mut online = vec![false; total];
    for (index, record) in records.iter().enumerate() {
        let agrees = match record {
            Some(Ok(fi)) => {
                fi.mod_time == canonical.mod_time
                    && fi
                        .disk_mtime
                        .zip(canonical.disk_mtime)
                        .map(|(a, b)| within_modtime_delta(a, b, DISK_MTIME_TOLERANCE))
                        .unwrap_or(true)
            }
            _ => false,
        };
        let position = distribution.get(index).copied().unwrap_or(index + 1);
        if position >= 1 && position <= online.len() {
            online[position - 1] = agrees;
        }
    }

    Ok(ReadVersionResult {
        file_info: canonical,
        online,
    })
}

fn decode_matching_version(
    raw: &[u8],
    volume: &str,
    path: &str,
    version_id: Option<&str>,
) -> Result<FileInfo> {
    let doc = XlMetaV2::decode(raw).map_err(|err| FerriteError::CorruptedFormat(err.to_string()))?;
    let record = match version_id {
        Some(id) => doc.versions.into_iter().find(|v| v.header.version_id == id),
        None => doc
            .versions
            .into_iter()
            .max_by_key(|v| v.header.sequence),
    };
    let record = record.ok_or_else(|| match version_id {
        Some(id) => FerriteError::VersionNotFound {
            bucket: volume.to_string(),
            object: path.to_string(),
            version_id: id.to_string(),
        },
        None => FerriteError::FileNotFound {
            bucket: volume.to_string(),
            object: path.to_string(),
        },
    })?;
    Ok(ferrite_meta::to_file_info(&record, volume, path))
}

/// Best-effort cluster-wide cleanup of an orphaned data directory once a
/// majority of drives agree the object doesn't exist. Errors
/// are swallowed: this is advisory — the caller already returns
/// `ReadQuorum`/`FileNotFound` regardless.
async fn purge_dangling(drives: &[Arc<dyn DriveEndpoint>], volume: &str, path: &str, _is_meta_bucket: bool) {
    let free_version_id = Uuid::new_v4().to_string();
    let marker = FileInfo {
        volume: volume.to_string(),
        name: path.to_string(),
        version_id: free_version_id,
        is_latest: false,
        deleted: true,
        mark_deleted: true,
        data_dir: String::new(),
        size: 0,
        mod_time: ferrite_common::time::now(),
        disk_mtime: None,
        metadata: Default::default(),
        parts: vec![],
        erasure: None,
        inline_data: false,
        data: None,
        transition: Default::default(),
        replication_status: Default::default(),
    };

    let mut pending = FuturesUnordered::new();
    for drive in drives {
        let drive = Arc::clone(drive);
        let volume = volume.to_string();
        let path = path.to_string();
        let marker = marker.clone();
        pending.push(async move {
            let _ = drive.delete_version(&volume, &path, &marker, true).await;
        });
    }
    while pending.next().await.is_some() {}
}
