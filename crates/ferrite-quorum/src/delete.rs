//! Deleting a version and bulk delete. Both add-delete-marker and
//! remove-specific-version require only `N/2+1` of the set, looser than
//! read/write quorum, since a delete is not expected to be immediately
//! followed by a read of the same version.

use std::collections::HashMap;
use std::sync::Arc;

use ferrite_common::error::{FerriteError, Result};
use ferrite_common::filemeta::FileInfo;
use ferrite_common::time::now;
use ferrite_meta::{from_file_info, XlMetaV2};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use uuid::Uuid;

use crate::drive::DriveEndpoint;

fn delete_quorum(total: usize) -> usize {
    total / 2 + 1
}

/// Adds a delete marker: writes a zero-data, `deleted=true` version on
/// every drive. `version_id` is `None` for an unversioned/suspended bucket
/// (recorded as the literal `"null"` version id convention) or `Some` to
/// mint a fresh id on a versioned bucket.
pub async fn add_delete_marker(
    drives: &[Arc<dyn DriveEndpoint>],
    volume: &str,
    path: &str,
    version_id: Option<String>,
) -> Result<FileInfo> {
    let version_id = version_id.unwrap_or_else(|| "null".to_string());
    let marker = FileInfo {
        volume: volume.to_string(),
        name: path.to_string(),
        version_id,
        is_latest: true,
        deleted: true,
        mark_deleted: false,
        data_dir: String::new(),
        size: 0,
        mod_time: now(),
        disk_mtime: None,
        metadata: HashMap::new(),
        parts: vec![],
        erasure: None,
        inline_data: false,
        data: None,
        transition: Default::default(),
        replication_status: Default::default(),
    };

    let record = from_file_info(&marker, 0);
    let doc = XlMetaV2 {
        versions: vec![record],
        unknown_trailer: Vec::new(),
    };
    let encoded = doc.encode().map_err(|err| FerriteError::Internal(err.to_string()))?;

    let total = drives.len();
    let quorum = delete_quorum(total);
    let mut pending = FuturesUnordered::new();
    for drive in drives {
        let drive = Arc::clone(drive);
        let volume = volume.to_string();
        let path = path.to_string();
        let encoded = encoded.clone();
        pending.push(async move { drive.write_raw_metadata(&volume, &path, &encoded).await });
    }

    let mut successes = 0usize;
    while let Some(outcome) = pending.next().await {
        if outcome.is_ok() {
            successes += 1;
        }
    }

    if successes < quorum {
        return Err(FerriteError::WriteQuorum {
            bucket: volume.to_string(),
            object: path.to_string(),
            have: successes,
            need: quorum,
        });
    }

    Ok(marker)
}

/// Removes a specific version: `NotFound` on a drive counts as success
/// (the version is already gone there).
pub async fn delete_version(
    drives: &[Arc<dyn DriveEndpoint>],
    volume: &str,
    path: &str,
    file_info: &FileInfo,
    force_marker: bool,
) -> Result<()> {
    let total = drives.len();
    let quorum = delete_quorum(total);
    let mut pending = FuturesUnordered::new();
    for drive in drives {
        let drive = Arc::clone(drive);
        let volume = volume.to_string();
        let path = path.to_string();
        let file_info = file_info.clone();
        pending.push(async move {
            match drive.delete_version(&volume, &path, &file_info, force_marker).await {
                Ok(()) => true,
                Err(FerriteError::FileNotFound { .. }) | Err(FerriteError::VersionNotFound { .. }) => true,
                Err(_) => false,
            }
        });
    }

    let mut successes = 0usize;
    while let Some(ok) = pending.next().await {
        if ok {
            successes += 1;
        }
    }

    if successes < quorum {
        return Err(FerriteError::WriteQuorum {
            bucket: volume.to_string(),
            object: path.to_string(),
            have: successes,
            need: quorum,
        });
    }

    Ok(())
}

/// Reserves a free-version id so a background tier-journal can reclaim
/// the remote copy when present.
pub fn new_free_version_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone)]
pub struct BulkDeleteRequest {
    pub object: String,
    pub version_id: String,
    pub file_info: FileInfo,
}

/// Groups requests by object name, deduplicates, and issues one bulk
/// `delete_versions` call per drive per object, reducing per-object
/// errors independently. Returns one `Result<()>` per input index, in the
/// caller's original order.
pub async fn bulk_delete_versions(
    drives: &[Arc<dyn DriveEndpoint>],
    volume: &str,
    requests: Vec<BulkDeleteRequest>,
) -> Vec<Result<()>> {
    let total = drives.len();
    let quorum = delete_quorum(total);

    let mut by_object: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, request) in requests.iter().enumerate() {
        by_object.entry(request.object.clone()).or_default().push(index);
    }

    let mut results: Vec<Option<Result<()>>> = vec![None; requests.len()];

    for (object, indices) in by_object {
        let mut seen_versions = std::collections::HashSet::new();
        let mut batch = Vec::new();
        for &index in &indices {
            let request = &requests[index];
            if seen_versions.insert(request.version_id.clone()) {
                batch.push((object.clone(), request.file_info.clone()));
            }
        }

        let mut pending = FuturesUnordered::new();
        for drive in drives {
            let drive = Arc::clone(drive);
            let volume = volume.to_string();
            let batch = batch.clone();
            pending.push(async move { drive.delete_versions(&volume, &batch, false).await });
        }

        let mut per_version_ok_count: HashMap<String, usize> = HashMap::new();
        while let Some(outcome) = pending.next().await {
            let Ok(per_version) = outcome else { continue };
            for ((_, fi), result) in batch.iter().zip(per_version.iter()) {
                let ok = matches!(result, Ok(()))
                    || matches!(
                        result,
                        Err(FerriteError::FileNotFound { .. }) | Err(FerriteError::VersionNotFound { .. })
                    );
                if ok {
                    *per_version_ok_count.entry(fi.version_id.clone()).or_insert(0) += 1;
                }
            }
        }
        for &index in &indices {
            let version_id = &requests[index].version_id;
            let successes = per_version_ok_count.get(version_id).copied().unwrap_or(0);
            results[index] = Some(if successes >= quorum {
                Ok(())
            } else {
                Err(FerriteError::WriteQuorum {
                    bucket: volume.to_string(),
                    object: object.clone(),
                    have: successes,
                    need: quorum,
                })
            });
        }
    }

    results.into_iter().map(|r| r.unwrap_or_else(|| Err(FerriteError::Internal("bulk delete result missing".into())))).collect()
}
