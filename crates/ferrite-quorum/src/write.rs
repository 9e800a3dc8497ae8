//! Writing a version across an erasure set. The streaming encode itself
//! (bitrot writer + `ferrite-erasure`) happens above this module, in the
//! object pipeline, against a temp `data_dir` that already exists on every
//! non-offline drive; this module owns the rest: allocating identifiers,
//! building per-drive metadata, the `rename_data` fan-out, and
//! quorum/disparity classification.

use std::sync::Arc;

use ferrite_common::error::{FerriteError, Result};
use ferrite_common::filemeta::FileInfo;
use ferrite_common::quorum::{clamp_for_healthy_drives, hash_order};
use ferrite_meta::from_file_info;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use uuid::Uuid;

use crate::drive::DriveEndpoint;

pub fn new_data_dir() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_version_id() -> String {
    Uuid::new_v4().to_string()
}

/// Clamps `(data, parity)` by currently healthy drives, then computes the
/// distribution permutation for the object name.
pub fn plan_placement(
    default_data: usize,
    default_parity: usize,
    set_size: usize,
    offline: &[bool],
    object_name: &str,
) -> (usize, usize, Vec<usize>) {
    let healthy = set_size.saturating_sub(offline.iter().filter(|o| **o).count());
    let (data_blocks, parity_blocks) =
        clamp_for_healthy_drives(default_data, default_parity, set_size, healthy);
    let distribution = hash_order(object_name, set_size);
    (data_blocks, parity_blocks, distribution)
}

#[derive(Debug, Clone)]
pub struct WriteVersionResult {
    pub successes: usize,
    /// `true` when not every participating drive's `rename_data`
    /// signature agreed (a versions-disparity event).
    pub versions_disparity: bool,
    /// `true` when any drive was offline during encode or failed
    /// `rename_data`, meaning the object should be enqueued in the MRF
    /// queue for later re-replication.
    pub needs_mrf: bool,
}

/// Publishes `base.data_dir`'s temp contents on every non-offline drive
/// and writes the corresponding `xl.meta`. `offline[i]` marks a drive that
/// never received the encode and must be skipped (its position is zeroed
/// in the eventual metadata, already reflected by `base` carrying an
/// all-drive `distribution` the caller is expected to have built from
/// `plan_placement`).
pub async fn write_version(
    drives: &[Arc<dyn DriveEndpoint>],
    offline: &[bool],
    base: &FileInfo,
    default_parity: usize,
) -> Result<WriteVersionResult> {
    let write_quorum = base.write_quorum(default_parity);

    let mut pending = FuturesUnordered::new();
    for (index, drive) in drives.iter().enumerate() {
        if offline.get(index).copied().unwrap_or(false) {
            continue;
        }
        let drive = Arc::clone(drive);
        let mut file_info = base.clone();
        if let Some(erasure) = file_info.erasure.as_mut() {
            erasure.index_in_set = index + 1;
        }
        let meta_raw = from_file_info(&file_info, 0);
        let volume = base.volume.clone();
        let path = base.name.clone();
        let data_dir = base.data_dir.clone();
        pending.push(async move {
            let doc = ferrite_meta::XlMetaV2 {
                versions: vec![meta_raw],
                unknown_trailer: Vec::new(),
            };
            let encoded = match doc.encode() {
                Ok(bytes) => bytes,
                Err(err) => return Err(FerriteError::Internal(err.to_string())),
            };
            drive
                .rename_data(&volume, &data_dir, &volume, &path, &encoded)
                .await
        });
    }

    let mut successes = 0usize;
    let mut any_failure = false;
    let mut signatures: Vec<String> = Vec::new();
    while let Some(outcome) = pending.next().await {
        match outcome {
            Ok(signature) => {
                successes += 1;
                signatures.push(signature);
            }
            Err(_) => any_failure = true,
        }
    }

    if successes < write_quorum {
        return Err(FerriteError::WriteQuorum {
            bucket: base.volume.clone(),
            object: base.name.clone(),
            have: successes,
            need: write_quorum,
        });
    }

    let versions_disparity = signatures.windows(2).any(|pair| pair[0] != pair[1]);
    let any_offline = offline.iter().any(|o| *o);

    Ok(WriteVersionResult {
        successes,
        versions_disparity,
        needs_mrf: any_offline || any_failure,
    })
}
