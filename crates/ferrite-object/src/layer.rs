//! The object pipeline: bucket lifecycle plus Get/Put/Copy/Delete/
//! DeleteMany/PutMetadata/PutTags/DeleteTags/Transition/Restore, gluing
//! the namespace lock, quorum read/write/delete, erasure codec, and bitrot
//! hashing into one engine. Built against the full `ferrite-quorum`/
//! `ferrite-lock`/`ferrite-heal` stack, and against a multi-version
//! `xl.meta` document rather than one version per file (see
//! `remove_versions`/`publish_version` below).

use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ferrite_bitrot::{hash_shard, BitrotKey, BitrotReader, BitrotWriter, HASH_SIZE};
use ferrite_common::error::{FerriteError, Result};
use ferrite_common::filemeta::{BitrotAlgorithm, BitrotChecksum, ErasureInfo, FileInfo, ObjectPartInfo, TransitionState};
use ferrite_common::time::now;
use ferrite_common::types::{BucketInfo, ObjectInfo, TransitionStatus, VersioningState};
use ferrite_erasure::{decode_block, encode_block, select_sources, ErasureConfig, DEFAULT_BLOCK_SIZE};
use ferrite_heal::{MrfQueue, PartialOperation, PartialOperationKind};
use ferrite_lock::{DsyncClient, LockGuard, NamespaceLock, NetLocker, ObjectLock};
use ferrite_meta::{from_file_info, to_file_info, XlMetaV2, XlMetaVersionRecord};
use ferrite_quorum::{
    add_delete_marker, delete_version, new_data_dir, new_version_id, plan_placement, read_version,
    DriveEndpoint, LocalDriveEndpoint,
};
use ferrite_storage::local::validate_object_key;
use ferrite_storage::LocalDrive;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use md5::Digest as _;
use uuid::Uuid;

use crate::locker::LocalLocker;
use crate::options::ObjectOptions;

const DATA_PART_NAME: &str = "part.1";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Objects at or below this size keep an empty `data_dir` and carry their
/// bytes inside `xl.meta` instead. Fixed at
/// `ErasureConfig::default().block_size` divided by 8 — small enough that
/// a whole inline copy sits comfortably inside one `xl.meta` msgpack body
/// on every drive.
pub const DEFAULT_INLINE_THRESHOLD: usize = 128 * 1024;

/// The erasure-coded object engine over one local erasure set. Remote
/// drives would plug in by constructing a different `DriveEndpoint` impl
/// for `endpoints`; the raw shard I/O (`read_all`/`write_all`) still goes
/// straight to `LocalDrive` the way `ferrite-heal` does, since that's the
/// fast path for a drive this process owns directly.
pub struct ObjectErasureLayer {
    drives: Vec<Arc<LocalDrive>>,
    endpoints: Vec<Arc<dyn DriveEndpoint>>,
    format_id: String,
    default_data: usize,
    default_parity: usize,
    inline_threshold: usize,
    block_size: usize,
    lock_client: Arc<DsyncClient>,
    mrf: Option<Arc<MrfQueue>>,
}

impl ObjectErasureLayer {
    pub fn new(
        drives: Vec<Arc<LocalDrive>>,
        format_id: impl Into<String>,
        default_data: usize,
        default_parity: usize,
    ) -> Self {
        let format_id = format_id.into();
        let endpoints: Vec<Arc<dyn DriveEndpoint>> = drives
            .iter()
            .map(|drive| {
                Arc::new(LocalDriveEndpoint::new(Arc::clone(drive), format_id.clone(), ""))
                    as Arc<dyn DriveEndpoint>
            })
            .collect();
        let lockers: Vec<Arc<dyn NetLocker>> = vec![Arc::new(LocalLocker::new())];
        let lock_client = Arc::new(DsyncClient::new(lockers));
        Self {
            drives,
            endpoints,
            format_id,
            default_data,
            default_parity,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            block_size: DEFAULT_BLOCK_SIZE,
            lock_client,
            mrf: None,
        }
    }

    pub fn with_mrf(mut self, mrf: Arc<MrfQueue>) -> Self {
        self.mrf = Some(mrf);
        self
    }

    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    // ---- bucket lifecycle --------------------------------------------

    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let quorum = self.drives.len() / 2 + 1;
        let mut ok = 0usize;
        for drive in &self.drives {
            match drive.make_volume(&self.format_id, bucket).await {
                Ok(()) => ok += 1,
                Err(FerriteError::InvalidArgument(_)) => ok += 1,
                Err(err) => tracing::warn!(?err, bucket, "make_volume failed on a drive"),
            }
        }
        if ok < quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: String::new(),
                have: ok,
                need: quorum,
            });
        }
        Ok(())
    }

    pub async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo> {
        validate_bucket_name(bucket)?;
        let mut last_err = FerriteError::VolumeNotFound {
            volume: bucket.to_string(),
        };
        for drive in &self.drives {
            match drive.stat_volume(&self.format_id, bucket).await {
                Ok(vol) => {
                    return Ok(BucketInfo {
                        name: vol.name,
                        created: vol.created,
                        versioning: VersioningState::Unversioned,
                    })
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        for drive in &self.drives {
            if let Ok(vols) = drive.list_volumes(&self.format_id).await {
                return Ok(vols
                    .into_iter()
                    .map(|v| BucketInfo {
                        name: v.name,
                        created: v.created,
                        versioning: VersioningState::Unversioned,
                    })
                    .collect());
            }
        }
        Err(FerriteError::Internal("no reachable drive for list_buckets".to_string()))
    }

    pub async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<()> {
        validate_bucket_name(bucket)?;
        let quorum = self.drives.len() / 2 + 1;
        let mut ok = 0usize;
        for drive in &self.drives {
            match drive.delete_volume(&self.format_id, bucket, force).await {
                Ok(()) => ok += 1,
                Err(FerriteError::VolumeNotFound { .. }) => ok += 1,
                Err(err) => tracing::warn!(?err, bucket, "delete_volume failed on a drive"),
            }
        }
        if ok < quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: String::new(),
                have: ok,
                need: quorum,
            });
        }
        Ok(())
    }

    // ---- namespace lock helper -----------------------------------------

    async fn with_lock<T, F, Fut>(&self, bucket: &str, key: &str, opts: &ObjectOptions, write: bool, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if opts.no_lock {
            return body().await;
        }
        let lock = ObjectLock::Distributed(NamespaceLock::new(
            Arc::clone(&self.lock_client),
            vec![format!("{bucket}/{key}")],
            Uuid::new_v4().to_string(),
            "ferrite-object",
        ));
        let guard: LockGuard<'_> = if write {
            lock.write_lock(LOCK_TIMEOUT).await?
        } else {
            lock.read_lock(LOCK_TIMEOUT).await?
        };
        let result = body().await;
        guard.release().await?;
        result
    }

    fn enqueue_mrf(&self, bucket: &str, key: &str, kind: PartialOperationKind) {
        if let Some(mrf) = &self.mrf {
            let _ = mrf.enqueue(PartialOperation::new(bucket, key, kind, Vec::new(), None));
        }
    }

    async fn read_best_effort_versions(&self, bucket: &str, key: &str) -> Vec<XlMetaVersionRecord> {
        for endpoint in &self.endpoints {
            if let Ok(raw) = endpoint.read_raw_metadata(bucket, key).await {
                if let Ok(doc) = XlMetaV2::decode(&raw) {
                    return doc.versions;
                }
            }
        }
        Vec::new()
    }

    /// Fans `base` (amended per-drive with `index_in_set`) out across every
    /// drive, prepending `versions` (the surviving history) to the new
    /// record. `data_dir`, when present, names a staged temp directory
    /// under `bucket` that `rename_data` moves into place atomically along
    /// with the metadata; `None` writes metadata only, leaving whatever
    /// data directory is already at `key` untouched (Copy/PutMetadata/
    /// PutTags/DeleteTags/Transition/Restore never move shard data).
    async fn publish_version(
        &self,
        bucket: &str,
        key: &str,
        data_dir: Option<&str>,
        versions: Vec<XlMetaVersionRecord>,
        base: &FileInfo,
        sequence: u64,
    ) -> Result<PublishOutcome> {
        let mut pending = FuturesUnordered::new();
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let endpoint = Arc::clone(endpoint);
            let mut per_drive = base.clone();
            if let Some(erasure) = per_drive.erasure.as_mut() {
                erasure.index_in_set = index + 1;
            }
            let mut drive_versions = versions.clone();
            drive_versions.push(from_file_info(&per_drive, sequence));
            let doc = XlMetaV2 {
                versions: drive_versions,
                unknown_trailer: Vec::new(),
            };
            let bucket = bucket.to_string();
            let key = key.to_string();
            let data_dir = data_dir.map(|s| s.to_string());
            pending.push(async move {
                let encoded = doc.encode().map_err(|err| FerriteError::Internal(err.to_string()))?;
                match data_dir {
                    Some(dir) => endpoint
                        .rename_data(&bucket, &dir, &bucket, &key, &encoded)
                        .await
                        .map(Some),
                    None => endpoint.write_raw_metadata(&bucket, &key, &encoded).await.map(|_| None),
                }
            });
        }

        let mut successes = 0usize;
        let mut signatures = Vec::new();
        while let Some(outcome) = pending.next().await {
            match outcome {
                Ok(signature) => {
                    successes += 1;
                    if let Some(sig) = signature {
                        signatures.push(sig);
                    }
                }
                Err(err) => tracing::debug!(?err, bucket, key, "publish_version failed on a drive"),
            }
        }
        let versions_disparity = signatures.windows(2).any(|pair| pair[0] != pair[1]);
        Ok(PublishOutcome {
            successes,
            versions_disparity,
        })
    }

    /// Removes `version_ids` from the object's `xl.meta` history,
    /// preserving any *other* surviving versions rather than the
    /// whole-file semantics `ferrite_quorum::delete_version` has. Falls
    /// back to that quorum helper only once the removal leaves no version
    /// behind, which is the one case where deleting the whole document is
    /// correct. Returns
    /// the removed versions' `FileInfo`s, in no particular order.
    async fn remove_versions(&self, bucket: &str, key: &str, version_ids: &[String]) -> Result<Vec<FileInfo>> {
        let existing = self.read_best_effort_versions(bucket, key).await;
        let removed: Vec<FileInfo> = existing
            .iter()
            .filter(|v| version_ids.iter().any(|id| id == &v.header.version_id))
            .map(|record| to_file_info(record, bucket, key))
            .collect();
        if removed.is_empty() {
            return Err(FerriteError::VersionNotFound {
                bucket: bucket.to_string(),
                object: key.to_string(),
                version_id: version_ids.first().cloned().unwrap_or_default(),
            });
        }

        let remaining: Vec<XlMetaVersionRecord> = existing
            .into_iter()
            .filter(|v| !version_ids.iter().any(|id| id == &v.header.version_id))
            .collect();

        let quorum = self.drives.len() / 2 + 1;
        if remaining.is_empty() {
            for fi in &removed {
                delete_version(&self.endpoints, bucket, key, fi, false).await?;
            }
        } else {
            let mut pending = FuturesUnordered::new();
            for endpoint in &self.endpoints {
                let endpoint = Arc::clone(endpoint);
                let doc = XlMetaV2 {
                    versions: remaining.clone(),
                    unknown_trailer: Vec::new(),
                };
                let bucket = bucket.to_string();
                let key = key.to_string();
                pending.push(async move {
                    let encoded = doc.encode().map_err(|err| FerriteError::Internal(err.to_string()))?;
                    endpoint.write_raw_metadata(&bucket, &key, &encoded).await
                });
            }
            let mut successes = 0usize;
            while let Some(outcome) = pending.next().await {
                if outcome.is_ok() {
                    successes += 1;
                }
            }
            if successes < quorum {
                return Err(FerriteError::WriteQuorum {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    have: successes,
                    need: quorum,
                });
            }
            for fi in &removed {
                if fi.data_dir.is_empty() {
                    continue;
                }
                for drive in &self.drives {
                    let path = drive.root().join(bucket).join(key).join(&fi.data_dir);
                    let _ = drive.delete(&self.format_id, &path, true, true).await;
                }
            }
        }

        Ok(removed)
    }

    // ---- Get -------------------------------------------------------------

    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(i64, i64)>,
        opts: &ObjectOptions,
    ) -> Result<(ObjectInfo, Bytes)> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, false, || self.get_object_locked(bucket, key, range, opts))
            .await
    }

    pub async fn get_object_info(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, false, || self.get_object_info_locked(bucket, key, opts))
            .await
    }

    async fn get_object_info_locked(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let result = read_version(&self.endpoints, bucket, key, opts.version_id.as_deref(), self.default_parity, false).await?;
        let fi = result.file_info;
        if fi.is_delete_marker() {
            return Err(FerriteError::MethodNotAllowed {
                bucket: bucket.to_string(),
                object: key.to_string(),
            });
        }
        let content_type = content_type_of(&fi);
        Ok(file_info_to_object_info(bucket, key, &fi, &content_type))
    }

    async fn get_object_locked(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(i64, i64)>,
        opts: &ObjectOptions,
    ) -> Result<(ObjectInfo, Bytes)> {
        let result = read_version(&self.endpoints, bucket, key, opts.version_id.as_deref(), self.default_parity, false).await?;
        let fi = result.file_info;

        if fi.is_delete_marker() {
            return Err(FerriteError::MethodNotAllowed {
                bucket: bucket.to_string(),
                object: key.to_string(),
            });
        }

        let content_type = content_type_of(&fi);
        let object_info = file_info_to_object_info(bucket, key, &fi, &content_type);
        let object_size = fi.size.max(0) as u64;
        let (offset, length) = resolve_range(range, object_size)?;

        if fi.inline_data {
            let data = fi.data.clone().unwrap_or_default();
            let end = (offset + length).min(data.len() as u64);
            let start = offset.min(end);
            return Ok((object_info, data.slice(start as usize..end as usize)));
        }

        if length == 0 {
            return Ok((object_info, Bytes::new()));
        }

        let erasure = fi.erasure.clone().ok_or_else(|| FerriteError::FileCorrupted {
            bucket: bucket.to_string(),
            object: key.to_string(),
        })?;
        let config = ErasureConfig {
            data_shards: erasure.data_blocks,
            parity_shards: erasure.parity_blocks,
            block_size: erasure.block_size as usize,
        };
        if config.total_shards() != self.drives.len() {
            return Err(FerriteError::FileCorrupted {
                bucket: bucket.to_string(),
                object: key.to_string(),
            });
        }

        let shard_path = format!("{key}/{}/{DATA_PART_NAME}", fi.data_dir);
        let full_shard_size = config.shard_size()?;
        let start_block = offset / config.block_size as u64;
        let skip_bytes = start_block * (full_shard_size as u64 + HASH_SIZE as u64);

        let mut drive_for_position: Vec<Option<usize>> = vec![None; config.total_shards()];
        for (drive_index, &position) in erasure.distribution.iter().enumerate() {
            if position >= 1 && position <= drive_for_position.len() {
                drive_for_position[position - 1] = Some(drive_index);
            }
        }

        let mut readers: Vec<Option<Cursor<Vec<u8>>>> = Vec::with_capacity(config.total_shards());
        let mut prefer = vec![false; config.total_shards()];
        for position in 0..config.total_shards() {
            let online = result.online.get(position).copied().unwrap_or(false);
            let reader = match (online, drive_for_position[position]) {
                (true, Some(drive_index)) => match self.drives[drive_index].read_all(&self.format_id, bucket, &shard_path).await {
                    Ok(bytes) => {
                        let mut cursor = Cursor::new(bytes);
                        cursor.set_position(skip_bytes.min(cursor.get_ref().len() as u64));
                        prefer[position] = self.endpoints[drive_index].hostname().is_empty();
                        Some(cursor)
                    }
                    Err(_) => None,
                },
                _ => None,
            };
            readers.push(reader);
        }

        let bitrot_key = BitrotKey::derive(format!("{bucket}/{key}/{}", fi.version_id).as_bytes());
        let bitrot_algorithm = BitrotAlgorithm::HighwayHash256;

        let end_block = (offset + length).div_ceil(config.block_size as u64).max(start_block + 1);
        let mut output: Vec<u8> = Vec::with_capacity(length as usize);
        let mut cursor_pos = start_block * config.block_size as u64;

        for block_idx in start_block..end_block {
            let block_len = (config.block_size as u64).min(object_size - block_idx * config.block_size as u64) as usize;
            let shard_size = config.shard_size_for(block_len)?;

            let mut shards: Vec<Option<Vec<u8>>> = vec![None; config.total_shards()];
            for position in 0..config.total_shards() {
                let Some(reader) = readers[position].take() else {
                    continue;
                };
                let mut bitrot_reader =
                    BitrotReader::new(reader, bitrot_algorithm, bitrot_key, shard_size, bucket, key);
                match bitrot_reader.read_shard().await {
                    Ok(Some(bytes)) => {
                        shards[position] = Some(bytes.to_vec());
                        readers[position] = Some(bitrot_reader.into_inner());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(?err, bucket, key, position, block_idx, "shard failed bitrot verification");
                    }
                }
            }

            let available: Vec<bool> = shards.iter().map(Option::is_some).collect();
            let sources = select_sources(&available, &prefer, config.data_shards);
            if sources.len() < config.data_shards {
                let err = FerriteError::ReadQuorum {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    have: sources.len(),
                    need: config.data_shards,
                };
                self.enqueue_mrf(bucket, key, PartialOperationKind::PutObject);
                return Err(err);
            }

            let block = match decode_block(shards, &config) {
                Ok(block) => block,
                Err(err) => {
                    self.enqueue_mrf(bucket, key, PartialOperationKind::PutObject);
                    return Err(err);
                }
            };
            let block = &block[..block_len];

            let block_start_object_offset = cursor_pos;
            let want_start = offset.max(block_start_object_offset) - block_start_object_offset;
            let want_end =
                (offset + length).min(block_start_object_offset + block_len as u64) - block_start_object_offset;
            output.extend_from_slice(&block[want_start as usize..want_end as usize]);
            cursor_pos += block_len as u64;
        }

        Ok((object_info, Bytes::from(output)))
    }

    // ---- Put ---------------------------------------------------------

    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;

        if let Some(check) = &opts.check_precond {
            if let Ok(existing) = self.get_object_info(bucket, key, opts).await {
                if !check(&existing) {
                    return Err(FerriteError::PreconditionFailed(format!("{bucket}/{key}")));
                }
            }
        }

        self.with_lock(bucket, key, opts, true, || self.put_object_locked(bucket, key, data, opts))
            .await
    }

    async fn put_object_locked(&self, bucket: &str, key: &str, data: Bytes, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let total_size = data.len();
        let etag = format!("{:x}", md5::Md5::digest(&data));
        let mod_time = opts.mtime.unwrap_or_else(now);
        let keep_history = opts.versioned && !opts.version_suspended;
        let version_id = if keep_history {
            opts.version_id.clone().unwrap_or_else(new_version_id)
        } else {
            "null".to_string()
        };

        let inline = total_size <= self.inline_threshold;
        let set_size = self.drives.len();

        let mut metadata = opts.user_defined.clone();
        metadata
            .entry("etag".to_string())
            .or_insert_with(|| opts.preserve_etag.clone().unwrap_or_else(|| etag.clone()));
        let content_type = metadata
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut base = FileInfo {
            volume: bucket.to_string(),
            name: key.to_string(),
            version_id: version_id.clone(),
            is_latest: true,
            deleted: opts.delete_marker,
            mark_deleted: false,
            data_dir: String::new(),
            size: total_size as i64,
            mod_time,
            disk_mtime: None,
            metadata,
            parts: vec![ObjectPartInfo {
                number: 1,
                etag: etag.clone(),
                size: total_size as i64,
                actual_size: total_size as i64,
                mod_time: Some(mod_time),
                index: None,
            }],
            erasure: None,
            inline_data: inline,
            data: if inline { Some(data.clone()) } else { None },
            transition: TransitionState::default(),
            replication_status: opts.replication_state,
        };

        let mut data_dir = String::new();
        if !inline {
            let offline = vec![false; set_size];
            let (data_blocks, parity_blocks, distribution) =
                plan_placement(self.default_data, self.default_parity, set_size, &offline, key);
            let config = ErasureConfig {
                data_shards: data_blocks,
                parity_shards: parity_blocks,
                block_size: self.block_size,
            };

            let bitrot_key = BitrotKey::derive(format!("{bucket}/{key}/{version_id}").as_bytes());
            let bitrot_algorithm = BitrotAlgorithm::HighwayHash256;

            // `shard_buffers` holds the plain per-position bytes across all
            // blocks, hashed once into `erasure.checksums` below as a
            // coarse whole-shard integrity record. `framed_buffers` holds
            // the same bytes with a per-block bitrot frame (shard, hash)
            // appended after each block's worth, which is what actually
            // lands on disk and lets a reader detect corruption one block
            // at a time instead of only at the whole-shard granularity.
            let mut shard_buffers: Vec<Vec<u8>> = vec![Vec::new(); config.total_shards()];
            let mut framed_buffers: Vec<Vec<u8>> = vec![Vec::new(); config.total_shards()];

            let blocks: Vec<&[u8]> = if data.is_empty() {
                vec![&[][..]]
            } else {
                data.chunks(self.block_size).collect()
            };
            for chunk in blocks {
                let shards = encode_block(chunk, &config)?;
                let shard_size = config.shard_size_for(chunk.len())?;
                for (index, shard) in shards.into_iter().enumerate() {
                    shard_buffers[index].extend_from_slice(&shard);
                    let mut writer =
                        BitrotWriter::new(Cursor::new(Vec::new()), bitrot_algorithm, bitrot_key, shard_size);
                    writer.write_all(&shard).await?;
                    let framed = writer.finish().await?.into_inner();
                    framed_buffers[index].extend_from_slice(&framed);
                }
            }

            let checksums: Vec<BitrotChecksum> = shard_buffers
                .iter()
                .map(|shard| BitrotChecksum {
                    algorithm: bitrot_algorithm,
                    hash: hash_shard(bitrot_algorithm, bitrot_key, shard),
                })
                .collect();

            data_dir = new_data_dir();
            base.data_dir = data_dir.clone();
            base.erasure = Some(ErasureInfo {
                algorithm: "reed-solomon".to_string(),
                data_blocks,
                parity_blocks,
                block_size: self.block_size as u64,
                index_in_set: 0,
                distribution,
                checksums,
            });

            // `distribution[disk_index]` is the 1-based shard position this
            // drive must hold, so the framed shard buffer handed to each
            // drive is selected by position, not by disk index —
            // `get_object_locked`'s `drive_for_position` trusts the same
            // permutation in reverse.
            let distribution = &base.erasure.as_ref().expect("erasure set above").distribution;
            for (disk_index, drive) in self.drives.iter().enumerate() {
                let position = distribution[disk_index];
                let path = format!("{data_dir}/{DATA_PART_NAME}");
                drive.write_all(&self.format_id, bucket, &path, &framed_buffers[position - 1]).await?;
            }
        }

        let existing_versions = self.read_best_effort_versions(bucket, key).await;
        let sequence = existing_versions.iter().map(|v| v.header.sequence).max().map(|s| s + 1).unwrap_or(0);
        let mut versions: Vec<XlMetaVersionRecord> = if keep_history { existing_versions } else { Vec::new() };
        versions.retain(|v| v.header.version_id != version_id);

        let outcome = self
            .publish_version(bucket, key, if inline { None } else { Some(data_dir.as_str()) }, versions, &base, sequence)
            .await?;

        let write_quorum = base.write_quorum(self.default_parity);
        if outcome.successes < write_quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: key.to_string(),
                have: outcome.successes,
                need: write_quorum,
            });
        }
        if outcome.versions_disparity || outcome.successes < set_size {
            self.enqueue_mrf(bucket, key, PartialOperationKind::PutObject);
        }

        Ok(file_info_to_object_info(bucket, key, &base, &content_type))
    }

    // ---- Copy (metadata-only) / PutMetadata / PutTags / DeleteTags ----

    pub async fn copy_object_metadata(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        opts: &ObjectOptions,
    ) -> Result<ObjectInfo> {
        if src_bucket != dst_bucket || src_key != dst_key {
            return Err(FerriteError::NotImplemented(
                "full-body copy to a different bucket/key".to_string(),
            ));
        }
        self.put_object_metadata(dst_bucket, dst_key, opts).await
    }

    pub async fn put_object_metadata(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, true, || self.put_metadata_locked(bucket, key, opts))
            .await
    }

    pub async fn put_tags(&self, bucket: &str, key: &str, tags: &HashMap<String, String>, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let mut opts = opts.clone();
        opts.user_defined.insert("x-tags".to_string(), encode_tags(tags));
        self.put_object_metadata(bucket, key, &opts).await
    }

    pub async fn delete_tags(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let mut opts = opts.clone();
        opts.eval_metadata = Some(Arc::new(|info: &mut ObjectInfo| {
            info.metadata.remove("x-tags");
            Ok(())
        }));
        self.put_object_metadata(bucket, key, &opts).await
    }

    async fn put_metadata_locked(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let result = read_version(&self.endpoints, bucket, key, opts.version_id.as_deref(), self.default_parity, false).await?;
        let mut fi = result.file_info;

        if let Some(eval) = &opts.eval_metadata {
            let content_type = content_type_of(&fi);
            let mut object_info = file_info_to_object_info(bucket, key, &fi, &content_type);
            eval(&mut object_info)?;
            fi.metadata = object_info.metadata;
        } else {
            for (k, v) in &opts.user_defined {
                fi.metadata.insert(k.clone(), v.clone());
            }
        }
        fi.mod_time = opts.mtime.unwrap_or_else(now);

        let keep_history = opts.versioned && !opts.version_suspended;
        if keep_history && opts.version_id.is_none() {
            fi.version_id = new_version_id();
        }
        fi.is_latest = true;

        let existing_versions = self.read_best_effort_versions(bucket, key).await;
        let sequence = existing_versions
            .iter()
            .find(|v| v.header.version_id == fi.version_id)
            .map(|v| v.header.sequence)
            .unwrap_or_else(|| existing_versions.iter().map(|v| v.header.sequence).max().map(|s| s + 1).unwrap_or(0));
        let mut versions: Vec<XlMetaVersionRecord> = if keep_history { existing_versions } else { Vec::new() };
        versions.retain(|v| v.header.version_id != fi.version_id);

        let outcome = self.publish_version(bucket, key, None, versions, &fi, sequence).await?;
        let write_quorum = fi.write_quorum(self.default_parity);
        if outcome.successes < write_quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: key.to_string(),
                have: outcome.successes,
                need: write_quorum,
            });
        }

        let content_type = content_type_of(&fi);
        Ok(file_info_to_object_info(bucket, key, &fi, &content_type))
    }

    // ---- Delete / DeleteMany -------------------------------------------

    pub async fn delete_object(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, true, || self.delete_object_locked(bucket, key, opts))
            .await
    }

    async fn delete_object_locked(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let keep_history = opts.versioned && !opts.version_suspended;

        if let Some(version_id) = &opts.version_id {
            let removed = self.remove_versions(bucket, key, std::slice::from_ref(version_id)).await?;
            let fi = removed.into_iter().next().expect("remove_versions guarantees non-empty on success");
            let content_type = content_type_of(&fi);
            return Ok(file_info_to_object_info(bucket, key, &fi, &content_type));
        }

        if !keep_history {
            let marker = add_delete_marker(&self.endpoints, bucket, key, None).await?;
            return Ok(file_info_to_object_info(bucket, key, &marker, DEFAULT_CONTENT_TYPE));
        }

        let marker = FileInfo {
            volume: bucket.to_string(),
            name: key.to_string(),
            version_id: new_version_id(),
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
            transition: TransitionState::default(),
            replication_status: opts.replication_state,
        };
        let existing_versions = self.read_best_effort_versions(bucket, key).await;
        let sequence = existing_versions.iter().map(|v| v.header.sequence).max().map(|s| s + 1).unwrap_or(0);
        let outcome = self.publish_version(bucket, key, None, existing_versions, &marker, sequence).await?;
        let quorum = self.drives.len() / 2 + 1;
        if outcome.successes < quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: key.to_string(),
                have: outcome.successes,
                need: quorum,
            });
        }
        Ok(file_info_to_object_info(bucket, key, &marker, DEFAULT_CONTENT_TYPE))
    }

    /// Groups by object name and deduplicates before removing, returning
    /// one result per input entry in the caller's original order.
    /// `requests` are `(object, version_id)`
    /// pairs; there is no delete-marker form here — bulk delete always
    /// targets concrete versions.
    pub async fn delete_many(&self, bucket: &str, requests: Vec<(String, String)>, opts: &ObjectOptions) -> Vec<Result<ObjectInfo>> {
        let mut by_object: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        for (index, (object, version_id)) in requests.into_iter().enumerate() {
            by_object.entry(object).or_default().push((index, version_id));
        }

        let mut results: Vec<Option<Result<ObjectInfo>>> = vec![None; by_object.values().map(|v| v.len()).sum()];

        for (object, entries) in by_object {
            let mut seen = std::collections::HashSet::new();
            let mut version_ids = Vec::new();
            for (_, version_id) in &entries {
                if seen.insert(version_id.clone()) {
                    version_ids.push(version_id.clone());
                }
            }

            let outcome = self
                .with_lock(bucket, &object, opts, true, || self.remove_versions(bucket, &object, &version_ids))
                .await;

            match outcome {
                Ok(removed) => {
                    let by_version: HashMap<String, FileInfo> = removed.into_iter().map(|fi| (fi.version_id.clone(), fi)).collect();
                    for (index, version_id) in entries {
                        let result = match by_version.get(&version_id) {
                            Some(fi) => Ok(file_info_to_object_info(bucket, &object, fi, &content_type_of(fi))),
                            None => Err(FerriteError::VersionNotFound {
                                bucket: bucket.to_string(),
                                object: object.clone(),
                                version_id,
                            }),
                        };
                        results[index] = Some(result);
                    }
                }
                Err(err) => {
                    for (index, _) in entries {
                        results[index] = Some(Err(err.clone()));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(FerriteError::Internal("delete_many result missing an entry".to_string()))))
            .collect()
    }

    // ---- Transition / Restore ------------------------------------------

    pub async fn transition_object(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, true, || self.transition_object_locked(bucket, key, opts))
            .await
    }

    async fn transition_object_locked(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let result = read_version(&self.endpoints, bucket, key, opts.version_id.as_deref(), self.default_parity, false).await?;
        let mut fi = result.file_info;

        if let Some(expected_etag) = &opts.transition.etag {
            let on_disk_etag = fi.metadata.get("etag").cloned().unwrap_or_default();
            if expected_etag != &on_disk_etag {
                return Err(FerriteError::PreconditionFailed(format!(
                    "transition etag mismatch for {bucket}/{key}"
                )));
            }
        }
        if let Some(expected_mtime) = opts.mtime {
            if expected_mtime != fi.mod_time {
                return Err(FerriteError::PreconditionFailed(format!(
                    "transition modtime mismatch for {bucket}/{key}"
                )));
            }
        }

        // Streaming the object out through a tier driver is an external
        // collaborator; this only flips the bookkeeping fields and
        // reclaims the local data directory once that hand-off is
        // assumed complete.
        fi.transition.status = Some(TransitionStatus::Complete);
        fi.transition.transition_tier = opts.transition.tier.clone();
        fi.transition.transitioned_object_name = Some(format!("{bucket}/{key}"));
        fi.transition.transition_version_id = Some(fi.version_id.clone());

        let old_data_dir = fi.data_dir.clone();
        let was_inline = fi.inline_data;
        fi.data_dir = String::new();
        fi.inline_data = false;
        fi.data = None;

        let existing_versions = self.read_best_effort_versions(bucket, key).await;
        let sequence = existing_versions
            .iter()
            .find(|v| v.header.version_id == fi.version_id)
            .map(|v| v.header.sequence)
            .unwrap_or(0);
        let keep_history = opts.versioned && !opts.version_suspended;
        let mut versions: Vec<XlMetaVersionRecord> = if keep_history { existing_versions } else { Vec::new() };
        versions.retain(|v| v.header.version_id != fi.version_id);

        let outcome = self.publish_version(bucket, key, None, versions, &fi, sequence).await?;
        let write_quorum = fi.write_quorum(self.default_parity);
        if outcome.successes < write_quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: key.to_string(),
                have: outcome.successes,
                need: write_quorum,
            });
        }

        if !was_inline && !old_data_dir.is_empty() {
            for drive in &self.drives {
                let path = drive.root().join(bucket).join(key).join(&old_data_dir);
                let _ = drive.delete(&self.format_id, &path, true, true).await;
            }
        }

        let content_type = content_type_of(&fi);
        Ok(file_info_to_object_info(bucket, key, &fi, &content_type))
    }

    pub async fn restore_object(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        self.with_lock(bucket, key, opts, true, || self.restore_object_locked(bucket, key, opts))
            .await
    }

    async fn restore_object_locked(&self, bucket: &str, key: &str, opts: &ObjectOptions) -> Result<ObjectInfo> {
        let result = read_version(&self.endpoints, bucket, key, opts.version_id.as_deref(), self.default_parity, false).await?;
        let mut fi = result.file_info;

        if fi.transition.status != Some(TransitionStatus::Complete) {
            return Err(FerriteError::InvalidArgument(format!(
                "{bucket}/{key} is not in a transitioned state"
            )));
        }

        fi.metadata.insert("x-amz-restore".to_string(), restore_header(opts));
        if opts.expiration.expire {
            fi.transition.expire_restored = true;
        } else {
            fi.transition.status = Some(TransitionStatus::None);
            fi.transition.expire_restored = false;
        }

        let existing_versions = self.read_best_effort_versions(bucket, key).await;
        let sequence = existing_versions
            .iter()
            .find(|v| v.header.version_id == fi.version_id)
            .map(|v| v.header.sequence)
            .unwrap_or(0);
        let keep_history = opts.versioned && !opts.version_suspended;
        let mut versions: Vec<XlMetaVersionRecord> = if keep_history { existing_versions } else { Vec::new() };
        versions.retain(|v| v.header.version_id != fi.version_id);

        let outcome = self.publish_version(bucket, key, None, versions, &fi, sequence).await?;
        let write_quorum = fi.write_quorum(self.default_parity);
        if outcome.successes < write_quorum {
            return Err(FerriteError::WriteQuorum {
                bucket: bucket.to_string(),
                object: key.to_string(),
                have: outcome.successes,
                need: write_quorum,
            });
        }

        let content_type = content_type_of(&fi);
        Ok(file_info_to_object_info(bucket, key, &fi, &content_type))
    }
}

struct PublishOutcome {
    successes: usize,
    versions_disparity: bool,
}

fn restore_header(opts: &ObjectOptions) -> String {
    if opts.expiration.expire {
        "ongoing-request=\"false\"".to_string()
    } else {
        "ongoing-request=\"true\"".to_string()
    }
}

fn encode_tags(tags: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join("&")
}

fn content_type_of(fi: &FileInfo) -> String {
    fi.metadata
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') {
        return Err(FerriteError::InvalidArgument(format!("invalid bucket name: {bucket}")));
    }
    Ok(())
}

fn resolve_range(range: Option<(i64, i64)>, size: u64) -> Result<(u64, u64)> {
    let (offset, length) = match range {
        None => (0i64, -1i64),
        Some((offset, length)) => (offset, length),
    };
    if offset < 0 || offset as u64 > size {
        return Err(FerriteError::InvalidRange {
            offset,
            length,
            size: size as i64,
        });
    }
    let offset = offset as u64;
    let length = if length < 0 { size - offset } else { length as u64 };
    if offset + length > size {
        return Err(FerriteError::InvalidRange {
            offset: offset as i64,
            length: length as i64,
            size: size as i64,
        });
    }
    Ok((offset, length))
}

fn file_info_to_object_info(bucket: &str, key: &str, fi: &FileInfo, content_type: &str) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: fi.size,
        etag: fi.metadata.get("etag").cloned().unwrap_or_default(),
        content_type: content_type.to_string(),
        last_modified: fi.mod_time,
        metadata: fi.metadata.clone(),
        version_id: if fi.version_id == "null" { None } else { Some(fi.version_id.clone()) },
        is_latest: fi.is_latest,
        delete_marker: fi.is_delete_marker(),
        replication_status: fi.replication_status,
        transition_status: fi.transition.status.unwrap_or(TransitionStatus::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("ferrite-object-test-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    async fn fresh_layer(count: usize, default_data: usize, default_parity: usize) -> (ObjectErasureLayer, Vec<TempDir>) {
        let mut drives = Vec::with_capacity(count);
        let mut dirs = Vec::with_capacity(count);
        for _ in 0..count {
            let dir = TempDir::new();
            let drive = LocalDrive::new(dir.path()).await.unwrap();
            drive.make_volume("", "bucket").await.unwrap();
            drives.push(Arc::new(drive));
            dirs.push(dir);
        }
        let layer = ObjectErasureLayer::new(drives, "", default_data, default_parity).with_inline_threshold(16);
        (layer, dirs)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_small_inline_object() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let opts = ObjectOptions::default();
        layer.put_object("bucket", "hello", Bytes::from_static(b"hi"), &opts).await.unwrap();

        let (info, data) = layer.get_object("bucket", "hello", None, &opts).await.unwrap();
        assert_eq!(&data[..], b"hi");
        assert_eq!(info.size, 2);
        assert!(!info.delete_marker);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_sharded_object_with_range() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let opts = ObjectOptions::default();
        let body: Vec<u8> = (0u8..100).collect();
        layer.put_object("bucket", "big", Bytes::from(body.clone()), &opts).await.unwrap();

        let (_, full) = layer.get_object("bucket", "big", None, &opts).await.unwrap();
        assert_eq!(&full[..], &body[..]);

        let (_, partial) = layer.get_object("bucket", "big", Some((10, 5)), &opts).await.unwrap();
        assert_eq!(&partial[..], &body[10..15]);
    }

    #[tokio::test]
    async fn out_of_range_request_is_rejected() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let opts = ObjectOptions::default();
        layer.put_object("bucket", "small", Bytes::from_static(b"abc"), &opts).await.unwrap();

        let err = layer.get_object("bucket", "small", Some((0, 100)), &opts).await.unwrap_err();
        assert!(matches!(err, FerriteError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn versioned_delete_marker_then_version_id_read_round_trips() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let mut opts = ObjectOptions::default();
        opts.versioned = true;

        let v1 = layer.put_object("bucket", "k", Bytes::from_static(b"v1"), &opts).await.unwrap();
        let v1_id = v1.version_id.clone().unwrap();

        layer.delete_object("bucket", "k", &opts).await.unwrap();

        let err = layer.get_object("bucket", "k", None, &opts).await.unwrap_err();
        assert!(matches!(err, FerriteError::MethodNotAllowed { .. }));

        let mut pinned = opts.clone();
        pinned.version_id = Some(v1_id);
        let (_, data) = layer.get_object("bucket", "k", None, &pinned).await.unwrap();
        assert_eq!(&data[..], b"v1");
    }

    #[tokio::test]
    async fn copy_metadata_only_preserves_etag_and_updates_user_metadata() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let opts = ObjectOptions::default();
        let before = layer.put_object("bucket", "o", Bytes::from_static(b"payload"), &opts).await.unwrap();

        let mut copy_opts = ObjectOptions::default();
        copy_opts.user_defined.insert("x-custom".to_string(), "1".to_string());
        let after = layer.copy_object_metadata("bucket", "o", "bucket", "o", &copy_opts).await.unwrap();

        assert_eq!(after.etag, before.etag);
        assert_eq!(after.metadata.get("x-custom").map(String::as_str), Some("1"));

        let (info, data) = layer.get_object("bucket", "o", None, &opts).await.unwrap();
        assert_eq!(&data[..], b"payload");
        assert_eq!(info.metadata.get("x-custom").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn delete_many_deduplicates_and_reports_per_index() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let mut opts = ObjectOptions::default();
        opts.versioned = true;

        let a1 = layer.put_object("bucket", "a", Bytes::from_static(b"a1"), &opts).await.unwrap();
        let a2 = layer.put_object("bucket", "a", Bytes::from_static(b"a2"), &opts).await.unwrap();
        let b1 = layer.put_object("bucket", "b", Bytes::from_static(b"b1"), &opts).await.unwrap();

        let requests = vec![
            ("a".to_string(), a1.version_id.clone().unwrap()),
            ("a".to_string(), a2.version_id.clone().unwrap()),
            ("b".to_string(), b1.version_id.clone().unwrap()),
        ];
        let results = layer.delete_many("bucket", requests, &opts).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn removing_one_version_preserves_the_other() {
        let (layer, _dirs) = fresh_layer(4, 2, 2).await;
        let mut opts = ObjectOptions::default();
        opts.versioned = true;

        let v1 = layer.put_object("bucket", "k", Bytes::from_static(b"v1"), &opts).await.unwrap();
        let v2 = layer.put_object("bucket", "k", Bytes::from_static(b"v2"), &opts).await.unwrap();

        let mut target = opts.clone();
        target.version_id = v1.version_id.clone();
        layer.delete_object("bucket", "k", &target).await.unwrap();

        let mut pinned = opts.clone();
        pinned.version_id = v2.version_id.clone();
        let (_, data) = layer.get_object("bucket", "k", None, &pinned).await.unwrap();
        assert_eq!(&data[..], b"v2");
    }
}
