//! Per-object healing (`HealObject`): read the canonical version
//! across the set, reconstruct its bytes from the drives that agree with
//! it, verifying every shard's bitrot frame along the way, and republish
//! the missing/corrupt/bitrotten shards and `xl.meta` on every drive that
//! disagreed.
//!
//! Canonical-selection-by-signature plus a per-block repair loop, built
//! against `ferrite_storage::LocalDrive`, `ferrite_meta::XlMetaV2`, and
//! `ferrite_erasure::encode_block`/`decode_block` with a single contiguous,
//! bitrot-framed `part.1` shard layout.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use ferrite_bitrot::{BitrotKey, BitrotReader, BitrotWriter};
use ferrite_common::error::{FerriteError, Result};
use ferrite_common::filemeta::{BitrotAlgorithm, FileInfo};
use ferrite_erasure::{decode_block, encode_block, ErasureConfig};
use ferrite_meta::{from_file_info, to_file_info, XlMetaV2};
use ferrite_storage::LocalDrive;
use serde::{Deserialize, Serialize};

const DATA_PART_NAME: &str = "part.1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealShardState {
    Healthy,
    Missing,
    Corrupted,
    Outdated,
    Repaired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealResultItem {
    pub disk_index: usize,
    pub before: HealShardState,
    pub after: HealShardState,
    pub bytes_repaired: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealResult {
    pub bucket: String,
    pub object: String,
    pub read_quorum: usize,
    pub write_quorum: usize,
    pub bytes_done: u64,
    pub healed: bool,
    pub items: Vec<HealResultItem>,
}

struct MetaObservation {
    disk_index: usize,
    file_info: Option<FileInfo>,
    signature: Option<String>,
    state: HealShardState,
    error: Option<String>,
}

pub struct HealEngine {
    drives: Vec<Arc<LocalDrive>>,
    format_id: String,
    default_parity: usize,
}

impl HealEngine {
    pub fn new(drives: Vec<Arc<LocalDrive>>, format_id: impl Into<String>, default_parity: usize) -> Self {
        Self {
            drives,
            format_id: format_id.into(),
            default_parity,
        }
    }

    pub async fn heal_object(&self, volume: &str, path: &str) -> Result<HealResult> {
        let observations = self.read_meta_from_all_drives(volume, path).await;
        let (canonical, signature, read_quorum_met) = self.select_canonical(volume, path, &observations)?;

        let mut items: Vec<HealResultItem> = observations
            .iter()
            .map(|o| HealResultItem {
                disk_index: o.disk_index,
                before: o.state,
                after: o.state,
                bytes_repaired: 0,
                error: o.error.clone(),
            })
            .collect();

        let mut repair_targets = HashSet::new();
        for o in &observations {
            let is_canonical = o.signature.as_deref() == Some(signature.as_str());
            if is_canonical && o.state == HealShardState::Healthy {
                continue;
            }
            repair_targets.insert(o.disk_index);
            items[o.disk_index].before = if o.state == HealShardState::Healthy {
                HealShardState::Outdated
            } else {
                o.state
            };
            items[o.disk_index].after = HealShardState::Outdated;
        }

        let mut bytes_done = 0u64;

        // Shard-bearing objects always get a bitrot scan, even when every
        // drive's metadata already agrees: metadata agreement only proves
        // the drives think they hold the same version, not that the bytes
        // on disk still match their frame hashes.
        let needs_bitrot_scan = !canonical.inline_data && canonical.size > 0;

        if repair_targets.is_empty() && !needs_bitrot_scan {
            return Ok(HealResult {
                bucket: volume.to_string(),
                object: path.to_string(),
                read_quorum: canonical.read_quorum(self.default_parity),
                write_quorum: canonical.write_quorum(self.default_parity),
                bytes_done,
                healed: false,
                items,
            });
        }

        if canonical.inline_data {
            if !repair_targets.is_empty() {
                self.repair_inline(volume, path, &canonical, &repair_targets, &mut items).await;
            }
        } else if needs_bitrot_scan {
            bytes_done = self
                .repair_shards(
                    volume,
                    path,
                    &canonical,
                    &signature,
                    &observations,
                    &mut repair_targets,
                    &mut items,
                )
                .await?;
        }

        self.republish_metadata(volume, path, &canonical, &repair_targets, &mut items).await;

        let healed = items
            .iter()
            .any(|item| item.before != item.after && item.after == HealShardState::Repaired);

        let _ = read_quorum_met;
        Ok(HealResult {
            bucket: volume.to_string(),
            object: path.to_string(),
            read_quorum: canonical.read_quorum(self.default_parity),
            write_quorum: canonical.write_quorum(self.default_parity),
            bytes_done,
            healed,
            items,
        })
    }

    async fn repair_inline(
        &self,
        _volume: &str,
        _path: &str,
        _canonical: &FileInfo,
        repair_targets: &HashSet<usize>,
        items: &mut [HealResultItem],
    ) {
        // Inline objects carry their bytes inside `xl.meta` itself; the
        // metadata republish below is the whole repair.
        for &disk_index in repair_targets {
            items[disk_index].after = HealShardState::Repaired;
        }
    }

    async fn repair_shards(
        &self,
        volume: &str,
        path: &str,
        canonical: &FileInfo,
        signature: &str,
        observations: &[MetaObservation],
        repair_targets: &mut HashSet<usize>,
        items: &mut [HealResultItem],
    ) -> Result<u64> {
        let erasure = canonical.erasure.clone().ok_or_else(|| FerriteError::FileCorrupted {
            bucket: volume.to_string(),
            object: path.to_string(),
        })?;
        let config = ErasureConfig {
            data_shards: erasure.data_blocks,
            parity_shards: erasure.parity_blocks,
            block_size: erasure.block_size as usize,
        };

        if config.total_shards() != self.drives.len() {
            return Err(FerriteError::Internal(format!(
                "metadata shard configuration mismatch for {volume}/{path}: meta shards {}, local drives {}",
                config.total_shards(),
                self.drives.len()
            )));
        }

        let shard_path = format!("{path}/{}/{DATA_PART_NAME}", canonical.data_dir);

        let mut readers: Vec<Option<Cursor<Vec<u8>>>> = Vec::with_capacity(self.drives.len());
        for (disk_index, drive) in self.drives.iter().enumerate() {
            let is_canonical = observations
                .get(disk_index)
                .and_then(|o| o.signature.as_deref())
                == Some(signature);
            if !is_canonical || repair_targets.contains(&disk_index) {
                readers.push(None);
                continue;
            }
            match drive.read_all(&self.format_id, volume, &shard_path).await {
                Ok(bytes) => readers.push(Some(Cursor::new(bytes))),
                Err(_) => {
                    items[disk_index].before = HealShardState::Outdated;
                    items[disk_index].after = HealShardState::Outdated;
                    repair_targets.insert(disk_index);
                    readers.push(None);
                }
            }
        }

        let bitrot_key = BitrotKey::derive(format!("{volume}/{path}/{}", canonical.version_id).as_bytes());
        let bitrot_algorithm = BitrotAlgorithm::HighwayHash256;

        let object_size = canonical.size as u64;
        let block_size = config.block_size as u64;
        let num_blocks = object_size.div_ceil(block_size).max(1);

        let mut decoded: Vec<u8> = Vec::with_capacity(object_size as usize);
        for block_idx in 0..num_blocks {
            let block_len = block_size.min(object_size - block_idx * block_size) as usize;
            let shard_size = config.shard_size_for(block_len)?;

            let mut shards: Vec<Option<Vec<u8>>> = vec![None; config.total_shards()];
            for position in 0..config.total_shards() {
                let Some(reader) = readers[position].take() else {
                    continue;
                };
                let mut bitrot_reader = BitrotReader::new(reader, bitrot_algorithm, bitrot_key, shard_size, volume, path);
                match bitrot_reader.read_shard().await {
                    Ok(Some(bytes)) => {
                        shards[position] = Some(bytes.to_vec());
                        readers[position] = Some(bitrot_reader.into_inner());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(?err, volume, path, position, block_idx, "shard failed bitrot verification during heal");
                        items[position].before = HealShardState::Corrupted;
                        items[position].after = HealShardState::Outdated;
                        repair_targets.insert(position);
                    }
                }
            }

            let available = shards.iter().filter(|s| s.is_some()).count();
            if available < config.data_shards {
                return Err(FerriteError::ReadQuorum {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                    have: available,
                    need: config.data_shards,
                });
            }

            let block = decode_block(shards, &config)?;
            decoded.extend_from_slice(&block[..block_len]);
        }

        // Shard bytes accumulate here block by block, bitrot-framed the
        // same way `put_object_locked` frames a fresh write, then get
        // written out as one contiguous `part.1` per target.
        let mut shard_buffers: HashMap<usize, Vec<u8>> =
            repair_targets.iter().map(|&i| (i, Vec::new())).collect();
        for chunk in decoded.chunks(config.block_size) {
            let shards = encode_block(chunk, &config)?;
            let shard_size = config.shard_size_for(chunk.len())?;
            for &disk_index in repair_targets.iter() {
                if let Some(shard) = shards.get(disk_index) {
                    let mut writer = BitrotWriter::new(Cursor::new(Vec::new()), bitrot_algorithm, bitrot_key, shard_size);
                    writer.write_all(shard).await?;
                    let framed = writer.finish().await?.into_inner();
                    shard_buffers.get_mut(&disk_index).unwrap().extend_from_slice(&framed);
                }
            }
        }

        let mut bytes_done = 0u64;
        for (disk_index, buffer) in shard_buffers {
            let drive = &self.drives[disk_index];
            match drive.write_all(&self.format_id, volume, &shard_path, &buffer).await {
                Ok(()) => {
                    bytes_done += buffer.len() as u64;
                    items[disk_index].bytes_repaired += buffer.len() as u64;
                }
                Err(err) => {
                    items[disk_index].after = HealShardState::Failed;
                    items[disk_index].error = Some(err.to_string());
                }
            }
        }

        Ok(bytes_done)
    }

    async fn republish_metadata(
        &self,
        volume: &str,
        path: &str,
        canonical: &FileInfo,
        repair_targets: &HashSet<usize>,
        items: &mut [HealResultItem],
    ) {
        for &disk_index in repair_targets {
            if items[disk_index].after == HealShardState::Failed {
                continue;
            }
            let mut per_drive = canonical.clone();
            if let Some(erasure) = per_drive.erasure.as_mut() {
                erasure.index_in_set = disk_index + 1;
            }
            let record = from_file_info(&per_drive, 0);
            let doc = XlMetaV2 {
                versions: vec![record],
                unknown_trailer: Vec::new(),
            };
            let Ok(encoded) = doc.encode() else {
                items[disk_index].after = HealShardState::Failed;
                continue;
            };
            match self.drives[disk_index].write_metadata(&self.format_id, volume, path, &encoded).await {
                Ok(()) => items[disk_index].after = HealShardState::Repaired,
                Err(err) => {
                    items[disk_index].after = HealShardState::Failed;
                    items[disk_index].error = Some(err.to_string());
                }
            }
        }
    }

    pub async fn heal_bucket(&self, volume: &str) -> Result<Vec<HealResult>> {
        let objects = self.collect_volume_objects(volume).await?;
        let mut objects: Vec<String> = objects.into_iter().collect();
        objects.sort_unstable();

        let mut results = Vec::with_capacity(objects.len());
        for object in objects {
            results.push(self.heal_object(volume, &object).await?);
        }
        Ok(results)
    }

    async fn read_meta_from_all_drives(&self, volume: &str, path: &str) -> Vec<MetaObservation> {
        let mut observations = Vec::with_capacity(self.drives.len());
        for (disk_index, drive) in self.drives.iter().enumerate() {
            let observation = match drive.read_metadata(&self.format_id, volume, path).await {
                Ok(raw) => match XlMetaV2::decode(&raw) {
                    Ok(doc) => match doc.versions.into_iter().max_by_key(|v| v.header.sequence) {
                        Some(record) => {
                            let file_info = to_file_info(&record, volume, path);
                            let signature = file_info_signature(&file_info);
                            MetaObservation {
                                disk_index,
                                file_info: Some(file_info),
                                signature: Some(signature),
                                state: HealShardState::Healthy,
                                error: None,
                            }
                        }
                        None => MetaObservation {
                            disk_index,
                            file_info: None,
                            signature: None,
                            state: HealShardState::Missing,
                            error: None,
                        },
                    },
                    Err(err) => MetaObservation {
                        disk_index,
                        file_info: None,
                        signature: None,
                        state: HealShardState::Corrupted,
                        error: Some(err.to_string()),
                    },
                },
                Err(FerriteError::FileNotFound { .. }) => MetaObservation {
                    disk_index,
                    file_info: None,
                    signature: None,
                    state: HealShardState::Missing,
                    error: None,
                },
                Err(err) => MetaObservation {
                    disk_index,
                    file_info: None,
                    signature: None,
                    state: HealShardState::Corrupted,
                    error: Some(err.to_string()),
                },
            };
            observations.push(observation);
        }
        observations
    }

    fn select_canonical(
        &self,
        volume: &str,
        path: &str,
        observations: &[MetaObservation],
    ) -> Result<(FileInfo, String, usize)> {
        let mut by_signature: HashMap<String, (usize, FileInfo)> = HashMap::new();
        for o in observations {
            if let (Some(signature), Some(file_info)) = (o.signature.clone(), o.file_info.clone()) {
                let entry = by_signature.entry(signature).or_insert((0, file_info));
                entry.0 += 1;
            }
        }

        let mut best: Option<(String, usize, FileInfo)> = None;
        for (signature, (count, file_info)) in by_signature {
            if best.as_ref().map(|(_, best_count, _)| count > *best_count).unwrap_or(true) {
                best = Some((signature, count, file_info));
            }
        }

        let (signature, count, file_info) = best.ok_or_else(|| FerriteError::FileNotFound {
            bucket: volume.to_string(),
            object: path.to_string(),
        })?;

        let read_quorum = file_info.read_quorum(self.default_parity);
        if count < read_quorum {
            return Err(FerriteError::ReadQuorum {
                bucket: volume.to_string(),
                object: path.to_string(),
                have: count,
                need: read_quorum,
            });
        }

        Ok((file_info, signature, count))
    }

    async fn collect_volume_objects(&self, volume: &str) -> Result<HashSet<String>> {
        let opts = ferrite_storage::WalkOptions {
            recursive: true,
            prefix: None,
            forward_from: None,
            limit: None,
        };
        let mut objects = HashSet::new();
        for drive in &self.drives {
            let entries = match drive.walk_dir(&self.format_id, volume, "", &opts).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries {
                if !entry.is_dir {
                    objects.insert(entry.name);
                }
            }
        }
        Ok(objects)
    }
}

fn file_info_signature(fi: &FileInfo) -> String {
    let erasure = fi
        .erasure
        .as_ref()
        .map(|e| format!("{}:{}:{}", e.data_blocks, e.parity_blocks, e.block_size))
        .unwrap_or_default();
    format!(
        "{}:{}:{}:{}:{}",
        fi.version_id,
        fi.mod_time.to_rfc3339(),
        fi.size,
        fi.data_dir,
        erasure
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::filemeta::ErasureInfo;
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("ferrite-heal-test-{}", Uuid::new_v4()));
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

    const DATA_SHARDS: usize = 2;
    const PARITY_SHARDS: usize = 2;
    const BLOCK_SIZE: usize = 16;

    async fn write_object(
        drives: &[Arc<LocalDrive>],
        volume: &str,
        path: &str,
        data: &[u8],
    ) -> FileInfo {
        let config = ErasureConfig {
            data_shards: DATA_SHARDS,
            parity_shards: PARITY_SHARDS,
            block_size: BLOCK_SIZE,
        };
        let data_dir = Uuid::new_v4().to_string();
        let version_id = Uuid::new_v4().to_string();
        let bitrot_key = BitrotKey::derive(format!("{volume}/{path}/{version_id}").as_bytes());
        let bitrot_algorithm = BitrotAlgorithm::HighwayHash256;

        let mut shard_buffers: Vec<Vec<u8>> = vec![Vec::new(); drives.len()];
        for chunk in data.chunks(BLOCK_SIZE) {
            let shards = encode_block(chunk, &config).unwrap();
            let shard_size = config.shard_size_for(chunk.len()).unwrap();
            for (disk_index, shard) in shards.into_iter().enumerate() {
                let mut writer = BitrotWriter::new(Cursor::new(Vec::new()), bitrot_algorithm, bitrot_key, shard_size);
                writer.write_all(&shard).await.unwrap();
                let framed = writer.finish().await.unwrap().into_inner();
                shard_buffers[disk_index].extend_from_slice(&framed);
            }
        }

        let shard_path = format!("{path}/{data_dir}/{DATA_PART_NAME}");
        for (disk_index, drive) in drives.iter().enumerate() {
            drive
                .write_all("", volume, &shard_path, &shard_buffers[disk_index])
                .await
                .unwrap();
        }

        let file_info = FileInfo {
            volume: volume.to_string(),
            name: path.to_string(),
            version_id,
            is_latest: true,
            deleted: false,
            mark_deleted: false,
            data_dir,
            size: data.len() as i64,
            mod_time: ferrite_common::time::now(),
            disk_mtime: None,
            metadata: Default::default(),
            parts: vec![],
            erasure: Some(ErasureInfo {
                algorithm: "reed-solomon".into(),
                data_blocks: DATA_SHARDS,
                parity_blocks: PARITY_SHARDS,
                block_size: BLOCK_SIZE as u64,
                index_in_set: 1,
                distribution: (1..=drives.len()).collect(),
                checksums: vec![],
            }),
            inline_data: false,
            data: None,
            transition: Default::default(),
            replication_status: Default::default(),
        };

        let record = from_file_info(&file_info, 0);
        let doc = XlMetaV2 {
            versions: vec![record],
            unknown_trailer: Vec::new(),
        };
        let encoded = doc.encode().unwrap();
        for drive in drives {
            drive.write_metadata("", volume, path, &encoded).await.unwrap();
        }

        file_info
    }

    async fn fresh_drives(count: usize) -> (Vec<Arc<LocalDrive>>, Vec<TempDir>) {
        let mut drives = Vec::with_capacity(count);
        let mut dirs = Vec::with_capacity(count);
        for _ in 0..count {
            let dir = TempDir::new();
            let drive = LocalDrive::new(dir.path()).await.unwrap();
            drive.make_volume("", "bucket").await.unwrap();
            drives.push(Arc::new(drive));
            dirs.push(dir);
        }
        (drives, dirs)
    }

    #[tokio::test]
    async fn heal_object_republishes_a_missing_shard_and_metadata() {
        let (drives, _dirs) = fresh_drives(4).await;
        let data = b"0123456789abcdef0123456789abcdef"; // 33 bytes, 3 blocks
        let file_info = write_object(&drives, "bucket", "obj", data).await;

        // Simulate drive 0 losing both its shard and its metadata.
        let shard_path = format!("obj/{}/{DATA_PART_NAME}", file_info.data_dir);
        let volume_root = drives[0].root().join("bucket");
        std::fs::remove_file(volume_root.join(&shard_path)).unwrap();
        std::fs::remove_file(volume_root.join("obj").join(ferrite_storage::local::META_FILE_NAME)).ok();

        let engine = HealEngine::new(drives.clone(), "".to_string(), PARITY_SHARDS);
        let result = engine.heal_object("bucket", "obj").await.unwrap();

        assert!(result.healed);
        assert_eq!(result.items.len(), 4);
        assert_eq!(result.items[0].after, HealShardState::Repaired);
        assert!(result.bytes_done > 0);

        let repaired = drives[0].read_all("", "bucket", &shard_path).await.unwrap();
        assert!(!repaired.is_empty());
    }

    #[tokio::test]
    async fn heal_object_is_a_no_op_when_every_drive_already_agrees() {
        let (drives, _dirs) = fresh_drives(4).await;
        let data = b"hello world healing";
        write_object(&drives, "bucket", "obj", data).await;

        let engine = HealEngine::new(drives, "".to_string(), PARITY_SHARDS);
        let result = engine.heal_object("bucket", "obj").await.unwrap();

        assert!(!result.healed);
        assert_eq!(result.bytes_done, 0);
        assert!(result.items.iter().all(|item| item.before == HealShardState::Healthy));
    }
}
