//! The quorum + dispersal engine: reduces per-drive reads/writes to a
//! single outcome, computes placement, and detects dangling objects.

pub mod dangling;
pub mod delete;
pub mod drive;
pub mod read;
pub mod write;

pub use dangling::{is_dangling, DrivePresence};
pub use delete::{add_delete_marker, bulk_delete_versions, delete_version, new_free_version_id, BulkDeleteRequest};
pub use drive::{DriveEndpoint, LocalDriveEndpoint};
pub use read::{read_version, ReadVersionResult};
pub use write::{new_data_dir, new_version_id, plan_placement, write_version, WriteVersionResult};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrite_common::error::{FerriteError, Result};
    use ferrite_common::filemeta::{ErasureInfo, FileInfo};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory `DriveEndpoint` standing in for a real drive: good enough
    /// to exercise the fan-out/quorum arithmetic without touching a
    /// filesystem.
    struct MockDrive {
        offline: bool,
        meta: Mutex<HashMap<String, Vec<u8>>>,
        rename_calls: AtomicUsize,
    }

    impl MockDrive {
        fn new(offline: bool) -> Self {
            Self {
                offline,
                meta: Mutex::new(HashMap::new()),
                rename_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DriveEndpoint for MockDrive {
        fn hostname(&self) -> &str {
            ""
        }

        async fn read_raw_metadata(&self, volume: &str, path: &str) -> Result<Vec<u8>> {
            if self.offline {
                return Err(FerriteError::DriveUnavailable {
                    path: "mock".into(),
                    reason: "offline".into(),
                });
            }
            let key = format!("{volume}/{path}");
            self.meta
                .lock()
                .await
                .get(&key)
                .cloned()
                .ok_or_else(|| FerriteError::FileNotFound {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                })
        }

        async fn write_raw_metadata(&self, volume: &str, path: &str, meta_raw: &[u8]) -> Result<()> {
            if self.offline {
                return Err(FerriteError::DriveUnavailable {
                    path: "mock".into(),
                    reason: "offline".into(),
                });
            }
            let key = format!("{volume}/{path}");
            self.meta.lock().await.insert(key, meta_raw.to_vec());
            Ok(())
        }

        async fn rename_data(
            &self,
            _src_volume: &str,
            _src_data_dir: &str,
            dst_volume: &str,
            dst_path: &str,
            meta_raw: &[u8],
        ) -> Result<String> {
            if self.offline {
                return Err(FerriteError::DriveUnavailable {
                    path: "mock".into(),
                    reason: "offline".into(),
                });
            }
            self.rename_calls.fetch_add(1, Ordering::SeqCst);
            self.write_raw_metadata(dst_volume, dst_path, meta_raw).await?;
            Ok(format!("sig-{}", meta_raw.len()))
        }

        async fn delete_version(
            &self,
            volume: &str,
            path: &str,
            _file_info: &FileInfo,
            _force_marker: bool,
        ) -> Result<()> {
            let key = format!("{volume}/{path}");
            if self.meta.lock().await.remove(&key).is_some() {
                Ok(())
            } else {
                Err(FerriteError::FileNotFound {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                })
            }
        }

        async fn delete_versions(
            &self,
            volume: &str,
            batch: &[(String, FileInfo)],
            force_marker: bool,
        ) -> Result<Vec<Result<()>>> {
            let mut results = Vec::with_capacity(batch.len());
            for (path, fi) in batch {
                results.push(self.delete_version(volume, path, fi, force_marker).await);
            }
            Ok(results)
        }
    }

    fn sample_file_info(data_blocks: usize, parity_blocks: usize, set_size: usize) -> FileInfo {
        FileInfo {
            volume: "bucket".into(),
            name: "object".into(),
            version_id: new_version_id(),
            is_latest: true,
            deleted: false,
            mark_deleted: false,
            data_dir: new_data_dir(),
            size: 128,
            mod_time: ferrite_common::time::now(),
            disk_mtime: None,
            metadata: HashMap::new(),
            parts: vec![],
            erasure: Some(ErasureInfo {
                algorithm: "reed-solomon".into(),
                data_blocks,
                parity_blocks,
                block_size: 1024 * 1024,
                index_in_set: 1,
                distribution: (1..=set_size).collect(),
                checksums: vec![],
            }),
            inline_data: false,
            data: None,
            transition: Default::default(),
            replication_status: Default::default(),
        }
    }

    #[tokio::test]
    async fn write_version_succeeds_with_one_drive_offline() {
        let drives: Vec<Arc<dyn DriveEndpoint>> = vec![
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(true)),
        ];
        let base = sample_file_info(2, 2, 4);
        let offline = vec![false, false, false, true];

        let result = write_version(&drives, &offline, &base, 2).await.unwrap();
        assert_eq!(result.successes, 3);
        assert!(result.needs_mrf);
        assert!(!result.versions_disparity);
    }

    #[tokio::test]
    async fn write_version_fails_when_quorum_unreachable() {
        let drives: Vec<Arc<dyn DriveEndpoint>> = vec![
            Arc::new(MockDrive::new(true)),
            Arc::new(MockDrive::new(true)),
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
        ];
        let base = sample_file_info(2, 2, 4);
        let offline = vec![true, true, false, false];

        let err = write_version(&drives, &offline, &base, 2).await.unwrap_err();
        assert!(matches!(err, FerriteError::WriteQuorum { .. }));
    }

    #[tokio::test]
    async fn delete_version_treats_not_found_as_success() {
        let drives: Vec<Arc<dyn DriveEndpoint>> = vec![
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
        ];
        let fi = sample_file_info(2, 1, 3);
        // None of the mocks ever had this key written, so every delete
        // call observes `FileNotFound`, which must still count toward
        // the N/2+1 quorum.
        let result = delete_version(&drives, "bucket", "object", &fi, true).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn read_version_after_write_round_trips_the_canonical_record() {
        let drives: Vec<Arc<dyn DriveEndpoint>> = vec![
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
            Arc::new(MockDrive::new(false)),
        ];
        let base = sample_file_info(2, 1, 3);
        let offline = vec![false, false, false];
        write_version(&drives, &offline, &base, 1).await.unwrap();

        let result = read_version(&drives, "bucket", "object", None, 1, false)
            .await
            .unwrap();
        assert_eq!(result.file_info.version_id, base.version_id);
        assert_eq!(result.online.len(), 3);
    }
}
