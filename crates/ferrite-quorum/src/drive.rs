//! The seam between the quorum engine and a single drive.
//! `DriveEndpoint` is deliberately narrow: just the handful of calls the
//! fan-out algorithms need, so a remote drive (reached over
//! `ferrite-transport`) can implement it exactly like a local one,
//! generalized from a fixed shard count to a named `DriveEndpoint`
//! collection.

use std::sync::Arc;

use async_trait::async_trait;
use ferrite_common::error::Result;
use ferrite_common::filemeta::FileInfo;
use ferrite_storage::LocalDrive;

#[async_trait]
pub trait DriveEndpoint: Send + Sync {
    /// Empty for a drive with no known network identity (used by the
    /// local-prefer check on Get).
    fn hostname(&self) -> &str;

    async fn read_raw_metadata(&self, volume: &str, path: &str) -> Result<Vec<u8>>;

    /// Writes `xl.meta` directly with no accompanying data-directory move
    /// (delete markers, metadata-only copy/tag operations).
    async fn write_raw_metadata(&self, volume: &str, path: &str, meta_raw: &[u8]) -> Result<()>;

    /// Atomically publishes a version: moves the already-encoded temp
    /// `data_dir` into place and writes the new `xl.meta`. Returns a
    /// signature the engine uses to detect cross-drive divergence.
    async fn rename_data(
        &self,
        src_volume: &str,
        src_data_dir: &str,
        dst_volume: &str,
        dst_path: &str,
        meta_raw: &[u8],
    ) -> Result<String>;

    async fn delete_version(
        &self,
        volume: &str,
        path: &str,
        file_info: &FileInfo,
        force_marker: bool,
    ) -> Result<()>;

    async fn delete_versions(
        &self,
        volume: &str,
        batch: &[(String, FileInfo)],
        force_marker: bool,
    ) -> Result<Vec<Result<()>>>;
}

/// `DriveEndpoint` over an in-process `LocalDrive`. The
/// `format_id` this endpoint presents on every call is the caller's own
/// view of the deployment's drive identity; a mismatch surfaces as
/// `DriveStale` exactly as it would for a same-host process restart.
pub struct LocalDriveEndpoint {
    drive: Arc<LocalDrive>,
    format_id: String,
    hostname: String,
}

impl LocalDriveEndpoint {
    pub fn new(drive: Arc<LocalDrive>, format_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            drive,
            format_id: format_id.into(),
            hostname: hostname.into(),
        }
    }
}

#[async_trait]
impl DriveEndpoint for LocalDriveEndpoint {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn read_raw_metadata(&self, volume: &str, path: &str) -> Result<Vec<u8>> {
        self.drive.read_metadata(&self.format_id, volume, path).await
    }

    async fn write_raw_metadata(&self, volume: &str, path: &str, meta_raw: &[u8]) -> Result<()> {
        self.drive.write_metadata(&self.format_id, volume, path, meta_raw).await
    }

    async fn rename_data(
        &self,
        src_volume: &str,
        src_data_dir: &str,
        dst_volume: &str,
        dst_path: &str,
        meta_raw: &[u8],
    ) -> Result<String> {
        self.drive
            .rename_data(&self.format_id, src_volume, src_data_dir, dst_volume, dst_path, meta_raw)
            .await
    }

    async fn delete_version(
        &self,
        volume: &str,
        path: &str,
        file_info: &FileInfo,
        force_marker: bool,
    ) -> Result<()> {
        self.drive
            .delete_version(&self.format_id, volume, path, file_info, force_marker)
            .await
    }

    async fn delete_versions(
        &self,
        volume: &str,
        batch: &[(String, FileInfo)],
        force_marker: bool,
    ) -> Result<Vec<Result<()>>> {
        self.drive
            .delete_versions(&self.format_id, volume, batch, force_marker)
            .await
    }
}
