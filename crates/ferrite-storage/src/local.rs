//! Per-drive local backend: the drive-primitive operations this
//! core needs beneath any bucket/key-shaped API — volume CRUD, atomic
//! metadata read/write, two-phase delete, directory walk, and the
//! per-operation format-id check.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use ferrite_common::error::FerriteError;
use ferrite_common::filemeta::{FileInfo, VolInfo};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::format::FormatFile;

type Result<T> = std::result::Result<T, FerriteError>;

pub const META_FILE_NAME: &str = "xl.meta";
pub const FORMAT_FILE_NAME: &str = ".format.json";
pub const TMP_DIR_NAME: &str = ".tmp";
pub const TMP_OLD_DIR_NAME: &str = ".tmp-old";
pub const TRASH_DIR_NAME: &str = ".trash";

/// Reserved suffix so a directory-object (`"a/"`) sorts distinctly from a
/// plain object (`"a"`) during a walk.
pub const DIR_OBJECT_SUFFIX: &str = "__XLDIR__";

/// One per-drive local backend instance, rooted at a directory on the local
/// filesystem. Every public method takes the caller's expected format id
/// and verifies it first.
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub raw_metadata: Vec<u8>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub recursive: bool,
    pub prefix: Option<String>,
    pub forward_from: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DiskInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub root: PathBuf,
}

impl LocalDrive {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(TMP_DIR_NAME)).await?;
        fs::create_dir_all(root.join(TRASH_DIR_NAME)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ---- format identity -------------------------------------------------

    async fn verify_format_id(&self, caller_id: &str) -> Result<()> {
        if caller_id.is_empty() {
            // Empty id is allowed only during the format-bootstrap window.
            return Ok(());
        }
        let path = self.root.join(FORMAT_FILE_NAME);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let format: FormatFile = serde_json::from_slice(&bytes)
            .map_err(|e| FerriteError::CorruptedFormat(e.to_string()))?;
        if format.erasure.this.to_string() != caller_id {
            return Err(FerriteError::DriveStale {
                expected: caller_id.to_string(),
                found: format.erasure.this.to_string(),
            });
        }
        Ok(())
    }

    pub async fn write_format(&self, format: &FormatFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(format)
            .map_err(|e| FerriteError::Internal(e.to_string()))?;
        self.atomic_write(&self.root.join(FORMAT_FILE_NAME), &bytes)
            .await
    }

    // ---- volumes (buckets) -----------------------------------------------

    pub async fn make_volume(&self, format_id: &str, volume: &str) -> Result<()> {
        self.verify_format_id(format_id).await?;
        validate_volume_name(volume)?;
        let path = self.volume_path(volume);
        if fs::try_exists(&path).await? {
            return Err(FerriteError::InvalidArgument(format!(
                "volume already exists: {volume}"
            )));
        }
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    pub async fn list_volumes(&self, format_id: &str) -> Result<Vec<VolInfo>> {
        self.verify_format_id(format_id).await?;
        let mut entries = fs::read_dir(&self.root).await?;
        let mut volumes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_reserved_name(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            volumes.push(VolInfo {
                name,
                created: meta
                    .created()
                    .ok()
                    .and_then(|t| DateTime::<Utc>::try_from(t).ok())
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(volumes)
    }

    pub async fn stat_volume(&self, format_id: &str, volume: &str) -> Result<VolInfo> {
        self.verify_format_id(format_id).await?;
        let path = self.volume_path(volume);
        let meta = fs::metadata(&path)
            .await
            .map_err(|_| FerriteError::VolumeNotFound {
                volume: volume.to_string(),
            })?;
        if !meta.is_dir() {
            return Err(FerriteError::VolumeNotFound {
                volume: volume.to_string(),
            });
        }
        Ok(VolInfo {
            name: volume.to_string(),
            created: meta
                .created()
                .ok()
                .and_then(|t| DateTime::<Utc>::try_from(t).ok())
                .unwrap_or_else(Utc::now),
        })
    }

    pub async fn delete_volume(&self, format_id: &str, volume: &str, force: bool) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let path = self.volume_path(volume);
        if !force {
            let mut entries = fs::read_dir(&path).await?;
            if entries.next_entry().await?.is_some() {
                return Err(FerriteError::InvalidArgument(format!(
                    "volume not empty: {volume}"
                )));
            }
        }
        self.delete(format_id, &path, true, force).await
    }

    // ---- directory listing / walk ----------------------------------------

    pub async fn list_dir(
        &self,
        format_id: &str,
        volume: &str,
        dir: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        self.verify_format_id(format_id).await?;
        let path = self.volume_path(volume).join(dir);
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if is_reserved_name(&name) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
            if let Some(limit) = limit {
                if names.len() >= limit {
                    break;
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Produces a sorted list of metadata-entry records under `base`.
    /// Collected eagerly rather than streamed; the caller paginates with
    /// `WalkOptions::limit`.
    pub async fn walk_dir(
        &self,
        format_id: &str,
        volume: &str,
        base: &str,
        opts: &WalkOptions,
    ) -> Result<Vec<DirEntry>> {
        self.verify_format_id(format_id).await?;
        let root = self.volume_path(volume).join(base);
        let mut out = Vec::new();
        self.walk_dir_inner(&root, String::new(), opts, &mut out)
            .await?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(from) = &opts.forward_from {
            out.retain(|e| e.name.as_str() >= from.as_str());
        }
        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn walk_dir_inner<'a>(
        &'a self,
        dir: &'a Path,
        prefix: String,
        opts: &'a WalkOptions,
        out: &'a mut Vec<DirEntry>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name().to_string_lossy().to_string();
                if is_reserved_name(&file_name) {
                    continue;
                }
                let is_dir = entry.file_type().await?.is_dir();
                let relative = if prefix.is_empty() {
                    file_name.clone()
                } else {
                    format!("{prefix}/{file_name}")
                };
                if let Some(p) = &opts.prefix {
                    if !relative.starts_with(p.as_str()) && !p.starts_with(relative.as_str()) {
                        continue;
                    }
                }

                let meta_path = entry.path().join(META_FILE_NAME);
                if fs::try_exists(&meta_path).await.unwrap_or(false) {
                    let raw = fs::read(&meta_path).await.unwrap_or_default();
                    out.push(DirEntry {
                        name: relative.clone(),
                        raw_metadata: raw,
                        is_dir: false,
                    });
                } else if is_dir {
                    out.push(DirEntry {
                        name: format!("{relative}{DIR_OBJECT_SUFFIX}"),
                        raw_metadata: Vec::new(),
                        is_dir: true,
                    });
                }

                if is_dir && opts.recursive {
                    self.walk_dir_inner(&entry.path(), relative, opts, out)
                        .await?;
                }
            }
            Ok(())
        })
    }

    // ---- metadata read/write ----------------------------------------------

    pub async fn read_metadata(&self, format_id: &str, volume: &str, path: &str) -> Result<Vec<u8>> {
        self.verify_format_id(format_id).await?;
        let meta_path = self.volume_path(volume).join(path).join(META_FILE_NAME);
        fs::read(&meta_path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FerriteError::FileNotFound {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                }
            } else {
                FerriteError::from(err)
            }
        })
    }

    pub async fn write_metadata(&self, format_id: &str, volume: &str, path: &str, raw: &[u8]) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let object_dir = self.volume_path(volume).join(path);
        fs::create_dir_all(&object_dir).await?;
        self.atomic_write(&object_dir.join(META_FILE_NAME), raw).await
    }

    pub async fn update_metadata(&self, format_id: &str, volume: &str, path: &str, raw: &[u8]) -> Result<()> {
        self.write_metadata(format_id, volume, path, raw).await
    }

    pub async fn delete_version(
        &self,
        format_id: &str,
        volume: &str,
        path: &str,
        file_info: &FileInfo,
        force_marker: bool,
    ) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let object_dir = self.volume_path(volume).join(path);
        if !file_info.data_dir.is_empty() {
            let data_dir = object_dir.join(&file_info.data_dir);
            let _ = self.delete(format_id, &data_dir, true, true).await;
        }
        if force_marker || !file_info.is_delete_marker() {
            let meta_path = object_dir.join(META_FILE_NAME);
            match fs::remove_file(&meta_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub async fn delete_versions(
        &self,
        format_id: &str,
        volume: &str,
        batch: &[(String, FileInfo)],
        force_marker: bool,
    ) -> Result<Vec<Result<()>>> {
        let mut results = Vec::with_capacity(batch.len());
        for (path, fi) in batch {
            results.push(
                self.delete_version(format_id, volume, path, fi, force_marker)
                    .await,
            );
        }
        Ok(results)
    }

    /// Atomically moves both the temp `data_dir` and the final `xl.meta`
    /// into place. Returns a deterministic signature over the resulting
    /// version set, used by the quorum layer to detect divergence across
    /// drives.
    pub async fn rename_data(
        &self,
        format_id: &str,
        src_volume: &str,
        src_data_dir: &str,
        dst_volume: &str,
        dst_path: &str,
        meta_raw: &[u8],
    ) -> Result<String> {
        self.verify_format_id(format_id).await?;
        let src = self.volume_path(src_volume).join(src_data_dir);
        let dst_object_dir = self.volume_path(dst_volume).join(dst_path);
        fs::create_dir_all(&dst_object_dir).await?;

        let dst_data_dir = dst_object_dir.join(
            Path::new(src_data_dir)
                .file_name()
                .ok_or_else(|| FerriteError::InvalidArgument("empty data_dir".into()))?,
        );
        if fs::try_exists(&src).await? {
            if fs::try_exists(&dst_data_dir).await? {
                self.delete(format_id, &dst_data_dir, true, true).await?;
            }
            fs::rename(&src, &dst_data_dir).await?;
        }
        self.atomic_write(&dst_object_dir.join(META_FILE_NAME), meta_raw)
            .await?;

        Ok(signature_of(meta_raw))
    }

    pub async fn rename_file(
        &self,
        format_id: &str,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let src = self.volume_path(src_volume).join(src_path);
        let dst = self.volume_path(dst_volume).join(dst_path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&src, &dst).await?;
        Ok(())
    }

    // ---- shard file I/O ---------------------------------------------------

    pub async fn append_file(&self, format_id: &str, volume: &str, path: &str, data: &[u8]) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let full = self.volume_path(volume).join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn write_all(&self, format_id: &str, volume: &str, path: &str, data: &[u8]) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let full = self.volume_path(volume).join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.atomic_write(&full, data).await
    }

    /// Pre-allocates and writes a shard file of a known size from a byte
    /// buffer.
    pub async fn create_file(
        &self,
        format_id: &str,
        volume: &str,
        path: &str,
        size: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.len() as u64 != size {
            return Err(FerriteError::IncompleteBody {
                written: data.len() as u64,
                expected: size,
            });
        }
        self.write_all(format_id, volume, path, data).await
    }

    pub async fn read_all(&self, format_id: &str, volume: &str, path: &str) -> Result<Vec<u8>> {
        self.verify_format_id(format_id).await?;
        let full = self.volume_path(volume).join(path);
        fs::read(&full).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FerriteError::FileNotFound {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                }
            } else {
                FerriteError::from(err)
            }
        })
    }

    // ---- verification / bookkeeping ---------------------------------------

    pub async fn check_parts(&self, format_id: &str, volume: &str, path: &str, file_info: &FileInfo) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let data_dir = self.volume_path(volume).join(path).join(&file_info.data_dir);
        for part in &file_info.parts {
            let part_path = data_dir.join(format!("part.{}", part.number));
            if !fs::try_exists(&part_path).await? {
                return Err(FerriteError::FileNotFound {
                    bucket: volume.to_string(),
                    object: path.to_string(),
                });
            }
        }
        Ok(())
    }

    pub async fn verify_file(&self, format_id: &str, volume: &str, path: &str, file_info: &FileInfo) -> Result<()> {
        self.check_parts(format_id, volume, path, file_info).await
    }

    pub async fn stat_info_file(&self, format_id: &str, volume: &str, glob: &str) -> Result<Vec<String>> {
        self.verify_format_id(format_id).await?;
        let dir = self.volume_path(volume);
        let mut entries = fs::read_dir(&dir).await?;
        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if glob_match(glob, &name) {
                matches.push(name);
            }
        }
        Ok(matches)
    }

    pub async fn read_multiple(&self, format_id: &str, volume: &str, paths: &[String]) -> Result<Vec<Result<Vec<u8>>>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            out.push(self.read_metadata(format_id, volume, path).await);
        }
        Ok(out)
    }

    /// Removes leftover `data_dir`s that no longer have a corresponding
    /// `xl.meta` reference, reclaimed during the next heal/walk.
    pub async fn clean_abandoned_data(
        &self,
        format_id: &str,
        volume: &str,
        path: &str,
        keep_data_dir: &str,
    ) -> Result<()> {
        self.verify_format_id(format_id).await?;
        let object_dir = self.volume_path(volume).join(path);
        let mut entries = match fs::read_dir(&object_dir).await {
            Ok(e) => e,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let mut stale = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name != keep_data_dir {
                stale.push(entry.path());
            }
        }
        for path in stale {
            self.delete(format_id, &path, true, true).await?;
        }
        Ok(())
    }

    /// Two-phase delete: move into `.trash/<uuid>/`, then purge in
    /// the background so user-visible latency is O(1).
    pub async fn delete(&self, format_id: &str, path: &Path, recursive: bool, force: bool) -> Result<()> {
        self.verify_format_id(format_id).await?;
        if !fs::try_exists(path).await? {
            if force {
                return Ok(());
            }
            return Err(FerriteError::FileNotFound {
                bucket: String::new(),
                object: path.display().to_string(),
            });
        }

        if !recursive {
            let meta = fs::metadata(path).await?;
            if meta.is_dir() {
                fs::remove_dir(path).await?;
            } else {
                fs::remove_file(path).await?;
            }
            return Ok(());
        }

        let trash_path = self.root.join(TRASH_DIR_NAME).join(Uuid::new_v4().to_string());
        if let Some(parent) = trash_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(path, &trash_path).await?;

        tokio::spawn(async move {
            if let Err(err) = fs::remove_dir_all(&trash_path).await {
                tracing::warn!(?err, path = %trash_path.display(), "failed to purge trash entry");
            }
        });
        Ok(())
    }

    pub async fn disk_info(&self) -> Result<DiskInfo> {
        // Placeholder figures: statvfs-style free/total space requires a
        // platform-specific syscall; callers that need real numbers should
        // shell out to a platform crate at the composition root.
        Ok(DiskInfo {
            total_bytes: 0,
            free_bytes: 0,
            used_bytes: 0,
            root: self.root.clone(),
        })
    }

    // ---- path helpers -------------------------------------------------------

    fn volume_path(&self, volume: &str) -> PathBuf {
        self.root.join(volume)
    }

    async fn atomic_write(&self, dest: &Path, data: &[u8]) -> Result<()> {
        let tmp_dir = self.root.join(TMP_DIR_NAME);
        fs::create_dir_all(&tmp_dir).await?;
        let tmp_path = tmp_dir.join(Uuid::new_v4().to_string());

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&tmp_path, dest).await?;
        Ok(())
    }
}

fn signature_of(meta_raw: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(meta_raw);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_reserved_name(name: &str) -> bool {
    matches!(
        name,
        TMP_DIR_NAME | TMP_OLD_DIR_NAME | TRASH_DIR_NAME | FORMAT_FILE_NAME
    )
}

/// Extremely small glob matcher supporting only a single trailing `*`,
/// enough for `stat_info_file`'s use; anything more elaborate belongs in a
/// real glob crate at a higher layer.
fn glob_match(pattern: &str, name: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name
}

fn validate_volume_name(volume: &str) -> Result<()> {
    if volume.is_empty() || volume.contains('/') || volume.contains('\\') {
        return Err(FerriteError::InvalidArgument(format!(
            "invalid volume name: {volume}"
        )));
    }
    Ok(())
}

pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(FerriteError::InvalidArgument(format!(
            "invalid object key: {key}"
        )));
    }
    let key_path = Path::new(key);
    if key_path.is_absolute() {
        return Err(FerriteError::InvalidArgument(format!(
            "invalid object key: {key}"
        )));
    }
    for component in key_path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(FerriteError::InvalidArgument(format!(
                    "invalid object key: {key}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("ferrite-storage-test-{}", Uuid::new_v4()));
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

    async fn fresh_drive() -> (LocalDrive, TempDir) {
        let dir = TempDir::new();
        let drive = LocalDrive::new(dir.path()).await.unwrap();
        (drive, dir)
    }

    #[tokio::test]
    async fn make_volume_then_write_and_read_metadata_round_trips() {
        let (drive, _dir) = fresh_drive().await;
        drive.make_volume("", "bucket").await.unwrap();

        let fi = FileInfo {
            volume: "bucket".into(),
            name: "obj".into(),
            version_id: "v1".into(),
            is_latest: true,
            deleted: false,
            mark_deleted: false,
            data_dir: String::new(),
            size: 3,
            mod_time: Utc::now(),
            disk_mtime: None,
            metadata: HashMap::new(),
            parts: vec![],
            erasure: None,
            inline_data: true,
            data: Some(bytes::Bytes::from_static(b"abc")),
            transition: Default::default(),
            replication_status: Default::default(),
        };
        let raw = serde_json::to_vec(&fi).unwrap();
        drive.write_metadata("", "bucket", "obj", &raw).await.unwrap();

        let read_back = drive.read_metadata("", "bucket", "obj").await.unwrap();
        assert_eq!(read_back, raw);
    }

    #[tokio::test]
    async fn delete_moves_into_trash_and_purges_in_background() {
        let (drive, _dir) = fresh_drive().await;
        drive.make_volume("", "bucket").await.unwrap();
        drive.write_metadata("", "bucket", "obj", b"{}").await.unwrap();

        let obj_dir = drive.root().join("bucket").join("obj");
        drive.delete("", &obj_dir, true, true).await.unwrap();
        assert!(!fs::try_exists(&obj_dir).await.unwrap());
    }

    #[test]
    fn rejects_object_keys_that_escape_the_volume() {
        assert!(validate_object_key("../etc/passwd").is_err());
        assert!(validate_object_key("a/b/c").is_ok());
    }
}
