//! Dangling-object detection, kept as a pure function free of I/O and of
//! `DriveEndpoint` so it is trivially unit-testable: feed it per-drive
//! presence, get back whether the object should be treated as an
//! orphaned data directory.

use ferrite_common::filemeta::FileInfo;

/// One drive's contribution to the dangling check: either it held a
/// record (possibly stale) or it reported the object/version missing.
#[derive(Debug, Clone)]
pub struct DrivePresence {
    pub file_info: Option<FileInfo>,
    /// `true` when this drive's error was `FileNotFound` or
    /// `VersionNotFound` specifically (not some other failure class).
    pub not_found: bool,
}

/// Returns `(selected, dangling)`. `selected` is `Some` only when a
/// record reaches `read_quorum` agreement on modtime; `dangling` is `true`
/// when a majority of drives affirmatively reported the object missing,
/// which means any data directory left behind on the minority is an
/// orphan that should be purged rather than healed.
pub fn is_dangling(presence: &[DrivePresence], read_quorum: usize) -> (Option<FileInfo>, bool) {
    let total = presence.len();
    if total == 0 {
        return (None, false);
    }

    let not_found = presence.iter().filter(|p| p.not_found).count();
    let dangling = not_found * 2 > total;

    let mut best: Option<(&FileInfo, usize)> = None;
    for candidate in presence.iter().filter_map(|p| p.file_info.as_ref()) {
        let agreeing = presence
            .iter()
            .filter_map(|p| p.file_info.as_ref())
            .filter(|other| other.mod_time == candidate.mod_time)
            .count();
        if best.map(|(_, count)| agreeing > count).unwrap_or(true) {
            best = Some((candidate, agreeing));
        }
    }

    let selected = match best {
        Some((file_info, agreeing)) if agreeing >= read_quorum => Some(file_info.clone()),
        _ => None,
    };

    (selected, dangling && selected.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn file_info(mod_time: chrono::DateTime<Utc>) -> FileInfo {
        FileInfo {
            volume: "bucket".into(),
            name: "x".into(),
            version_id: "v1".into(),
            is_latest: true,
            deleted: false,
            mark_deleted: false,
            data_dir: "dir".into(),
            size: 0,
            mod_time,
            disk_mtime: None,
            metadata: HashMap::new(),
            parts: vec![],
            erasure: None,
            inline_data: false,
            data: None,
            transition: Default::default(),
            replication_status: Default::default(),
        }
    }

    #[test]
    fn majority_not_found_with_no_quorum_record_is_dangling() {
        let t0 = Utc::now();
        let presence = vec![
            DrivePresence { file_info: Some(file_info(t0)), not_found: false },
            DrivePresence { file_info: Some(file_info(t0)), not_found: false },
            DrivePresence { file_info: None, not_found: true },
            DrivePresence { file_info: None, not_found: true },
        ];
        let (selected, dangling) = is_dangling(&presence, 4);
        assert!(selected.is_none());
        assert!(dangling);
    }

    #[test]
    fn quorum_agreement_wins_and_is_not_dangling() {
        let t0 = Utc::now();
        let presence = vec![
            DrivePresence { file_info: Some(file_info(t0)), not_found: false },
            DrivePresence { file_info: Some(file_info(t0)), not_found: false },
            DrivePresence { file_info: Some(file_info(t0)), not_found: false },
            DrivePresence { file_info: None, not_found: true },
        ];
        let (selected, dangling) = is_dangling(&presence, 3);
        assert!(selected.is_some());
        assert!(!dangling);
    }
}
