use thiserror::Error;

/// Flat error taxonomy for the erasure-coded object core.
///
/// Variants are grouped the way the design doc groups them (availability,
/// presence, integrity, policy/semantics, storage health) but kept in one
/// enum so a `thiserror`-derived `Display` and a single `Result` alias cover
/// every layer above the transport crate. Context fields are `Option<String>`
/// so `to_object_err`-style context attachment is a struct literal, not a
/// second wrapper type.
#[derive(Debug, Error, Clone)]
pub enum FerriteError {
    // --- Availability ---
    #[error("drive not found: {path}")]
    DriveNotFound { path: String },
    #[error("drive stale: expected format id {expected}, found {found}")]
    DriveStale { expected: String, found: String },
    #[error("drive unavailable: {path}: {reason}")]
    DriveUnavailable { path: String, reason: String },
    #[error("read quorum not met for {bucket}/{object}: {have}/{need}")]
    ReadQuorum {
        bucket: String,
        object: String,
        have: usize,
        need: usize,
    },
    #[error("write quorum not met for {bucket}/{object}: {have}/{need}")]
    WriteQuorum {
        bucket: String,
        object: String,
        have: usize,
        need: usize,
    },

    // --- Presence ---
    #[error("file not found: {bucket}/{object}")]
    FileNotFound { bucket: String, object: String },
    #[error("version not found: {bucket}/{object} version={version_id}")]
    VersionNotFound {
        bucket: String,
        object: String,
        version_id: String,
    },
    #[error("volume not found: {volume}")]
    VolumeNotFound { volume: String },

    // --- Integrity ---
    #[error("file corrupted: {bucket}/{object}")]
    FileCorrupted { bucket: String, object: String },
    #[error("corrupted format: {0}")]
    CorruptedFormat(String),
    #[error("unexpected eof reading {0}")]
    UnexpectedEof(String),

    // --- Policy / semantics ---
    #[error("method not allowed on delete marker: {bucket}/{object}")]
    MethodNotAllowed { bucket: String, object: String },
    #[error("invalid range: offset={offset} length={length} size={size}")]
    InvalidRange {
        offset: i64,
        length: i64,
        size: i64,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("incomplete body: wrote {written} of {expected} bytes")]
    IncompleteBody { written: u64, expected: u64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // --- Storage health ---
    #[error("faulty drive: {path}: {reason}")]
    FaultyDrive { path: String, reason: String },
    #[error("drive full: {path}")]
    DriveFull { path: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("name too long: {0}")]
    NameTooLong(String),
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    // --- Catch-all for std::io and internal invariant violations ---
    #[error("io error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for FerriteError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FerriteError::Io(err.to_string()),
            ErrorKind::PermissionDenied => FerriteError::AccessDenied(err.to_string()),
            _ => FerriteError::Io(err.to_string()),
        }
    }
}

impl FerriteError {
    /// Classes that are safe to ignore when reducing per-drive errors to a
    /// single outcome: a drive returning one of these should not itself
    /// veto an otherwise-satisfied quorum.
    pub fn is_benign_for_quorum(&self) -> bool {
        matches!(
            self,
            FerriteError::DriveNotFound { .. }
                | FerriteError::NameTooLong(_)
                | FerriteError::VolumeNotFound { .. }
        )
    }

    /// Whether this error should be additionally ignored when reducing
    /// errors for objects inside the internal meta-bucket: EOF and
    /// unexpected-EOF on that bucket are expected background noise.
    pub fn is_benign_for_meta_bucket(&self) -> bool {
        self.is_benign_for_quorum() || matches!(self, FerriteError::UnexpectedEof(_))
    }

    /// Fatal drive classes that should terminate the process at startup,
    /// but merely mark a drive offline at runtime.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            FerriteError::UnsupportedBackend(_) | FerriteError::FaultyDrive { .. }
        )
    }

    pub fn not_found_kind(&self) -> bool {
        matches!(
            self,
            FerriteError::FileNotFound { .. }
                | FerriteError::VersionNotFound { .. }
                | FerriteError::VolumeNotFound { .. }
                | FerriteError::DriveNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FerriteError>;
