//! The option surface consumed from the bucket-metadata/S3 layer.
//! Every field here is a plain value or callback the caller hands down;
//! this crate never stores bucket-level policy (versioning mode, lifecycle,
//! lock config) itself — it only reacts to what a given call passes in.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferrite_common::types::{ReplicationStatus, TransitionStatus};
use ferrite_common::ObjectInfo;

/// `Transition.{Status,Tier,ETag,ExpireRestored,RestoreRequest}`.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub status: Option<TransitionStatus>,
    pub tier: Option<String>,
    pub etag: Option<String>,
    pub expire_restored: bool,
    pub restore_request: bool,
}

/// `Expiration.Expire`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationOptions {
    pub expire: bool,
}

/// A caller-supplied predicate evaluated against a preliminary `GetInfo`
/// before `Put` proceeds. `false` aborts the write with
/// `PreconditionFailed`.
pub type CheckPrecondFn = Arc<dyn Fn(&ObjectInfo) -> bool + Send + Sync>;

/// A caller-supplied metadata mutator run against a freshly-read
/// `ObjectInfo` before a metadata-only write (Copy/PutMetadata/PutTags/
/// DeleteTags) is published.
pub type EvalMetadataFn = Arc<dyn Fn(&mut ObjectInfo) -> ferrite_common::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ObjectOptions {
    pub versioned: bool,
    pub version_suspended: bool,
    pub version_id: Option<String>,
    pub no_lock: bool,
    pub mtime: Option<DateTime<Utc>>,
    pub max_parity: bool,
    pub expiration: ExpirationOptions,
    pub transition: TransitionOptions,
    pub delete_marker: bool,
    pub replication_state: ReplicationStatus,
    pub preserve_etag: Option<String>,
    pub user_defined: HashMap<String, String>,
    pub check_precond: Option<CheckPrecondFn>,
    pub eval_metadata: Option<EvalMetadataFn>,
}

impl std::fmt::Debug for ObjectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectOptions")
            .field("versioned", &self.versioned)
            .field("version_suspended", &self.version_suspended)
            .field("version_id", &self.version_id)
            .field("no_lock", &self.no_lock)
            .field("mtime", &self.mtime)
            .field("max_parity", &self.max_parity)
            .field("delete_marker", &self.delete_marker)
            .field("preserve_etag", &self.preserve_etag)
            .field("user_defined", &self.user_defined)
            .field("check_precond", &self.check_precond.is_some())
            .field("eval_metadata", &self.eval_metadata.is_some())
            .finish()
    }
}
