//! The object pipeline: the top-level engine gluing namespace
//! locking, quorum read/write/delete, the erasure codec, and bitrot
//! hashing into Get/Put/Copy/Delete/DeleteMany/PutMetadata/PutTags/
//! DeleteTags/Transition/Restore plus bucket lifecycle.

pub mod layer;
pub mod locker;
pub mod options;

pub use layer::{ObjectErasureLayer, DEFAULT_INLINE_THRESHOLD};
pub use locker::LocalLocker;
pub use options::{CheckPrecondFn, EvalMetadataFn, ExpirationOptions, ObjectOptions, TransitionOptions};
