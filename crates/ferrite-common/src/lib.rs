pub mod error;
pub mod filemeta;
pub mod quorum;
pub mod time;
pub mod types;

pub use error::{FerriteError, Result};
pub use filemeta::{
    BitrotAlgorithm, BitrotChecksum, ErasureInfo, FileInfo, ObjectPartInfo, TransitionState,
    VolInfo,
};
pub use types::{BucketInfo, ObjectInfo, ReplicationStatus, TransitionStatus, VersioningState};
