pub mod format;
pub mod local;

pub use format::FormatFile;
pub use local::{DirEntry, DiskInfo, LocalDrive, WalkOptions};
