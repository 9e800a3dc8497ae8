pub mod client;
pub mod drwmutex;
pub mod lock_args;
pub mod locker;
pub mod namespace;

pub use client::{AcquireOutcome, DsyncClient, RefreshOutcome};
pub use drwmutex::DRWMutex;
pub use lock_args::LockArgs;
pub use locker::{LockResult, NetLocker};
pub use namespace::{LockGuard, NamespaceLock, ObjectLock};
