//! Per-(bucket,object) namespace lock: a thin read/write API over
//! `DRWMutex`'s quorum acquire/release, adding the bounded-wait and
//! arrival-order fairness the object pipeline needs, plus a `no_lock`
//! bypass for callers that have already established exclusivity another
//! way (e.g. a single-drive deployment).

use std::sync::Arc;
use std::time::Duration;

use ferrite_common::error::{FerriteError, Result};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::client::DsyncClient;
use crate::drwmutex::DRWMutex;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Distributed reader/writer lock over one or more resource names
/// (`["bucket/object"]`, or `["bucket/object", "bucket/object/version"]`
/// for a version-scoped lock). Local attempts are serialized through
/// `arrival`, a plain FIFO-ish mutex, so concurrent callers for the same
/// object are granted the underlying dsync lock in the order they asked
/// for it rather than racing each other's retries.
pub struct NamespaceLock {
    mutex: DRWMutex,
    arrival: AsyncMutex<()>,
}

impl NamespaceLock {
    pub fn new(
        client: Arc<DsyncClient>,
        resources: Vec<String>,
        owner: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            mutex: DRWMutex::new(client, resources, owner, source),
            arrival: AsyncMutex::new(()),
        }
    }

    pub async fn write_lock(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        self.acquire(timeout, false).await
    }

    pub async fn read_lock(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        self.acquire(timeout, true).await
    }

    async fn acquire(&self, max_wait: Duration, read: bool) -> Result<LockGuard<'_>> {
        let _arrival_ticket = self.arrival.lock().await;

        let attempt = async {
            loop {
                let acquired = if read {
                    self.mutex.rlock().await?
                } else {
                    self.mutex.lock().await?
                };
                if acquired {
                    return Ok(());
                }
                sleep(RETRY_INTERVAL).await;
            }
        };

        match tokio::time::timeout(max_wait, attempt).await {
            Ok(Ok(())) => Ok(LockGuard {
                state: GuardState::Active { lock: self, read },
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(FerriteError::Internal(format!(
                "timed out acquiring {} lock after {:?}",
                if read { "read" } else { "write" },
                max_wait
            ))),
        }
    }
}

enum GuardState<'a> {
    Active { lock: &'a NamespaceLock, read: bool },
    Bypassed,
    Released,
}

/// RAII handle for a held lock. Dropping it without calling `release`
/// leaks the remote lock until its refresh task loses quorum and the
/// owning drive's TTL expires, so callers should call `release` explicitly
/// on every path, success or error.
pub struct LockGuard<'a> {
    state: GuardState<'a>,
}

impl<'a> LockGuard<'a> {
    pub fn bypassed() -> Self {
        Self {
            state: GuardState::Bypassed,
        }
    }

    pub async fn release(mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, GuardState::Released) {
            GuardState::Active { lock, read } => {
                if read {
                    lock.mutex.runlock().await
                } else {
                    lock.mutex.unlock().await
                }
            }
            GuardState::Bypassed | GuardState::Released => Ok(()),
        }
    }
}

/// Selects between a real distributed namespace lock and a `no_lock`
/// bypass for single-drive deployments that never contend.
pub enum ObjectLock {
    Distributed(NamespaceLock),
    NoLock,
}

impl ObjectLock {
    pub async fn write_lock(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        match self {
            Self::Distributed(ns) => ns.write_lock(timeout).await,
            Self::NoLock => Ok(LockGuard::bypassed()),
        }
    }

    pub async fn read_lock(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        match self {
            Self::Distributed(ns) => ns.read_lock(timeout).await,
            Self::NoLock => Ok(LockGuard::bypassed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_args::LockArgs;
    use crate::locker::{LockResult, NetLocker};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysGrant(Arc<AtomicUsize>);

    #[async_trait]
    impl NetLocker for AlwaysGrant {
        async fn lock(&self, _args: &LockArgs) -> Result<LockResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(LockResult::Success)
        }
        async fn rlock(&self, _args: &LockArgs) -> Result<LockResult> {
            Ok(LockResult::Success)
        }
        async fn unlock(&self, _args: &LockArgs) -> Result<LockResult> {
            Ok(LockResult::Success)
        }
        async fn runlock(&self, _args: &LockArgs) -> Result<LockResult> {
            Ok(LockResult::Success)
        }
        async fn refresh(&self, _args: &LockArgs) -> Result<LockResult> {
            Ok(LockResult::Success)
        }
        async fn force_unlock(&self, _args: &LockArgs) -> Result<LockResult> {
            Ok(LockResult::Success)
        }
    }

    #[tokio::test]
    async fn write_lock_then_release_round_trips() {
        let calls = Arc::new(AtomicUsize::new(0));
        let lockers: Vec<Arc<dyn NetLocker>> = vec![Arc::new(AlwaysGrant(calls.clone()))];
        let client = Arc::new(DsyncClient::new(lockers));
        let ns = NamespaceLock::new(client, vec!["bucket/object".into()], "owner-1", "test");

        let guard = ns.write_lock(Duration::from_secs(1)).await.unwrap();
        guard.release().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_lock_bypass_never_contacts_a_locker() {
        let bypass = ObjectLock::NoLock;
        let guard = bypass.write_lock(Duration::from_millis(10)).await.unwrap();
        guard.release().await.unwrap();
    }
}
