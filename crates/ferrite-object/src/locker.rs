//! In-process `NetLocker`. No concrete locker ships in
//! `ferrite-lock` itself — it only defines the trait the dsync client fans
//! out to — so a single-process deployment of this core needs its own.
//! Grounded on `ferrite-lock`'s own test double (`AlwaysGrant` in
//! `namespace.rs`'s test module), generalized into a real resource table
//! instead of a lock that always succeeds.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ferrite_common::error::Result;
use ferrite_lock::{LockArgs, LockResult, NetLocker};

#[derive(Debug, Clone)]
struct Held {
    owner: String,
    readers: usize,
    writer: bool,
}

/// A plain `HashMap<resource, Held>` guarded by a std mutex. Resources are
/// never shared across processes, so there is no refresh/expiry concern
/// beyond what `DRWMutex`'s own refresh task already drives.
#[derive(Debug, Default)]
pub struct LocalLocker {
    table: Mutex<HashMap<String, Held>>,
}

impl LocalLocker {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Held>> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl NetLocker for LocalLocker {
    async fn lock(&self, args: &LockArgs) -> Result<LockResult> {
        let mut table = self.lock_table();
        if args.resources.iter().any(|r| table.contains_key(r)) {
            return Ok(LockResult::NotAcquired);
        }
        for resource in &args.resources {
            table.insert(
                resource.clone(),
                Held {
                    owner: args.owner.clone(),
                    readers: 0,
                    writer: true,
                },
            );
        }
        Ok(LockResult::Success)
    }

    async fn rlock(&self, args: &LockArgs) -> Result<LockResult> {
        let mut table = self.lock_table();
        if args
            .resources
            .iter()
            .any(|r| table.get(r).is_some_and(|h| h.writer))
        {
            return Ok(LockResult::NotAcquired);
        }
        for resource in &args.resources {
            table
                .entry(resource.clone())
                .or_insert_with(|| Held {
                    owner: args.owner.clone(),
                    readers: 0,
                    writer: false,
                })
                .readers += 1;
        }
        Ok(LockResult::Success)
    }

    async fn unlock(&self, args: &LockArgs) -> Result<LockResult> {
        let mut table = self.lock_table();
        let mut found = false;
        for resource in &args.resources {
            if table.get(resource).is_some_and(|h| h.writer) {
                table.remove(resource);
                found = true;
            }
        }
        Ok(if found {
            LockResult::Success
        } else {
            LockResult::LockNotFound
        })
    }

    async fn runlock(&self, args: &LockArgs) -> Result<LockResult> {
        let mut table = self.lock_table();
        let mut found = false;
        for resource in &args.resources {
            if let Some(held) = table.get_mut(resource) {
                if !held.writer && held.readers > 0 {
                    held.readers -= 1;
                    found = true;
                    if held.readers == 0 {
                        table.remove(resource);
                    }
                }
            }
        }
        Ok(if found {
            LockResult::Success
        } else {
            LockResult::LockNotFound
        })
    }

    async fn refresh(&self, args: &LockArgs) -> Result<LockResult> {
        let table = self.lock_table();
        let held = args
            .resources
            .iter()
            .all(|r| table.get(r).is_some_and(|h| h.owner == args.owner));
        Ok(if held {
            LockResult::Success
        } else {
            LockResult::LockNotFound
        })
    }

    async fn force_unlock(&self, args: &LockArgs) -> Result<LockResult> {
        let mut table = self.lock_table();
        for resource in &args.resources {
            table.remove(resource);
        }
        Ok(LockResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_lock_excludes_a_second_writer() {
        let locker = LocalLocker::new();
        let args = LockArgs::new("u1".into(), vec!["bucket/obj".into()], "owner-a".into(), "test".into(), 1);
        assert_eq!(locker.lock(&args).await.unwrap(), LockResult::Success);

        let other = LockArgs::new("u2".into(), vec!["bucket/obj".into()], "owner-b".into(), "test".into(), 1);
        assert_eq!(locker.lock(&other).await.unwrap(), LockResult::NotAcquired);

        assert_eq!(locker.unlock(&args).await.unwrap(), LockResult::Success);
        assert_eq!(locker.lock(&other).await.unwrap(), LockResult::Success);
    }

    #[tokio::test]
    async fn readers_coalesce_but_exclude_a_writer() {
        let locker = LocalLocker::new();
        let r1 = LockArgs::new("u1".into(), vec!["bucket/obj".into()], "owner-a".into(), "test".into(), 1);
        let r2 = LockArgs::new("u2".into(), vec!["bucket/obj".into()], "owner-b".into(), "test".into(), 1);
        assert_eq!(locker.rlock(&r1).await.unwrap(), LockResult::Success);
        assert_eq!(locker.rlock(&r2).await.unwrap(), LockResult::Success);

        let writer = LockArgs::new("u3".into(), vec!["bucket/obj".into()], "owner-c".into(), "test".into(), 1);
        assert_eq!(locker.lock(&writer).await.unwrap(), LockResult::NotAcquired);

        assert_eq!(locker.runlock(&r1).await.unwrap(), LockResult::Success);
        assert_eq!(locker.runlock(&r2).await.unwrap(), LockResult::Success);
        assert_eq!(locker.lock(&writer).await.unwrap(), LockResult::Success);
    }
}
