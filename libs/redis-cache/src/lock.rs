//! Cluster-wide per-event lock.
//!
//! A thin key convention over the cache store's conditional set. Not a
//! general critical section: the key may expire mid-work, so callers must
//! tolerate losing the lock (the outbox absorbs the resulting duplicate
//! publish through consumer-side idempotency markers).

use std::sync::Arc;

use message_contracts::CacheStore;
use tracing::{debug, warn};

pub struct DistributedLock {
    cache: Arc<dyn CacheStore>,
}

impl DistributedLock {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    fn key(event_id: &str) -> String {
        format!("LockEventId-{event_id}")
    }

    /// Try to take the lock for `event_id`. `false` means another instance
    /// holds it and the caller should skip the event this pass.
    pub async fn acquire(&self, event_id: &str) -> anyhow::Result<bool> {
        let acquired = self
            .cache
            .set_if_not_exists(&Self::key(event_id), event_id)
            .await?;
        debug!(event_id = %event_id, acquired, "distributed lock acquire");
        Ok(acquired)
    }

    /// Release the lock. Idempotent; failures are logged and swallowed so a
    /// release sweep never masks the error that triggered it.
    pub async fn release(&self, event_id: &str) {
        if let Err(e) = self.cache.delete(&Self::key(event_id)).await {
            warn!(event_id = %event_id, error = %e, "failed to release distributed lock");
        }
    }

    /// Release every lock taken during one outbox pass.
    pub async fn release_all<I, S>(&self, event_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in event_ids {
            self.release(id.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCacheStore;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let cache = MemoryCacheStore::shared();
        let lock = DistributedLock::new(cache.clone());

        assert!(lock.acquire("e1").await.unwrap());
        assert!(!lock.acquire("e1").await.unwrap());

        lock.release("e1").await;
        assert!(lock.acquire("e1").await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_per_event() {
        let cache = MemoryCacheStore::shared();
        let lock = DistributedLock::new(cache);

        assert!(lock.acquire("e1").await.unwrap());
        assert!(lock.acquire("e2").await.unwrap());
    }

    #[tokio::test]
    async fn release_all_sweeps_the_pass() {
        let cache = MemoryCacheStore::shared();
        let lock = DistributedLock::new(cache.clone());

        lock.acquire("e1").await.unwrap();
        lock.acquire("e2").await.unwrap();
        lock.release_all(["e1", "e2"]).await;

        assert!(cache.is_empty().await);
    }
}
