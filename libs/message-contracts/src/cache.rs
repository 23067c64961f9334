//! Cache backend contract: the two primitives the messaging core needs from
//! its cache — conditional set (the distributed-lock building block) and
//! delete (handler-declared invalidation).

use async_trait::async_trait;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key` only if the key does not exist. Returns
    /// whether the write happened.
    async fn set_if_not_exists(&self, key: &str, value: &str) -> anyhow::Result<bool>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
