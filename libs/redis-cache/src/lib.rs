//! Redis-backed cache store and the distributed lock built on top of it.
//!
//! The store exposes exactly the two primitives the messaging core consumes:
//! `SET ... NX` and `DEL`. The per-event distributed lock (used only by the
//! outbox publisher) layers its key convention over the conditional set.
//!
//! An in-memory implementation lives alongside for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::Mutex;
use tracing::debug;

use message_contracts::CacheStore;

mod lock;

pub use lock::DistributedLock;

/// Cache store over a shared Redis connection manager.
///
/// The manager multiplexes one TCP connection and reconnects on failure, so
/// one instance is shared by all publishers and consumers in the process.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
    /// Expiry applied to conditional sets. Bounds how long a crashed lock
    /// holder can wedge a key.
    ttl: Option<Duration>,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        Ok(Self { manager, ttl: None })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set_if_not_exists(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .with_context(|| format!("SET NX failed for key `{key}`"))?;

        let written = reply.is_some();
        debug!(key = %key, written, "conditional cache set");
        Ok(written)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("DEL failed for key `{key}`"))?;
        debug!(key = %key, "cache key deleted");
        Ok(())
    }
}

/// In-memory cache store for tests and local development.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set_if_not_exists(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
