//! Cache store implementation with a local (DashMap) and a shared (Redis) mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::CacheError;

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "bff:cache:v1:";

/// Key/value cache store with optional per-entry TTL.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Returns the value stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError>;

    /// Stores `value` under `key`. `None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Shared cache store handle.
pub type DynCache = Arc<dyn KeyValueCache>;

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` so hits hand out the bytes without copying.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Option<Duration>,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.cached_at.elapsed() >= ttl)
    }
}

#[derive(Clone)]
enum Store {
    /// Single-instance: local DashMap only
    Local(Arc<DashMap<String, CachedEntry>>),

    /// Multi-instance: shared Redis
    Redis(Pool),
}

/// Namespaced cache store.
///
/// ## Modes
///
/// - **Local**: per-process DashMap, used when no Redis URL is configured
/// - **Redis**: shared across gateway instances
///
/// Every key is prefixed with the configured namespace so several
/// deployments can share one Redis database.
#[derive(Clone)]
pub struct CacheBackend {
    store: Store,
    namespace: String,
}

impl CacheBackend {
    /// Create a local-only cache backend.
    pub fn new_local(namespace: impl Into<String>) -> Self {
        Self {
            store: Store::Local(Arc::new(DashMap::new())),
            namespace: namespace.into(),
        }
    }

    /// Create a Redis-backed cache backend.
    pub fn new_redis(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            store: Store::Redis(pool),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.store, Store::Redis(_))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Removes expired entries from the local store and returns how many
    /// were dropped. Redis expires keys on its own, so this is a no-op there.
    pub fn cleanup_expired(&self) -> usize {
        let Store::Local(map) = &self.store else {
            return 0;
        };

        let before = map.len();
        map.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(map.len())
    }

    /// Periodically sweeps expired local entries.
    ///
    /// Returns `None` for the Redis store. The task ends once the last
    /// handle to the backend is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        if self.is_shared() {
            return None;
        }

        let backend = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(live) = backend.upgrade() else {
                    break;
                };
                let removed = live.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expired cache entries removed");
                }
            }
        }))
    }
}

#[async_trait]
impl KeyValueCache for CacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        let key = self.namespaced(key);
        match &self.store {
            Store::Local(map) => {
                let Some(entry) = map.get(&key) else {
                    return Ok(None);
                };
                if entry.is_expired() {
                    drop(entry);
                    map.remove(&key);
                    return Ok(None);
                }
                Ok(Some(Arc::clone(&entry.data)))
            }
            Store::Redis(pool) => {
                let mut conn = pool.get().await?;
                let data: Option<Vec<u8>> = conn.get(&key).await?;
                tracing::debug!(key = %key, hit = data.is_some(), "cache lookup (redis)");
                Ok(data.map(Arc::new))
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = self.namespaced(key);
        match &self.store {
            Store::Local(map) => {
                map.insert(key, CachedEntry::new(value, ttl));
            }
            Store::Redis(pool) => {
                let mut conn = pool.get().await?;
                match ttl {
                    Some(ttl) => {
                        conn.set_ex::<_, _, ()>(&key, value, ttl.as_secs().max(1))
                            .await?
                    }
                    None => conn.set::<_, _, ()>(&key, value).await?,
                }
                tracing::debug!(key = %key, "cache set (redis)");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = self.namespaced(key);
        match &self.store {
            Store::Local(map) => {
                map.remove(&key);
            }
            Store::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.del::<_, ()>(&key).await?;
            }
        }
        Ok(())
    }
}
