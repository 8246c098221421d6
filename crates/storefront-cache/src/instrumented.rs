//! Cache wrapper that reports hits to the current request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{DynCache, KeyValueCache};
use crate::context::RequestCacheContext;
use crate::error::CacheError;

/// Wraps a cache store and marks the current [`RequestCacheContext`] on
/// every lookup that returns a value.
///
/// `set` and `delete` pass through unchanged. Calls made outside a request
/// scope behave exactly like the inner store.
#[derive(Clone)]
pub struct InstrumentedCache {
    inner: DynCache,
}

impl InstrumentedCache {
    pub fn new(inner: DynCache) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl KeyValueCache for InstrumentedCache {
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        let value = self.inner.get(key).await?;
        if value.is_some()
            && let Some(ctx) = RequestCacheContext::current()
        {
            ctx.mark_hit();
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CacheBackend;

    fn cache() -> InstrumentedCache {
        InstrumentedCache::new(Arc::new(CacheBackend::new_local("test:")))
    }

    #[tokio::test]
    async fn test_hit_marks_current_request() {
        let cache = cache();
        cache.set("k", b"v".to_vec(), None).await.unwrap();

        let ctx = RequestCacheContext::new();
        ctx.clone()
            .scope(async {
                cache.get("k").await.unwrap();
            })
            .await;

        assert!(ctx.cache_hit());
    }

    #[tokio::test]
    async fn test_miss_and_writes_leave_flag_unset() {
        let cache = cache();

        let ctx = RequestCacheContext::new();
        ctx.clone()
            .scope(async {
                cache.get("absent").await.unwrap();
                cache.set("k", b"v".to_vec(), None).await.unwrap();
                cache.delete("k").await.unwrap();
            })
            .await;

        assert!(!ctx.cache_hit());
    }

    #[tokio::test]
    async fn test_lookup_outside_request_is_a_plain_read() {
        let cache = cache();
        cache.set("k", b"v".to_vec(), None).await.unwrap();

        assert!(cache.get("k").await.unwrap().is_some());
    }
}
