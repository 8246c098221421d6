//! Per-request cache hit tracking.
//!
//! A [`RequestCacheContext`] is installed as a tokio task-local for the
//! duration of one inbound request with [`RequestCacheContext::scope`]. Every
//! `.await` inside that future sees the same context; other requests, and
//! code running outside any scope, never do.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Response header carrying the cache status.
pub const X_CACHE_HEADER: &str = "x-cache";

tokio::task_local! {
    static REQUEST_CACHE_CONTEXT: RequestCacheContext;
}

/// Cache status reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Hit flag of one inbound request.
///
/// Clones share the flag, so the handler can keep a handle while the
/// task-local copy is marked from deep inside execution.
#[derive(Debug, Clone, Default)]
pub struct RequestCacheContext {
    hit: Arc<AtomicBool>,
}

impl RequestCacheContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_hit(&self) {
        self.hit.store(true, Ordering::Release);
    }

    /// Withdraws a hit, for entries that were found but could not be served.
    pub fn clear_hit(&self) {
        self.hit.store(false, Ordering::Release);
    }

    pub fn cache_hit(&self) -> bool {
        self.hit.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CacheStatus {
        if self.cache_hit() {
            CacheStatus::Hit
        } else {
            CacheStatus::Miss
        }
    }

    /// Runs `future` with this context installed as the current one.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        REQUEST_CACHE_CONTEXT.scope(self, future).await
    }

    /// Returns the context of the request being served, if any.
    pub fn current() -> Option<Self> {
        REQUEST_CACHE_CONTEXT.try_with(Clone::clone).ok()
    }
}
