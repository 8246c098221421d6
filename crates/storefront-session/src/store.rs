//! Session persistence.
//!
//! Two stores are provided:
//!
//! - [`MemorySessionStore`]: per-process DashMap with TTL, used in development
//! - [`RedisSessionStore`]: shared Redis store used in production

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::SessionError;
use crate::payload::{SessionId, SessionPayload};

/// Key prefix for sessions stored in Redis.
pub const REDIS_SESSION_PREFIX: &str = "sess:";

/// Keyed, TTL'd session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session payload. Expired or unknown sessions yield `None`.
    async fn get(&self, id: &SessionId) -> Result<Option<SessionPayload>, SessionError>;

    /// Writes a session payload, replacing any previous value.
    async fn set(
        &self,
        id: &SessionId,
        payload: &SessionPayload,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    /// Removes a session.
    async fn destroy(&self, id: &SessionId) -> Result<(), SessionError>;
}

/// Shared session store handle.
pub type DynSessionStore = Arc<dyn SessionStore>;

#[derive(Debug, Clone)]
struct StoredSession {
    payload: SessionPayload,
    expires_at: Instant,
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, StoredSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, including ones not yet evicted after expiry.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops expired sessions and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.sessions.retain(|_, stored| {
            if stored.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Sweeps expired sessions every `every` until the store is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(live) = store.upgrade() else {
                    break;
                };
                let removed = live.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expired sessions removed");
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionPayload>, SessionError> {
        let Some(entry) = self.sessions.get(id) else {
            return Ok(None);
        };

        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.sessions.remove(id);
            return Ok(None);
        }

        Ok(Some(entry.payload.clone()))
    }

    async fn set(
        &self,
        id: &SessionId,
        payload: &SessionPayload,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.sessions.insert(
            id.clone(),
            StoredSession {
                payload: payload.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), SessionError> {
        self.sessions.remove(id);
        Ok(())
    }
}

/// Redis-backed session store.
///
/// Payloads are stored as JSON under `sess:<id>` with a TTL.
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: Pool,
    prefix: String,
}

impl RedisSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            prefix: REDIS_SESSION_PREFIX.to_string(),
        }
    }

    fn key(&self, id: &SessionId) -> String {
        format!("{}{}", self.prefix, id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionPayload>, SessionError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(self.key(id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(SessionError::from))
            .transpose()
    }

    async fn set(
        &self,
        id: &SessionId,
        payload: &SessionPayload,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let json = payload.to_json()?;
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(self.key(id), json, ttl.as_secs().max(1))
            .await?;
        tracing::debug!(ttl_secs = ttl.as_secs(), "session persisted (redis)");
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.key(id)).await?;
        tracing::debug!("session destroyed (redis)");
        Ok(())
    }
}
