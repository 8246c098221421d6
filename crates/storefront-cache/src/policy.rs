//! Response cache policy: key derivation, cacheability and TTL.

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::backend::DynCache;
use crate::context::RequestCacheContext;

const KEY_PREFIX: &str = "fqc:";

/// Stores whole GraphQL responses keyed by the operation and, for private
/// responses, the caller's session id.
///
/// Store failures never fail a request: lookups degrade to a miss and
/// writes are dropped, both with a warning.
#[derive(Clone)]
pub struct ResponseCache {
    store: DynCache,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: DynCache, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Derives the cache key of an operation.
    ///
    /// `session_id` scopes the entry to one caller; pass `None` for
    /// responses that are identical for every caller.
    pub fn cache_key(
        query: &str,
        operation_name: Option<&str>,
        variables: Option<&Value>,
        session_id: Option<&str>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update([0]);
        hasher.update(operation_name.unwrap_or_default().as_bytes());
        hasher.update([0]);
        if let Some(variables) = variables.filter(|v| !v.is_null()) {
            hasher.update(variables.to_string().as_bytes());
        }
        hasher.update([0]);
        if let Some(session_id) = session_id {
            hasher.update(b"private:");
            hasher.update(session_id.as_bytes());
        }
        format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize()))
    }

    /// Only complete, error-free responses are stored.
    pub fn is_cacheable(response: &Value) -> bool {
        let has_data = response.get("data").is_some_and(|d| !d.is_null());
        let has_errors = response
            .get("errors")
            .and_then(Value::as_array)
            .is_some_and(|errors| !errors.is_empty());
        has_data && !has_errors
    }

    pub async fn lookup(&self, key: &str) -> Option<Value> {
        let bytes = match self.store.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(error = %e, "response cache lookup failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable cached response");
                if let Some(ctx) = RequestCacheContext::current() {
                    ctx.clear_hit();
                }
                None
            }
        }
    }

    pub async fn store(&self, key: &str, response: &Value) {
        let bytes = match serde_json::to_vec(response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "response could not be encoded for caching");
                return;
            }
        };

        if let Err(e) = self.store.set(key, bytes, Some(self.default_ttl)).await {
            tracing::warn!(error = %e, "response cache write failed");
        }
    }
}
