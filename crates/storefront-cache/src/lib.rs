//! Shared response cache with per-request hit instrumentation.
//!
//! ## Layers
//!
//! ```text
//! ResponseCache (key policy, TTL, JSON) → InstrumentedCache (hit flag) → CacheBackend (DashMap | Redis)
//! ```
//!
//! [`InstrumentedCache`] is only inserted when cache debugging is enabled.
//! It marks the [`RequestCacheContext`] of the request currently being served
//! whenever a lookup returns a value; the gateway turns that flag into the
//! `x-cache: HIT|MISS` response header.

pub mod backend;
pub mod context;
pub mod error;
pub mod instrumented;
pub mod policy;

pub use backend::{CacheBackend, CachedEntry, DynCache, KeyValueCache};
pub use context::{CacheStatus, RequestCacheContext, X_CACHE_HEADER};
pub use error::CacheError;
pub use instrumented::InstrumentedCache;
pub use policy::ResponseCache;
