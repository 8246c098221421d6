//! Gateway-owned session state.
//!
//! The gateway is the single writer of session truth. Subgraphs receive a
//! read-only copy of the [`SessionPayload`] through request headers, and the
//! only path that mutates the canonical store is [`SessionSync`], which
//! inspects finished operation responses for login/logout results.
//!
//! # Components
//!
//! - [`SessionStore`] - keyed, TTL'd persistence (`get`/`set`/`destroy`)
//! - [`SessionCookies`] - signed session cookie issuing, verification and clearing
//! - [`SessionManager`] - loads and persists the [`Session`] bound to one request
//! - [`SessionSync`] - post-response login/logout handling

pub mod cookies;
pub mod error;
pub mod manager;
pub mod payload;
pub mod store;
pub mod sync;

pub use cookies::{SessionCookieConfig, SessionCookies};
pub use error::SessionError;
pub use manager::SessionManager;
pub use payload::{Session, SessionId, SessionPayload};
pub use store::{DynSessionStore, MemorySessionStore, RedisSessionStore, SessionStore};
pub use sync::{LoginResult, SessionMutation, SessionSync, SyncOutcome, recognize_mutations};
