//! Session identity and payload types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque identifier of a stored session.
///
/// Generated ids are 32 lowercase hex characters (a v4 UUID without dashes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parses an id taken from a verified cookie.
    ///
    /// Returns `None` for anything that is not 32 lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session data owned by the gateway.
///
/// `medusaToken` is the downstream commerce bearer credential and
/// `isCustomerLoggedIn` the login flag. Any other keys are carried through
/// untouched so subgraphs see the full bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(
        rename = "medusaToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub medusa_token: Option<String>,

    #[serde(
        rename = "isCustomerLoggedIn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_customer_logged_in: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionPayload {
    /// Returns whether the customer is logged in.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.is_customer_logged_in.unwrap_or(false)
    }

    /// Encodes the payload as a single-line JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The session bound to one inbound request.
///
/// A session that has never been written to the store is "unsaved": no
/// cookie is issued for it until [`SessionManager::persist`] succeeds.
///
/// [`SessionManager::persist`]: crate::SessionManager::persist
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    payload: SessionPayload,
    persisted: bool,
}

impl Session {
    /// Creates a new, unsaved session with an empty payload.
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            payload: SessionPayload::default(),
            persisted: false,
        }
    }

    /// Rebuilds a session that was loaded from the store.
    pub fn restored(id: SessionId, payload: SessionPayload) -> Self {
        Self {
            id,
            payload,
            persisted: true,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn payload(&self) -> &SessionPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut SessionPayload {
        &mut self.payload
    }

    /// Returns whether the session exists in the store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.persisted = false;
        self.payload = SessionPayload::default();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
