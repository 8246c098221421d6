//! Post-response session synchronization.
//!
//! After an operation has been executed, its `data` is inspected for the two
//! shapes that change who the customer is:
//!
//! - `{"login": {"token": <string>, "isCustomerLoggedIn": <bool>}}` writes the
//!   token and flag into the session and persists it.
//! - `{"logout": {"success": true}}` destroys the session and clears the cookie.
//!
//! Any other shape leaves the session untouched. Store failures are returned
//! to the caller; the request must fail rather than silently report a login
//! that was never persisted.

use std::sync::Arc;

use cookie::Cookie;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::payload::Session;

/// The `login` result the gateway recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResult {
    pub token: String,
    #[serde(rename = "isCustomerLoggedIn")]
    pub is_customer_logged_in: bool,
}

#[derive(Debug, Deserialize)]
struct LogoutResult {
    success: bool,
}

/// A session change requested by an operation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMutation {
    Login(LoginResult),
    Logout,
}

/// Extracts the session changes carried by a response's `data`.
///
/// A login is always reported before a logout so a response carrying both
/// ends with a destroyed session.
pub fn recognize_mutations(data: &Value) -> Vec<SessionMutation> {
    let mut mutations = Vec::new();

    if let Some(value) = data.get("login").filter(|v| !v.is_null()) {
        match LoginResult::deserialize(value) {
            Ok(login) => mutations.push(SessionMutation::Login(login)),
            Err(e) => tracing::debug!(error = %e, "ignoring unrecognized login result"),
        }
    }

    if let Some(value) = data.get("logout").filter(|v| !v.is_null()) {
        match LogoutResult::deserialize(value) {
            Ok(LogoutResult { success: true }) => mutations.push(SessionMutation::Logout),
            Ok(_) => tracing::debug!("logout reported no success; session left unchanged"),
            Err(e) => tracing::debug!(error = %e, "ignoring unrecognized logout result"),
        }
    }

    mutations
}

/// What a sync did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// No recognized shape; nothing was written.
    Unchanged,
    /// The session was saved. Carries the cookie to issue for a new session.
    Persisted { issued: Option<Cookie<'static>> },
    /// The session was destroyed. Carries the clearing cookie.
    Destroyed { cleared: Cookie<'static> },
}

impl SyncOutcome {
    /// The `Set-Cookie` value the response must carry, if any.
    pub fn set_cookie(&self) -> Option<&Cookie<'static>> {
        match self {
            Self::Unchanged => None,
            Self::Persisted { issued } => issued.as_ref(),
            Self::Destroyed { cleared } => Some(cleared),
        }
    }
}

/// Applies login/logout results to the request's session.
#[derive(Clone)]
pub struct SessionSync {
    manager: Arc<SessionManager>,
}

impl SessionSync {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Inspects a finished response and updates the session accordingly.
    ///
    /// Responses without `data` are skipped.
    pub async fn apply(
        &self,
        session: &mut Session,
        data: Option<&Value>,
    ) -> Result<SyncOutcome, SessionError> {
        let Some(data) = data.filter(|d| !d.is_null()) else {
            return Ok(SyncOutcome::Unchanged);
        };

        let mut outcome = SyncOutcome::Unchanged;
        for mutation in recognize_mutations(data) {
            outcome = match mutation {
                SessionMutation::Login(login) => {
                    let payload = session.payload_mut();
                    payload.medusa_token = Some(login.token);
                    payload.is_customer_logged_in = Some(login.is_customer_logged_in);

                    let issued = self.manager.persist(session).await?;
                    tracing::info!(
                        logged_in = login.is_customer_logged_in,
                        "session updated from login result"
                    );
                    SyncOutcome::Persisted { issued }
                }
                SessionMutation::Logout => {
                    let cleared = self.manager.destroy(session).await?;
                    tracing::info!("session destroyed after logout");
                    SyncOutcome::Destroyed { cleared }
                }
            };
        }

        Ok(outcome)
    }
}
