//! Session sync listener.

use async_trait::async_trait;
use storefront_session::SessionSync;
use storefront_supergraph::GraphQLResponse;

use super::{RequestListener, RequestScope};
use crate::error::GatewayError;

/// Applies login and logout results to the request's session.
///
/// A persistence failure fails the request with a 500.
pub struct SessionSyncListener {
    sync: SessionSync,
}

impl SessionSyncListener {
    pub fn new(sync: SessionSync) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl RequestListener for SessionSyncListener {
    fn name(&self) -> &str {
        "session_sync"
    }

    async fn response_ready(
        &self,
        scope: &mut RequestScope,
        response: &GraphQLResponse,
    ) -> Result<(), GatewayError> {
        if response.has_errors() {
            tracing::debug!(
                errors = response.errors.len(),
                "skipping session sync for errored response"
            );
            return Ok(());
        }

        let outcome = self
            .sync
            .apply(&mut scope.session, response.data.as_ref())
            .await?;

        if let Some(cookie) = outcome.set_cookie() {
            scope.set_cookies.push(cookie.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionSyncListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSyncListener").finish_non_exhaustive()
    }
}
