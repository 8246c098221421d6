//! Request lifecycle listeners.
//!
//! Listeners observe every GraphQL request handled by the gateway:
//!
//! - [`SessionSyncListener`] - persists or destroys the session after login/logout
//! - [`ErrorLogListener`] - logs operation errors with their codes
//!
//! # Ordering
//!
//! Listeners run in registration order. A failing `response_ready` stops the
//! chain and fails the request; `error_occurred` never fails.

mod logging;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use cookie::Cookie;
use storefront_session::Session;
use storefront_supergraph::{GraphQLError, GraphQLResponse, OperationKind};

use crate::error::GatewayError;

pub use logging::ErrorLogListener;
pub use session::SessionSyncListener;

/// State of one GraphQL request visible to listeners.
#[derive(Debug)]
pub struct RequestScope {
    pub request_id: Option<String>,
    pub operation_name: Option<String>,
    pub operation_kind: OperationKind,
    pub session: Session,
    /// Cookies to emit with the response.
    pub set_cookies: Vec<Cookie<'static>>,
}

impl RequestScope {
    pub fn new(session: Session, operation_kind: OperationKind) -> Self {
        Self {
            request_id: None,
            operation_name: None,
            operation_kind,
            session,
            set_cookies: Vec::new(),
        }
    }
}

/// Observer of the request lifecycle.
#[async_trait]
pub trait RequestListener: Send + Sync {
    fn name(&self) -> &str;

    /// Called once the operation has been parsed, before execution.
    async fn request_started(&self, _scope: &mut RequestScope) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Called with the finished response, before it is sent.
    async fn response_ready(
        &self,
        _scope: &mut RequestScope,
        _response: &GraphQLResponse,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Called when the response carries errors.
    async fn error_occurred(&self, _scope: &RequestScope, _errors: &[GraphQLError]) {}
}

/// Ordered list of listeners.
#[derive(Clone, Default)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn RequestListener>>,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn RequestListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn request_started(&self, scope: &mut RequestScope) -> Result<(), GatewayError> {
        for listener in &self.listeners {
            listener.request_started(scope).await?;
        }
        Ok(())
    }

    pub async fn response_ready(
        &self,
        scope: &mut RequestScope,
        response: &GraphQLResponse,
    ) -> Result<(), GatewayError> {
        if response.has_errors() {
            for listener in &self.listeners {
                listener.error_occurred(scope, &response.errors).await;
            }
        }
        for listener in &self.listeners {
            if let Err(e) = listener.response_ready(scope, response).await {
                tracing::debug!(listener = listener.name(), error = %e, "listener failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|l| l.name()).collect();
        f.debug_struct("ListenerChain")
            .field("listeners", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the order in which callbacks fire.
    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn record(&self, event: String) {
            self.calls.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl RequestListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn request_started(&self, _scope: &mut RequestScope) -> Result<(), GatewayError> {
            self.record(format!("{}:started", self.name));
            Ok(())
        }

        async fn response_ready(
            &self,
            _scope: &mut RequestScope,
            _response: &GraphQLResponse,
        ) -> Result<(), GatewayError> {
            self.record(format!("{}:ready", self.name));
            if self.fail {
                return Err(GatewayError::Internal("listener failed".into()));
            }
            Ok(())
        }

        async fn error_occurred(&self, _scope: &RequestScope, errors: &[GraphQLError]) {
            self.record(format!("{}:errors={}", self.name, errors.len()));
        }
    }

    fn chain(calls: &Arc<Mutex<Vec<String>>>, fail_first: bool) -> ListenerChain {
        ListenerChain::new()
            .with_listener(Arc::new(Recorder {
                name: "first",
                calls: calls.clone(),
                fail: fail_first,
            }))
            .with_listener(Arc::new(Recorder {
                name: "second",
                calls: calls.clone(),
                fail: false,
            }))
    }

    #[tokio::test]
    async fn test_listeners_run_in_registration_order() {
        let calls = Arc::default();
        let chain = chain(&calls, false);
        let mut scope = RequestScope::new(Session::new(), OperationKind::Query);

        chain.request_started(&mut scope).await.unwrap();
        chain
            .response_ready(&mut scope, &GraphQLResponse::default())
            .await
            .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first:started", "second:started", "first:ready", "second:ready"]
        );
    }

    #[tokio::test]
    async fn test_errors_are_reported_before_response_ready() {
        let calls = Arc::default();
        let chain = chain(&calls, false);
        let mut scope = RequestScope::new(Session::new(), OperationKind::Query);
        let response = GraphQLResponse::from_error(GraphQLError::new("boom"));

        chain.response_ready(&mut scope, &response).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first:errors=1", "second:errors=1", "first:ready", "second:ready"]
        );
    }

    #[tokio::test]
    async fn test_failing_listener_stops_the_chain() {
        let calls = Arc::default();
        let chain = chain(&calls, true);
        let mut scope = RequestScope::new(Session::new(), OperationKind::Mutation);

        let result = chain
            .response_ready(&mut scope, &GraphQLResponse::default())
            .await;

        assert!(matches!(result, Err(GatewayError::Internal(_))));
        assert_eq!(*calls.lock().unwrap(), vec!["first:ready"]);
    }
}
