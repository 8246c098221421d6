//! Error logging listener.

use async_trait::async_trait;
use storefront_supergraph::GraphQLError;

use super::{RequestListener, RequestScope};
use crate::error::GatewayError;

/// Logs operation starts at debug and every returned error at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogListener;

#[async_trait]
impl RequestListener for ErrorLogListener {
    fn name(&self) -> &str {
        "error_log"
    }

    async fn request_started(&self, scope: &mut RequestScope) -> Result<(), GatewayError> {
        tracing::debug!(
            request_id = scope.request_id.as_deref().unwrap_or("-"),
            operation.name = scope.operation_name.as_deref().unwrap_or("anonymous"),
            operation.kind = %scope.operation_kind,
            "graphql operation started"
        );
        Ok(())
    }

    async fn error_occurred(&self, scope: &RequestScope, errors: &[GraphQLError]) {
        for error in errors {
            let service = error
                .extensions
                .get("serviceName")
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            tracing::warn!(
                request_id = scope.request_id.as_deref().unwrap_or("-"),
                operation.name = scope.operation_name.as_deref().unwrap_or("anonymous"),
                code = error.code().unwrap_or("UNKNOWN"),
                service,
                message = %error.message,
                "graphql operation error"
            );
        }
    }
}
