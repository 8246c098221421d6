//! Gateway error types and their HTTP rendering.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use storefront_session::SessionError;
use storefront_supergraph::{GraphQLError, GraphQLResponse, SupergraphError, error_codes};
use thiserror::Error;

/// Errors surfaced by gateway handlers.
///
/// Admin failures render as `{"error": ...}` with no internal detail;
/// GraphQL-side failures render as a GraphQL response with `errors`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Admin credential missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Reload requested before the first supergraph was loaded.
    #[error("supergraph updater not initialized")]
    NotInitialized,

    /// Another reload is running.
    #[error("supergraph reload already in progress")]
    ReloadInProgress,

    /// The reload fetch failed; the previous supergraph stays active.
    #[error("failed to reload supergraph: {0}")]
    ReloadFailed(SupergraphError),

    /// Malformed GraphQL request.
    #[error("bad request: {}", .0.message)]
    BadRequest(GraphQLError),

    /// Operation type not allowed for the HTTP method.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// No supergraph has been loaded yet.
    #[error("supergraph not loaded")]
    ServiceUnavailable,

    /// The session could not be persisted after a login or logout.
    #[error("session persistence failed: {0}")]
    SessionPersistence(#[from] SessionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SupergraphError> for GatewayError {
    fn from(err: SupergraphError) -> Self {
        match err {
            SupergraphError::NotInitialized => Self::NotInitialized,
            SupergraphError::ReloadInProgress => Self::ReloadInProgress,
            other => Self::ReloadFailed(other),
        }
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotInitialized | Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ReloadInProgress => StatusCode::CONFLICT,
            Self::ReloadFailed(_) | Self::SessionPersistence(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// The GraphQL error shown to clients for request-path failures.
    fn graphql_error(&self) -> GraphQLError {
        match self {
            Self::BadRequest(error) => error.clone(),
            Self::MethodNotAllowed(message) => {
                GraphQLError::new(message.clone()).with_code(error_codes::BAD_REQUEST)
            }
            Self::ServiceUnavailable => GraphQLError::new("Supergraph not loaded")
                .with_code(error_codes::SERVICE_UNAVAILABLE),
            _ => GraphQLError::new("Internal server error")
                .with_code(error_codes::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let admin_message = match &self {
            Self::Unauthorized => Some("Unauthorized"),
            Self::NotInitialized => Some("Supergraph updater not initialized"),
            Self::ReloadInProgress => Some("Supergraph reload already in progress"),
            Self::ReloadFailed(_) => Some("Failed to reload supergraph"),
            _ => None,
        };

        if let Some(message) = admin_message {
            return (status, Json(json!({ "error": message }))).into_response();
        }

        match &self {
            Self::SessionPersistence(e) => tracing::error!(error = %e, "session persistence failed"),
            Self::Internal(e) => tracing::error!(error = %e, "internal gateway error"),
            _ => {}
        }

        let body = GraphQLResponse::from_error(self.graphql_error());
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET, POST"));
        }
        response
    }
}
