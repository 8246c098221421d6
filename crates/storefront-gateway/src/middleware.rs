use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, header::COOKIE},
    middleware::Next,
    response::Response,
};
use storefront_session::{Session, SessionManager};
use storefront_supergraph::X_REQUEST_ID_HEADER;
use uuid::Uuid;

/// Request id of the inbound request, as placed in request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(X_REQUEST_ID_HEADER);

    // Preserve a usable incoming request-id; otherwise generate one
    let incoming = req
        .headers()
        .get(&header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(header_name.clone(), value.clone());
    }
    req.extensions_mut().insert(RequestId(id));

    let mut res = next.run(req).await;

    if let Some(value) = header_value {
        res.headers_mut().insert(header_name, value);
    }
    res
}

/// Loads the caller's session and stores it in request extensions.
///
/// A store failure is logged and the request continues with a fresh,
/// unsaved session.
pub async fn load_session(
    State(sessions): State<Arc<SessionManager>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let cookie_header = req
        .headers()
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let session = match sessions.load(cookie_header.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load session, continuing with a new one");
            Session::new()
        }
    };
    req.extensions_mut().insert(session);

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, routing::get};
    use tower::ServiceExt;

    async fn echo_id(Extension(RequestId(id)): Extension<RequestId>) -> String {
        id
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_id))
            .layer(axum::middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_preserved() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "abc-123");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abc-123");
    }

    #[tokio::test]
    async fn test_missing_request_id_is_generated() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()["x-request-id"].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
