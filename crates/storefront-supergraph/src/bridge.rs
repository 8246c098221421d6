//! Forwarding of gateway-owned session state to subgraphs.

use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};

use crate::datasource::{OperationContext, SubgraphRequest, SubgraphRequestHook};

/// Header carrying the JSON-encoded session payload.
pub const X_SESSION_DATA_HEADER: &str = "x-session-data";

/// Adds the caller's cookie and session payload to every subgraph call.
///
/// Subgraphs get a read-only copy: the `cookie` header verbatim and the full
/// session payload as JSON in `x-session-data`. Nothing they send back is
/// written to the session store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionBridge;

impl SessionBridge {
    /// The headers to attach to each subgraph call made for `context`.
    pub fn headers(context: &OperationContext) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(cookie) = &context.cookie {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(_) => tracing::warn!("inbound cookie header is not forwardable"),
            }
        }

        if let Some(session) = &context.session {
            let encoded = session.to_json().map_err(|e| e.to_string()).and_then(|json| {
                HeaderValue::from_bytes(json.as_bytes()).map_err(|e| e.to_string())
            });
            match encoded {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(X_SESSION_DATA_HEADER), value);
                }
                Err(e) => tracing::warn!(error = %e, "session payload could not be forwarded"),
            }
        }

        headers
    }
}

impl SubgraphRequestHook for SessionBridge {
    fn will_send_request(&self, request: &mut SubgraphRequest, context: &OperationContext) {
        request.headers.extend(Self::headers(context));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use storefront_session::SessionPayload;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::datasource::{RemoteSubgraph, SubgraphRequestHook};
    use crate::operation::GraphQLRequest;
    use crate::routing::SubgraphEndpoint;

    fn logged_in_context() -> OperationContext {
        OperationContext {
            request_id: None,
            cookie: Some("storefront.sid=abc.def; theme=dark".into()),
            session: Some(SessionPayload {
                medusa_token: Some("T".into()),
                is_customer_logged_in: Some(true),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_headers_carry_cookie_and_session_json() {
        let headers = SessionBridge::headers(&logged_in_context());

        assert_eq!(headers[COOKIE], "storefront.sid=abc.def; theme=dark");
        let session: serde_json::Value =
            serde_json::from_slice(headers[X_SESSION_DATA_HEADER].as_bytes()).unwrap();
        assert_eq!(session, json!({"medusaToken": "T", "isCustomerLoggedIn": true}));
    }

    #[test]
    fn test_no_headers_without_cookie_or_session() {
        assert!(SessionBridge::headers(&OperationContext::default()).is_empty());
    }

    #[tokio::test]
    async fn test_every_subgraph_call_gets_the_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("cookie", "storefront.sid=abc.def; theme=dark"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(2)
            .mount(&server)
            .await;

        let hooks: Vec<Arc<dyn SubgraphRequestHook>> = vec![Arc::new(SessionBridge)];
        let products = RemoteSubgraph::new(
            SubgraphEndpoint::new("products", server.uri()),
            reqwest::Client::new(),
            hooks.into(),
        );
        let context = logged_in_context();

        products.execute(GraphQLRequest::new("{ a }"), &context).await;
        products.execute(GraphQLRequest::new("{ b }"), &context).await;

        for request in server.received_requests().await.unwrap() {
            let forwarded: serde_json::Value =
                serde_json::from_slice(request.headers[X_SESSION_DATA_HEADER].as_bytes()).unwrap();
            assert_eq!(forwarded, json!({"medusaToken": "T", "isCustomerLoggedIn": true}));
        }
    }
}
