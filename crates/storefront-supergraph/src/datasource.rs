//! Outbound calls to a single subgraph.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use storefront_session::SessionPayload;

use crate::operation::{GraphQLError, GraphQLRequest, GraphQLResponse, error_codes};
use crate::routing::SubgraphEndpoint;

/// Request id header, forwarded to subgraphs.
pub const X_REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-inbound-request data visible to subgraph hooks.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub request_id: Option<String>,
    /// Raw `Cookie` header of the inbound request.
    pub cookie: Option<String>,
    /// Snapshot of the caller's session taken when the request started.
    pub session: Option<SessionPayload>,
}

/// One outbound call about to be sent to a subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphRequest {
    pub subgraph: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: GraphQLRequest,
}

/// Called for every outbound subgraph call, in registration order.
pub trait SubgraphRequestHook: Send + Sync {
    fn will_send_request(&self, request: &mut SubgraphRequest, context: &OperationContext);
}

/// Forwards the inbound request id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdPropagation;

impl SubgraphRequestHook for RequestIdPropagation {
    fn will_send_request(&self, request: &mut SubgraphRequest, context: &OperationContext) {
        if let Some(value) = context
            .request_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            request
                .headers
                .insert(HeaderName::from_static(X_REQUEST_ID_HEADER), value);
        }
    }
}

/// HTTP data source for one subgraph.
#[derive(Clone)]
pub struct RemoteSubgraph {
    endpoint: SubgraphEndpoint,
    client: reqwest::Client,
    hooks: Arc<[Arc<dyn SubgraphRequestHook>]>,
}

impl RemoteSubgraph {
    pub fn new(
        endpoint: SubgraphEndpoint,
        client: reqwest::Client,
        hooks: Arc<[Arc<dyn SubgraphRequestHook>]>,
    ) -> Self {
        Self {
            endpoint,
            client,
            hooks,
        }
    }

    pub fn endpoint(&self) -> &SubgraphEndpoint {
        &self.endpoint
    }

    /// Sends `body` to the subgraph.
    ///
    /// Transport failures become a `DOWNSTREAM_SERVICE_ERROR`; errors the
    /// subgraph reports are passed through tagged with `serviceName`.
    pub async fn execute(
        &self,
        body: GraphQLRequest,
        context: &OperationContext,
    ) -> GraphQLResponse {
        let mut request = SubgraphRequest {
            subgraph: self.endpoint.name.clone(),
            url: self.endpoint.url.clone(),
            headers: HeaderMap::new(),
            body,
        };
        for hook in self.hooks.iter() {
            hook.will_send_request(&mut request, context);
        }

        match self.send(request).await {
            Ok(mut response) => {
                for error in &mut response.errors {
                    error
                        .extensions
                        .entry("serviceName")
                        .or_insert_with(|| self.endpoint.name.clone().into());
                }
                response
            }
            Err(e) => {
                tracing::warn!(
                    subgraph = %self.endpoint.name,
                    error = %e,
                    "subgraph request failed"
                );
                GraphQLResponse::from_error(
                    GraphQLError::new(format!(
                        "Error while fetching subgraph {}: {e}",
                        self.endpoint.name
                    ))
                    .with_code(error_codes::DOWNSTREAM_SERVICE_ERROR)
                    .with_extension("serviceName", self.endpoint.name.clone()),
                )
            }
        }
    }

    async fn send(&self, request: SubgraphRequest) -> Result<GraphQLResponse, reqwest::Error> {
        self.client
            .post(&request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
