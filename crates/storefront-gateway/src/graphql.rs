//! `/graphql` endpoint.
//!
//! ```text
//! parse → session snapshot → cache lookup ─hit──────────────┐
//!                               └─miss→ execute on the      │
//!                                       active supergraph ──┤
//!                                                           ▼
//!                 post phase (own task): cache write, listeners (session sync)
//!                                                           ▼
//!                               response + Set-Cookie + x-cache
//! ```

use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use storefront_cache::{RequestCacheContext, ResponseCache, X_CACHE_HEADER};
use storefront_session::Session;
use storefront_supergraph::{
    GraphQLError, GraphQLRequest, GraphQLResponse, Operation, OperationContext, OperationKind,
    error_codes,
};

use crate::error::GatewayError;
use crate::hooks::RequestScope;
use crate::middleware::RequestId;
use crate::runtime::AppState;

/// Query-string form of a GraphQL request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLQueryParams {
    pub query: Option<String>,
    pub operation_name: Option<String>,
    /// JSON-encoded variables
    pub variables: Option<String>,
    /// JSON-encoded extensions
    pub extensions: Option<String>,
}

impl GraphQLQueryParams {
    fn into_request(self) -> Result<GraphQLRequest, GatewayError> {
        let query = self
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| bad_request("GET query missing."))?;

        Ok(GraphQLRequest {
            query,
            operation_name: self.operation_name.filter(|n| !n.is_empty()),
            variables: decode_json_param("variables", self.variables)?,
            extensions: decode_json_param("extensions", self.extensions)?,
        })
    }
}

fn decode_json_param(name: &str, raw: Option<String>) -> Result<Option<Value>, GatewayError> {
    raw.filter(|r| !r.is_empty())
        .map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| bad_request(&format!("`{name}` is not valid JSON: {e}")))
}

fn bad_request(message: &str) -> GatewayError {
    GatewayError::BadRequest(GraphQLError::new(message).with_code(error_codes::BAD_REQUEST))
}

/// Transport the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Get,
    Post,
}

pub async fn graphql_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<Session>>,
    request_id: Option<Extension<RequestId>>,
    payload: Result<Json<GraphQLRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload.map_err(|rejection| bad_request(&rejection.body_text()))?;
    if request.query.trim().is_empty() {
        return Err(bad_request("POST body missing `query`."));
    }

    serve(
        state,
        request,
        Transport::Post,
        &headers,
        session.map(|Extension(s)| s),
        request_id.map(|Extension(RequestId(id))| id),
    )
    .await
}

pub async fn graphql_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    session: Option<Extension<Session>>,
    request_id: Option<Extension<RequestId>>,
    params: Result<Query<GraphQLQueryParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    let Query(params) = params.map_err(|rejection| bad_request(&rejection.body_text()))?;
    let request = params.into_request()?;

    serve(
        state,
        request,
        Transport::Get,
        &headers,
        session.map(|Extension(s)| s),
        request_id.map(|Extension(RequestId(id))| id),
    )
    .await
}

async fn serve(
    state: AppState,
    request: GraphQLRequest,
    transport: Transport,
    headers: &HeaderMap,
    session: Option<Session>,
    request_id: Option<String>,
) -> Result<Response, GatewayError> {
    let operation =
        Operation::parse(request).map_err(|e| GatewayError::BadRequest(e.to_graphql_error()))?;

    if transport == Transport::Get && operation.kind() != OperationKind::Query {
        return Err(GatewayError::MethodNotAllowed(format!(
            "Can only perform a {} operation from a POST request.",
            operation.kind()
        )));
    }

    if state.profile.is_production() && operation.is_introspection() {
        return Err(GatewayError::BadRequest(
            GraphQLError::new(
                "GraphQL introspection is not allowed, but the query contained __schema or __type.",
            )
            .with_code(error_codes::GRAPHQL_VALIDATION_FAILED),
        ));
    }

    // Pin the supergraph for the whole request; reloads only affect later ones.
    let active = state
        .source
        .current()
        .ok_or(GatewayError::ServiceUnavailable)?;

    let mut scope = RequestScope::new(session.unwrap_or_default(), operation.kind());
    scope.request_id = request_id.clone();
    scope.operation_name = operation.name().map(str::to_string);
    state.listeners.request_started(&mut scope).await?;

    let context = OperationContext {
        request_id,
        cookie: headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        session: Some(scope.session.payload().clone()),
    };

    let cache = state
        .response_cache
        .clone()
        .filter(|_| operation.kind() == OperationKind::Query);
    let cache_key = cache.as_ref().map(|_| {
        let private = scope
            .session
            .is_persisted()
            .then(|| scope.session.id().as_str());
        ResponseCache::cache_key(
            operation.query(),
            operation.name(),
            operation.variables(),
            private,
        )
    });

    // Hit tracking only exists while cache debugging is on.
    let cache_context = state.cache_debug.then(RequestCacheContext::new);
    let lookup_or_execute = async {
        if let (Some(cache), Some(key)) = (&cache, &cache_key)
            && let Some(cached) = cache.lookup(key).await
        {
            match serde_json::from_value::<GraphQLResponse>(cached) {
                Ok(response) => return (response, true),
                Err(e) => {
                    tracing::warn!(error = %e, "cached response has unexpected shape");
                    if let Some(ctx) = &cache_context {
                        ctx.clear_hit();
                    }
                }
            }
        }
        (active.executor.execute(&operation, &context).await, false)
    };
    let (response, from_cache) = match &cache_context {
        Some(ctx) => ctx.clone().scope(lookup_or_execute).await,
        None => lookup_or_execute.await,
    };

    // Runs on its own task so a client disconnect cannot interrupt session
    // persistence or the cache write.
    let listeners = state.listeners.clone();
    let post = tokio::spawn(async move {
        if !from_cache
            && let (Some(cache), Some(key)) = (&cache, &cache_key)
        {
            match serde_json::to_value(&response) {
                Ok(value) if ResponseCache::is_cacheable(&value) => cache.store(key, &value).await,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "response could not be serialized for caching"),
            }
        }
        let outcome = listeners.response_ready(&mut scope, &response).await;
        (scope, response, outcome)
    });
    let (scope, response, outcome) = post
        .await
        .map_err(|e| GatewayError::Internal(format!("post-response task failed: {e}")))?;
    outcome?;

    let mut http_response = Json(response).into_response();
    let response_headers = http_response.headers_mut();
    for cookie in &scope.set_cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response_headers.append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "session cookie is not a valid header value"),
        }
    }
    if let Some(ctx) = &cache_context {
        response_headers.insert(X_CACHE_HEADER, HeaderValue::from_static(ctx.status().as_str()));
    }

    Ok(http_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(query: Option<&str>, variables: Option<&str>) -> GraphQLQueryParams {
        GraphQLQueryParams {
            query: query.map(str::to_string),
            operation_name: Some(String::new()),
            variables: variables.map(str::to_string),
            extensions: None,
        }
    }

    #[test]
    fn test_query_params_decode_variables() {
        let request = params(
            Some("query($id: ID!) { product(id: $id) { id } }"),
            Some(r#"{"id":"p1"}"#),
        )
        .into_request()
        .unwrap();

        assert_eq!(request.variables, Some(json!({"id": "p1"})));
        assert_eq!(request.operation_name, None);
    }

    #[test]
    fn test_query_params_reject_bad_input() {
        assert!(matches!(
            params(None, None).into_request(),
            Err(GatewayError::BadRequest(_))
        ));
        assert!(matches!(
            params(Some("{ products { id } }"), Some("{not json")).into_request(),
            Err(GatewayError::BadRequest(_))
        ));
    }
}
