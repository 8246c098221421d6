//! Supergraph reload endpoints.
//!
//! - `GET /admin/reload-supergraph` reports reload bookkeeping
//! - `POST /admin/reload-supergraph` fetches the registry SDL and swaps it in
//!
//! Both require the reload token, passed as `x-supergraph-reload-token` or
//! as `Authorization: Bearer <token>`. Without a configured token the
//! endpoints are open in development and closed in production.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use storefront_supergraph::SupergraphSource;
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;

use crate::config::Profile;
use crate::error::GatewayError;

pub const RELOAD_ROUTE: &str = "/admin/reload-supergraph";

/// Alternate credential header.
pub const RELOAD_TOKEN_HEADER: &str = "x-supergraph-reload-token";

/// Body of the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReloadStatusBody {
    pub status: &'static str,
    pub initialized: bool,
    pub last_reload_at: Option<String>,
    pub last_reload_error: Option<String>,
    pub supergraph_sdl_url: Option<String>,
}

/// Authorizes and runs supergraph reloads.
pub struct ReloadController {
    source: Arc<SupergraphSource>,
    token_digest: Option<[u8; 32]>,
    open_without_token: bool,
}

impl ReloadController {
    pub fn new(source: Arc<SupergraphSource>, token: Option<String>, profile: Profile) -> Self {
        let token_digest = token
            .filter(|t| !t.is_empty())
            .map(|t| Sha256::digest(t.as_bytes()).into());
        Self {
            source,
            token_digest,
            open_without_token: !profile.is_production(),
        }
    }

    /// Checks the request credential.
    ///
    /// Both sides are hashed first so the comparison is constant-time and
    /// independent of the token length.
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token_digest else {
            return self.open_without_token;
        };

        let presented = headers
            .get(RELOAD_TOKEN_HEADER)
            .or_else(|| headers.get(AUTHORIZATION))
            .and_then(|v| v.to_str().ok());
        let Some(presented) = presented else {
            return false;
        };
        let presented = presented.strip_prefix("Bearer ").unwrap_or(presented);

        let digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        digest[..].ct_eq(&expected[..]).into()
    }

    pub fn status(&self) -> ReloadStatusBody {
        let status = self.source.status();
        ReloadStatusBody {
            status: "ok",
            initialized: status.initialized,
            last_reload_at: status.last_reload_at.and_then(|t| t.format(&Rfc3339).ok()),
            last_reload_error: status.last_error,
            supergraph_sdl_url: status.source_url,
        }
    }

    /// Runs a reload to completion.
    ///
    /// The fetch runs on its own task so a client disconnect does not cancel
    /// it halfway through.
    pub async fn trigger(&self) -> Result<(), GatewayError> {
        let source = self.source.clone();
        let outcome = tokio::spawn(async move { source.reload().await })
            .await
            .map_err(|e| GatewayError::Internal(format!("reload task failed: {e}")))?;

        match outcome {
            Ok(descriptor) => {
                tracing::info!(
                    source = descriptor.source_url(),
                    "supergraph reloaded via admin endpoint"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to reload supergraph");
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for ReloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadController")
            .field("token_configured", &self.token_digest.is_some())
            .field("open_without_token", &self.open_without_token)
            .finish_non_exhaustive()
    }
}

pub async fn reload_status(
    State(controller): State<Arc<ReloadController>>,
    headers: HeaderMap,
) -> Result<Json<ReloadStatusBody>, GatewayError> {
    if !controller.is_authorized(&headers) {
        tracing::warn!("unauthorized supergraph status request");
        return Err(GatewayError::Unauthorized);
    }
    Ok(Json(controller.status()))
}

pub async fn reload_trigger(
    State(controller): State<Arc<ReloadController>>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    if !controller.is_authorized(&headers) {
        tracing::warn!("unauthorized supergraph reload request");
        return Err(GatewayError::Unauthorized);
    }
    controller.trigger().await?;
    Ok(Json(json!({ "status": "reloaded" })))
}

pub fn router(controller: Arc<ReloadController>) -> Router {
    Router::new()
        .route(RELOAD_ROUTE, get(reload_status).post(reload_trigger))
        .with_state(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use storefront_supergraph::{RegistryFetcher, RoutingExecutorFactory, SourceMode};

    fn source() -> Arc<SupergraphSource> {
        let client = reqwest::Client::new();
        Arc::new(SupergraphSource::new(
            SourceMode::Dynamic {
                fetcher: RegistryFetcher::new(
                    "http://127.0.0.1:9/supergraph",
                    None,
                    client.clone(),
                ),
            },
            Arc::new(RoutingExecutorFactory::new(client)),
        ))
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_token_accepted_from_either_header() {
        let controller =
            ReloadController::new(source(), Some("s3cret".into()), Profile::Production);

        assert!(controller.is_authorized(&headers(RELOAD_TOKEN_HEADER, "s3cret")));
        assert!(controller.is_authorized(&headers("authorization", "Bearer s3cret")));
        assert!(controller.is_authorized(&headers("authorization", "s3cret")));
    }

    #[test]
    fn test_wrong_or_missing_token_rejected() {
        let controller =
            ReloadController::new(source(), Some("s3cret".into()), Profile::Development);

        assert!(!controller.is_authorized(&HeaderMap::new()));
        assert!(!controller.is_authorized(&headers(RELOAD_TOKEN_HEADER, "s3cre")));
        assert!(!controller.is_authorized(&headers("authorization", "Bearer other")));
        assert!(!controller.is_authorized(&headers("authorization", "Basic s3cret")));
    }

    #[test]
    fn test_missing_token_depends_on_profile() {
        let dev = ReloadController::new(source(), None, Profile::Development);
        let prod = ReloadController::new(source(), Some(String::new()), Profile::Production);

        assert!(dev.is_authorized(&HeaderMap::new()));
        assert!(!prod.is_authorized(&headers(RELOAD_TOKEN_HEADER, "")));
    }

    #[test]
    fn test_status_before_initialization() {
        let controller = ReloadController::new(source(), None, Profile::Development);

        assert_eq!(
            controller.status(),
            ReloadStatusBody {
                status: "ok",
                initialized: false,
                last_reload_at: None,
                last_reload_error: None,
                supergraph_sdl_url: Some("http://127.0.0.1:9/supergraph".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_trigger_before_initialization_is_not_initialized() {
        let controller = ReloadController::new(source(), None, Profile::Development);

        let err = controller.trigger().await.unwrap_err();
        assert!(matches!(err, GatewayError::NotInitialized));
    }
}
