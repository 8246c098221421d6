use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use storefront_supergraph::{SupergraphSource, X_REQUEST_ID_HEADER};
use tokio::task::JoinHandle;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    admin,
    config::{CorsConfig, GatewayConfig},
    error::GatewayError,
    graphql, health,
    middleware::{self as app_middleware, RequestId},
    runtime::{AppState, RuntimeBuilder},
};

pub const GRAPHQL_ROUTE: &str = "/graphql";

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    background: Vec<JoinHandle<()>>,
}

pub fn build_app(state: AppState, cfg: &GatewayConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    let dynamic = state.source.mode().is_dynamic();
    let reload = state.reload.clone();

    let graphql_routes = Router::new()
        .route(
            GRAPHQL_ROUTE,
            get(graphql::graphql_get).post(graphql::graphql_post),
        )
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            app_middleware::load_session,
        ));

    let mut app = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .merge(graphql_routes)
        .with_state(state);

    // The reload surface only exists for registry-backed supergraphs
    if dynamic {
        app = app.merge(admin::router(reload));
    }

    // Middleware stack (outermost last: request id -> trace -> cors -> compression -> body limit)
    app.layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&cfg.cors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|RequestId(id)| id.as_str())
                        .unwrap_or("");
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

/// Explicit origins only: credentialed CORS cannot use `*`.
fn allowed_origins(cfg: &CorsConfig) -> Vec<HeaderValue> {
    cfg.origins
        .iter()
        .filter_map(|origin| {
            if origin.trim() == "*" {
                tracing::warn!("ignoring wildcard CORS origin; list origins explicitly");
                return None;
            }
            match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            }
        })
        .collect()
}

fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(cfg)))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(X_REQUEST_ID_HEADER),
            HeaderName::from_static("apollo-require-preflight"),
        ])
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: GatewayConfig,
    runtime: Option<RuntimeBuilder>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = GatewayConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            runtime: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: GatewayConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses a preconfigured runtime instead of one derived from the config.
    pub fn with_runtime(mut self, runtime: RuntimeBuilder) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Assembles the runtime and loads the first supergraph.
    ///
    /// A failed first load does not stop the server: it keeps retrying in
    /// the background while `/readyz` reports 503.
    pub async fn build(self) -> Result<GatewayServer, GatewayError> {
        let runtime = self
            .runtime
            .unwrap_or_else(|| RuntimeBuilder::new(self.config.clone()));
        let state = runtime.build().await?;

        let mut background = Vec::new();
        if let Err(e) = state.source.initialize().await {
            tracing::error!(error = %e, "initial supergraph load failed; retrying in background");
            background.push(spawn_initialization(
                state.source.clone(),
                self.config.supergraph.poll_interval(),
            ));
        }
        if let Some(polling) = state.source.spawn_polling() {
            tracing::info!(
                interval_ms = self.config.supergraph.poll_interval_ms,
                "supergraph polling enabled"
            );
            background.push(polling);
        }

        let app = build_app(state, &self.config);
        Ok(GatewayServer {
            addr: self.addr,
            app,
            background,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Retries the first load until it succeeds.
fn spawn_initialization(source: Arc<SupergraphSource>, retry: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(retry).await;
            match source.initialize().await {
                Ok(descriptor) => {
                    tracing::info!(source = descriptor.source_url(), "supergraph loaded after retry");
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "supergraph still unavailable"),
            }
        }
    })
}

impl GatewayServer {
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for task in self.background {
            task.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors(origins: &[&str]) -> CorsConfig {
        CorsConfig {
            origins: origins.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_wildcard_origin_is_dropped() {
        let origins = allowed_origins(&cors(&["*", "http://localhost:3000"]));

        assert_eq!(origins, vec![HeaderValue::from_static("http://localhost:3000")]);
    }

    #[test]
    fn test_cors_layer_accepts_wildcard_only_config() {
        assert!(allowed_origins(&cors(&["*"])).is_empty());
        let _layer = cors_layer(&cors(&["*"]));
    }

    #[tokio::test]
    async fn test_app_builds_with_wildcard_origin() {
        let mut config = GatewayConfig::default();
        config.cors.origins = vec!["*".into()];
        let state = RuntimeBuilder::new(config.clone()).build().await.unwrap();

        let _app = build_app(state, &config);
    }
}
