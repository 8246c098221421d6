//! Assembly of the gateway's shared state from configuration.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use storefront_cache::{CacheBackend, DynCache, InstrumentedCache, ResponseCache};
use storefront_session::{
    DynSessionStore, MemorySessionStore, RedisSessionStore, SessionCookieConfig, SessionCookies,
    SessionManager, SessionSync,
};
use storefront_supergraph::{
    ExecutorFactory, IntrospectAndCompose, RegistryFetcher, RequestIdPropagation,
    RoutingExecutorFactory, SessionBridge, SourceMode, SupergraphSource,
};

use crate::admin::ReloadController;
use crate::config::{GatewayConfig, Profile, RedisConfig};
use crate::error::GatewayError;
use crate::hooks::{ErrorLogListener, ListenerChain, SessionSyncListener};

/// How often the in-process session and cache stores drop expired entries.
const LOCAL_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<SupergraphSource>,
    pub sessions: Arc<SessionManager>,
    /// `None` when response caching is disabled.
    pub response_cache: Option<ResponseCache>,
    pub listeners: ListenerChain,
    pub reload: Arc<ReloadController>,
    pub profile: Profile,
    /// Emit `x-cache` on GraphQL responses.
    pub cache_debug: bool,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("profile", &self.profile)
            .field("cache_enabled", &self.response_cache.is_some())
            .field("cache_debug", &self.cache_debug)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

/// Builds [`AppState`] from a [`GatewayConfig`].
///
/// Collaborators can be replaced before `build()`; anything not replaced is
/// derived from the configuration.
pub struct RuntimeBuilder {
    config: GatewayConfig,
    client: Option<reqwest::Client>,
    executor_factory: Option<Arc<dyn ExecutorFactory>>,
    session_store: Option<DynSessionStore>,
    cache_store: Option<DynCache>,
    source: Option<Arc<SupergraphSource>>,
}

impl RuntimeBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: None,
            executor_factory: None,
            session_store: None,
            cache_store: None,
            source: None,
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_executor_factory(mut self, factory: Arc<dyn ExecutorFactory>) -> Self {
        self.executor_factory = Some(factory);
        self
    }

    pub fn with_session_store(mut self, store: DynSessionStore) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Replaces the response cache store. Caching is enabled when set.
    pub fn with_cache_store(mut self, store: DynCache) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn with_source(mut self, source: Arc<SupergraphSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub async fn build(self) -> Result<AppState, GatewayError> {
        let config = self.config;
        let profile = config.profile;

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| GatewayError::Internal(format!("http client: {e}")))?,
        };

        let redis_pool = match config.redis.url {
            Some(_) if self.session_store.is_none() || self.cache_store.is_none() => {
                create_redis_pool(&config.redis).await
            }
            _ => None,
        };

        let session_store: DynSessionStore = match (self.session_store, &redis_pool) {
            (Some(store), _) => store,
            (None, Some(pool)) if profile.is_production() => {
                tracing::info!("using redis session store");
                Arc::new(RedisSessionStore::new(pool.clone()))
            }
            (None, _) => {
                tracing::info!("using in-memory session store");
                let store = Arc::new(MemorySessionStore::new());
                store.start_cleanup_task(LOCAL_CLEANUP_INTERVAL);
                store as DynSessionStore
            }
        };

        let cookies = SessionCookies::new(&SessionCookieConfig {
            name: config.session.cookie_name.clone(),
            secret: config.session.secret.clone(),
            secure: profile.is_production(),
            max_age: Duration::from_secs(config.session.max_age_secs),
        })
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let sessions = Arc::new(SessionManager::new(session_store, cookies));

        let cache_store = match (self.cache_store, &redis_pool) {
            (Some(store), _) => Some(store),
            (None, Some(pool)) => Some(Arc::new(CacheBackend::new_redis(
                pool.clone(),
                config.cache.namespace.clone(),
            )) as DynCache),
            (None, None) if config.cache_enabled() => {
                let backend = Arc::new(CacheBackend::new_local(config.cache.namespace.clone()));
                backend.start_cleanup_task(LOCAL_CLEANUP_INTERVAL);
                Some(backend as DynCache)
            }
            (None, None) => None,
        };
        let response_cache = cache_store.map(|store| {
            let store: DynCache = if config.cache.debug {
                Arc::new(InstrumentedCache::new(store))
            } else {
                store
            };
            ResponseCache::new(
                store,
                Duration::from_secs(config.cache.default_max_age_secs),
            )
        });
        tracing::info!(
            enabled = response_cache.is_some(),
            debug = config.cache.debug,
            "response cache configured"
        );

        let source = match self.source {
            Some(source) => source,
            None => {
                let factory = self.executor_factory.unwrap_or_else(|| {
                    Arc::new(
                        RoutingExecutorFactory::new(client.clone())
                            .with_hook(Arc::new(RequestIdPropagation))
                            .with_hook(Arc::new(SessionBridge)),
                    )
                });
                Arc::new(
                    SupergraphSource::new(source_mode(&config, client), factory)
                        .with_fetch_timeout(config.supergraph.fetch_timeout()),
                )
            }
        };

        let listeners = ListenerChain::new()
            .with_listener(Arc::new(ErrorLogListener))
            .with_listener(Arc::new(SessionSyncListener::new(SessionSync::new(
                sessions.clone(),
            ))));

        let reload = Arc::new(ReloadController::new(
            source.clone(),
            config.admin.reload_token.clone(),
            profile,
        ));

        Ok(AppState {
            source,
            sessions,
            response_cache,
            listeners,
            reload,
            profile,
            cache_debug: config.cache.debug,
        })
    }
}

fn source_mode(config: &GatewayConfig, client: reqwest::Client) -> SourceMode {
    match &config.supergraph.sdl_url {
        Some(url) => SourceMode::Dynamic {
            fetcher: RegistryFetcher::new(url.clone(), config.supergraph.sdl_token.clone(), client),
        },
        None => SourceMode::Static {
            composer: IntrospectAndCompose::new(config.supergraph.subgraphs.clone(), client),
            poll_interval: (!config.profile.is_production())
                .then(|| config.supergraph.poll_interval()),
        },
    }
}

/// Connects to Redis. Returns `None` when the pool cannot be created or the
/// first connection fails, in which case callers fall back to local stores.
pub async fn create_redis_pool(config: &RedisConfig) -> Option<Pool> {
    let url = config.url.as_deref()?;
    tracing::info!("connecting to redis");

    let timeout = Some(Duration::from_millis(config.timeout_ms));
    let mut redis_config = deadpool_redis::Config::from_url(url);
    let pool_config = redis_config.pool.get_or_insert_with(Default::default);
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create redis pool, falling back to local stores");
            return None;
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("connected to redis");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to connect to redis, falling back to local stores");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_config_builds_static_source_without_cache() {
        let state = RuntimeBuilder::new(GatewayConfig::default())
            .build()
            .await
            .unwrap();

        assert!(!state.source.mode().is_dynamic());
        assert!(state.response_cache.is_none());
        assert!(!state.cache_debug);
        assert_eq!(state.listeners.len(), 2);
        assert!(state.source.current().is_none());
    }

    #[tokio::test]
    async fn test_registry_url_selects_dynamic_source() {
        let mut config = GatewayConfig::default();
        config.supergraph.sdl_url = Some("http://registry.local/supergraph.graphql".into());
        config.cache.debug = true;

        let state = RuntimeBuilder::new(config).build().await.unwrap();

        assert_eq!(
            state.source.mode().registry_url(),
            Some("http://registry.local/supergraph.graphql")
        );
        assert!(state.response_cache.is_some());
        assert!(state.cache_debug);
    }
}
