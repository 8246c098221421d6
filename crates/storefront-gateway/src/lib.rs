pub mod admin;
pub mod config;
pub mod error;
pub mod graphql;
pub mod health;
pub mod hooks;
pub mod middleware;
pub mod observability;
pub mod runtime;
pub mod server;

pub use admin::ReloadController;
pub use config::{
    AdminConfig, CacheConfig, CorsConfig, GatewayConfig, LoggingConfig, Profile, RedisConfig,
    ServerConfig, SessionConfig, SupergraphConfig,
};
pub use error::GatewayError;
pub use hooks::{ErrorLogListener, ListenerChain, RequestListener, RequestScope, SessionSyncListener};
pub use observability::{init_tracing, shutdown_tracing};
pub use runtime::{AppState, RuntimeBuilder, create_redis_pool};
pub use server::{GatewayServer, ServerBuilder, build_app};
