use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use storefront_supergraph::SubgraphEndpoint;

/// Signing secret used when none is configured. Rejected in production.
pub const DEFAULT_SESSION_SECRET: &str = "storefront-dev-secret";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Deployment profile (`NODE_ENV`)
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub supergraph: SupergraphConfig,
    /// Admin reload surface
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Redis shared by the response cache and the production session store
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.supergraph.fetch_timeout_ms == 0 {
            return Err("supergraph.fetch_timeout_ms must be > 0".into());
        }
        if self.supergraph.poll_interval_ms == 0 {
            return Err("supergraph.poll_interval_ms must be > 0".into());
        }
        match self.supergraph.sdl_url.as_deref() {
            Some(raw) => {
                let parsed = url::Url::parse(raw)
                    .map_err(|e| format!("supergraph.sdl_url is not a valid URL: {e}"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err("supergraph.sdl_url must use http or https".into());
                }
            }
            None if self.supergraph.subgraphs.is_empty() => {
                return Err("supergraph.subgraphs must not be empty without sdl_url".into());
            }
            None => {}
        }
        if let Some(empty) = self
            .supergraph
            .subgraphs
            .iter()
            .find(|s| s.name.is_empty() || s.url.is_empty())
        {
            return Err(format!(
                "subgraph '{}' must have a name and a url",
                empty.name
            ));
        }
        if self.session.secret.is_empty() {
            return Err("session.secret must not be empty".into());
        }
        if self.profile.is_production() && self.session.secret == DEFAULT_SESSION_SECRET {
            return Err("session.secret must be set in production".into());
        }
        if self.session.max_age_secs == 0 {
            return Err("session.max_age_secs must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip: std::net::IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }

    /// Whether the supergraph comes from a registry URL.
    pub fn uses_registry(&self) -> bool {
        self.supergraph.sdl_url.is_some()
    }

    /// Cache is on when a shared store exists or debugging was requested.
    pub fn cache_enabled(&self) -> bool {
        self.redis.url.is_some() || self.cache.debug
    }
}

/// Deployment profile. Anything other than `production` is development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl From<String> for Profile {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Self::Production
        } else {
            Self::Development
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    4000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupergraphConfig {
    /// Registry URL serving the supergraph SDL. Enables dynamic mode.
    #[serde(default)]
    pub sdl_url: Option<String>,
    /// Bearer credential for the registry
    #[serde(default)]
    pub sdl_token: Option<String>,
    /// Subgraphs composed in static mode
    #[serde(default = "default_subgraphs")]
    pub subgraphs: Vec<SubgraphEndpoint>,
    /// Static re-poll interval (development only)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_subgraphs() -> Vec<SubgraphEndpoint> {
    vec![
        SubgraphEndpoint::new("products", "http://localhost:4001/graphql"),
        SubgraphEndpoint::new("customers", "http://localhost:4002/graphql"),
        SubgraphEndpoint::new("content", "http://localhost:4003/graphql"),
        SubgraphEndpoint::new("orders", "http://localhost:4004/graphql"),
    ]
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl SupergraphConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SupergraphConfig {
    fn default() -> Self {
        Self {
            sdl_url: None,
            sdl_token: None,
            subgraphs: default_subgraphs(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// Shared secret for `/admin/reload-supergraph`
    #[serde(default)]
    pub reload_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_session_secret")]
    pub secret: String,
    #[serde(default = "default_session_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cookie_name() -> String {
    storefront_session::cookies::DEFAULT_COOKIE_NAME.into()
}
fn default_session_secret() -> String {
    DEFAULT_SESSION_SECRET.into()
}
fn default_session_max_age_secs() -> u64 {
    60 * 60 * 24
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secret: default_session_secret(),
            max_age_secs: default_session_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Emit `x-cache: HIT|MISS` on GraphQL responses
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// TTL applied to cached responses
    #[serde(default = "default_cache_max_age_secs")]
    pub default_max_age_secs: u64,
}

fn default_cache_namespace() -> String {
    storefront_cache::backend::DEFAULT_NAMESPACE.into()
}
fn default_cache_max_age_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            debug: false,
            namespace: default_cache_namespace(),
            default_max_age_secs: default_cache_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_pool_size() -> usize {
    10
}
fn default_redis_timeout_ms() -> u64 {
    2_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    /// Allowed origins; credentials are allowed for these
    #[serde(default)]
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};

    use super::GatewayConfig;

    /// Default configuration file name.
    pub const DEFAULT_CONFIG_FILE: &str = "storefront.toml";

    /// Flat environment names of the deployed gateway and the keys they set.
    const FLAT_ENV_KEYS: [(&str, &str); 10] = [
        ("PORT", "server.port"),
        ("NODE_ENV", "profile"),
        ("SUPERGRAPH_SDL_URL", "supergraph.sdl_url"),
        ("SUPERGRAPH_SDL_TOKEN", "supergraph.sdl_token"),
        ("SUPERGRAPH_RELOAD_TOKEN", "admin.reload_token"),
        ("CACHE_DEBUG", "cache.debug"),
        ("CACHE_NAMESPACE", "cache.namespace"),
        ("REDIS_URL", "redis.url"),
        ("SESSION_SECRET", "session.secret"),
        ("LOG_LEVEL", "logging.level"),
    ];

    /// Subgraph URL overrides, by subgraph name.
    const SUBGRAPH_URL_ENV: [(&str, &str); 4] = [
        ("products", "PRODUCTS_URL"),
        ("customers", "CUSTOMERS_URL"),
        ("content", "CONTENT_URL"),
        ("orders", "ORDERS_URL"),
    ];

    pub fn load_config(path: Option<&str>) -> Result<GatewayConfig, String> {
        let env: HashMap<String, String> = std::env::vars().collect();
        load_config_with_env(path, &env)
    }

    /// Loads configuration from an optional TOML file and the given
    /// environment.
    ///
    /// Precedence, lowest first: file, `STOREFRONT__SECTION__KEY`, flat
    /// names such as `PORT` or `SUPERGRAPH_SDL_URL`.
    pub fn load_config_with_env(
        path: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<GatewayConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., STOREFRONT__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("STOREFRONT")
                .try_parsing(true)
                .separator("__")
                .source(Some(env.clone())),
        );
        builder = apply_flat_env(builder, env)?;

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let mut merged: GatewayConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;

        for (name, var) in SUBGRAPH_URL_ENV {
            if let Some(url) = non_empty(env, var)
                && let Some(subgraph) = merged
                    .supergraph
                    .subgraphs
                    .iter_mut()
                    .find(|s| s.name == name)
            {
                subgraph.url = url.to_string();
            }
        }

        merged.validate()?;
        Ok(merged)
    }

    fn apply_flat_env(
        mut builder: ConfigBuilder<DefaultState>,
        env: &HashMap<String, String>,
    ) -> Result<ConfigBuilder<DefaultState>, String> {
        for (var, key) in FLAT_ENV_KEYS {
            builder = builder
                .set_override_option(key, non_empty(env, var).map(str::to_string))
                .map_err(|e| format!("invalid {var}: {e}"))?;
        }

        if let Some(origins) = non_empty(env, "CORS_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            builder = builder
                .set_override("cors.origins", origins)
                .map_err(|e| format!("invalid CORS_ORIGINS: {e}"))?;
        }

        Ok(builder)
    }

    fn non_empty<'a>(env: &'a HashMap<String, String>, var: &str) -> Option<&'a str> {
        env.get(var).map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GatewayConfig::default();

        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.supergraph.subgraphs.len(), 4);
        assert_eq!(cfg.supergraph.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.cache.namespace, "bff:cache:v1:");
        assert_eq!(cfg.session.cookie_name, "storefront.sid");
        assert!(!cfg.uses_registry());
        assert!(!cfg.cache_enabled());
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(Profile::from("production".to_string()), Profile::Production);
        assert_eq!(Profile::from("PRODUCTION".to_string()), Profile::Production);
        assert_eq!(Profile::from("staging".to_string()), Profile::Development);
        assert_eq!(Profile::from(String::new()), Profile::Development);
    }

    #[test]
    fn test_validation_rules() {
        let mut cfg = GatewayConfig::default();
        cfg.supergraph.sdl_url = Some("ftp://registry/supergraph.graphql".into());
        assert!(cfg.validate().unwrap_err().contains("http or https"));

        let mut cfg = GatewayConfig::default();
        cfg.supergraph.subgraphs.clear();
        assert!(cfg.validate().unwrap_err().contains("subgraphs"));

        let mut cfg = GatewayConfig::default();
        cfg.profile = Profile::Production;
        assert!(cfg.validate().unwrap_err().contains("session.secret"));

        let mut cfg = GatewayConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().is_err());
    }
}
