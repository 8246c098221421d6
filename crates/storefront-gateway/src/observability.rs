//! Gateway logging.
//!
//! One `fmt` layer behind a reloadable [`EnvFilter`]. `RUST_LOG` wins over
//! the configured `logging.level` for the whole process lifetime.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::health::SERVICE_NAME;

const DEFAULT_LEVEL: &str = "info";

/// Transport crates that are chatty at debug and below.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "tower", "redis"];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Filter directives for a configured level.
///
/// Gateway crates log at `level`; transport crates never go below `warn`
/// unless the level is stricter already.
pub fn gateway_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let transport = match level.as_str() {
        "error" | "off" => level.as_str(),
        _ => "warn",
    };

    let mut directives = level.clone();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}={transport}"));
    }
    directives
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(gateway_directives(level)).unwrap_or_else(|e| {
        eprintln!("invalid log level {level:?} ({e}); using {DEFAULT_LEVEL}");
        EnvFilter::new(gateway_directives(DEFAULT_LEVEL))
    })
}

pub fn init_tracing() {
    init_tracing_with_level(DEFAULT_LEVEL);
}

pub fn init_tracing_with_level(level: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) if std::env::var_os("RUST_LOG").is_some() => filter,
        _ => filter_for(level),
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().compact().with_target(true))
        .try_init();
}

/// Switches to the configured level once the config file has been read.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::debug!("RUST_LOG set; ignoring logging.level");
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    match handle.modify(|filter| *filter = filter_for(level)) {
        Ok(()) => tracing::debug!(level, "log level applied"),
        Err(e) => tracing::warn!(error = %e, "log level could not be applied"),
    }
}

pub fn shutdown_tracing() {
    tracing::info!(
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        "gateway stopped"
    );
}
