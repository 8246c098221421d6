//! Supergraph acquisition errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while fetching, composing or activating a supergraph.
#[derive(Debug, Clone, Error)]
pub enum SupergraphError {
    /// Network or protocol failure talking to the registry or a subgraph.
    #[error("failed to fetch supergraph SDL: {0}")]
    Fetch(String),

    /// The fetch did not complete within the configured timeout.
    #[error("supergraph fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The registry answered with a non-2xx status.
    #[error("failed to fetch supergraph SDL: {status} {reason}")]
    Status { status: u16, reason: String },

    /// A reload was requested before any supergraph was loaded.
    #[error("supergraph updater not initialized")]
    NotInitialized,

    /// Another fetch is already running.
    #[error("supergraph reload already in progress")]
    ReloadInProgress,

    /// The SDL could not be turned into a routing table.
    #[error("invalid supergraph: {0}")]
    InvalidSupergraph(String),

    /// Subgraph schemas could not be combined.
    #[error("composition failed: {0}")]
    Composition(String),
}

impl From<reqwest::Error> for SupergraphError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}
