//! Dynamic supergraph acquisition from a registry URL.

use reqwest::header::{ACCEPT, AUTHORIZATION};

use crate::error::SupergraphError;

/// Media type that makes the registry return the raw file body.
pub const RAW_CONTENT_ACCEPT: &str = "application/vnd.github.raw";

/// Fetches supergraph SDL text from a registry.
///
/// When a token is configured it is sent as a bearer credential together
/// with an `Accept` header asking for raw content.
#[derive(Clone)]
pub struct RegistryFetcher {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RegistryFetcher {
    pub fn new(url: impl Into<String>, token: Option<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<String, SupergraphError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(ACCEPT, RAW_CONTENT_ACCEPT);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SupergraphError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for RegistryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryFetcher")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
