//! Metadata/locator provider interface

use std::future::Future;

use serde::Deserialize;

/// Primary stream URL plus the alternate the provider offers for it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrimaryLocators {
    pub url: String,
    #[serde(default, alias = "fallbackUrl")]
    pub fallback_url: Option<String>,
}

/// Result of checking that a resolved URL will actually serve media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    /// The server answered with a non-success status (403, 404, ...)
    Rejected(u16),
    /// The request never got an answer
    Unreachable(String),
}

/// Errors returned by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    Network(String),
    Http(u16),
    Decode(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Network(e) => write!(f, "Network error: {}", e),
            ProviderError::Http(status) => write!(f, "HTTP status {}", status),
            ProviderError::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ProviderError::Http(status.as_u16())
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Source of playable locators and lyric text for tracks
pub trait LocatorProvider: Send + Sync + 'static {
    /// Fresh audio URL (and optional alternate) for a track
    fn resolve_primary(
        &self,
        track_id: &str,
    ) -> impl Future<Output = Result<PrimaryLocators, ProviderError>> + Send;

    /// Background video URL, if the track has one
    fn resolve_secondary(
        &self,
        track_id: &str,
    ) -> impl Future<Output = Result<Option<String>, ProviderError>> + Send;

    /// Raw lyric text for a free-form query
    fn fetch_lyric_text(&self, query: &str)
    -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Check that `url` serves content
    fn probe(&self, url: &str) -> impl Future<Output = Reachability> + Send;
}
