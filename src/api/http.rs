//! HTTP provider client
//!
//! Talks to a JSON locator service:
//! - `GET {base}/tracks/{id}/audio` -> `{"url": "...", "fallback_url": "..."}`
//! - `GET {base}/tracks/{id}/video` -> `{"url": "..."}` or 404
//! - `GET {base}/lyrics?q=...` -> `{"lyric": "..."}`

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use tracing::debug;

use super::provider::{LocatorProvider, PrimaryLocators, ProviderError, Reachability};
use crate::features::settings::NetworkSettings;

const USER_AGENT: &str = concat!("rhapsode/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct VideoResponse {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct LyricResponse {
    #[serde(default)]
    lyric: String,
}

/// Provider backed by a remote HTTP service
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(settings: &NetworkSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.provider_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn track_url(&self, track_id: &str, stream: &str) -> String {
        format!(
            "{}/tracks/{}/{}",
            self.base_url,
            urlencoding::encode(track_id),
            stream
        )
    }
}

impl LocatorProvider for HttpProvider {
    async fn resolve_primary(&self, track_id: &str) -> Result<PrimaryLocators, ProviderError> {
        let url = self.track_url(track_id, "audio");
        debug!("Resolving audio locator: {}", url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let locators: PrimaryLocators = response.json().await?;
        if locators.url.is_empty() {
            return Err(ProviderError::Decode(format!(
                "Empty URL returned for track {}",
                track_id
            )));
        }
        Ok(locators)
    }

    async fn resolve_secondary(&self, track_id: &str) -> Result<Option<String>, ProviderError> {
        let url = self.track_url(track_id, "video");
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: VideoResponse = response.error_for_status()?.json().await?;
        Ok(body.url.filter(|u| !u.is_empty()))
    }

    async fn fetch_lyric_text(&self, query: &str) -> Result<String, ProviderError> {
        let url = format!("{}/lyrics?q={}", self.base_url, urlencoding::encode(query));
        let body: LyricResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.lyric)
    }

    async fn probe(&self, url: &str) -> Reachability {
        // A one-byte range request is enough to learn whether the URL is still signed
        match self
            .client
            .get(url)
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Reachability::Reachable,
            Ok(response) => Reachability::Rejected(response.status().as_u16()),
            Err(e) => Reachability::Unreachable(e.to_string()),
        }
    }
}
