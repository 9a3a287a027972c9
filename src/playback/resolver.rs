//! Track resolution
//!
//! Turns a `ResolveRequest` issued by the session into a `Resolution`:
//! 1. Use the cached audio URL when the session found one
//! 2. Otherwise fetch a fresh locator, retrying with exponential backoff
//! 3. Probe the fresh URL; on rejection substitute the fallback locator
//! 4. Resolve the video stream and missing lyrics; failures there are absorbed
//!
//! The resolver never touches session state. Everything it learns travels
//! back inside the `Resolution` and is committed (or discarded) by the session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{LocatorProvider, ProviderError, Reachability};
use crate::database::Track;
use crate::features::settings::PlaybackSettings;

/// Work order for one resolution attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    /// Session generation that issued the request
    pub generation: u64,
    /// Snapshot of the track at selection time
    pub track: Track,
    /// Audio URL from the locator cache
    pub cached_audio: Option<String>,
    /// Video URL from the locator cache
    pub cached_video: Option<String>,
    /// Ignore the cached URLs
    pub force_fresh: bool,
    /// Whether to look up the background video at all
    pub want_video: bool,
    /// Media start attempts already made for this generation
    pub media_attempt: u32,
    /// Wait before starting
    pub delay: Duration,
}

/// Everything learned while resolving a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub track_id: String,
    pub audio_url: String,
    pub audio_from_cache: bool,
    /// Fallback URL reported by the provider, if any
    pub fallback_url: Option<String>,
    /// The primary URL was rejected and `audio_url` is the fallback
    pub used_fallback: bool,
    pub video_url: Option<String>,
    pub video_from_cache: bool,
    /// Lyric text fetched because the track had none
    pub fetched_lyrics: Option<String>,
    pub media_attempt: u32,
}

/// Errors that end a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Every fetch attempt failed
    LocatorFetch {
        track_id: String,
        source: ProviderError,
    },
    /// The fresh URL was rejected and no fallback exists
    Rejected { track_id: String, status: u16 },
    /// The fresh URL did not answer and no fallback exists
    Unreachable { track_id: String, reason: String },
    /// Local track with no stored path
    NoLocator { track_id: String },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::LocatorFetch { track_id, source } => {
                write!(f, "Could not resolve track {}: {}", track_id, source)
            }
            ResolveError::Rejected { track_id, status } => {
                write!(f, "Stream for track {} rejected with status {}", track_id, status)
            }
            ResolveError::Unreachable { track_id, reason } => {
                write!(f, "Stream for track {} unreachable: {}", track_id, reason)
            }
            ResolveError::NoLocator { track_id } => {
                write!(f, "Track {} has no playable locator", track_id)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Attempt count and backoff for fresh fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &PlaybackSettings) -> Self {
        Self {
            attempts: settings.retry_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&PlaybackSettings::default())
    }
}

/// Resolves tracks against a locator provider
pub struct Resolver<P> {
    provider: Arc<P>,
    retry: RetryPolicy,
}

impl<P> Clone for Resolver<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            retry: self.retry,
        }
    }
}

impl<P: LocatorProvider> Resolver<P> {
    pub fn new(provider: Arc<P>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub async fn resolve(&self, request: ResolveRequest) -> Result<Resolution, ResolveError> {
        if !request.delay.is_zero() {
            tokio::time::sleep(request.delay).await;
        }

        let track = &request.track;
        let audio = self.resolve_audio(&request).await?;

        let (video, fetched_lyrics) = tokio::join!(
            self.resolve_video(&request),
            self.resolve_lyrics(track)
        );
        let (video_url, video_from_cache) = video;

        Ok(Resolution {
            track_id: track.id.clone(),
            audio_url: audio.url,
            audio_from_cache: audio.from_cache,
            fallback_url: audio.fallback_url,
            used_fallback: audio.used_fallback,
            video_url,
            video_from_cache,
            fetched_lyrics,
            media_attempt: request.media_attempt,
        })
    }

    async fn resolve_audio(&self, request: &ResolveRequest) -> Result<AudioLocator, ResolveError> {
        let track = &request.track;

        if track.is_local {
            return track
                .primary_locator
                .clone()
                .map(|url| AudioLocator {
                    url,
                    from_cache: true,
                    fallback_url: None,
                    used_fallback: false,
                })
                .ok_or_else(|| ResolveError::NoLocator {
                    track_id: track.id.clone(),
                });
        }

        if !request.force_fresh {
            if let Some(url) = &request.cached_audio {
                debug!("Audio locator cache hit for {}", track.id);
                return Ok(AudioLocator {
                    url: url.clone(),
                    from_cache: true,
                    fallback_url: track.fallback_locator.clone(),
                    used_fallback: false,
                });
            }
        }

        let mut last_error = None;
        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                let delay = self.retry.delay_after(attempt - 1);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    track.id,
                    delay,
                    attempt + 1,
                    self.retry.attempts
                );
                tokio::time::sleep(delay).await;
            }

            match self.fetch_fresh(track).await {
                Ok(locator) => return Ok(locator),
                Err(e) => {
                    warn!("Resolution attempt {} for {} failed: {}", attempt + 1, track.id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ResolveError::NoLocator {
            track_id: track.id.clone(),
        }))
    }

    async fn fetch_fresh(&self, track: &Track) -> Result<AudioLocator, ResolveError> {
        let locators = self
            .provider
            .resolve_primary(&track.id)
            .await
            .map_err(|source| ResolveError::LocatorFetch {
                track_id: track.id.clone(),
                source,
            })?;

        let fallback_url = locators
            .fallback_url
            .clone()
            .or_else(|| track.fallback_locator.clone());

        let failure = match self.provider.probe(&locators.url).await {
            Reachability::Reachable => {
                info!("Resolved fresh audio locator for {}", track.id);
                return Ok(AudioLocator {
                    url: locators.url,
                    from_cache: false,
                    fallback_url,
                    used_fallback: false,
                });
            }
            Reachability::Rejected(status) => ResolveError::Rejected {
                track_id: track.id.clone(),
                status,
            },
            Reachability::Unreachable(reason) => ResolveError::Unreachable {
                track_id: track.id.clone(),
                reason,
            },
        };

        match fallback_url {
            Some(url) => {
                warn!("{}; using fallback locator", failure);
                Ok(AudioLocator {
                    url: url.clone(),
                    from_cache: false,
                    fallback_url: Some(url),
                    used_fallback: true,
                })
            }
            None => Err(failure),
        }
    }

    async fn resolve_video(&self, request: &ResolveRequest) -> (Option<String>, bool) {
        if !request.want_video || request.track.is_local {
            return (None, false);
        }
        if !request.force_fresh {
            if let Some(url) = &request.cached_video {
                return (Some(url.clone()), true);
            }
        }
        match self.provider.resolve_secondary(&request.track.id).await {
            Ok(url) => (url, false),
            Err(e) => {
                warn!("Video lookup for {} failed, playing audio only: {}", request.track.id, e);
                (None, false)
            }
        }
    }

    async fn resolve_lyrics(&self, track: &Track) -> Option<String> {
        if track.lyric_text.as_deref().is_some_and(|t| !t.trim().is_empty()) {
            return None;
        }
        let query = track.lyric_query();
        if query.is_empty() {
            return None;
        }
        match self.provider.fetch_lyric_text(&query).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!("Lyric lookup for '{}' failed: {}", query, e);
                None
            }
        }
    }
}

struct AudioLocator {
    url: String,
    from_cache: bool,
    fallback_url: Option<String>,
    used_fallback: bool,
}
