//! Secondary stream alignment and overlay publishing
//!
//! The audio element is the master clock. The bridge owns the video element,
//! mirrors transport actions onto it and, on a fixed interval while both are
//! playing, corrects drift:
//! - drift above the hard threshold: seek the video to the audio time
//! - drift above the nudge threshold: scale the video rate against the drift
//! - otherwise: restore the audio rate
//!
//! It also pushes `OverlaySnapshot`s to an external renderer whenever the
//! active lyric line changes, plus a heartbeat while the host surface is hidden.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::media::{MediaElement, MediaEvent};
use crate::features::settings::SyncSettings;
use crate::utils::Clock;

/// Transport part of an overlay snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportState {
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub playing: bool,
}

/// Compact state pushed to the overlay renderer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySnapshot {
    pub current_line: Option<String>,
    pub next_line: Option<String>,
    pub transport: TransportState,
}

/// Commands sent back by the overlay renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", content = "value")]
pub enum OverlayCommand {
    TogglePlay,
    Seek(u64),
}

pub type OverlaySender = mpsc::UnboundedSender<OverlaySnapshot>;

/// Outcome of a drift check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftCorrection {
    /// Not due, or nothing to align
    Skipped,
    /// Within tolerance; rate restored
    InSync,
    Nudged { drift_ms: i64, rate: f64 },
    HardSeek { drift_ms: i64, to_ms: u64 },
}

pub struct SyncBridge {
    secondary: Box<dyn MediaElement>,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    /// Session generation the video is bound to
    generation: Option<u64>,
    last_drift_check_ms: u64,
    overlay: Option<OverlaySender>,
    surface_visible: bool,
    last_pushed_line: Option<Option<usize>>,
    last_push_ms: u64,
}

impl std::fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("generation", &self.generation)
            .field("surface_visible", &self.surface_visible)
            .finish_non_exhaustive()
    }
}

impl SyncBridge {
    pub fn new(secondary: Box<dyn MediaElement>, settings: SyncSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            secondary,
            settings,
            clock,
            generation: None,
            last_drift_check_ms: 0,
            overlay: None,
            surface_visible: true,
            last_pushed_line: None,
            last_push_ms: 0,
        }
    }

    pub fn set_overlay_sink(&mut self, sink: OverlaySender) {
        self.overlay = Some(sink);
    }

    /// Whether the host surface is currently rendering
    pub fn set_surface_visible(&mut self, visible: bool) {
        self.surface_visible = visible;
    }

    pub fn is_bound(&self) -> bool {
        self.generation.is_some()
    }

    /// Drop the current video and its pending events
    pub fn unbind(&mut self) {
        if let Some(generation) = self.generation.take() {
            debug!("Video unbound from generation {}", generation);
        }
        self.secondary.unload();
        self.last_pushed_line = None;
    }

    /// Tear down the old video and attach `video_url` for `generation`,
    /// aligned to the primary's current state
    pub fn bind(&mut self, generation: u64, video_url: Option<&str>, primary: &dyn MediaElement) {
        self.unbind();
        let Some(url) = video_url else {
            return;
        };

        if let Err(e) = self.secondary.load(url) {
            warn!("Video failed to load, playing audio only: {}", e);
            return;
        }
        self.generation = Some(generation);
        self.last_drift_check_ms = self.clock.now_ms();
        self.secondary.seek(primary.current_time_ms());
        self.secondary.set_playback_rate(primary.playback_rate());
        if !primary.is_paused() {
            self.mirror_play();
        }
        debug!("Video bound to generation {}", generation);
    }

    pub fn mirror_play(&mut self) {
        if self.is_bound() {
            if let Err(e) = self.secondary.play() {
                warn!("Video refused to play: {}", e);
            }
        }
    }

    pub fn mirror_pause(&mut self) {
        if self.is_bound() {
            self.secondary.pause();
        }
    }

    pub fn mirror_seek(&mut self, position_ms: u64) {
        if self.is_bound() {
            self.secondary.seek(position_ms);
            self.last_drift_check_ms = self.clock.now_ms();
        }
        // Force a fresh overlay push after a seek
        self.last_pushed_line = None;
    }

    /// Drain video events; a failed video degrades to audio only
    pub fn poll_secondary(&mut self) {
        for event in self.secondary.take_events() {
            match event {
                MediaEvent::Failed(reason) => {
                    warn!("Video stream failed, playing audio only: {}", reason);
                    self.unbind();
                    return;
                }
                MediaEvent::Ended => debug!("Video stream ended before audio"),
                MediaEvent::Ready { .. } => {}
            }
        }
    }

    /// Run a drift check if the interval has elapsed
    pub fn check_drift(&mut self, primary: &dyn MediaElement) -> DriftCorrection {
        if !self.is_bound() || primary.is_paused() || self.secondary.is_paused() {
            return DriftCorrection::Skipped;
        }
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_drift_check_ms) < self.settings.drift_check_interval_ms {
            return DriftCorrection::Skipped;
        }
        self.last_drift_check_ms = now;
        self.correct(primary)
    }

    fn correct(&mut self, primary: &dyn MediaElement) -> DriftCorrection {
        let audio_ms = primary.current_time_ms();
        let video_ms = self.secondary.current_time_ms();
        let drift_ms = video_ms as i64 - audio_ms as i64;
        let base_rate = primary.playback_rate();

        if drift_ms.unsigned_abs() > self.settings.hard_seek_threshold_ms {
            info!("Video drift {} ms, seeking to {} ms", drift_ms, audio_ms);
            self.secondary.seek(audio_ms);
            self.secondary.set_playback_rate(base_rate);
            return DriftCorrection::HardSeek {
                drift_ms,
                to_ms: audio_ms,
            };
        }

        if drift_ms.unsigned_abs() > self.settings.nudge_threshold_ms {
            let max = self.settings.max_rate_adjustment;
            // 10 s of drift would mean a 100% correction; capped at `max`
            let adjustment = (drift_ms as f64 / 10_000.0).clamp(-max, max);
            let rate = base_rate * (1.0 - adjustment);
            debug!("Video drift {} ms, nudging rate to {:.3}", drift_ms, rate);
            self.secondary.set_playback_rate(rate);
            return DriftCorrection::Nudged { drift_ms, rate };
        }

        if (self.secondary.playback_rate() - base_rate).abs() > f64::EPSILON {
            self.secondary.set_playback_rate(base_rate);
        }
        DriftCorrection::InSync
    }

    /// Push a snapshot when `line` changed, or on the heartbeat while the
    /// surface is hidden. Returns whether a snapshot was sent.
    pub fn publish(
        &mut self,
        line: Option<usize>,
        snapshot: impl FnOnce() -> OverlaySnapshot,
    ) -> bool {
        let Some(sink) = &self.overlay else {
            return false;
        };
        let now = self.clock.now_ms();
        let changed = self.last_pushed_line != Some(line);
        let heartbeat_due = !self.surface_visible
            && now.saturating_sub(self.last_push_ms) >= self.settings.overlay_heartbeat_ms;

        if !changed && !heartbeat_due {
            return false;
        }

        if sink.send(snapshot()).is_err() {
            debug!("Overlay receiver dropped");
            self.overlay = None;
            return false;
        }
        self.last_pushed_line = Some(line);
        self.last_push_ms = now;
        true
    }
}
