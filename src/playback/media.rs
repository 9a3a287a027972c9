//! Media element abstraction
//!
//! The session drives an audio element and a paired video element through
//! `MediaElement`. Loading a new source drops every pending event of the old
//! one, so no two tracks ever hold live bindings at the same time.

use std::sync::Arc;

use tracing::debug;

use crate::utils::Clock;

/// Notifications drained from an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Metadata is available
    Ready { duration_ms: u64 },
    /// Playback reached the end of the source
    Ended,
    /// The source could not be played
    Failed(String),
}

/// Errors from a media element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The engine refused to start or load
    StartRefused(String),
    /// `play` called with nothing loaded
    NoSource,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::StartRefused(e) => write!(f, "Playback refused to start: {}", e),
            MediaError::NoSource => write!(f, "No media source loaded"),
        }
    }
}

impl std::error::Error for MediaError {}

/// A playable element (audio or video)
pub trait MediaElement: Send {
    /// Replace the source; clears pending events and resets position and rate
    fn load(&mut self, url: &str) -> Result<(), MediaError>;
    /// Drop the source and every pending event
    fn unload(&mut self);
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self);
    fn seek(&mut self, position_ms: u64);
    fn current_time_ms(&self) -> u64;
    /// Known once metadata has loaded
    fn duration_ms(&self) -> Option<u64>;
    fn is_paused(&self) -> bool;
    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&mut self, rate: f64);
    /// Drain pending notifications
    fn take_events(&mut self) -> Vec<MediaEvent>;
}

/// Wall-clock driven element for headless runs
///
/// Every source is treated as lasting `track_length_ms`. Metadata becomes
/// available on the first drain after `load`.
pub struct SimulatedMedia {
    label: &'static str,
    clock: Arc<dyn Clock>,
    track_length_ms: u64,
    source: Option<String>,
    /// Position at the last play/pause/seek/rate change
    base_position_ms: u64,
    /// Clock time when playback last (re)started
    playing_since_ms: Option<u64>,
    rate: f64,
    ready: bool,
    ended: bool,
    events: Vec<MediaEvent>,
}

impl std::fmt::Debug for SimulatedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMedia")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("position_ms", &self.current_time_ms())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl SimulatedMedia {
    pub fn new(label: &'static str, clock: Arc<dyn Clock>, track_length_ms: u64) -> Self {
        Self {
            label,
            clock,
            track_length_ms,
            source: None,
            base_position_ms: 0,
            playing_since_ms: None,
            rate: 1.0,
            ready: false,
            ended: false,
            events: Vec::new(),
        }
    }

    /// Fold elapsed play time into the base position
    fn settle(&mut self) {
        if self.playing_since_ms.is_some() {
            let now = self.clock.now_ms();
            self.base_position_ms = self.position_at(now);
            self.playing_since_ms = Some(now);
        }
    }

    fn position_at(&self, now_ms: u64) -> u64 {
        let elapsed = self
            .playing_since_ms
            .map(|since| (now_ms.saturating_sub(since) as f64 * self.rate) as u64)
            .unwrap_or(0);
        (self.base_position_ms + elapsed).min(self.track_length_ms)
    }
}

impl MediaElement for SimulatedMedia {
    fn load(&mut self, url: &str) -> Result<(), MediaError> {
        if url.is_empty() {
            return Err(MediaError::StartRefused("empty URL".into()));
        }
        debug!("[{}] load {}", self.label, url);
        self.source = Some(url.to_string());
        self.base_position_ms = 0;
        self.playing_since_ms = None;
        self.rate = 1.0;
        self.ready = false;
        self.ended = false;
        self.events.clear();
        Ok(())
    }

    fn unload(&mut self) {
        self.source = None;
        self.base_position_ms = 0;
        self.playing_since_ms = None;
        self.ready = false;
        self.ended = false;
        self.events.clear();
    }

    fn play(&mut self) -> Result<(), MediaError> {
        if self.source.is_none() {
            return Err(MediaError::NoSource);
        }
        if self.playing_since_ms.is_none() {
            if self.base_position_ms >= self.track_length_ms {
                self.base_position_ms = 0;
                self.ended = false;
            }
            self.playing_since_ms = Some(self.clock.now_ms());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.settle();
        self.playing_since_ms = None;
    }

    fn seek(&mut self, position_ms: u64) {
        self.settle();
        self.base_position_ms = position_ms.min(self.track_length_ms);
        self.ended = false;
    }

    fn current_time_ms(&self) -> u64 {
        self.position_at(self.clock.now_ms())
    }

    fn duration_ms(&self) -> Option<u64> {
        self.ready.then_some(self.track_length_ms)
    }

    fn is_paused(&self) -> bool {
        self.playing_since_ms.is_none()
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.settle();
        self.rate = rate;
    }

    fn take_events(&mut self) -> Vec<MediaEvent> {
        if self.source.is_some() {
            if !self.ready {
                self.ready = true;
                self.events.push(MediaEvent::Ready {
                    duration_ms: self.track_length_ms,
                });
            }
            if !self.ended && !self.is_paused() && self.current_time_ms() >= self.track_length_ms
            {
                self.ended = true;
                self.pause();
                self.events.push(MediaEvent::Ended);
            }
        }
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn media(length_ms: u64) -> (SimulatedMedia, ManualClock) {
        let clock = ManualClock::new(0);
        (
            SimulatedMedia::new("test", Arc::new(clock.clone()), length_ms),
            clock,
        )
    }

    #[test]
    fn test_position_follows_clock_and_rate() {
        let (mut m, clock) = media(60_000);
        m.load("u").unwrap();
        m.play().unwrap();
        clock.advance(1_000);
        assert_eq!(m.current_time_ms(), 1_000);

        m.set_playback_rate(2.0);
        clock.advance(1_000);
        assert_eq!(m.current_time_ms(), 3_000);

        m.pause();
        clock.advance(5_000);
        assert_eq!(m.current_time_ms(), 3_000);
    }

    #[test]
    fn test_ready_then_ended() {
        let (mut m, clock) = media(2_000);
        m.load("u").unwrap();
        assert_eq!(m.duration_ms(), None);
        assert_eq!(m.take_events(), vec![MediaEvent::Ready { duration_ms: 2_000 }]);
        assert_eq!(m.duration_ms(), Some(2_000));

        m.play().unwrap();
        clock.advance(2_500);
        assert_eq!(m.take_events(), vec![MediaEvent::Ended]);
        assert!(m.is_paused());
        assert!(m.take_events().is_empty());
    }

    #[test]
    fn test_load_discards_old_events() {
        let (mut m, _clock) = media(2_000);
        m.load("old").unwrap();
        m.seek(1_500);
        m.load("new").unwrap();
        assert_eq!(m.current_time_ms(), 0);
        assert_eq!(m.source.as_deref(), Some("new"));
        assert!(m.play().is_ok());
        m.unload();
        assert_eq!(m.play(), Err(MediaError::NoSource));
    }
}
