//! Playback session - the single source of truth for what is playing
//!
//! All state transitions happen synchronously on the caller's thread. Network
//! work is described by a `ResolveRequest` tagged with the session generation
//! at issue time; its result comes back through `complete_resolution`, which
//! commits only if that generation is still the active one. A newer selection
//! bumps the generation, so a late result from a superseded request is
//! dropped without touching any state.
//!
//! ## States
//! `Idle -> Resolving -> Playing <-> Paused`, with `Resolving -> Error` on a
//! terminal failure and `* -> Idle` when the playlist empties.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::events::{
    EventReceiver, EventSender, NowPlaying, PlaylistEvent, SessionEvent, SessionState,
};
use super::library::{Library, LibraryError};
use super::media::{MediaElement, MediaError, MediaEvent};
use super::navigator::{Advance, QueueNavigator};
use super::resolver::{Resolution, ResolveError, ResolveRequest, RetryPolicy};
use super::shuffle::ShuffleBag;
use super::sync_bridge::{OverlaySender, OverlaySnapshot, SyncBridge, TransportState};
use crate::cache::{CacheStats, LocatorCache, LocatorKey};
use crate::database::{SessionSnapshot, StateStore, Track, keys, save};
use crate::features::lyrics::{
    LyricDocument, TimelineState, compute_state, current_and_next_text, parse_lyrics_with_duration,
};
use crate::features::{PlayMode, Settings};
use crate::utils::{Clock, format_ms};

/// Extra media start attempts after the first refusal
const MEDIA_START_RETRIES: u32 = 1;

/// Errors surfaced by session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Selection outside the current playlist; nothing changed
    InvalidIndex { index: usize, len: usize },
    /// Locator resolution failed after fallback and retry
    Resolve(ResolveError),
    /// The media engine refused to start after the bounded retry
    MediaStart(MediaError),
    /// Loading took longer than the configured window
    Timeout,
    Library(LibraryError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidIndex { index, len } => {
                write!(f, "Invalid track index {} (playlist has {})", index, len)
            }
            SessionError::Resolve(e) => write!(f, "{}", e),
            SessionError::MediaStart(e) => write!(f, "{}", e),
            SessionError::Timeout => write!(f, "Loading timed out"),
            SessionError::Library(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<LibraryError> for SessionError {
    fn from(e: LibraryError) -> Self {
        SessionError::Library(e)
    }
}

/// Outcome of handing a resolution result back to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// A newer selection was made; nothing changed
    Superseded,
    Playing,
    /// Media refused to start; run this request (same generation) next
    Retry(ResolveRequest),
    Failed(SessionError),
}

/// The request currently allowed to commit
#[derive(Debug, Clone)]
struct InFlight {
    generation: u64,
    track_id: String,
}

pub struct PlaybackSession {
    settings: Settings,
    store: Arc<dyn StateStore>,
    cache: LocatorCache,
    library: Library,
    primary: Box<dyn MediaElement>,
    sync: SyncBridge,
    events: Option<EventSender>,

    state: SessionState,
    loading: bool,
    current_index: Option<usize>,
    play_mode: PlayMode,
    shuffle_bag: Option<ShuffleBag>,
    generation: u64,
    in_flight: Option<InFlight>,

    lyrics: Arc<LyricDocument>,
    timeline: Option<TimelineState>,

    resume_positions: HashMap<String, u64>,
    /// Position to restore once media metadata is known
    pending_resume: Option<u64>,
    last_saved_position_ms: u64,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state)
            .field("current_index", &self.current_index)
            .field("play_mode", &self.play_mode)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl PlaybackSession {
    pub fn new(
        settings: Settings,
        store: Arc<dyn StateStore>,
        primary: Box<dyn MediaElement>,
        secondary: Box<dyn MediaElement>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sync = SyncBridge::new(secondary, settings.sync.clone(), Arc::clone(&clock));
        Self {
            settings,
            store,
            cache: LocatorCache::new(clock),
            library: Library::new(),
            primary,
            sync,
            events: None,
            state: SessionState::Idle,
            loading: false,
            current_index: None,
            play_mode: PlayMode::default(),
            shuffle_bag: None,
            generation: 0,
            in_flight: None,
            lyrics: Arc::new(LyricDocument::placeholder()),
            timeline: None,
            resume_positions: HashMap::new(),
            pending_resume: None,
            last_saved_position_ms: 0,
        }
    }

    /// Start publishing events; replaces any previous subscriber
    pub fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn set_overlay_sink(&mut self, sink: OverlaySender) {
        self.sync.set_overlay_sink(sink);
    }

    pub fn set_surface_visible(&mut self, visible: bool) {
        self.sync.set_surface_visible(visible);
    }

    // ============ Accessors ============

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index
            .and_then(|i| self.library.current().tracks.get(i))
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` is still allowed to commit
    pub fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn lyrics(&self) -> &LyricDocument {
        &self.lyrics
    }

    pub fn timeline(&self) -> Option<&TimelineState> {
        self.timeline.as_ref()
    }

    /// Audio clock position
    pub fn position_ms(&self) -> u64 {
        self.primary.current_time_ms()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn resume_position(&self, track_id: &str) -> Option<u64> {
        self.resume_positions.get(track_id).copied()
    }

    // ============ Selection and resolution ============

    /// Select the track at `index` of the current playlist. With `replay`
    /// the track starts from the beginning, otherwise from its saved position.
    ///
    /// Returns the resolution work to run, or `None` when there is nothing to
    /// do (empty playlist, or the same track is already loading).
    pub fn select_track(
        &mut self,
        index: usize,
        replay: bool,
    ) -> Result<Option<ResolveRequest>, SessionError> {
        self.select_inner(index, replay, true)
    }

    fn select_inner(
        &mut self,
        index: usize,
        replay: bool,
        save_outgoing: bool,
    ) -> Result<Option<ResolveRequest>, SessionError> {
        let len = self.library.current().len();
        if len == 0 {
            self.go_idle();
            return Ok(None);
        }
        if index >= len {
            warn!("Rejected selection of index {} (playlist has {})", index, len);
            return Err(SessionError::InvalidIndex { index, len });
        }

        let track = self.library.current().tracks[index].clone();
        if self.state == SessionState::Resolving
            && self.current_index == Some(index)
            && self.in_flight.as_ref().is_some_and(|f| f.track_id == track.id)
        {
            debug!("{} is already loading", track.id);
            return Ok(None);
        }

        if save_outgoing {
            self.save_position();
        }

        self.generation += 1;
        let generation = self.generation;

        // Tear down the old pair before anything new is bound
        self.primary.unload();
        self.sync.unbind();

        self.pending_resume = if replay {
            None
        } else {
            self.saved_position_for(index, &track.id)
        };
        self.current_index = Some(index);
        self.follow_in_shuffle();
        self.last_saved_position_ms = 0;
        self.timeline = None;
        self.lyrics = Arc::new(parse_lyrics_with_duration(
            track.lyric_text.as_deref(),
            self.settings.lyrics.default_line_duration_ms,
        ));
        self.in_flight = Some(InFlight {
            generation,
            track_id: track.id.clone(),
        });

        self.library.current_mut().last_played_index = index;
        self.persist_index();

        info!(
            "Selected [{}] {} - {} (generation {})",
            index, track.title, track.artist, generation
        );
        self.emit(SessionEvent::NowPlaying(NowPlaying {
            index,
            track_id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            artwork: track.artwork.clone(),
        }));
        self.set_loading(true);
        self.set_state(SessionState::Resolving);

        Ok(Some(self.build_request(generation, track, false, 0, Duration::ZERO)))
    }

    fn saved_position_for(&self, index: usize, track_id: &str) -> Option<u64> {
        let playlist = self.library.current();
        self.resume_positions
            .get(track_id)
            .copied()
            .filter(|&pos| pos > 0)
            .or_else(|| {
                (playlist.last_played_index == index && playlist.last_played_position_ms > 0)
                    .then_some(playlist.last_played_position_ms)
            })
    }

    fn build_request(
        &mut self,
        generation: u64,
        track: Track,
        force_fresh: bool,
        media_attempt: u32,
        delay: Duration,
    ) -> ResolveRequest {
        let want_video = self.settings.playback.video_enabled;
        let (cached_audio, cached_video) = if track.is_local || force_fresh {
            (None, None)
        } else {
            let audio = self.cache.get(&LocatorKey::audio(&track.id));
            let video = if want_video {
                self.cache.get(&LocatorKey::video(&track.id))
            } else {
                None
            };
            (audio, video)
        };

        if cached_audio.is_some() {
            debug!("Audio locator for {} served from cache", track.id);
        }

        ResolveRequest {
            generation,
            track,
            cached_audio,
            cached_video,
            force_fresh,
            want_video,
            media_attempt,
            delay,
        }
    }

    /// Hand back the result of a request issued for `generation`
    pub fn complete_resolution(
        &mut self,
        generation: u64,
        result: Result<Resolution, ResolveError>,
    ) -> Completion {
        if !self.is_current(generation) {
            debug!("Discarding superseded resolution (generation {})", generation);
            return Completion::Superseded;
        }
        match result {
            Ok(resolution) => self.commit(generation, resolution),
            Err(e) => Completion::Failed(self.fail(SessionError::Resolve(e))),
        }
    }

    /// Abort the request for `generation` with `error` (e.g. a timeout)
    pub fn fail_resolution(&mut self, generation: u64, error: SessionError) -> Completion {
        if !self.is_current(generation) {
            debug!("Ignoring failure of superseded generation {}", generation);
            return Completion::Superseded;
        }
        Completion::Failed(self.fail(error))
    }

    fn commit(&mut self, generation: u64, res: Resolution) -> Completion {
        let Some(index) = self.library.current().position_of(&res.track_id) else {
            debug!("Resolved track {} is no longer in the playlist", res.track_id);
            self.in_flight = None;
            return Completion::Superseded;
        };
        self.current_index = Some(index);

        let ttl = self.settings.playback.cache_ttl();
        if !res.audio_from_cache {
            self.cache
                .put(LocatorKey::audio(&res.track_id), res.audio_url.clone(), ttl);
        }
        if let (Some(url), false) = (&res.video_url, res.video_from_cache) {
            self.cache
                .put(LocatorKey::video(&res.track_id), url.clone(), ttl);
        }

        {
            let track = &mut self.library.current_mut().tracks[index];
            if !track.is_local {
                track.primary_locator = Some(res.audio_url.clone());
                if res.fallback_url.is_some() {
                    track.fallback_locator = res.fallback_url.clone();
                }
            }
            if res.video_url.is_some() {
                track.video_locator = res.video_url.clone();
            }
            if let Some(text) = &res.fetched_lyrics {
                track.lyric_text = Some(text.clone());
            }
        }
        if let Some(text) = &res.fetched_lyrics {
            self.lyrics = Arc::new(parse_lyrics_with_duration(
                Some(text),
                self.settings.lyrics.default_line_duration_ms,
            ));
        }
        self.persist_playlists();

        if let Err(e) = self.start_media(&res.audio_url) {
            return self.media_start_failed(generation, index, res.media_attempt, e);
        }

        self.sync
            .bind(generation, res.video_url.as_deref(), self.primary.as_ref());
        self.in_flight = None;
        self.set_loading(false);
        self.set_state(SessionState::Playing);
        self.apply_pending_resume();

        info!(
            "Playing {} ({}{})",
            res.track_id,
            if res.audio_from_cache { "cached" } else { "fresh" },
            if res.used_fallback { ", fallback" } else { "" }
        );
        Completion::Playing
    }

    fn start_media(&mut self, url: &str) -> Result<(), MediaError> {
        self.primary.load(url)?;
        self.primary.play()
    }

    fn media_start_failed(
        &mut self,
        generation: u64,
        index: usize,
        attempt: u32,
        error: MediaError,
    ) -> Completion {
        self.primary.unload();
        let track = self.library.current().tracks[index].clone();
        // The locator may be the culprit; never serve it from cache again
        self.cache.invalidate(&LocatorKey::audio(&track.id));

        if attempt < MEDIA_START_RETRIES {
            let delay = RetryPolicy::from_settings(&self.settings.playback).delay_after(attempt);
            warn!(
                "Media start failed for {} ({}), retrying in {:?}",
                track.id, error, delay
            );
            return Completion::Retry(self.build_request(generation, track, true, attempt + 1, delay));
        }

        Completion::Failed(self.fail(SessionError::MediaStart(error)))
    }

    /// Terminal failure: release locks and surface the error
    fn fail(&mut self, error: SessionError) -> SessionError {
        error!("Playback failed: {}", error);
        self.in_flight = None;
        self.pending_resume = None;
        self.set_loading(false);
        self.set_state(SessionState::Error);
        self.emit(SessionEvent::Error(error.to_string()));
        error
    }

    fn apply_pending_resume(&mut self) {
        let Some(position) = self.pending_resume else {
            return;
        };
        let Some(duration) = self.primary.duration_ms() else {
            return;
        };
        let position = position.min(duration.saturating_sub(1));
        debug!("Resuming at {}", format_ms(position));
        self.primary.seek(position);
        self.sync.mirror_seek(position);
        self.pending_resume = None;
        self.last_saved_position_ms = position;
    }

    // ============ Media events and the tick loop ============

    /// Drain media notifications. A natural end returns the next request.
    pub fn poll_media(&mut self) -> Option<ResolveRequest> {
        self.sync.poll_secondary();

        let mut request = None;
        for event in self.primary.take_events() {
            match event {
                MediaEvent::Ready { duration_ms } => {
                    debug!("Media ready ({} long)", format_ms(duration_ms));
                    self.apply_pending_resume();
                }
                MediaEvent::Ended if self.state == SessionState::Playing => {
                    request = self.on_ended();
                }
                MediaEvent::Ended => {}
                MediaEvent::Failed(reason) => {
                    if matches!(self.state, SessionState::Playing | SessionState::Paused) {
                        self.primary.unload();
                        self.sync.unbind();
                        self.fail(SessionError::MediaStart(MediaError::StartRefused(reason)));
                    }
                }
            }
        }
        request
    }

    /// Natural end of the current track
    pub fn on_ended(&mut self) -> Option<ResolveRequest> {
        let track_id = self.current_track()?.id.clone();
        debug!("Track {} ended", track_id);

        // A finished track starts over next time
        self.resume_positions.insert(track_id, 0);
        self.library.current_mut().last_played_position_ms = 0;
        self.persist_resume();

        let target = self.navigate(Advance::TrackEnded)?;
        match self.select_inner(target, true, false) {
            Ok(request) => request,
            Err(e) => {
                warn!("Could not advance after track end: {}", e);
                None
            }
        }
    }

    /// Recompute derived state at audio time `time_ms`
    pub fn on_tick(&mut self, time_ms: u64) {
        let timeline = compute_state(&self.lyrics, time_ms);

        if self.state == SessionState::Playing
            && time_ms.abs_diff(self.last_saved_position_ms)
                >= self.settings.playback.position_save_interval_ms
        {
            self.save_position_at(time_ms);
        }

        self.sync.check_drift(self.primary.as_ref());

        let lyrics = &self.lyrics;
        let primary = self.primary.as_ref();
        let playing = self.state == SessionState::Playing;
        self.sync.publish(timeline.active_line, || {
            overlay_snapshot(lyrics, &timeline, primary, playing)
        });

        self.timeline = Some(timeline);
    }

    /// User seek: move both streams and rebuild lyric state from scratch
    pub fn on_seek(&mut self, time_ms: u64) {
        let target = match self.primary.duration_ms() {
            Some(duration) => time_ms.min(duration.saturating_sub(1)),
            None => time_ms,
        };

        match self.state {
            SessionState::Playing | SessionState::Paused => {
                self.primary.seek(target);
                self.sync.mirror_seek(target);
                self.timeline = Some(compute_state(&self.lyrics, target));
                self.save_position_at(target);
            }
            SessionState::Resolving => {
                self.pending_resume = Some(target);
            }
            SessionState::Idle | SessionState::Error => {}
        }
    }

    // ============ Transport ============

    pub fn next(&mut self) -> Result<Option<ResolveRequest>, SessionError> {
        self.advance(Advance::UserNext)
    }

    pub fn prev(&mut self) -> Result<Option<ResolveRequest>, SessionError> {
        self.advance(Advance::UserPrev)
    }

    fn advance(&mut self, advance: Advance) -> Result<Option<ResolveRequest>, SessionError> {
        match self.navigate(advance) {
            Some(target) => self.select_track(target, true),
            None => {
                self.go_idle();
                Ok(None)
            }
        }
    }

    fn navigate(&mut self, advance: Advance) -> Option<usize> {
        let len = self.library.current().len();
        QueueNavigator::new(len, self.current_index, self.play_mode, self.shuffle_bag.as_mut())
            .target(advance)
    }

    /// Play/pause. From `Error` or `Idle` this re-selects the current track.
    pub fn toggle_pause(&mut self) -> Result<Option<ResolveRequest>, SessionError> {
        match self.state {
            SessionState::Playing => {
                self.primary.pause();
                self.sync.mirror_pause();
                self.save_position();
                self.set_state(SessionState::Paused);
                Ok(None)
            }
            SessionState::Paused => {
                if let Err(e) = self.primary.play() {
                    return Err(self.fail(SessionError::MediaStart(e)));
                }
                self.sync.mirror_play();
                self.set_state(SessionState::Playing);
                Ok(None)
            }
            SessionState::Resolving => Ok(None),
            SessionState::Idle | SessionState::Error => {
                if self.library.current().is_empty() {
                    return Ok(None);
                }
                self.select_track(self.current_index.unwrap_or(0), false)
            }
        }
    }

    /// Cycle Sequential -> Shuffle -> RepeatOne and persist the new mode
    pub fn toggle_play_mode(&mut self) -> PlayMode {
        self.set_play_mode(self.play_mode.next());
        self.play_mode
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.play_mode = mode;
        self.reset_shuffle_bag();
        info!("Play mode: {}", mode);
        self.persist(keys::PLAY_MODE, &mode);
        self.emit(SessionEvent::PlayModeChanged(mode));
    }

    /// New bag for shuffle mode; it never opens with the current track
    fn reset_shuffle_bag(&mut self) {
        let bag = match self.current_index {
            Some(current) => ShuffleBag::after(current),
            None => ShuffleBag::new(),
        };
        self.shuffle_bag = (self.play_mode == PlayMode::Shuffle).then_some(bag);
    }

    /// Keep the bag aware of tracks chosen without it
    fn follow_in_shuffle(&mut self) {
        if let (Some(bag), Some(index)) = (self.shuffle_bag.as_mut(), self.current_index) {
            bag.follow(index);
        }
    }

    // ============ Playlist operations ============

    pub fn add_track(&mut self, track: Track) -> Result<(), SessionError> {
        let event = self.library.add_track(track)?;
        self.emit(SessionEvent::Playlist(event));
        self.persist_playlists();
        Ok(())
    }

    pub fn remove_track(&mut self, track_id: &str) -> Result<Option<ResolveRequest>, SessionError> {
        self.remove_tracks(&[track_id.to_string()])
    }

    /// Remove several tracks, keeping the current one selected if it survives
    pub fn remove_tracks(
        &mut self,
        track_ids: &[String],
    ) -> Result<Option<ResolveRequest>, SessionError> {
        let previous_index = self.current_index;
        let previous_id = self.current_track().map(|t| t.id.clone());
        let removed_before = previous_index.map_or(0, |current| {
            track_ids
                .iter()
                .filter_map(|id| self.library.current().position_of(id))
                .filter(|&pos| pos < current)
                .collect::<HashSet<_>>()
                .len()
        });

        let removed = self.library.remove_tracks(track_ids);
        if removed.is_empty() {
            return match track_ids.first() {
                Some(id) => Err(LibraryError::UnknownTrack(id.clone()).into()),
                None => Ok(None),
            };
        }
        for (_, event) in removed {
            self.emit(SessionEvent::Playlist(event));
        }
        for id in track_ids {
            self.resume_positions.remove(id);
        }
        self.persist_playlists();
        self.persist_resume();

        let len = self.library.current().len();
        if len == 0 {
            self.go_idle();
            return Ok(None);
        }
        let Some(previous_index) = previous_index else {
            return Ok(None);
        };

        if let Some(pos) = previous_id.and_then(|id| self.library.current().position_of(&id)) {
            self.current_index = Some(pos);
            self.follow_in_shuffle();
            self.persist_index();
            return Ok(None);
        }

        // The current track itself was removed
        let target = previous_index.saturating_sub(removed_before).min(len - 1);
        match self.state {
            SessionState::Playing | SessionState::Paused | SessionState::Resolving => {
                self.select_inner(target, true, false)
            }
            SessionState::Idle | SessionState::Error => {
                self.current_index = Some(target);
                self.follow_in_shuffle();
                self.persist_index();
                Ok(None)
            }
        }
    }

    /// Reorder the current playlist by track ids
    pub fn reorder(&mut self, order: &[String]) {
        let current_id = self.current_track().map(|t| t.id.clone());
        let event = self.library.reorder(order);
        self.current_index = current_id.and_then(|id| self.library.current().position_of(&id));
        self.follow_in_shuffle();
        self.emit(SessionEvent::Playlist(event));
        self.persist_playlists();
        self.persist_index();
    }

    pub fn create_playlist(&mut self, name: &str) -> Result<String, SessionError> {
        let event = self.library.create_playlist(name)?;
        let id = match &event {
            PlaylistEvent::PlaylistCreated { id, .. } => id.clone(),
            _ => String::new(),
        };
        self.emit(SessionEvent::Playlist(event));
        self.persist_playlists();
        Ok(id)
    }

    pub fn rename_playlist(&mut self, id: &str, name: &str) -> Result<(), SessionError> {
        let event = self.library.rename_playlist(id, name)?;
        self.emit(SessionEvent::Playlist(event));
        self.persist_playlists();
        Ok(())
    }

    /// Make another playlist current and resume it where it was left
    pub fn switch_playlist(&mut self, id: &str) -> Result<Option<ResolveRequest>, SessionError> {
        if self.library.current_id() == id {
            return Ok(None);
        }
        if self.library.get(id).is_none() {
            return Err(LibraryError::UnknownPlaylist(id.to_string()).into());
        }
        self.save_position();
        let event = self.library.switch_to(id)?;
        self.emit(SessionEvent::Playlist(event));
        self.enter_current_playlist()
    }

    pub fn delete_playlist(&mut self, id: &str) -> Result<Option<ResolveRequest>, SessionError> {
        let was_current = self.library.current_id() == id;
        if was_current {
            self.save_position();
        }
        let events = self.library.delete_playlist(id)?;
        for event in events {
            self.emit(SessionEvent::Playlist(event));
        }
        self.persist_playlists();
        if was_current {
            self.enter_current_playlist()
        } else {
            Ok(None)
        }
    }

    fn enter_current_playlist(&mut self) -> Result<Option<ResolveRequest>, SessionError> {
        self.persist_index();
        let playlist = self.library.current();
        if playlist.is_empty() {
            self.go_idle();
            return Ok(None);
        }
        let index = playlist.last_played_index.min(playlist.len() - 1);
        // Nothing from the previous playlist may be considered loading
        self.in_flight = None;
        self.current_index = None;
        self.select_inner(index, false, false)
    }

    fn go_idle(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.primary.unload();
        self.sync.unbind();
        self.current_index = None;
        self.pending_resume = None;
        self.timeline = None;
        self.lyrics = Arc::new(LyricDocument::placeholder());
        self.set_loading(false);
        self.set_state(SessionState::Idle);
        self.persist_index();
    }

    // ============ Persistence ============

    /// Save the current audio position for the current track and playlist
    pub fn save_position(&mut self) {
        if matches!(self.state, SessionState::Playing | SessionState::Paused) {
            let position = self.primary.current_time_ms();
            self.save_position_at(position);
        }
    }

    fn save_position_at(&mut self, position_ms: u64) {
        let (Some(index), Some(track_id)) =
            (self.current_index, self.current_track().map(|t| t.id.clone()))
        else {
            return;
        };
        debug!("Saving position {} for {}", format_ms(position_ms), track_id);
        self.resume_positions.insert(track_id, position_ms);
        let playlist = self.library.current_mut();
        playlist.last_played_index = index;
        playlist.last_played_position_ms = position_ms;
        self.last_saved_position_ms = position_ms;
        self.persist_resume();
        self.persist_playlists();
    }

    pub fn serialize_session(&self) -> SessionSnapshot {
        SessionSnapshot {
            playlists: self.library.playlists().to_vec(),
            current_playlist_id: Some(self.library.current_id().to_string()),
            current_track_index: self.current_index,
            resume_positions: self.resume_positions.clone(),
            play_mode: self.play_mode,
        }
    }

    /// Rebuild playlists, mode and resume state. Playback is not started;
    /// call `resume` for that.
    pub fn restore_session(&mut self, snapshot: SessionSnapshot) {
        self.generation += 1;
        self.in_flight = None;
        self.primary.unload();
        self.sync.unbind();

        self.library =
            Library::from_parts(snapshot.playlists, snapshot.current_playlist_id.as_deref());
        self.play_mode = snapshot.play_mode;
        self.resume_positions = snapshot.resume_positions;

        let playlist = self.library.current();
        self.current_index = if playlist.is_empty() {
            None
        } else {
            let wanted = snapshot
                .current_track_index
                .unwrap_or(playlist.last_played_index);
            Some(wanted.min(playlist.len() - 1))
        };
        self.reset_shuffle_bag();

        self.pending_resume = None;
        self.timeline = None;
        self.lyrics = Arc::new(LyricDocument::placeholder());
        self.set_loading(false);
        self.set_state(SessionState::Idle);
        info!(
            "Restored {} playlists, current '{}' at {:?}, mode {}",
            self.library.playlists().len(),
            self.library.current().name,
            self.current_index,
            self.play_mode
        );
    }

    /// Restore from the persistence store
    pub fn load_persisted(&mut self) {
        let snapshot = SessionSnapshot::load_from(self.store.as_ref());
        self.restore_session(snapshot);
    }

    /// Resume the restored track from its saved position
    pub fn resume(&mut self) -> Result<Option<ResolveRequest>, SessionError> {
        match self.current_index {
            Some(index) => self.select_track(index, false),
            None => Ok(None),
        }
    }

    /// Persist position and every session key
    pub fn shutdown(&mut self) {
        self.save_position();
        if let Err(e) = self.serialize_session().save_to(self.store.as_ref()) {
            warn!("Failed to persist session on shutdown: {}", e);
        }
        info!("Session saved");
    }

    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = save(self.store.as_ref(), key, value) {
            warn!("Failed to persist '{}': {}", key, e);
        }
    }

    fn persist_playlists(&self) {
        self.persist(keys::PLAYLISTS, self.library.playlists());
    }

    fn persist_index(&self) {
        self.persist(keys::CURRENT_PLAYLIST_ID, self.library.current_id());
        self.persist(keys::CURRENT_TRACK_INDEX, &self.current_index);
    }

    fn persist_resume(&self) {
        self.persist(keys::RESUME_POSITIONS, &self.resume_positions);
    }

    // ============ Notifications ============

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("Session event receiver dropped");
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(SessionEvent::LoadingChanged(loading));
        }
    }
}

fn overlay_snapshot(
    lyrics: &LyricDocument,
    timeline: &TimelineState,
    primary: &dyn MediaElement,
    playing: bool,
) -> OverlaySnapshot {
    let (current_line, next_line) = current_and_next_text(lyrics, timeline);
    OverlaySnapshot {
        current_line,
        next_line,
        transport: TransportState {
            position_ms: timeline.time_ms,
            duration_ms: primary.duration_ms(),
            playing,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::playback::events::PlaylistEvent;
    use crate::playback::sync_bridge::tests::FakeMedia;
    use crate::utils::ManualClock;

    const MINUTE: u64 = 60_000;

    struct Harness {
        session: PlaybackSession,
        audio: FakeMedia,
        video: FakeMedia,
        clock: ManualClock,
        store: Arc<MemoryStore>,
        events: EventReceiver,
    }

    impl Harness {
        fn new(ids: &[&str]) -> Self {
            let clock = ManualClock::new(1_000_000);
            let audio = FakeMedia::new();
            let video = FakeMedia::new();
            let store = Arc::new(MemoryStore::new());
            let mut session = PlaybackSession::new(
                Settings::default(),
                store.clone(),
                Box::new(audio.clone()),
                Box::new(video.clone()),
                Arc::new(clock.clone()),
            );
            for id in ids {
                session
                    .add_track(Track::new(*id, format!("Title {}", id), "Artist"))
                    .unwrap();
            }
            let events = session.subscribe();
            Self {
                session,
                audio,
                video,
                clock,
                store,
                events,
            }
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        /// Select and complete with a fresh resolution
        fn play(&mut self, index: usize) -> ResolveRequest {
            let request = self.session.select_track(index, true).unwrap().unwrap();
            let completion = self
                .session
                .complete_resolution(request.generation, Ok(resolution(&request)));
            assert_eq!(completion, Completion::Playing);
            request
        }
    }

    fn resolution(request: &ResolveRequest) -> Resolution {
        let id = &request.track.id;
        Resolution {
            track_id: id.clone(),
            audio_url: request
                .cached_audio
                .clone()
                .unwrap_or_else(|| format!("https://cdn/{}", id)),
            audio_from_cache: request.cached_audio.is_some(),
            fallback_url: Some(format!("https://cdn/{}-fb", id)),
            used_fallback: false,
            video_url: None,
            video_from_cache: false,
            fetched_lyrics: None,
            media_attempt: request.media_attempt,
        }
    }

    #[test]
    fn test_sequential_next_wraps_to_first() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(2);
        let request = h.session.next().unwrap().unwrap();
        assert_eq!(request.track.id, "a");
        assert_eq!(h.session.current_index(), Some(0));
    }

    #[test]
    fn test_shuffle_single_track_always_zero() {
        let mut h = Harness::new(&["only"]);
        h.session.set_play_mode(PlayMode::Shuffle);
        h.play(0);
        for _ in 0..10 {
            let request = h.session.next().unwrap().unwrap();
            assert_eq!(h.session.current_index(), Some(0));
            h.session
                .complete_resolution(request.generation, Ok(resolution(&request)));
        }
    }

    #[test]
    fn test_shuffle_cycle_visits_every_track() {
        let mut h = Harness::new(&["a", "b", "c", "d", "e"]);
        h.session.set_play_mode(PlayMode::Shuffle);
        h.play(0);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            let request = h.session.next().unwrap().unwrap();
            seen.insert(h.session.current_index().unwrap());
            h.session
                .complete_resolution(request.generation, Ok(resolution(&request)));
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_entering_shuffle_never_repeats_current() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(1);
        for _ in 0..100 {
            h.session.set_play_mode(PlayMode::Sequential);
            h.session.set_play_mode(PlayMode::Shuffle);
            let before = h.session.current_index();
            let request = h.session.next().unwrap().unwrap();
            assert_ne!(h.session.current_index(), before);
            h.session
                .complete_resolution(request.generation, Ok(resolution(&request)));
        }
    }

    #[test]
    fn test_shuffle_after_user_select_skips_selected() {
        let mut h = Harness::new(&["a", "b", "c", "d"]);
        h.session.set_play_mode(PlayMode::Shuffle);
        h.play(0);
        for _ in 0..100 {
            let pick = (h.session.current_index().unwrap() + 1) % 4;
            h.play(pick);
            let request = h.session.next().unwrap().unwrap();
            assert_ne!(h.session.current_index(), Some(pick));
            h.session
                .complete_resolution(request.generation, Ok(resolution(&request)));
        }
    }

    #[test]
    fn test_optimistic_metadata_before_resolution() {
        let mut h = Harness::new(&["a"]);
        h.drain();
        h.session.select_track(0, true).unwrap();

        let events = h.drain();
        assert!(matches!(&events[0], SessionEvent::NowPlaying(np) if np.title == "Title a"));
        assert!(events.contains(&SessionEvent::LoadingChanged(true)));
        assert!(events.contains(&SessionEvent::StateChanged(SessionState::Resolving)));
        assert_eq!(h.audio.state().source, None);
    }

    #[test]
    fn test_invalid_index_changes_nothing() {
        let mut h = Harness::new(&["a", "b"]);
        h.play(1);
        h.drain();
        let generation = h.session.generation();

        assert_eq!(
            h.session.select_track(5, true),
            Err(SessionError::InvalidIndex { index: 5, len: 2 })
        );
        assert_eq!(h.session.current_index(), Some(1));
        assert_eq!(h.session.state(), SessionState::Playing);
        assert_eq!(h.session.generation(), generation);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_empty_playlist_is_idle() {
        let mut h = Harness::new(&[]);
        assert_eq!(h.session.select_track(0, true), Ok(None));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.next(), Ok(None));
    }

    #[test]
    fn test_superseded_result_does_not_mutate() {
        let mut h = Harness::new(&["a", "b"]);
        let request_a = h.session.select_track(0, true).unwrap().unwrap();
        let request_b = h.session.select_track(1, true).unwrap().unwrap();

        let completion = h
            .session
            .complete_resolution(request_a.generation, Ok(resolution(&request_a)));
        assert_eq!(completion, Completion::Superseded);
        assert_eq!(h.session.current_index(), Some(1));
        assert_eq!(h.session.state(), SessionState::Resolving);
        assert!(h.audio.state().loads.is_empty());
        assert_eq!(h.session.library().current().tracks[0].primary_locator, None);

        let completion = h
            .session
            .complete_resolution(request_b.generation, Ok(resolution(&request_b)));
        assert_eq!(completion, Completion::Playing);
        assert_eq!(h.audio.state().source.as_deref(), Some("https://cdn/b"));
        assert_eq!(h.session.current_track().unwrap().id, "b");
    }

    #[test]
    fn test_superseded_failure_is_silent() {
        let mut h = Harness::new(&["a", "b"]);
        let request_a = h.session.select_track(0, true).unwrap().unwrap();
        h.session.select_track(1, true).unwrap();
        h.drain();

        let completion = h
            .session
            .fail_resolution(request_a.generation, SessionError::Timeout);
        assert_eq!(completion, Completion::Superseded);
        assert_eq!(h.session.state(), SessionState::Resolving);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_reselecting_loading_track_is_noop() {
        let mut h = Harness::new(&["a"]);
        h.session.select_track(0, true).unwrap().unwrap();
        assert_eq!(h.session.select_track(0, true), Ok(None));
    }

    #[test]
    fn test_timeout_surfaces_error_and_releases_loading() {
        let mut h = Harness::new(&["a"]);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        assert!(h.session.is_loading());
        h.drain();

        let completion = h
            .session
            .fail_resolution(request.generation, SessionError::Timeout);
        assert_eq!(completion, Completion::Failed(SessionError::Timeout));
        assert_eq!(h.session.state(), SessionState::Error);
        assert!(!h.session.is_loading());

        let events = h.drain();
        assert!(events.contains(&SessionEvent::LoadingChanged(false)));
        assert!(events.contains(&SessionEvent::Error("Loading timed out".into())));

        // Recoverable: play re-selects the failed track
        let retry = h.session.toggle_pause().unwrap().unwrap();
        assert_eq!(retry.track.id, "a");
    }

    #[test]
    fn test_resolve_failure_stays_on_track() {
        let mut h = Harness::new(&["a", "b"]);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        let error = ResolveError::LocatorFetch {
            track_id: "a".into(),
            source: crate::api::ProviderError::Network("down".into()),
        };
        let completion = h.session.complete_resolution(request.generation, Err(error));
        assert!(matches!(completion, Completion::Failed(SessionError::Resolve(_))));
        assert_eq!(h.session.current_index(), Some(0));
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[test]
    fn test_media_start_retries_once_with_fresh_fetch() {
        let mut h = Harness::new(&["a"]);
        h.audio.state().refuse_play = 1;
        let request = h.session.select_track(0, true).unwrap().unwrap();

        let Completion::Retry(retry) = h
            .session
            .complete_resolution(request.generation, Ok(resolution(&request)))
        else {
            panic!("expected a retry");
        };
        assert_eq!(retry.generation, request.generation);
        assert!(retry.force_fresh);
        assert_eq!(retry.cached_audio, None);
        assert_eq!(retry.delay, Duration::from_millis(1000));
        assert!(h.session.is_loading());

        let completion = h
            .session
            .complete_resolution(retry.generation, Ok(resolution(&retry)));
        assert_eq!(completion, Completion::Playing);
    }

    #[test]
    fn test_media_start_gives_up_after_retry() {
        let mut h = Harness::new(&["a"]);
        h.audio.state().refuse_play = 2;
        let request = h.session.select_track(0, true).unwrap().unwrap();
        let Completion::Retry(retry) = h
            .session
            .complete_resolution(request.generation, Ok(resolution(&request)))
        else {
            panic!("expected a retry");
        };
        let completion = h
            .session
            .complete_resolution(retry.generation, Ok(resolution(&retry)));
        assert!(matches!(completion, Completion::Failed(SessionError::MediaStart(_))));
        assert!(!h.session.is_loading());
        assert_eq!(h.session.state(), SessionState::Error);
    }

    #[test]
    fn test_cache_serves_within_ttl_then_expires() {
        let mut h = Harness::new(&["a", "b"]);
        h.play(0);
        h.play(1);

        h.clock.advance(119 * MINUTE);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        assert_eq!(request.cached_audio.as_deref(), Some("https://cdn/a"));
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));

        h.clock.advance(121 * MINUTE);
        h.play(1);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        assert_eq!(request.cached_audio, None);
    }

    #[test]
    fn test_resolved_locators_written_back_and_persisted() {
        let mut h = Harness::new(&["a"]);
        h.play(0);

        let track = h.session.current_track().unwrap();
        assert_eq!(track.primary_locator.as_deref(), Some("https://cdn/a"));
        assert_eq!(track.fallback_locator.as_deref(), Some("https://cdn/a-fb"));

        let stored = SessionSnapshot::load_from(h.store.as_ref());
        assert_eq!(
            stored.playlists[0].tracks[0].primary_locator.as_deref(),
            Some("https://cdn/a")
        );
    }

    #[test]
    fn test_fetched_lyrics_replace_placeholder() {
        let mut h = Harness::new(&["a"]);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        assert!(h.session.lyrics().is_placeholder());

        let mut res = resolution(&request);
        res.fetched_lyrics = Some("[00:01.00]first\n[00:04.00]second".into());
        h.session.complete_resolution(request.generation, Ok(res));

        assert_eq!(h.session.lyrics().lines.len(), 2);
        assert!(h.session.current_track().unwrap().lyric_text.is_some());
    }

    #[test]
    fn test_video_bound_for_committed_generation() {
        let mut h = Harness::new(&["a"]);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        let mut res = resolution(&request);
        res.video_url = Some("https://cdn/a.mp4".into());
        h.session.complete_resolution(request.generation, Ok(res));

        assert_eq!(h.video.state().source.as_deref(), Some("https://cdn/a.mp4"));
        assert!(!h.video.state().paused);

        h.session.toggle_pause().unwrap();
        assert!(h.video.state().paused);
    }

    #[test]
    fn test_resume_clamped_to_duration() {
        let mut h = Harness::new(&["a"]);
        h.session.resume_positions.insert("a".into(), 500_000);
        h.audio.state().duration_ms = Some(180_000);

        let request = h.session.select_track(0, false).unwrap().unwrap();
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));
        assert_eq!(h.audio.state().position_ms, 179_999);
    }

    #[test]
    fn test_resume_waits_for_metadata() {
        let mut h = Harness::new(&["a"]);
        h.session.resume_positions.insert("a".into(), 42_000);

        let request = h.session.select_track(0, false).unwrap().unwrap();
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));
        assert_eq!(h.audio.state().position_ms, 0);

        {
            let mut audio = h.audio.state();
            audio.duration_ms = Some(200_000);
            audio.events.push(MediaEvent::Ready {
                duration_ms: 200_000,
            });
        }
        assert_eq!(h.session.poll_media(), None);
        assert_eq!(h.audio.state().position_ms, 42_000);
    }

    #[test]
    fn test_track_position_beats_playlist_position() {
        let mut h = Harness::new(&["a", "b"]);
        h.session.library.current_mut().last_played_index = 0;
        h.session.library.current_mut().last_played_position_ms = 9_000;
        h.audio.state().duration_ms = Some(300_000);

        let request = h.session.select_track(0, false).unwrap().unwrap();
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));
        assert_eq!(h.audio.state().position_ms, 9_000);

        h.session.select_track(1, true).unwrap();
        h.session.resume_positions.insert("a".into(), 61_000);
        let request = h.session.select_track(0, false).unwrap().unwrap();
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));
        assert_eq!(h.audio.state().position_ms, 61_000);
    }

    #[test]
    fn test_replay_ignores_saved_position() {
        let mut h = Harness::new(&["a"]);
        h.session.resume_positions.insert("a".into(), 42_000);
        h.audio.state().duration_ms = Some(200_000);
        h.play(0);
        assert_eq!(h.audio.state().position_ms, 0);
    }

    #[test]
    fn test_pause_persists_position() {
        let mut h = Harness::new(&["a"]);
        h.play(0);
        h.audio.state().position_ms = 33_000;

        h.session.toggle_pause().unwrap();
        assert_eq!(h.session.state(), SessionState::Paused);
        assert_eq!(h.session.resume_position("a"), Some(33_000));
        let stored = SessionSnapshot::load_from(h.store.as_ref());
        assert_eq!(stored.resume_positions.get("a"), Some(&33_000));
        assert_eq!(stored.playlists[0].last_played_position_ms, 33_000);

        h.session.toggle_pause().unwrap();
        assert_eq!(h.session.state(), SessionState::Playing);
    }

    #[test]
    fn test_tick_saves_position_every_interval() {
        let mut h = Harness::new(&["a"]);
        h.play(0);

        h.session.on_tick(9_000);
        assert_eq!(h.session.resume_position("a"), None);
        h.session.on_tick(10_000);
        assert_eq!(h.session.resume_position("a"), Some(10_000));
        h.session.on_tick(15_000);
        assert_eq!(h.session.resume_position("a"), Some(10_000));
        h.session.on_tick(20_500);
        assert_eq!(h.session.resume_position("a"), Some(20_500));
    }

    #[test]
    fn test_seek_recomputes_timeline_from_scratch() {
        let mut h = Harness::new(&["a"]);
        h.session.library.current_mut().tracks[0].lyric_text =
            Some("[0,5000](0,2000,0)Hello(2000,3000,0)World".into());
        h.play(0);

        h.session.on_tick(1_000);
        h.session.on_seek(2_500);
        let after_seek = h.session.timeline().unwrap().clone();
        assert_eq!(after_seek, compute_state(h.session.lyrics(), 2_500));
        assert_eq!(h.audio.state().position_ms, 2_500);
    }

    #[test]
    fn test_natural_end_follows_play_mode() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(1);
        h.audio.state().events.push(MediaEvent::Ended);
        let request = h.session.poll_media().unwrap();
        assert_eq!(request.track.id, "c");
        h.session
            .complete_resolution(request.generation, Ok(resolution(&request)));

        h.session.set_play_mode(PlayMode::RepeatOne);
        h.audio.state().events.push(MediaEvent::Ended);
        let request = h.session.poll_media().unwrap();
        assert_eq!(request.track.id, "c");
        assert_eq!(h.session.resume_position("c"), Some(0));
    }

    #[test]
    fn test_user_next_in_repeat_one_advances() {
        let mut h = Harness::new(&["a", "b"]);
        h.session.set_play_mode(PlayMode::RepeatOne);
        h.play(0);
        assert_eq!(h.session.next().unwrap().unwrap().track.id, "b");
        assert_eq!(h.session.prev().unwrap().unwrap().track.id, "a");
    }

    #[test]
    fn test_toggle_play_mode_cycles_and_persists() {
        let mut h = Harness::new(&["a"]);
        assert_eq!(h.session.toggle_play_mode(), PlayMode::Shuffle);
        assert!(h.session.shuffle_bag.is_some());
        assert_eq!(h.session.toggle_play_mode(), PlayMode::RepeatOne);
        assert!(h.session.shuffle_bag.is_none());
        assert_eq!(
            h.store.get(keys::PLAY_MODE),
            Some(serde_json::Value::from("repeat-one"))
        );
        assert_eq!(h.session.toggle_play_mode(), PlayMode::Sequential);
    }

    #[test]
    fn test_removing_current_track_reselects() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(2);
        let request = h.session.remove_track("c").unwrap().unwrap();
        assert_eq!(request.track.id, "b");
        assert_eq!(h.session.current_index(), Some(1));
    }

    #[test]
    fn test_removing_earlier_track_shifts_index() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(2);
        h.drain();
        assert_eq!(h.session.remove_track("a"), Ok(None));
        assert_eq!(h.session.current_index(), Some(1));
        assert_eq!(h.session.current_track().unwrap().id, "c");
        assert!(h.drain().iter().any(|e| matches!(
            e,
            SessionEvent::Playlist(PlaylistEvent::ItemRemoved { index: 0, .. })
        )));
    }

    #[test]
    fn test_bulk_remove_around_current() {
        let mut h = Harness::new(&["a", "b", "c", "d", "e"]);
        h.play(3);
        let request = h
            .session
            .remove_tracks(&["a".into(), "d".into(), "e".into()])
            .unwrap()
            .unwrap();
        // Two tracks remain; "d" was at 3 with one removal before it
        assert_eq!(request.track.id, "c");
    }

    #[test]
    fn test_duplicate_ids_count_once_when_removing_current() {
        let mut h = Harness::new(&["a", "b", "c", "d"]);
        h.play(2);
        let request = h
            .session
            .remove_tracks(&["a".into(), "a".into(), "c".into()])
            .unwrap()
            .unwrap();
        // "c" was at 2 with one distinct removal before it
        assert_eq!(request.track.id, "d");
        assert_eq!(h.session.current_index(), Some(1));
    }

    #[test]
    fn test_removing_last_track_goes_idle() {
        let mut h = Harness::new(&["a"]);
        let request = h.session.select_track(0, true).unwrap().unwrap();
        h.session.remove_track("a").unwrap();
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.current_index(), None);
        assert!(!h.session.is_loading());
        assert_eq!(
            h.session
                .complete_resolution(request.generation, Ok(resolution(&request))),
            Completion::Superseded
        );
    }

    #[test]
    fn test_reorder_keeps_current_track() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.play(0);
        h.session.reorder(&["c".into(), "b".into(), "a".into()]);
        assert_eq!(h.session.current_index(), Some(2));
        assert_eq!(h.session.current_track().unwrap().id, "a");
    }

    #[test]
    fn test_switch_playlist_resumes_where_left() {
        let mut h = Harness::new(&["a", "b"]);
        h.play(1);
        h.audio.state().position_ms = 5_000;

        let other = h.session.create_playlist("Other").unwrap();
        assert_eq!(h.session.switch_playlist(&other), Ok(None));
        assert_eq!(h.session.state(), SessionState::Idle);

        let first = h.session.library().playlists()[0].id.clone();
        let request = h.session.switch_playlist(&first).unwrap().unwrap();
        assert_eq!(request.track.id, "b");
    }

    #[test]
    fn test_delete_current_playlist_falls_back() {
        let mut h = Harness::new(&["a"]);
        h.play(0);
        let id = h.session.library().current_id().to_string();
        assert_eq!(h.session.delete_playlist(&id), Ok(None));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.session.library().current().is_empty());
        assert_ne!(h.session.library().current_id(), id);
    }

    #[test]
    fn test_serialize_and_restore_session() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.session.set_play_mode(PlayMode::Shuffle);
        h.play(2);
        h.audio.state().position_ms = 12_345;
        h.session.shutdown();

        let snapshot = h.session.serialize_session();
        assert_eq!(snapshot.current_track_index, Some(2));
        assert_eq!(snapshot.resume_positions.get("c"), Some(&12_345));

        let mut restored = Harness::new(&[]);
        restored.session.restore_session(snapshot.clone());
        assert_eq!(restored.session.current_index(), Some(2));
        assert_eq!(restored.session.play_mode(), PlayMode::Shuffle);
        assert_eq!(restored.session.state(), SessionState::Idle);

        restored.audio.state().duration_ms = Some(100_000);
        let request = restored.session.resume().unwrap().unwrap();
        restored
            .session
            .complete_resolution(request.generation, Ok(resolution(&request)));
        assert_eq!(restored.audio.state().position_ms, 12_345);

        // Stored session from the first harness loads the same way
        let mut reloaded = Harness::new(&[]);
        reloaded.session.store = h.store.clone() as Arc<dyn StateStore>;
        reloaded.session.load_persisted();
        assert_eq!(reloaded.session.serialize_session(), snapshot);
    }

    #[test]
    fn test_restore_clamps_out_of_range_index() {
        let mut h = Harness::new(&[]);
        let mut playlist = crate::database::Playlist::new("p", "P");
        playlist.tracks.push(Track::new("a", "A", "x"));
        h.session.restore_session(SessionSnapshot {
            playlists: vec![playlist],
            current_playlist_id: Some("p".into()),
            current_track_index: Some(7),
            ..Default::default()
        });
        assert_eq!(h.session.current_index(), Some(0));
    }

    #[test]
    fn test_restored_shuffle_skips_restored_track() {
        for _ in 0..50 {
            let mut h = Harness::new(&[]);
            let mut playlist = crate::database::Playlist::new("p", "P");
            for id in ["a", "b", "c"] {
                playlist.tracks.push(Track::new(id, id, "x"));
            }
            h.session.restore_session(SessionSnapshot {
                playlists: vec![playlist],
                current_playlist_id: Some("p".into()),
                current_track_index: Some(2),
                play_mode: PlayMode::Shuffle,
                ..Default::default()
            });
            let request = h.session.next().unwrap().unwrap();
            assert_ne!(request.track.id, "c");
        }
    }

    #[test]
    fn test_overlay_receives_line_changes() {
        let mut h = Harness::new(&["a"]);
        h.session.library.current_mut().tracks[0].lyric_text =
            Some("[00:01.00]one\n[00:03.00]two".into());
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.session.set_overlay_sink(tx);
        h.play(0);

        h.session.on_tick(1_500);
        h.session.on_tick(1_600);
        h.session.on_tick(3_100);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.current_line.as_deref(), Some("one"));
        assert_eq!(first.next_line.as_deref(), Some("two"));
        assert!(first.transport.playing);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.current_line.as_deref(), Some("two"));
        assert!(rx.try_recv().is_err());
    }
}
