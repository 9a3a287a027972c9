//! Async driver around `PlaybackSession`
//!
//! One task owns the session. Commands, overlay input, resolution results and
//! the lyric tick are multiplexed with `tokio::select!`, so the session is
//! never touched from two places at once. Each resolution runs in its own
//! task under the loading timeout; a newer selection aborts the old task and
//! the generation check drops anything that still slips through.

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{MissedTickBehavior, error::Elapsed};
use tracing::{debug, info, warn};

use super::resolver::{Resolution, ResolveError, ResolveRequest, Resolver};
use super::session::{Completion, PlaybackSession, SessionError};
use super::sync_bridge::OverlayCommand;
use crate::api::LocatorProvider;
use crate::database::Track;

/// Commands accepted by the player task
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Select { index: usize, replay: bool },
    Next,
    Prev,
    TogglePause,
    TogglePlayMode,
    Seek(u64),
    AddTrack(Track),
    RemoveTrack(String),
    RemoveTracks(Vec<String>),
    Reorder(Vec<String>),
    CreatePlaylist(String),
    RenamePlaylist { id: String, name: String },
    SwitchPlaylist(String),
    DeletePlaylist(String),
    /// Whether the lyric surface is on screen
    SurfaceVisible(bool),
    /// Persist everything and stop the task
    Shutdown,
}

/// Cloneable sender for player commands
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    /// Returns false once the player has stopped
    pub fn send(&self, command: PlayerCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Result of one resolution task
struct ResolveOutcome {
    generation: u64,
    result: Result<Result<Resolution, ResolveError>, Elapsed>,
}

pub struct Player<P> {
    session: PlaybackSession,
    resolver: Resolver<P>,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    overlay: Option<mpsc::UnboundedReceiver<OverlayCommand>>,
    outcome_tx: mpsc::UnboundedSender<ResolveOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ResolveOutcome>,
    /// Resolution task for the given generation
    task: Option<(u64, AbortHandle)>,
}

impl<P: LocatorProvider> Player<P> {
    pub fn new(session: PlaybackSession, resolver: Resolver<P>) -> (Self, PlayerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let player = Self {
            session,
            resolver,
            commands,
            overlay: None,
            outcome_tx,
            outcome_rx,
            task: None,
        };
        (player, PlayerHandle { tx })
    }

    /// Accept transport commands from the overlay surface
    pub fn with_overlay_commands(mut self, rx: mpsc::UnboundedReceiver<OverlayCommand>) -> Self {
        self.overlay = Some(rx);
        self
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    /// Kick off work the session already asked for (e.g. from `resume`)
    pub fn start(&mut self, request: ResolveRequest) {
        self.spawn_resolution(request);
    }

    /// Run until `Shutdown` or until every handle is dropped. The session is
    /// persisted and handed back.
    pub async fn run(mut self) -> PlaybackSession {
        let mut tick = tokio::time::interval(self.session.settings().playback.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Player started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(PlayerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(command) = next_overlay_command(&mut self.overlay) => {
                    self.handle_overlay(command);
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                _ = tick.tick() => self.on_tick(),
            }
        }

        if let Some((_, task)) = self.task.take() {
            task.abort();
        }
        self.session.shutdown();
        info!("Player stopped");
        self.session
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        debug!("Command: {:?}", command);
        let result = match command {
            PlayerCommand::Select { index, replay } => self.session.select_track(index, replay),
            PlayerCommand::Next => self.session.next(),
            PlayerCommand::Prev => self.session.prev(),
            PlayerCommand::TogglePause => self.session.toggle_pause(),
            PlayerCommand::TogglePlayMode => {
                self.session.toggle_play_mode();
                Ok(None)
            }
            PlayerCommand::Seek(ms) => {
                self.session.on_seek(ms);
                Ok(None)
            }
            PlayerCommand::AddTrack(track) => self.session.add_track(track).map(|()| None),
            PlayerCommand::RemoveTrack(id) => self.session.remove_track(&id),
            PlayerCommand::RemoveTracks(ids) => self.session.remove_tracks(&ids),
            PlayerCommand::Reorder(order) => {
                self.session.reorder(&order);
                Ok(None)
            }
            PlayerCommand::CreatePlaylist(name) => {
                self.session.create_playlist(&name).map(|_| None)
            }
            PlayerCommand::RenamePlaylist { id, name } => {
                self.session.rename_playlist(&id, &name).map(|()| None)
            }
            PlayerCommand::SwitchPlaylist(id) => self.session.switch_playlist(&id),
            PlayerCommand::DeletePlaylist(id) => self.session.delete_playlist(&id),
            PlayerCommand::SurfaceVisible(visible) => {
                self.session.set_surface_visible(visible);
                Ok(None)
            }
            PlayerCommand::Shutdown => Ok(None),
        };
        self.follow_up(result);
    }

    fn handle_overlay(&mut self, command: OverlayCommand) {
        debug!("Overlay command: {:?}", command);
        let result = match command {
            OverlayCommand::TogglePlay => self.session.toggle_pause(),
            OverlayCommand::Seek(ms) => {
                self.session.on_seek(ms);
                Ok(None)
            }
        };
        self.follow_up(result);
    }

    fn follow_up(&mut self, result: Result<Option<ResolveRequest>, SessionError>) {
        match result {
            Ok(Some(request)) => self.spawn_resolution(request),
            Ok(None) => self.abort_superseded(),
            Err(e) => warn!("Command rejected: {}", e),
        }
    }

    fn handle_outcome(&mut self, outcome: ResolveOutcome) {
        if self.task.as_ref().is_some_and(|(g, _)| *g == outcome.generation) {
            self.task = None;
        }

        let completion = match outcome.result {
            Ok(result) => self.session.complete_resolution(outcome.generation, result),
            Err(_) => {
                warn!("Resolution for generation {} timed out", outcome.generation);
                self.session
                    .fail_resolution(outcome.generation, SessionError::Timeout)
            }
        };

        match completion {
            Completion::Retry(request) => self.spawn_resolution(request),
            Completion::Superseded | Completion::Playing | Completion::Failed(_) => {}
        }
    }

    fn on_tick(&mut self) {
        if let Some(request) = self.session.poll_media() {
            self.spawn_resolution(request);
        }
        let position = self.session.position_ms();
        self.session.on_tick(position);
    }

    fn spawn_resolution(&mut self, request: ResolveRequest) {
        if let Some((generation, task)) = self.task.take() {
            if generation != request.generation {
                debug!("Aborting resolution for generation {}", generation);
            }
            task.abort();
        }

        let generation = request.generation;
        let timeout = self.session.settings().playback.loading_timeout();
        let resolver = self.resolver.clone();
        let tx = self.outcome_tx.clone();

        let handle = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, resolver.resolve(request)).await;
            if tx.send(ResolveOutcome { generation, result }).is_err() {
                debug!("Player stopped before generation {} resolved", generation);
            }
        });
        self.task = Some((generation, handle.abort_handle()));
    }

    /// Drop the running task if the session no longer wants its result
    fn abort_superseded(&mut self) {
        if let Some((generation, _)) = &self.task {
            if !self.session.is_current(*generation) {
                if let Some((_, task)) = self.task.take() {
                    task.abort();
                }
            }
        }
    }
}

async fn next_overlay_command(
    rx: &mut Option<mpsc::UnboundedReceiver<OverlayCommand>>,
) -> Option<OverlayCommand> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::database::MemoryStore;
    use crate::features::Settings;
    use crate::playback::events::{SessionEvent, SessionState};
    use crate::playback::resolver::RetryPolicy;
    use crate::playback::resolver::tests::FakeProvider;
    use crate::playback::sync_bridge::tests::FakeMedia;
    use crate::utils::ManualClock;

    struct Rig {
        player: Player<FakeProvider>,
        handle: PlayerHandle,
        provider: Arc<FakeProvider>,
        audio: FakeMedia,
        video: FakeMedia,
        clock: ManualClock,
    }

    fn rig(provider: FakeProvider, ids: &[&str]) -> Rig {
        let audio = FakeMedia::new();
        let video = FakeMedia::new();
        let clock = ManualClock::new(0);
        let mut session = PlaybackSession::new(
            Settings::default(),
            Arc::new(MemoryStore::new()),
            Box::new(audio.clone()),
            Box::new(video.clone()),
            Arc::new(clock.clone()),
        );
        for id in ids {
            session.add_track(Track::new(*id, *id, "Artist")).unwrap();
        }
        let provider = Arc::new(provider);
        let resolver = Resolver::new(Arc::clone(&provider), RetryPolicy::default());
        let (player, handle) = Player::new(session, resolver);
        Rig {
            player,
            handle,
            provider,
            audio,
            video,
            clock,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselect_within_ttl_skips_provider() {
        let Rig {
            player,
            handle,
            provider,
            audio,
            ..
        } = rig(FakeProvider::serving(&["a", "b"]), &["a", "b"]);
        let task = tokio::spawn(player.run());

        for index in [0, 1, 0] {
            handle.send(PlayerCommand::Select {
                index,
                replay: true,
            });
            settle().await;
        }
        handle.send(PlayerCommand::Shutdown);
        let session = task.await.unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(session.current_track().unwrap().id, "a");
        assert_eq!(
            audio.state().loads,
            vec!["https://cdn/a", "https://cdn/b", "https://cdn/a"]
        );
        assert!(session.cache_stats().hits >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locators_refetched_after_ttl() {
        let provider = FakeProvider::serving(&["a", "b"]);
        provider
            .video
            .lock()
            .insert("a".into(), Ok(Some("https://video/a".into())));
        let rig = rig(provider, &["a", "b"]);
        let task = tokio::spawn(rig.player.run());
        let select = |index| {
            rig.handle.send(PlayerCommand::Select {
                index,
                replay: true,
            })
        };

        for index in [0, 1, 0] {
            select(index);
            settle().await;
        }
        assert_eq!(rig.provider.calls(), 2);
        assert_eq!(rig.provider.video_calls(), 2);
        assert_eq!(rig.video.state().loads, vec!["https://video/a"; 2]);

        rig.clock.advance(121 * 60 * 1000);
        for index in [1, 0] {
            select(index);
            settle().await;
        }
        rig.handle.send(PlayerCommand::Shutdown);
        let session = task.await.unwrap();

        assert_eq!(rig.provider.calls(), 4);
        assert_eq!(rig.provider.video_calls(), 4);
        assert_eq!(rig.video.state().loads, vec!["https://video/a"; 3]);
        assert_eq!(session.current_track().unwrap().id, "a");
        assert!(session.cache_stats().evictions >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = FakeProvider::serving(&["a"]);
        *provider.latency.lock() = Duration::from_secs(60);
        let mut rig = rig(provider, &["a"]);
        let mut events = rig.player.session.subscribe();
        let task = tokio::spawn(rig.player.run());

        rig.handle.send(PlayerCommand::Select {
            index: 0,
            replay: true,
        });
        tokio::time::sleep(Duration::from_secs(16)).await;
        rig.handle.send(PlayerCommand::Shutdown);
        let session = task.await.unwrap();

        assert_eq!(session.state(), SessionState::Error);
        assert!(!session.is_loading());
        let mut saw_timeout = false;
        while let Ok(event) = events.try_recv() {
            saw_timeout |= event == SessionEvent::Error("Loading timed out".into());
        }
        assert!(saw_timeout);
        assert!(rig.audio.state().loads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_reselect_only_binds_latest() {
        let provider = FakeProvider::serving(&["a", "b"]);
        *provider.latency.lock() = Duration::from_secs(1);
        let rig = rig(provider, &["a", "b"]);
        let task = tokio::spawn(rig.player.run());

        rig.handle.send(PlayerCommand::Select {
            index: 0,
            replay: true,
        });
        rig.handle.send(PlayerCommand::Select {
            index: 1,
            replay: true,
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        rig.handle.send(PlayerCommand::Shutdown);
        let session = task.await.unwrap();

        assert_eq!(session.current_track().unwrap().id, "b");
        assert_eq!(rig.audio.state().loads, vec!["https://cdn/b"]);
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_toggle_pauses() {
        let (overlay_tx, overlay_rx) = mpsc::unbounded_channel();
        let rig = rig(FakeProvider::serving(&["a"]), &["a"]);
        let player = rig.player.with_overlay_commands(overlay_rx);
        let task = tokio::spawn(player.run());

        rig.handle.send(PlayerCommand::Select {
            index: 0,
            replay: true,
        });
        settle().await;
        overlay_tx.send(OverlayCommand::TogglePlay).unwrap();
        settle().await;
        rig.handle.send(PlayerCommand::Shutdown);
        let session = task.await.unwrap();

        assert_eq!(session.state(), SessionState::Paused);
        assert!(rig.audio.state().paused);
    }
}
