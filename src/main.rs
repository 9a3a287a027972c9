//! Headless player
//!
//! Restores the saved session, resumes playback against the configured
//! locator provider and reads transport commands from stdin.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use rhapsode::api::HttpProvider;
use rhapsode::database::{JsonFileStore, Track};
use rhapsode::features::Settings;
use rhapsode::playback::{
    PlaybackSession, Player, PlayerCommand, PlayerHandle, Resolver, RetryPolicy, SessionEvent,
    SimulatedMedia,
};
use rhapsode::utils::{SystemClock, format_ms};

/// Length given to every simulated source
const SIMULATED_TRACK_MS: u64 = 4 * 60 * 1000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::load();
    // First run: write the defaults out so they can be edited
    if Settings::file_path().is_some_and(|path| !path.exists()) {
        match settings.save() {
            Ok(path) => info!("Wrote default settings to {}", path.display()),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }
    let store = Arc::new(JsonFileStore::open_default().context("Failed to open session store")?);
    info!("Session state at {}", store.path().display());

    let provider =
        Arc::new(HttpProvider::new(&settings.network).context("Failed to build HTTP client")?);
    let resolver = Resolver::new(provider, RetryPolicy::from_settings(&settings.playback));

    let clock = Arc::new(SystemClock);
    let mut session = PlaybackSession::new(
        settings,
        store,
        Box::new(SimulatedMedia::new("audio", clock.clone(), SIMULATED_TRACK_MS)),
        Box::new(SimulatedMedia::new("video", clock.clone(), SIMULATED_TRACK_MS)),
        clock,
    );

    let mut events = session.subscribe();
    let (overlay_tx, mut overlay_rx) = mpsc::unbounded_channel();
    session.set_overlay_sink(overlay_tx);
    session.load_persisted();

    // Track ids on the command line are appended to the current playlist
    for id in std::env::args().skip(1) {
        if let Err(e) = session.add_track(Track::new(id.clone(), id, "")) {
            warn!("{}", e);
        }
    }

    let resume = session.resume();
    let (mut player, handle) = Player::new(session, resolver);
    match resume {
        Ok(Some(request)) => player.start(request),
        Ok(None) => info!("Nothing to resume"),
        Err(e) => warn!("Could not resume: {}", e),
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::NowPlaying(np) => info!("Now playing: {} - {}", np.title, np.artist),
                SessionEvent::Error(message) => warn!("{}", message),
                other => tracing::debug!("{:?}", other),
            }
        }
    });
    tokio::spawn(async move {
        while let Some(snapshot) = overlay_rx.recv().await {
            info!(
                "[{}] {}",
                format_ms(snapshot.transport.position_ms),
                snapshot.current_line.unwrap_or_default()
            );
        }
    });

    let stdin_handle = handle.clone();
    tokio::spawn(read_commands(stdin_handle));

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_handle.send(PlayerCommand::Shutdown);
        }
    });

    drop(handle);
    player.run().await;
    Ok(())
}

/// Map stdin lines to player commands
async fn read_commands(handle: PlayerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        let command = match (parts.next(), parts.next()) {
            (Some("next" | "n"), _) => PlayerCommand::Next,
            (Some("prev" | "p"), _) => PlayerCommand::Prev,
            (Some("pause" | "play"), _) => PlayerCommand::TogglePause,
            (Some("mode" | "m"), _) => PlayerCommand::TogglePlayMode,
            (Some("seek"), Some(secs)) => match secs.parse::<u64>() {
                Ok(secs) => PlayerCommand::Seek(secs * 1000),
                Err(_) => continue,
            },
            (Some("select"), Some(index)) => match index.parse() {
                Ok(index) => PlayerCommand::Select {
                    index,
                    replay: true,
                },
                Err(_) => continue,
            },
            (Some("add"), Some(id)) => PlayerCommand::AddTrack(Track::new(id, id, "")),
            (Some("rm"), Some(id)) => PlayerCommand::RemoveTrack(id.to_string()),
            (Some("quit" | "q"), _) => PlayerCommand::Shutdown,
            _ => {
                warn!("Unknown command: {}", line.trim());
                continue;
            }
        };
        if !handle.send(command) {
            break;
        }
    }
}
