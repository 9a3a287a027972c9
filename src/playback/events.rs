//! Events published by the playback session
//!
//! The shell subscribes through an unbounded channel; nothing here holds a
//! reference back into the session.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::features::PlayMode;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing selected, or the playlist is empty
    #[default]
    Idle,
    /// Waiting for a locator for the selected track
    Resolving,
    Playing,
    Paused,
    /// The last selection failed; controls are released
    Error,
}

/// Metadata published as soon as a track is selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub index: usize,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub artwork: Option<String>,
}

/// Playlist collection changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PlaylistEvent {
    ItemAdded {
        playlist_id: String,
        index: usize,
        track_id: String,
    },
    ItemRemoved {
        playlist_id: String,
        index: usize,
        track_id: String,
    },
    Reordered {
        playlist_id: String,
        order: Vec<String>,
    },
    PlaylistCreated {
        id: String,
        name: String,
    },
    PlaylistDeleted {
        id: String,
    },
    PlaylistRenamed {
        id: String,
        name: String,
    },
    PlaylistSwitched {
        id: String,
    },
}

/// Everything the shell is told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "event", content = "data")]
pub enum SessionEvent {
    NowPlaying(NowPlaying),
    /// Loading indicator and control lock
    LoadingChanged(bool),
    StateChanged(SessionState),
    PlayModeChanged(PlayMode),
    Playlist(PlaylistEvent),
    /// User-visible failure message
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;
