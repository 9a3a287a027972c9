//! Persisted models
//! These records are stored as JSON blobs under the keys in [`keys`]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::features::PlayMode;

/// Store keys for the session state
pub mod keys {
    pub const PLAYLISTS: &str = "playlists";
    pub const CURRENT_PLAYLIST_ID: &str = "current_playlist_id";
    pub const CURRENT_TRACK_INDEX: &str = "current_track_index";
    pub const RESUME_POSITIONS: &str = "resume_positions";
    pub const PLAY_MODE: &str = "play_mode";
}

/// One playable item
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque provider id, unique within a playlist
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Cover image reference
    #[serde(default)]
    pub artwork: Option<String>,
    /// Last resolved audio URL
    #[serde(default)]
    pub primary_locator: Option<String>,
    /// Alternate audio URL used when the primary is rejected
    #[serde(default)]
    pub fallback_locator: Option<String>,
    /// Last resolved background video URL
    #[serde(default)]
    pub video_locator: Option<String>,
    /// Raw lyric text in either supported format
    #[serde(default)]
    pub lyric_text: Option<String>,
    /// Local files never expire and are not resolved through the provider
    #[serde(default)]
    pub is_local: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    /// Query used when lyrics have to be looked up
    pub fn lyric_query(&self) -> String {
        format!("{} {}", self.title, self.artist).trim().to_string()
    }
}

/// Named, ordered collection of tracks with resume state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    /// Insertion order is playback order
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub last_played_index: usize,
    #[serde(default)]
    pub last_played_position_ms: u64,
}

impl Playlist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tracks: Vec::new(),
            last_played_index: 0,
            last_played_position_ms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn position_of(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }
}

/// Everything needed to rebuild a session after restart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub playlists: Vec<Playlist>,
    pub current_playlist_id: Option<String>,
    pub current_track_index: Option<usize>,
    /// Track id -> saved position in ms
    pub resume_positions: HashMap<String, u64>,
    pub play_mode: PlayMode,
}
