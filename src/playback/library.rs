//! Playlist collection
//!
//! Owns every playlist and which one is current. Mutations return the
//! `PlaylistEvent` they caused so the session can forward it. There is always
//! at least one playlist; removing the last one recreates an empty default.

use tracing::{debug, info};

use super::events::PlaylistEvent;
use crate::database::{Playlist, Track};

pub const DEFAULT_PLAYLIST_NAME: &str = "Default";

/// Errors from playlist operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    DuplicateName(String),
    DuplicateTrack(String),
    UnknownPlaylist(String),
    UnknownTrack(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::DuplicateName(name) => write!(f, "Playlist '{}' already exists", name),
            LibraryError::DuplicateTrack(id) => write!(f, "Track {} is already in the playlist", id),
            LibraryError::UnknownPlaylist(id) => write!(f, "No playlist with id {}", id),
            LibraryError::UnknownTrack(id) => write!(f, "No track with id {}", id),
        }
    }
}

impl std::error::Error for LibraryError {}

fn generate_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[derive(Debug, Clone)]
pub struct Library {
    playlists: Vec<Playlist>,
    current: usize,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    /// Library holding a single empty default playlist
    pub fn new() -> Self {
        Self {
            playlists: vec![Playlist::new(generate_id(), DEFAULT_PLAYLIST_NAME)],
            current: 0,
        }
    }

    /// Rebuild from persisted playlists, selecting `current_id` when present
    pub fn from_parts(playlists: Vec<Playlist>, current_id: Option<&str>) -> Self {
        if playlists.is_empty() {
            return Self::new();
        }
        let current = current_id
            .and_then(|id| playlists.iter().position(|p| p.id == id))
            .unwrap_or(0);
        Self { playlists, current }
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn current(&self) -> &Playlist {
        &self.playlists[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Playlist {
        &mut self.playlists[self.current]
    }

    pub fn current_id(&self) -> &str {
        &self.current().id
    }

    pub fn get(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    fn index_of(&self, id: &str) -> Result<usize, LibraryError> {
        self.playlists
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| LibraryError::UnknownPlaylist(id.to_string()))
    }

    fn ensure_unique_name(&self, name: &str, except: Option<&str>) -> Result<(), LibraryError> {
        if self
            .playlists
            .iter()
            .any(|p| p.name == name && Some(p.id.as_str()) != except)
        {
            return Err(LibraryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn create_playlist(&mut self, name: &str) -> Result<PlaylistEvent, LibraryError> {
        let name = name.trim();
        self.ensure_unique_name(name, None)?;
        let playlist = Playlist::new(generate_id(), name);
        info!("Created playlist '{}' ({})", playlist.name, playlist.id);
        let event = PlaylistEvent::PlaylistCreated {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
        };
        self.playlists.push(playlist);
        Ok(event)
    }

    /// Delete a playlist. Deleting the current one moves to the first
    /// remaining playlist, or to a freshly created default.
    pub fn delete_playlist(&mut self, id: &str) -> Result<Vec<PlaylistEvent>, LibraryError> {
        let index = self.index_of(id)?;
        let current_id = self.current_id().to_string();
        self.playlists.remove(index);
        info!("Deleted playlist {}", id);

        let mut events = vec![PlaylistEvent::PlaylistDeleted { id: id.to_string() }];

        if self.playlists.is_empty() {
            let fallback = Playlist::new(generate_id(), DEFAULT_PLAYLIST_NAME);
            events.push(PlaylistEvent::PlaylistCreated {
                id: fallback.id.clone(),
                name: fallback.name.clone(),
            });
            self.playlists.push(fallback);
        }

        self.current = self
            .playlists
            .iter()
            .position(|p| p.id == current_id)
            .unwrap_or(0);

        if current_id == id {
            events.push(PlaylistEvent::PlaylistSwitched {
                id: self.current_id().to_string(),
            });
        }
        Ok(events)
    }

    pub fn rename_playlist(&mut self, id: &str, name: &str) -> Result<PlaylistEvent, LibraryError> {
        let name = name.trim();
        let index = self.index_of(id)?;
        self.ensure_unique_name(name, Some(id))?;
        self.playlists[index].name = name.to_string();
        Ok(PlaylistEvent::PlaylistRenamed {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    pub fn switch_to(&mut self, id: &str) -> Result<PlaylistEvent, LibraryError> {
        self.current = self.index_of(id)?;
        debug!("Switched to playlist {}", id);
        Ok(PlaylistEvent::PlaylistSwitched { id: id.to_string() })
    }

    /// Append a track to the current playlist
    pub fn add_track(&mut self, track: Track) -> Result<PlaylistEvent, LibraryError> {
        let playlist = self.current_mut();
        if playlist.position_of(&track.id).is_some() {
            return Err(LibraryError::DuplicateTrack(track.id));
        }
        let event = PlaylistEvent::ItemAdded {
            playlist_id: playlist.id.clone(),
            index: playlist.tracks.len(),
            track_id: track.id.clone(),
        };
        playlist.tracks.push(track);
        Ok(event)
    }

    /// Remove a track from the current playlist, returning its old index
    pub fn remove_track(&mut self, track_id: &str) -> Result<(usize, PlaylistEvent), LibraryError> {
        let playlist = self.current_mut();
        let index = playlist
            .position_of(track_id)
            .ok_or_else(|| LibraryError::UnknownTrack(track_id.to_string()))?;
        playlist.tracks.remove(index);
        Ok((
            index,
            PlaylistEvent::ItemRemoved {
                playlist_id: playlist.id.clone(),
                index,
                track_id: track_id.to_string(),
            },
        ))
    }

    /// Remove several tracks; unknown ids are skipped
    pub fn remove_tracks(&mut self, track_ids: &[String]) -> Vec<(usize, PlaylistEvent)> {
        track_ids
            .iter()
            .filter_map(|id| self.remove_track(id).ok())
            .collect()
    }

    /// Reorder the current playlist to follow `order`. Tracks missing from
    /// `order` keep their relative order after the listed ones.
    pub fn reorder(&mut self, order: &[String]) -> PlaylistEvent {
        let playlist = self.current_mut();
        let mut remaining = std::mem::take(&mut playlist.tracks);
        let mut reordered = Vec::with_capacity(remaining.len());

        for id in order {
            if let Some(pos) = remaining.iter().position(|t| &t.id == id) {
                reordered.push(remaining.remove(pos));
            }
        }
        reordered.append(&mut remaining);
        playlist.tracks = reordered;

        PlaylistEvent::Reordered {
            playlist_id: playlist.id.clone(),
            order: playlist.tracks.iter().map(|t| t.id.clone()).collect(),
        }
    }
}
