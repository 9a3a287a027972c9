//! Key/value state store
//! Each key holds one JSON blob; writers replace whole values

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::models::{SessionSnapshot, keys};

const STATE_FILE: &str = "session.json";

/// Generic get/set of JSON-serializable blobs
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Errors that can occur while persisting state
#[derive(Debug, Clone)]
pub enum StoreError {
    Io(String),
    Serialize(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialize(e) => write!(f, "Serialize error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read a typed value, treating undecodable blobs as absent
pub fn load<T: DeserializeOwned>(store: &dyn StateStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring undecodable value for '{}': {}", key, e);
            None
        }
    }
}

/// Write a typed value
pub fn save<T: Serialize + ?Sized>(store: &dyn StateStore, key: &str, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
    store.set(key, value)
}

impl SessionSnapshot {
    /// Read every session key; missing keys take their defaults
    pub fn load_from(store: &dyn StateStore) -> Self {
        Self {
            playlists: load(store, keys::PLAYLISTS).unwrap_or_default(),
            current_playlist_id: load(store, keys::CURRENT_PLAYLIST_ID).unwrap_or_default(),
            current_track_index: load(store, keys::CURRENT_TRACK_INDEX).unwrap_or_default(),
            resume_positions: load(store, keys::RESUME_POSITIONS).unwrap_or_default(),
            play_mode: load(store, keys::PLAY_MODE).unwrap_or_default(),
        }
    }

    /// Write every session key
    pub fn save_to(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        save(store, keys::PLAYLISTS, &self.playlists)?;
        save(store, keys::CURRENT_PLAYLIST_ID, &self.current_playlist_id)?;
        save(store, keys::CURRENT_TRACK_INDEX, &self.current_track_index)?;
        save(store, keys::RESUME_POSITIONS, &self.resume_positions)?;
        save(store, keys::PLAY_MODE, &self.play_mode)?;
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Single JSON document on disk, rewritten atomically on every set
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store in the platform data directory
    pub fn open_default() -> Result<Self> {
        let dir = crate::features::Settings::data_dir()
            .context("Could not determine data directory")?;
        Self::open(dir.join(STATE_FILE))
    }

    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("State file {} is corrupt, starting empty: {}", path.display(), e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        debug!("State store opened at {} ({} keys)", path.display(), document.len());
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.document.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut document = self.document.lock();
        document.insert(key.to_string(), value);
        self.write_document(&document)
            .map_err(|e| StoreError::Io(format!("{:#}", e)))
    }
}
