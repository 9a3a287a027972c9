//! Application settings persistence
//!
//! Handles saving and loading the playback engine's tunables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Play mode, persisted as the strings `repeat`, `shuffle`, `repeat-one`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayMode {
    /// Play in order, wrap to the start after the last track
    #[default]
    #[serde(rename = "repeat")]
    Sequential,
    /// Random order without repeats until every track has played
    #[serde(rename = "shuffle")]
    Shuffle,
    /// Repeat the current track when it ends
    #[serde(rename = "repeat-one")]
    RepeatOne,
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl PlayMode {
    /// Get the next play mode in cycle order
    pub fn next(self) -> Self {
        match self {
            PlayMode::Sequential => PlayMode::Shuffle,
            PlayMode::Shuffle => PlayMode::RepeatOne,
            PlayMode::RepeatOne => PlayMode::Sequential,
        }
    }

    /// Get display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayMode::Sequential => "Repeat all",
            PlayMode::Shuffle => "Shuffle",
            PlayMode::RepeatOne => "Repeat one",
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Resolution, retry and resume behaviour
    #[serde(default)]
    pub playback: PlaybackSettings,
    /// Secondary stream alignment and overlay pushes
    #[serde(default)]
    pub sync: SyncSettings,
    /// Lyrics parsing defaults
    #[serde(default)]
    pub lyrics: LyricsSettings,
    /// Locator provider endpoint
    #[serde(default)]
    pub network: NetworkSettings,
}

/// Playback-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Lifetime of a resolved stream URL in minutes
    pub cache_ttl_mins: u64,
    /// Upper bound on a single track load, in seconds
    pub loading_timeout_secs: u64,
    /// Resolution attempts before giving up
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay_ms: u64,
    /// Minimum audio-time advance between coalesced position saves
    pub position_save_interval_ms: u64,
    /// Resolve and mirror the background video stream
    #[serde(default = "default_true")]
    pub video_enabled: bool,
    /// Redraw/tick rate while a track is active
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

/// Video alignment and overlay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// How often drift between the two clocks is measured
    pub drift_check_interval_ms: u64,
    /// Drift above which the secondary playback rate is nudged
    pub nudge_threshold_ms: u64,
    /// Drift above which the secondary is hard-seeked
    pub hard_seek_threshold_ms: u64,
    /// Largest fractional rate change applied by a nudge
    pub max_rate_adjustment: f64,
    /// Overlay heartbeat while the host surface is not rendering
    pub overlay_heartbeat_ms: u64,
}

/// Lyrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsSettings {
    /// Duration given to each line of line-timestamp lyrics
    pub default_line_duration_ms: u64,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Base URL of the metadata/locator service
    pub provider_base_url: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_tick_hz() -> u32 {
    60
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            cache_ttl_mins: 120,
            loading_timeout_secs: 15,
            retry_attempts: 2,
            retry_base_delay_ms: 1000,
            position_save_interval_ms: 10_000,
            video_enabled: true,
            tick_hz: 60,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drift_check_interval_ms: 5_000,
            nudge_threshold_ms: 500,
            hard_seek_threshold_ms: 1_000,
            max_rate_adjustment: 0.05,
            overlay_heartbeat_ms: 1_000,
        }
    }
}

impl Default for LyricsSettings {
    fn default() -> Self {
        Self {
            default_line_duration_ms: 5_000,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            provider_base_url: "http://127.0.0.1:3000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl PlaybackSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_mins * 60)
    }

    pub fn loading_timeout(&self) -> Duration {
        Duration::from_secs(self.loading_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.tick_hz.max(1)))
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rhapsode", "Rhapsode")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Directory for persisted session state
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rhapsode", "Rhapsode")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Load settings from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::debug!("Using default settings ({}): {:?}", e, path);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Write settings to the platform config file, returning where they went
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::file_path()
            .ok_or_else(|| SettingsError::Io("no config directory on this platform".into()))?;
        self.save_to_file(&path)?;
        Ok(path)
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}
