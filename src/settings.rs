//! Engine settings persistence
//!
//! The engine only reads these values. They are loaded once at startup
//! and passed to `Engine::open`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default volume on first start (0 - 100)
const DEFAULT_VOLUME: u8 = 80;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Preferred output device name (None = system default)
    pub audio_device_name: Option<String>,
    /// Initial volume (0 - 100)
    pub volume: u8,
    /// Network stream tuning
    pub streaming: StreamingSettings,
}

/// Tuning for network stream playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Capacity of the transfer buffer between download and decode
    pub buffer_capacity_bytes: usize,
    /// Transfer buffer is only drained into the decoder once it holds this much
    pub min_feed_bytes: usize,
    /// Staged input required before a stream decode attempt
    pub decode_reserve_bytes: usize,
    /// How long `play_url` waits for initial data before enabling playback
    pub initial_buffering_ms: u64,
    /// Upper bound for establishing the HTTP connection
    pub connect_timeout_secs: u64,
    /// Quit-check interval while a network read is pending
    pub read_poll_ms: u64,
    /// Fallback wait when the transfer buffer is full
    pub backpressure_poll_ms: u64,
    /// Consecutive decode errors before the stream is reported as degraded
    pub max_consecutive_decode_errors: u32,
    /// User-Agent header sent with stream requests
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_device_name: None,
            volume: DEFAULT_VOLUME,
            streaming: StreamingSettings::default(),
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            buffer_capacity_bytes: 1024 * 1024,
            min_feed_bytes: 8 * 1024,
            decode_reserve_bytes: 16 * 1024,
            initial_buffering_ms: 200,
            connect_timeout_secs: 10,
            read_poll_ms: 100,
            backpressure_poll_ms: 50,
            max_consecutive_decode_errors: 8,
            user_agent: concat!("shard-player/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl StreamingSettings {
    pub fn initial_buffering(&self) -> Duration {
        Duration::from_millis(self.initial_buffering_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms.max(1))
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms.max(1))
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "shard", "shard-player")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from file, or return defaults if not found
    pub fn load() -> Self {
        match Self::file_path() {
            Some(path) if path.exists() => match Self::load_from_file(&path) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Ignoring settings file {:?}: {}", path, e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        let mut settings: Settings =
            serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.volume = settings.volume.min(100);
        Ok(settings)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.audio_device_name = Some("USB Audio".to_string());
        settings.volume = 42;
        settings.streaming.buffer_capacity_bytes = 4096;

        settings.save_to_file(&path).unwrap();
        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "audio_device_name": "hw:1,0" }"#).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded.audio_device_name.as_deref(), Some("hw:1,0"));
        assert_eq!(loaded.volume, DEFAULT_VOLUME);
        assert_eq!(loaded.streaming, StreamingSettings::default());
    }

    #[test]
    fn test_volume_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "volume": 250 }"#).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded.volume, 100);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            Settings::load_from_file(&path),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_default_buffer_holds_seconds_of_audio() {
        // 320 kbps = 40 KB/s
        let streaming = StreamingSettings::default();
        assert!(streaming.buffer_capacity_bytes / (40 * 1024) >= 5);
        assert!(streaming.decode_reserve_bytes >= streaming.min_feed_bytes);
    }
}
