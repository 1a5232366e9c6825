//! shard-player - audio streaming and decode engine for a kiosk media station
//!
//! Plays local files or live HTTP streams through one `Engine`:
//!
//! ```no_run
//! use shard_player::{Engine, Settings};
//!
//! let mut engine = Engine::open(&Settings::load())?;
//! engine.play_url("http://radio.example:8000/live")?;
//! println!("{:?} {}%", engine.play_status(), engine.buffered_percent());
//! # Ok::<(), shard_player::EngineError>(())
//! ```

pub mod audio;
pub mod error;
pub mod settings;

pub use audio::{
    AudioDevice, Engine, PlayStatus, SourceKind, StreamHealth, TrackInfo, TrackMetadata,
    list_output_devices,
};
pub use error::EngineError;
pub use settings::{Settings, SettingsError, StreamingSettings};
