//! Audio streaming and decode engine
//!
//! This module provides:
//! - `Engine`: Session lifecycle (play, pause, resume, seek, stop, volume)
//! - `transfer`: Bounded byte buffer between the download and decode sides
//! - `download`: HTTP producer thread feeding the transfer buffer
//! - `decoder`: Incremental symphonia decoder for files and streams
//! - `sink`: Pull adapter driven by the audio device
//! - `output`: Audio device access (rodio/cpal)
//!
//! ## Threads
//! ```text
//! Control thread (Engine) --play/stop/seek--> PlaybackCore <--try_lock-- Device callback (DeviceFeed)
//! Download thread --write--> SharedTransfer --drain--> Device callback
//! ```

pub mod decoder;
pub mod download;
pub mod metadata;
pub mod output;
mod session;
pub mod sink;
pub mod state;
pub mod transfer;

pub use download::{HttpConnector, StreamConnector};
pub use metadata::TrackMetadata;
pub use output::{AudioDevice, AudioOutput, RodioOutput, list_output_devices};
pub use session::Engine;
pub use state::StreamHealth;

/// Playback status of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// End of a file source was reached
    Finished,
}

impl PlayStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PlayStatus::Stopped => "stopped",
            PlayStatus::Playing => "playing",
            PlayStatus::Paused => "paused",
            PlayStatus::Finished => "finished",
        }
    }
}

/// Kind of the current (or most recent) source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Nothing played yet
    #[default]
    None,
    File,
    Url,
}

/// Format reported by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec short name ("mp3", "pcm_s16le", ...)
    pub codec: String,
}
