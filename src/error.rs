//! Engine error types
//!
//! Setup failures are returned synchronously to the caller. Streaming
//! failures never surface here; they are logged and reported through
//! `Engine::stream_health()` instead.

use std::path::PathBuf;

/// Errors returned by engine operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Neither the configured nor the default output device could be opened
    DeviceUnavailable(String),
    /// The decoder could not be created for the given input
    DecoderInit(String),
    /// A local file could not be opened or read
    FileOpen { path: PathBuf, reason: String },
    /// The stream URL is malformed or uses an unsupported scheme
    InvalidUrl(String),
    /// Connecting to the stream failed (DNS, TCP, TLS, HTTP status or timeout)
    Connect(String),
    /// The download worker thread could not be started
    Spawn(String),
    /// Seeking was requested on a source that cannot seek (live streams)
    NotSeekable,
    /// The operation needs an open source but none is active
    NoActiveSource,
    /// The decoder rejected the seek target
    Seek(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DeviceUnavailable(e) => write!(f, "Audio device unavailable: {}", e),
            EngineError::DecoderInit(e) => write!(f, "Failed to initialize decoder: {}", e),
            EngineError::FileOpen { path, reason } => {
                write!(f, "Failed to open audio file {}: {}", path.display(), reason)
            }
            EngineError::InvalidUrl(e) => write!(f, "Invalid stream URL: {}", e),
            EngineError::Connect(e) => write!(f, "Failed to connect to stream: {}", e),
            EngineError::Spawn(e) => write!(f, "Failed to start download thread: {}", e),
            EngineError::NotSeekable => write!(f, "Current source does not support seeking"),
            EngineError::NoActiveSource => write!(f, "No audio source is loaded"),
            EngineError::Seek(e) => write!(f, "Seek failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_path() {
        let err = EngineError::FileOpen {
            path: PathBuf::from("/music/track.mp3"),
            reason: "No such file or directory".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("/music/track.mp3"));
        assert!(message.contains("No such file"));
    }
}
