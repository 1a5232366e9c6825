//! Shared playback state
//!
//! Written by the control thread and the device callback (always while they
//! hold the session core lock), read by status queries without touching the
//! core lock. Queries therefore never wait on a decode in progress.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::metadata::TrackMetadata;
use super::{PlayStatus, SourceKind, TrackInfo};

/// Health of the current stream, polled by callers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHealth {
    /// Too many consecutive decode errors
    pub degraded: bool,
    pub consecutive_errors: u32,
    /// The live stream ended (server closed or transfer failed)
    pub stream_ended: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct PlaybackStateInner {
    status: PlayStatus,
    source_kind: SourceKind,
    /// Frames handed to the device since the session started (or since the last seek)
    frames_played: u64,
    sample_rate: u32,
    /// Position of frame zero, set by seeks
    base_position: Duration,
    track_info: Option<TrackInfo>,
    metadata: TrackMetadata,
    health: StreamHealth,
}

impl Default for PlaybackStateInner {
    fn default() -> Self {
        Self {
            status: PlayStatus::Stopped,
            source_kind: SourceKind::None,
            frames_played: 0,
            sample_rate: 0,
            base_position: Duration::ZERO,
            track_info: None,
            metadata: TrackMetadata::default(),
            health: StreamHealth::default(),
        }
    }
}

impl PlaybackStateInner {
    fn position(&self) -> Duration {
        if self.sample_rate == 0 {
            return self.base_position;
        }
        self.base_position
            + Duration::from_secs_f64(self.frames_played as f64 / self.sample_rate as f64)
    }
}

/// Thread-safe shared playback state
#[derive(Clone, Default)]
pub struct SharedPlaybackState {
    inner: Arc<RwLock<PlaybackStateInner>>,
}

impl std::fmt::Debug for SharedPlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedPlaybackState")
            .field("status", &inner.status)
            .field("source_kind", &inner.source_kind)
            .field("position", &inner.position())
            .finish()
    }
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PlayStatus {
        self.inner.read().status
    }

    pub fn is_playing(&self) -> bool {
        self.inner.read().status == PlayStatus::Playing
    }

    /// Change status, returns the previous one
    pub fn set_status(&self, status: PlayStatus) -> PlayStatus {
        let mut inner = self.inner.write();
        let old = inner.status;
        if old != status {
            tracing::debug!("Playback status {:?} -> {:?}", old, status);
            inner.status = status;
        }
        old
    }

    pub fn source_kind(&self) -> SourceKind {
        self.inner.read().source_kind
    }

    /// Reset everything that belongs to one session
    pub fn begin_session(&self, kind: SourceKind, metadata: TrackMetadata) {
        let mut inner = self.inner.write();
        inner.source_kind = kind;
        inner.frames_played = 0;
        inner.sample_rate = 0;
        inner.base_position = Duration::ZERO;
        inner.track_info = None;
        inner.metadata = metadata;
        inner.health = StreamHealth::default();
    }

    pub fn position(&self) -> Duration {
        self.inner.read().position()
    }

    pub fn add_frames(&self, frames: u64) {
        self.inner.write().frames_played += frames;
    }

    /// Restart position counting at `position`
    pub fn set_position(&self, position: Duration) {
        let mut inner = self.inner.write();
        inner.base_position = position;
        inner.frames_played = 0;
    }

    pub fn track_info(&self) -> Option<TrackInfo> {
        self.inner.read().track_info.clone()
    }

    pub fn set_track_info(&self, info: TrackInfo) {
        let mut inner = self.inner.write();
        inner.sample_rate = info.sample_rate;
        inner.track_info = Some(info);
    }

    pub fn metadata(&self) -> TrackMetadata {
        self.inner.read().metadata.clone()
    }

    /// Fill in artist/title that are still unknown
    pub fn merge_metadata(&self, found: TrackMetadata) {
        let mut inner = self.inner.write();
        if inner.metadata.artist.is_none() {
            inner.metadata.artist = found.artist;
        }
        if inner.metadata.title.is_none() {
            inner.metadata.title = found.title;
        }
        if inner.metadata.duration.is_none() {
            inner.metadata.duration = found.duration;
        }
    }

    pub fn health(&self) -> StreamHealth {
        self.inner.read().health.clone()
    }

    /// Count a decode error; returns the new consecutive count and whether
    /// this error crossed the degraded threshold
    pub fn record_decode_error(&self, error: String, threshold: u32) -> (u32, bool) {
        let mut inner = self.inner.write();
        let health = &mut inner.health;
        health.consecutive_errors += 1;
        health.last_error = Some(error);
        let crossed = !health.degraded && health.consecutive_errors >= threshold.max(1);
        if crossed {
            health.degraded = true;
        }
        (health.consecutive_errors, crossed)
    }

    /// A packet decoded cleanly
    pub fn clear_decode_errors(&self) {
        let mut inner = self.inner.write();
        if inner.health.consecutive_errors > 0 {
            inner.health.consecutive_errors = 0;
            inner.health.degraded = false;
        }
    }

    pub fn mark_stream_ended(&self, failure: Option<String>) {
        let mut inner = self.inner.write();
        inner.health.stream_ended = true;
        if failure.is_some() {
            inner.health.last_error = failure;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_frames_and_base() {
        let state = SharedPlaybackState::new();
        assert_eq!(state.position(), Duration::ZERO);

        state.set_track_info(TrackInfo {
            sample_rate: 8000,
            channels: 1,
            codec: "pcm_s16le".to_string(),
        });
        state.add_frames(16000);
        assert_eq!(state.position(), Duration::from_secs(2));

        state.set_position(Duration::from_secs(5));
        state.add_frames(4000);
        assert_eq!(state.position(), Duration::from_millis(5500));
    }

    #[test]
    fn test_begin_session_resets_session_fields() {
        let state = SharedPlaybackState::new();
        state.set_status(PlayStatus::Playing);
        state.add_frames(100);
        state.record_decode_error("bad frame".to_string(), 1);

        state.begin_session(SourceKind::Url, TrackMetadata::default());
        assert_eq!(state.source_kind(), SourceKind::Url);
        assert_eq!(state.position(), Duration::ZERO);
        assert_eq!(state.health(), StreamHealth::default());
        // Status is owned by the controller
        assert_eq!(state.status(), PlayStatus::Playing);
    }

    #[test]
    fn test_degraded_after_threshold_and_cleared_on_success() {
        let state = SharedPlaybackState::new();
        assert_eq!(state.record_decode_error("e1".into(), 3), (1, false));
        assert_eq!(state.record_decode_error("e2".into(), 3), (2, false));
        assert_eq!(state.record_decode_error("e3".into(), 3), (3, true));
        assert_eq!(state.record_decode_error("e4".into(), 3), (4, false));
        assert!(state.health().degraded);
        assert_eq!(state.health().last_error.as_deref(), Some("e4"));

        state.clear_decode_errors();
        assert!(!state.health().degraded);
        assert_eq!(state.health().consecutive_errors, 0);
    }

    #[test]
    fn test_merge_metadata_keeps_known_fields() {
        let state = SharedPlaybackState::new();
        state.begin_session(
            SourceKind::File,
            TrackMetadata {
                artist: None,
                title: Some("Known".to_string()),
                duration: Some(Duration::from_secs(10)),
            },
        );
        state.merge_metadata(TrackMetadata {
            artist: Some("Found".to_string()),
            title: Some("Other".to_string()),
            duration: None,
        });

        let metadata = state.metadata();
        assert_eq!(metadata.artist.as_deref(), Some("Found"));
        assert_eq!(metadata.title.as_deref(), Some("Known"));
        assert_eq!(metadata.duration, Some(Duration::from_secs(10)));
    }
}
