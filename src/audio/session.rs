//! Session lifecycle controller
//!
//! `Engine` owns one playback session at a time and is driven from the
//! control thread. All status transitions happen while the session core is
//! locked; tearing down a source always runs signal quit, join, reset in that
//! order before the transfer buffer or decoder is touched again.
//!
//! ```text
//! play_file / play_url ──> Playing <──> Paused
//!            │               │             │
//!            │               └─> Finished  │   (end of file)
//!            └────── stop() from any state ┴──> Stopped
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::decoder::IncrementalDecoder;
use super::download::{DownloadProducer, HttpConnector, StreamConnector, parse_stream_url};
use super::metadata::{TrackMetadata, read_file_metadata};
use super::output::{AudioOutput, RodioOutput};
use super::sink::{ActiveSource, DeviceFeed, PlaybackCore, SinkAdapter};
use super::state::{SharedPlaybackState, StreamHealth};
use super::transfer::SharedTransfer;
use super::{PlayStatus, SourceKind, TrackInfo};
use crate::error::EngineError;
use crate::settings::Settings;

/// Most recent play request, replayed by `resume()` after a stop
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlayRequest {
    File(PathBuf),
    Url(String),
}

/// Audio streaming and decode engine
pub struct Engine {
    settings: Settings,
    /// None once closed
    output: Option<Box<dyn AudioOutput>>,
    connector: Arc<dyn StreamConnector>,
    core: Arc<Mutex<PlaybackCore>>,
    transfer: Arc<SharedTransfer>,
    state: SharedPlaybackState,
    volume: u8,
    last_request: Option<PlayRequest>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("volume", &self.volume)
            .field("open", &self.output.is_some())
            .finish()
    }
}

impl Engine {
    /// Open the configured audio device (or the default) with the HTTP connector
    pub fn open(settings: &Settings) -> Result<Self, EngineError> {
        let output = RodioOutput::open(settings.audio_device_name.as_deref())?;
        Ok(Self::with_parts(
            settings.clone(),
            Box::new(output),
            Arc::new(HttpConnector::new()),
        ))
    }

    /// Build an engine over an already opened output and a stream connector
    pub fn with_parts(
        settings: Settings,
        mut output: Box<dyn AudioOutput>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let streaming = &settings.streaming;
        let transfer = Arc::new(SharedTransfer::new(streaming.buffer_capacity_bytes));
        let core = Arc::new(Mutex::new(PlaybackCore::new(IncrementalDecoder::new(
            streaming.decode_reserve_bytes,
        ))));
        let state = SharedPlaybackState::new();

        let adapter = SinkAdapter::new(
            core.clone(),
            state.clone(),
            transfer.clone(),
            streaming.min_feed_bytes,
            streaming.max_consecutive_decode_errors,
        );
        output.attach(DeviceFeed::new(adapter));

        let volume = settings.volume.min(100);
        output.set_volume(volume_to_gain(volume));
        output.pause();

        tracing::info!(
            "Engine ready (transfer buffer: {} KB, volume: {})",
            streaming.buffer_capacity_bytes / 1024,
            volume
        );

        Self {
            settings,
            output: Some(output),
            connector,
            core,
            transfer,
            state,
            volume,
            last_request: None,
        }
    }

    /// Stop playback and release the audio device
    pub fn close(&mut self) {
        if self.output.is_none() {
            return;
        }
        self.stop();
        if let Some(output) = self.output.take() {
            output.pause();
        }
        tracing::info!("Engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.output.is_none() {
            tracing::warn!("Engine used after close");
            return Err(EngineError::DeviceUnavailable("engine is closed".to_string()));
        }
        Ok(())
    }

    fn pause_output(&self) {
        if let Some(output) = self.output.as_ref() {
            output.pause();
        }
    }

    fn resume_output(&self) {
        if let Some(output) = self.output.as_ref() {
            output.resume();
        }
    }

    /// Release the active source: signal quit, join, close the decoder
    fn teardown(core: &mut PlaybackCore) {
        match core.source.take() {
            Some(ActiveSource::Url { mut producer, .. }) => producer.shutdown(),
            Some(ActiveSource::File { path }) => {
                tracing::debug!("Closing {}", path.display());
            }
            None => {}
        }
        core.decoder.close();
        core.reset_session();
    }

    /// Play a local file from the start
    pub fn play_file(&mut self, path: &Path) -> Result<(), EngineError> {
        self.ensure_open()?;
        tracing::info!("Playing file: {}", path.display());

        let metadata = read_file_metadata(path);
        self.pause_output();

        let mut core = self.core.lock();
        Self::teardown(&mut core);
        self.state.begin_session(SourceKind::File, metadata);

        if let Err(e) = core.decoder.open_file(path) {
            tracing::error!("Failed to open {}: {}", path.display(), e);
            self.state.set_status(PlayStatus::Stopped);
            return Err(e);
        }
        core.source = Some(ActiveSource::File {
            path: path.to_path_buf(),
        });
        self.state.set_status(PlayStatus::Playing);
        drop(core);

        self.last_request = Some(PlayRequest::File(path.to_path_buf()));
        self.resume_output();
        Ok(())
    }

    /// Play a live HTTP stream
    ///
    /// Returns after the server answered and initial buffering finished (or
    /// timed out). A malformed URL leaves the current session untouched.
    pub fn play_url(&mut self, url: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let parsed = parse_stream_url(url)?;
        tracing::info!("Playing stream: {}", parsed);

        self.pause_output();

        let mut core = self.core.lock();
        Self::teardown(&mut core);
        self.transfer.reset();
        self.state.begin_session(SourceKind::Url, TrackMetadata::default());

        let streaming = &self.settings.streaming;
        let producer = match DownloadProducer::spawn(
            parsed,
            self.connector.clone(),
            self.transfer.clone(),
            streaming,
        ) {
            Ok(producer) => producer,
            Err(e) => {
                self.state.set_status(PlayStatus::Stopped);
                return Err(e);
            }
        };

        let buffered = self
            .transfer
            .wait_for_data(streaming.min_feed_bytes, streaming.initial_buffering());
        tracing::debug!("Initial buffering done with {} bytes", buffered);

        core.decoder.open_stream(producer.format_hint());
        core.source = Some(ActiveSource::Url {
            producer,
            input_finished: false,
        });
        self.state.set_status(PlayStatus::Playing);
        drop(core);

        self.last_request = Some(PlayRequest::Url(url.to_string()));
        self.resume_output();
        Ok(())
    }

    /// Pause device pull; no-op unless playing
    pub fn pause(&mut self) {
        let core = self.core.lock();
        if self.state.status() != PlayStatus::Playing {
            return;
        }
        self.state.set_status(PlayStatus::Paused);
        drop(core);
        self.pause_output();
    }

    /// Continue a paused session, or replay the last request after a stop
    ///
    /// A live stream that ended is reconnected. Resuming a finished file does
    /// nothing; call `play_file` again.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.ensure_open()?;

        let core = self.core.lock();
        match self.state.status() {
            PlayStatus::Playing | PlayStatus::Finished => return Ok(()),
            PlayStatus::Paused if core.source.is_some() && !self.state.health().stream_ended => {
                self.state.set_status(PlayStatus::Playing);
                drop(core);
                self.resume_output();
                return Ok(());
            }
            PlayStatus::Paused | PlayStatus::Stopped => {}
        }
        drop(core);

        match self.last_request.clone() {
            Some(PlayRequest::File(path)) => self.play_file(&path),
            Some(PlayRequest::Url(url)) => self.play_url(&url),
            None => Err(EngineError::NoActiveSource),
        }
    }

    /// Tear down the session and stop device pull
    pub fn stop(&mut self) {
        let mut core = self.core.lock();
        Self::teardown(&mut core);
        self.state.set_status(PlayStatus::Stopped);
        drop(core);
        self.pause_output();
    }

    /// Seek within a file source, returns the position landed on
    pub fn seek(&mut self, position: Duration) -> Result<Duration, EngineError> {
        let mut core = self.core.lock();
        match &core.source {
            None => return Err(EngineError::NoActiveSource),
            Some(ActiveSource::Url { .. }) => return Err(EngineError::NotSeekable),
            Some(ActiveSource::File { .. }) => {}
        }
        if self.state.status() == PlayStatus::Finished {
            return Err(EngineError::NoActiveSource);
        }

        let landed = core.decoder.seek(position)?;
        core.clear_pending();
        self.state.set_position(landed);
        tracing::info!("Seeked to {:?}", landed);
        Ok(landed)
    }

    /// Current status; once the session reached its end, device pull is paused
    pub fn play_status(&self) -> PlayStatus {
        let status = self.state.status();
        let ended = status == PlayStatus::Finished
            || (status == PlayStatus::Paused && self.state.health().stream_ended);
        if ended {
            self.pause_output();
        }
        status
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn source_kind(&self) -> SourceKind {
        self.state.source_kind()
    }

    pub fn position(&self) -> Duration {
        self.state.position()
    }

    pub fn position_seconds(&self) -> u64 {
        self.state.position().as_secs()
    }

    pub fn metadata(&self) -> TrackMetadata {
        self.state.metadata()
    }

    pub fn track_info(&self) -> Option<TrackInfo> {
        self.state.track_info()
    }

    pub fn stream_health(&self) -> StreamHealth {
        self.state.health()
    }

    fn stream_active(&self) -> bool {
        self.state.source_kind() == SourceKind::Url && self.state.status() != PlayStatus::Stopped
    }

    /// Bytes waiting in the transfer buffer (0 unless a stream is active)
    pub fn buffered_bytes(&self) -> usize {
        if self.stream_active() {
            self.transfer.bytes_used()
        } else {
            0
        }
    }

    /// Transfer buffer fill level, 0 - 100 (0 unless a stream is active)
    pub fn buffered_percent(&self) -> u8 {
        if self.stream_active() {
            self.transfer.percent_used()
        } else {
            0
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Set volume (0 - 100); kept across sessions
    pub fn set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        self.volume = volume;
        self.settings.volume = volume;
        if let Some(output) = self.output.as_ref() {
            output.set_volume(volume_to_gain(volume));
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.device_name())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

fn volume_to_gain(volume: u8) -> f32 {
    volume.min(100) as f32 / 100.0
}

// ============ Tests ============
