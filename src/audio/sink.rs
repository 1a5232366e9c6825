//! Playback sink adapter
//!
//! The audio device thread drives everything through one call:
//! `PullSource::pull`. `SinkAdapter` implements it against the session core;
//! `DeviceFeed` turns it into a `rodio::Source` that never ends, playing short
//! silence blocks whenever nothing could be decoded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::Source;

use super::decoder::{DecodeStatus, IncrementalDecoder};
use super::download::DownloadProducer;
use super::metadata::TrackMetadata;
use super::state::SharedPlaybackState;
use super::transfer::SharedTransfer;
use super::{PlayStatus, SourceKind, TrackInfo};

/// Format used before the first packet of a session is decoded
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNELS: u16 = 2;

/// Frames requested from the adapter per device block
const BLOCK_FRAMES: usize = 1024;

/// Length of the silence block played on under-run
const SILENCE_BLOCK: Duration = Duration::from_millis(10);

/// Log every Nth repeated decode error
const ERROR_LOG_INTERVAL: u32 = 50;

/// Source currently feeding the decoder
#[derive(Debug)]
pub enum ActiveSource {
    File { path: PathBuf },
    Url {
        producer: DownloadProducer,
        /// Transfer reported end of data and the decoder was told so
        input_finished: bool,
    },
}

impl ActiveSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::File { .. } => SourceKind::File,
            ActiveSource::Url { .. } => SourceKind::Url,
        }
    }
}

/// State shared between the control thread and the device callback
///
/// One lock covers the decoder, the source and the undelivered samples. The
/// device side only ever `try_lock`s it.
#[derive(Debug)]
pub struct PlaybackCore {
    pub source: Option<ActiveSource>,
    pub decoder: IncrementalDecoder,
    /// Decoded samples not yet handed to the device
    pending: Vec<f32>,
    pending_pos: usize,
    /// Scratch for bytes drained from the transfer buffer
    feed_scratch: Vec<u8>,
    negotiated: Option<TrackInfo>,
}

impl PlaybackCore {
    pub fn new(decoder: IncrementalDecoder) -> Self {
        Self {
            source: None,
            decoder,
            pending: Vec::new(),
            pending_pos: 0,
            feed_scratch: Vec::new(),
            negotiated: None,
        }
    }

    /// Forget decoded samples and the negotiated format (new session)
    pub fn reset_session(&mut self) {
        self.clear_pending();
        self.feed_scratch.clear();
        self.negotiated = None;
    }

    /// Drop decoded samples that were not played yet (seek)
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
    }

    pub fn format_negotiated(&self) -> bool {
        self.negotiated.is_some()
    }

    fn pending_samples(&self) -> usize {
        self.pending.len() - self.pending_pos
    }
}

/// Result of one pull
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Pulled {
    /// Samples written to the front of the output slice
    pub samples: usize,
    /// Set once per session, when the format is first known; applies to these samples
    pub format: Option<TrackInfo>,
}

/// Pull interface called by the device side
pub trait PullSource: Send {
    /// Fill `out` with interleaved samples; never blocks on I/O
    fn pull(&mut self, out: &mut [f32]) -> Pulled;
}

/// Adapter between the device pull and the session's decoder
pub struct SinkAdapter {
    core: Arc<Mutex<PlaybackCore>>,
    state: SharedPlaybackState,
    transfer: Arc<SharedTransfer>,
    min_feed_bytes: usize,
    max_consecutive_errors: u32,
}

impl SinkAdapter {
    pub fn new(
        core: Arc<Mutex<PlaybackCore>>,
        state: SharedPlaybackState,
        transfer: Arc<SharedTransfer>,
        min_feed_bytes: usize,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            core,
            state,
            transfer,
            min_feed_bytes,
            max_consecutive_errors,
        }
    }

    /// One bounded decode attempt for the active source
    fn decode_once(&self, core: &mut PlaybackCore) {
        let PlaybackCore {
            source,
            decoder,
            pending,
            feed_scratch,
            ..
        } = &mut *core;

        let status = match source {
            Some(ActiveSource::File { .. }) => decoder.decode(pending),
            Some(ActiveSource::Url { input_finished, .. }) => {
                let room = decoder.input_room();
                if room > 0 {
                    let min_batch = self.min_feed_bytes.min(room);
                    let drained = self.transfer.drain_into(feed_scratch, min_batch, room);
                    if drained.bytes > 0 {
                        decoder.feed(feed_scratch);
                        feed_scratch.clear();
                    }
                    if drained.finished && !*input_finished {
                        tracing::debug!("pull: transfer finished, flushing decoder input");
                        decoder.mark_input_finished();
                        *input_finished = true;
                    }
                }
                decoder.decode(pending)
            }
            None => {
                tracing::error!("pull: playing without an active source");
                return;
            }
        };

        match status {
            DecodeStatus::Ok => self.state.clear_decode_errors(),
            DecodeStatus::NeedMoreInput => {
                if matches!(source, Some(ActiveSource::File { .. })) {
                    tracing::trace!("pull: file decoder needs more input");
                }
            }
            DecodeStatus::Done => self.finish_source(core),
            DecodeStatus::Error(e) => {
                let (count, crossed) =
                    self.state.record_decode_error(e.clone(), self.max_consecutive_errors);
                if crossed {
                    tracing::warn!(
                        "Stream degraded after {} consecutive decode errors: {}",
                        count,
                        e
                    );
                } else if count == 1 || count % ERROR_LOG_INTERVAL == 0 {
                    tracing::debug!("pull: decode error #{}: {}", count, e);
                }
            }
        }
    }

    /// End of input: files finish, live streams pause
    fn finish_source(&self, core: &mut PlaybackCore) {
        match &core.source {
            Some(ActiveSource::File { path }) => {
                tracing::info!("Finished playing {}", path.display());
                self.state.set_status(PlayStatus::Finished);
            }
            Some(ActiveSource::Url { producer, .. }) => {
                let failure = self.transfer.failure();
                tracing::info!(
                    "Stream {} ended{}",
                    producer.url(),
                    failure
                        .as_deref()
                        .map(|e| format!(": {}", e))
                        .unwrap_or_default()
                );
                self.state.mark_stream_ended(failure);
                self.state.set_status(PlayStatus::Paused);
            }
            None => {}
        }
    }

    /// Pick up format and tags the decoder learned
    fn negotiate(&self, core: &mut PlaybackCore) -> Option<TrackInfo> {
        if core.negotiated.is_some() {
            return None;
        }
        let info = core.decoder.track_info()?;
        tracing::info!(
            "Negotiated output format: {} Hz, {} channel(s), codec {}",
            info.sample_rate,
            info.channels,
            info.codec
        );
        self.state.set_track_info(info.clone());
        if let Some(tags) = core.decoder.stream_tags() {
            self.state.merge_metadata(TrackMetadata::from_stream_tags(tags));
        }
        // Live streams have no length, whatever the container header says
        if let Some(ActiveSource::File { .. }) = core.source {
            if let Some(duration) = core.decoder.total_duration() {
                self.state.merge_metadata(TrackMetadata {
                    duration: Some(duration),
                    ..Default::default()
                });
            }
        }
        core.negotiated = Some(info.clone());
        Some(info)
    }
}

impl PullSource for SinkAdapter {
    fn pull(&mut self, out: &mut [f32]) -> Pulled {
        let Some(mut guard) = self.core.try_lock() else {
            tracing::trace!("pull: session busy, skipping cycle");
            return Pulled::default();
        };
        let core = &mut *guard;

        if self.state.status() != PlayStatus::Playing {
            return Pulled::default();
        }

        if core.pending_samples() == 0 {
            core.clear_pending();
            self.decode_once(core);
        }

        let format = self.negotiate(core);
        let Some(channels) = core.negotiated.as_ref().map(|i| i.channels.max(1) as usize) else {
            return Pulled::default();
        };

        let available = core.pending_samples();
        let samples = (out.len().min(available) / channels) * channels;
        if samples > 0 {
            let start = core.pending_pos;
            out[..samples].copy_from_slice(&core.pending[start..start + samples]);
            core.pending_pos += samples;
            self.state.add_frames((samples / channels) as u64);
        }

        Pulled { samples, format }
    }
}

/// `rodio::Source` over a `PullSource`
///
/// Samples are produced in blocks. Format changes take effect only at block
/// boundaries, which `current_span_len` reports to rodio.
pub struct DeviceFeed<P: PullSource> {
    source: P,
    block: Vec<f32>,
    pos: usize,
    len: usize,
    channels: u16,
    sample_rate: u32,
}

impl<P: PullSource> DeviceFeed<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            block: vec![0.0; BLOCK_FRAMES * DEFAULT_CHANNELS as usize],
            pos: 0,
            len: 0,
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    fn refill(&mut self) {
        let wanted = BLOCK_FRAMES * self.channels.max(1) as usize;
        if self.block.len() < wanted {
            self.block.resize(wanted, 0.0);
        }

        let pulled = self.source.pull(&mut self.block[..wanted]);
        if let Some(info) = pulled.format {
            if info.channels != self.channels || info.sample_rate != self.sample_rate {
                tracing::debug!(
                    "DeviceFeed: switching to {} Hz / {} ch",
                    info.sample_rate,
                    info.channels
                );
            }
            self.channels = info.channels.max(1);
            self.sample_rate = info.sample_rate.max(1);
        }

        self.pos = 0;
        if pulled.samples > 0 {
            self.len = pulled.samples;
        } else {
            // Under-run: a short block of silence, then ask again
            let frames = (self.sample_rate as u64 * SILENCE_BLOCK.as_millis() as u64 / 1000)
                .max(1) as usize;
            self.len = (frames * self.channels as usize).min(self.block.len());
            self.len -= self.len % self.channels as usize;
            self.block[..self.len].fill(0.0);
        }
    }
}

impl<P: PullSource> Iterator for DeviceFeed<P> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.len {
            self.refill();
        }
        let sample = self.block.get(self.pos).copied().unwrap_or(0.0);
        self.pos += 1;
        Some(sample)
    }
}

impl<P: PullSource> Source for DeviceFeed<P> {
    fn current_span_len(&self) -> Option<usize> {
        Some(self.len.saturating_sub(self.pos).max(1))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    /// Plays a fixed sample vector, announcing its format with the first samples
    struct VecSource {
        samples: Vec<f32>,
        pos: usize,
        info: TrackInfo,
        announced: bool,
    }

    impl PullSource for VecSource {
        fn pull(&mut self, out: &mut [f32]) -> Pulled {
            let n = out.len().min(self.samples.len() - self.pos);
            out[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            self.pos += n;
            let format = (!self.announced && n > 0).then(|| {
                self.announced = true;
                self.info.clone()
            });
            Pulled { samples: n, format }
        }
    }

    #[test]
    fn test_feed_switches_format_and_plays_silence_on_underrun() {
        let mut feed = DeviceFeed::new(VecSource {
            samples: vec![0.5; 100],
            pos: 0,
            info: TrackInfo {
                sample_rate: 8000,
                channels: 1,
                codec: "pcm".to_string(),
            },
            announced: false,
        });

        assert_eq!(feed.channels(), DEFAULT_CHANNELS);
        let first: Vec<f32> = feed.by_ref().take(100).collect();
        assert!(first.iter().all(|&s| s == 0.5));
        assert_eq!(feed.channels(), 1);
        assert_eq!(feed.sample_rate(), 8000);

        // Source exhausted: silence, never the end of the iterator
        let silence: Vec<f32> = feed.by_ref().take(500).collect();
        assert_eq!(silence.len(), 500);
        assert!(silence.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_span_len_counts_down_to_block_end() {
        let mut feed = DeviceFeed::new(VecSource {
            samples: vec![0.1; 10],
            pos: 0,
            info: TrackInfo {
                sample_rate: 8000,
                channels: 2,
                codec: "pcm".to_string(),
            },
            announced: false,
        });
        feed.next();
        assert_eq!(feed.current_span_len(), Some(9));
    }
}
