//! Incremental decoder built on symphonia
//!
//! Two feeding modes share one decoder handle:
//! - File: symphonia reads the file directly
//! - Stream: bytes drained from the transfer buffer are staged in a queue that
//!   symphonia reads through a non-seekable `MediaSource`
//!
//! Each `decode` call handles at most one packet so the device callback stays
//! bounded. The handle is closed and reopened on every track change; the
//! staging queue and sample buffer allocations are kept.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::TrackInfo;
use crate::error::EngineError;

/// Largest read handed to symphonia from the staging queue
///
/// Bounds how many staged bytes symphonia can pull into its own read-ahead,
/// so the staged byte count stays a good measure of undecoded input.
const STREAM_READ_CHUNK: usize = 4096;

/// Staging queue limit as a multiple of the decode reserve
const STAGING_LIMIT_FACTOR: usize = 4;

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Samples were appended to the output
    Ok,
    /// Nothing decoded this call; try again next cycle
    NeedMoreInput,
    /// End of input reached
    Done,
    /// Packet or container error; nothing decoded this call
    Error(String),
}

/// Artist/title found in stream tag frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTags {
    pub artist: Option<String>,
    pub title: Option<String>,
}

impl StreamTags {
    fn is_empty(&self) -> bool {
        self.artist.is_none() && self.title.is_none()
    }

    fn absorb(&mut self, revision: &MetadataRevision) {
        for tag in revision.tags() {
            match tag.std_key {
                Some(StandardTagKey::Artist) if self.artist.is_none() => {
                    self.artist = Some(tag.value.to_string());
                }
                Some(StandardTagKey::TrackTitle) if self.title.is_none() => {
                    self.title = Some(tag.value.to_string());
                }
                _ => {}
            }
        }
    }
}

// ============ Stream Staging ============

#[derive(Default)]
struct Staging {
    bytes: VecDeque<u8>,
    finished: bool,
    /// Bytes handed out while probing, restored if the probe runs dry
    journal: Option<Vec<u8>>,
}

impl Staging {
    fn clear(&mut self) {
        self.bytes.clear();
        self.finished = false;
        self.journal = None;
    }

    fn rewind_journal(&mut self) {
        if let Some(journal) = self.journal.take() {
            for byte in journal.into_iter().rev() {
                self.bytes.push_front(byte);
            }
        }
    }
}

/// Read side of the staging queue, owned by symphonia
struct StreamInput {
    staging: Arc<Mutex<Staging>>,
}

impl Read for StreamInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut staging = self.staging.lock();
        if staging.bytes.is_empty() {
            if staging.finished {
                return Ok(0);
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let n = buf.len().min(staging.bytes.len()).min(STREAM_READ_CHUNK);
        for (dst, src) in buf[..n].iter_mut().zip(staging.bytes.drain(..n)) {
            *dst = src;
        }
        if let Some(journal) = staging.journal.as_mut() {
            journal.extend_from_slice(&buf[..n]);
        }
        Ok(n)
    }
}

impl Seek for StreamInput {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live streams are not seekable",
        ))
    }
}

impl MediaSource for StreamInput {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

// ============ Decoder ============

struct OpenTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    codec: String,
    time_base: Option<TimeBase>,
    total_duration: Option<Duration>,
    info: Option<TrackInfo>,
    /// Frames to discard after an accurate seek landed early
    skip_frames: u64,
}

enum DecoderState {
    Closed,
    /// Stream opened, waiting for enough bytes to identify the format
    AwaitingProbe {
        hint: Option<String>,
        /// Staged bytes at the last probe that ran out of input
        attempted_at: usize,
    },
    Open { track: Box<OpenTrack>, seekable: bool },
}

/// Decoder handle reused across sessions
pub struct IncrementalDecoder {
    state: DecoderState,
    staging: Arc<Mutex<Staging>>,
    sample_buf: Option<SampleBuffer<f32>>,
    stream_tags: StreamTags,
    decode_reserve: usize,
    closed_decode_attempts: u64,
}

impl std::fmt::Debug for IncrementalDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            DecoderState::Closed => "closed",
            DecoderState::AwaitingProbe { .. } => "awaiting-probe",
            DecoderState::Open { .. } => "open",
        };
        f.debug_struct("IncrementalDecoder")
            .field("state", &state)
            .field("staged", &self.staged_bytes())
            .finish()
    }
}

impl IncrementalDecoder {
    /// Create a closed decoder
    ///
    /// `decode_reserve` is the number of staged bytes required before a
    /// stream decode is attempted, so a packet never straddles an empty queue.
    pub fn new(decode_reserve: usize) -> Self {
        Self {
            state: DecoderState::Closed,
            staging: Arc::new(Mutex::new(Staging::default())),
            sample_buf: None,
            stream_tags: StreamTags::default(),
            decode_reserve: decode_reserve.max(1),
            closed_decode_attempts: 0,
        }
    }

    /// Open a local file and read its container headers
    pub fn open_file(&mut self, path: &Path) -> Result<(), EngineError> {
        self.close();

        let file = File::open(path).map_err(|e| EngineError::FileOpen {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let track = probe_track(mss, &hint, &mut self.stream_tags).map_err(|e| match e {
            SymphoniaError::IoError(e) => EngineError::FileOpen {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            other => EngineError::DecoderInit(format!("{}: {}", path.display(), other)),
        })?;

        tracing::debug!(
            "Opened {} (codec: {}, duration: {:?})",
            path.display(),
            track.codec,
            track.total_duration
        );
        self.state = DecoderState::Open {
            track: Box::new(track),
            seekable: true,
        };
        Ok(())
    }

    /// Prepare for a stream; the format is identified once bytes are fed
    pub fn open_stream(&mut self, hint: Option<&str>) {
        self.close();
        self.state = DecoderState::AwaitingProbe {
            hint: hint.map(|h| h.to_string()),
            attempted_at: 0,
        };
    }

    /// Close the handle; decoding is refused until the next open
    pub fn close(&mut self) {
        self.state = DecoderState::Closed;
        self.staging.lock().clear();
        self.stream_tags = StreamTags::default();
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, DecoderState::Closed)
    }

    /// Append stream bytes to the staging queue
    pub fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.staging.lock().bytes.extend(bytes);
    }

    /// No more stream bytes will arrive
    pub fn mark_input_finished(&mut self) {
        self.staging.lock().finished = true;
    }

    pub fn staged_bytes(&self) -> usize {
        self.staging.lock().bytes.len()
    }

    /// Staged bytes beyond which feeding stops, leaving backpressure to the transfer buffer
    pub fn staging_limit(&self) -> usize {
        self.decode_reserve * STAGING_LIMIT_FACTOR
    }

    /// How many more stream bytes the staging queue accepts
    pub fn input_room(&self) -> usize {
        self.staging_limit().saturating_sub(self.staged_bytes())
    }

    /// Decode attempts made while closed (should stay zero)
    pub fn closed_decode_attempts(&self) -> u64 {
        self.closed_decode_attempts
    }

    /// Format reported by the first decoded packet
    pub fn track_info(&self) -> Option<TrackInfo> {
        match &self.state {
            DecoderState::Open { track, .. } => track.info.clone(),
            _ => None,
        }
    }

    pub fn total_duration(&self) -> Option<Duration> {
        match &self.state {
            DecoderState::Open { track, .. } => track.total_duration,
            _ => None,
        }
    }

    pub fn stream_tags(&self) -> Option<&StreamTags> {
        (!self.stream_tags.is_empty()).then_some(&self.stream_tags)
    }

    /// Whether a stream decode attempt can run without splitting a packet
    fn stream_input_ready(&self, attempted_at: usize) -> bool {
        let staging = self.staging.lock();
        staging.finished
            || (staging.bytes.len() >= self.decode_reserve && staging.bytes.len() > attempted_at)
    }

    /// Decode at most one packet, appending interleaved samples to `out`
    pub fn decode(&mut self, out: &mut Vec<f32>) -> DecodeStatus {
        match &mut self.state {
            DecoderState::Closed => {
                self.closed_decode_attempts += 1;
                tracing::error!("decode: called on a closed decoder");
                DecodeStatus::Error("decoder is closed".to_string())
            }
            DecoderState::AwaitingProbe { attempted_at, .. } => {
                let attempted_at = *attempted_at;
                if !self.stream_input_ready(attempted_at) {
                    return DecodeStatus::NeedMoreInput;
                }
                match self.try_probe_stream() {
                    DecodeStatus::Ok => self.decode(out),
                    status => status,
                }
            }
            DecoderState::Open { track, seekable } => {
                if !*seekable {
                    let staging = self.staging.lock();
                    if !staging.finished && staging.bytes.len() < self.decode_reserve {
                        return DecodeStatus::NeedMoreInput;
                    }
                }
                decode_packet(track, &mut self.sample_buf, out)
            }
        }
    }

    /// Identify the stream format from the staged bytes
    fn try_probe_stream(&mut self) -> DecodeStatus {
        let DecoderState::AwaitingProbe { hint, .. } = &self.state else {
            return DecodeStatus::NeedMoreInput;
        };
        let mut probe_hint = Hint::new();
        if let Some(ext) = hint.as_deref() {
            probe_hint.with_extension(ext);
        }
        let hint = hint.clone();

        self.staging.lock().journal = Some(Vec::new());
        let input = StreamInput {
            staging: self.staging.clone(),
        };
        let mss = MediaSourceStream::new(Box::new(input), Default::default());
        let result = probe_track(mss, &probe_hint, &mut self.stream_tags);
        let staging_limit = self.staging_limit();

        let mut staging = self.staging.lock();
        let scanned = staging.journal.as_ref().map_or(0, |j| j.len());
        match result {
            Ok(track) => {
                staging.journal = None;
                drop(staging);
                tracing::info!(
                    "Stream format identified (codec: {}, hint: {:?})",
                    track.codec,
                    hint
                );
                self.state = DecoderState::Open {
                    track: Box::new(track),
                    seekable: false,
                };
                DecodeStatus::Ok
            }
            Err(e) if is_starved(&e) && scanned + staging.bytes.len() >= staging_limit => {
                // Never found a format header; drop what was scanned and keep looking
                staging.journal = None;
                DecodeStatus::Error(format!("no audio format found in {} bytes", scanned))
            }
            Err(e) if !staging.finished && is_starved(&e) => {
                staging.rewind_journal();
                let staged = staging.bytes.len();
                drop(staging);
                tracing::debug!("probe: ran out of input at {} staged bytes", staged);
                self.state = DecoderState::AwaitingProbe {
                    hint,
                    attempted_at: staged,
                };
                DecodeStatus::NeedMoreInput
            }
            Err(e) if staging.finished && is_end_of_input(&e) => {
                staging.journal = None;
                DecodeStatus::Done
            }
            Err(e) => {
                // The scanned bytes are not decodable; drop them and keep scanning
                staging.journal = None;
                DecodeStatus::Error(format!("stream probe failed: {}", e))
            }
        }
    }

    /// Reposition a file source; returns the position actually landed on
    pub fn seek(&mut self, position: Duration) -> Result<Duration, EngineError> {
        let track = match &mut self.state {
            DecoderState::Open {
                track,
                seekable: true,
            } => track,
            DecoderState::Open { seekable: false, .. } | DecoderState::AwaitingProbe { .. } => {
                return Err(EngineError::NotSeekable);
            }
            DecoderState::Closed => return Err(EngineError::NoActiveSource),
        };

        let target = match track.total_duration {
            Some(total) => position.min(total),
            None => position,
        };
        let seeked = track
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1e9),
                    track_id: Some(track.track_id),
                },
            )
            .map_err(|e| EngineError::Seek(e.to_string()))?;
        track.decoder.reset();
        track.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);

        let landed = match track.time_base {
            Some(tb) => time_to_duration(tb.calc_time(seeked.required_ts)),
            None => target,
        };
        tracing::debug!(
            "seek: requested {:?}, landed {:?} (skipping {} frames)",
            position,
            landed,
            track.skip_frames
        );
        Ok(landed)
    }
}

/// Probe a media stream and build the decoder for its first audio track
fn probe_track(
    mss: MediaSourceStream,
    hint: &Hint,
    tags: &mut StreamTags,
) -> Result<OpenTrack, SymphoniaError> {
    let mut probed = symphonia::default::get_probe().format(
        hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            tags.absorb(revision);
        }
    }
    let mut format = probed.format;
    if let Some(revision) = format.metadata().current() {
        tags.absorb(revision);
    }

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(SymphoniaError::Unsupported("no audio track found"))?;

    let track_id = track.id;
    let params = track.codec_params.clone();
    let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let total_duration = match (params.time_base, params.n_frames) {
        (Some(tb), Some(frames)) => Some(time_to_duration(tb.calc_time(frames))),
        _ => None,
    };

    Ok(OpenTrack {
        format,
        decoder,
        track_id,
        codec,
        time_base: params.time_base,
        total_duration,
        info: None,
        skip_frames: 0,
    })
}

fn decode_packet(
    track: &mut OpenTrack,
    sample_buf: &mut Option<SampleBuffer<f32>>,
    out: &mut Vec<f32>,
) -> DecodeStatus {
    let packet = loop {
        match track.format.next_packet() {
            Ok(packet) if packet.track_id() == track.track_id => break packet,
            Ok(_) => continue,
            Err(ref e) if is_starved(e) => return DecodeStatus::NeedMoreInput,
            Err(ref e) if is_end_of_input(e) => return DecodeStatus::Done,
            Err(SymphoniaError::ResetRequired) => {
                track.decoder.reset();
                return DecodeStatus::NeedMoreInput;
            }
            Err(e) => return DecodeStatus::Error(e.to_string()),
        }
    };

    match track.decoder.decode(&packet) {
        Ok(decoded) => {
            if track.info.is_none() {
                let spec = decoded.spec();
                track.info = Some(TrackInfo {
                    sample_rate: spec.rate,
                    channels: spec.channels.count() as u16,
                    codec: track.codec.clone(),
                });
            }
            let appended = append_decoded(sample_buf, out, decoded, &mut track.skip_frames);
            if appended > 0 {
                DecodeStatus::Ok
            } else {
                DecodeStatus::NeedMoreInput
            }
        }
        Err(SymphoniaError::ResetRequired) => {
            track.decoder.reset();
            DecodeStatus::NeedMoreInput
        }
        Err(e) => DecodeStatus::Error(e.to_string()),
    }
}

/// Interleave a decoded buffer into `out`, returns the samples appended
fn append_decoded(
    sample_buf: &mut Option<SampleBuffer<f32>>,
    out: &mut Vec<f32>,
    decoded: AudioBufferRef<'_>,
    skip_frames: &mut u64,
) -> usize {
    let spec = SignalSpec::new(decoded.spec().rate, decoded.spec().channels);
    let channels = spec.channels.count().max(1);
    let needs_realloc = sample_buf.as_ref().is_none_or(|buf| {
        buf.capacity() < decoded.capacity() * channels
    });
    if needs_realloc {
        *sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    let Some(buf) = sample_buf.as_mut() else {
        return 0;
    };

    buf.copy_interleaved_ref(decoded);
    let samples = buf.samples();
    let frames = (samples.len() / channels) as u64;
    let skip = (*skip_frames).min(frames);
    *skip_frames -= skip;

    let start = skip as usize * channels;
    out.extend_from_slice(&samples[start..]);
    samples.len() - start
}

fn is_starved(e: &SymphoniaError) -> bool {
    matches!(e, SymphoniaError::IoError(io) if io.kind() == io::ErrorKind::WouldBlock)
}

fn is_end_of_input(e: &SymphoniaError) -> bool {
    matches!(e, SymphoniaError::IoError(io) if io.kind() == io::ErrorKind::UnexpectedEof)
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac.clamp(0.0, 1.0))
}

// ============ Tests ============

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a 16-bit WAV with a ramp pattern
    pub(crate) fn write_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as u32;
        for i in 0..frames {
            let value = ((i % 200) as i16 - 100) * 100;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    /// WAV file contents as bytes
    pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.wav");
        write_wav(&path, sample_rate, channels, seconds);
        std::fs::read(&path).unwrap()
    }

    /// Silent MPEG-1 Layer III frames: 128 kbps, 44.1 kHz, mono
    ///
    /// A zeroed side info block has no main data, so every frame decodes to
    /// 1152 frames of silence.
    pub(crate) fn mp3_silence(frames: usize) -> Vec<u8> {
        const FRAME_LEN: usize = 417;
        let mut bytes = Vec::with_capacity(frames * FRAME_LEN);
        for _ in 0..frames {
            bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
            bytes.resize(bytes.len() + FRAME_LEN - 4, 0);
        }
        bytes
    }

    fn decode_all(decoder: &mut IncrementalDecoder) -> (Vec<f32>, DecodeStatus) {
        let mut out = Vec::new();
        for _ in 0..100_000 {
            match decoder.decode(&mut out) {
                DecodeStatus::Ok | DecodeStatus::NeedMoreInput => continue,
                status => return (out, status),
            }
        }
        panic!("decoder never finished");
    }

    #[test]
    fn test_file_decodes_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 1, 1.0);

        let mut decoder = IncrementalDecoder::new(1024);
        decoder.open_file(&path).unwrap();
        assert_eq!(decoder.total_duration(), Some(Duration::from_secs(1)));

        let (samples, status) = decode_all(&mut decoder);
        assert_eq!(status, DecodeStatus::Done);
        assert_eq!(samples.len(), 8000);

        let info = decoder.track_info().unwrap();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 1);
    }

    #[test]
    fn test_mp3_file_decodes_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");
        std::fs::write(&path, mp3_silence(40)).unwrap();

        let mut decoder = IncrementalDecoder::new(1024);
        decoder.open_file(&path).unwrap();

        let (samples, status) = decode_all(&mut decoder);
        assert_eq!(status, DecodeStatus::Done);
        // Allow one frame for decoder delay handling
        assert!(samples.len().abs_diff(40 * 1152) <= 1152, "decoded {}", samples.len());
        assert!(samples.iter().all(|s| s.abs() < 1e-6));

        let info = decoder.track_info().unwrap();
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 1);
        assert_eq!(info.codec, "mp3");
    }

    #[test]
    fn test_missing_file_is_file_open_error() {
        let mut decoder = IncrementalDecoder::new(1024);
        let err = decoder.open_file(Path::new("/nonexistent/track.mp3")).unwrap_err();
        assert!(matches!(err, EngineError::FileOpen { .. }));
        assert!(!decoder.is_open());
    }

    #[test]
    fn test_garbage_file_is_decoder_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();

        let mut decoder = IncrementalDecoder::new(1024);
        assert!(decoder.open_file(&path).is_err());
    }

    #[test]
    fn test_closed_decoder_counts_attempts() {
        let mut decoder = IncrementalDecoder::new(1024);
        let mut out = Vec::new();
        assert!(matches!(decoder.decode(&mut out), DecodeStatus::Error(_)));
        assert_eq!(decoder.closed_decode_attempts(), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_seek_lands_on_requested_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 1, 10.0);

        let mut decoder = IncrementalDecoder::new(1024);
        decoder.open_file(&path).unwrap();
        let landed = decoder.seek(Duration::from_secs(5)).unwrap();
        assert!(landed >= Duration::from_secs(4) && landed <= Duration::from_secs(6));

        // Roughly five seconds of audio remain
        let (samples, status) = decode_all(&mut decoder);
        assert_eq!(status, DecodeStatus::Done);
        let remaining = samples.len() as f32 / 8000.0;
        assert!((remaining - 5.0).abs() < 0.5, "remaining {}", remaining);
    }

    #[test]
    fn test_stream_waits_for_reserve_then_decodes() {
        let bytes = wav_bytes(8000, 1, 2.0);
        let mut decoder = IncrementalDecoder::new(8192);
        decoder.open_stream(Some("wav"));

        let mut out = Vec::new();
        decoder.feed(&bytes[..100]);
        assert_eq!(decoder.decode(&mut out), DecodeStatus::NeedMoreInput);
        assert!(decoder.track_info().is_none());

        for chunk in bytes[100..].chunks(1000) {
            decoder.feed(chunk);
            decoder.decode(&mut out);
        }
        decoder.mark_input_finished();
        let (rest, status) = decode_all(&mut decoder);
        out.extend(rest);

        assert_eq!(status, DecodeStatus::Done);
        assert_eq!(out.len(), 16000);
        assert_eq!(decoder.track_info().unwrap().sample_rate, 8000);
    }

    #[test]
    fn test_stream_probe_rewinds_when_starved() {
        let bytes = wav_bytes(8000, 1, 1.0);
        // Reserve smaller than the header forces a probe on partial input
        let mut decoder = IncrementalDecoder::new(8);
        decoder.open_stream(None);

        let mut out = Vec::new();
        decoder.feed(&bytes[..20]);
        assert_eq!(decoder.decode(&mut out), DecodeStatus::NeedMoreInput);
        // Journaled bytes went back to the queue
        assert_eq!(decoder.staged_bytes(), 20);

        decoder.feed(&bytes[20..]);
        decoder.mark_input_finished();
        let (rest, status) = decode_all(&mut decoder);
        out.extend(rest);
        assert_eq!(status, DecodeStatus::Done);
        assert_eq!(out.len(), 8000);
    }

    #[test]
    fn test_stream_is_not_seekable() {
        let mut decoder = IncrementalDecoder::new(1024);
        decoder.open_stream(Some("mp3"));
        assert_eq!(decoder.seek(Duration::from_secs(1)), Err(EngineError::NotSeekable));
    }

    #[test]
    fn test_close_clears_staging() {
        let mut decoder = IncrementalDecoder::new(1024);
        decoder.open_stream(None);
        decoder.feed(&[1, 2, 3]);
        decoder.close();
        assert_eq!(decoder.staged_bytes(), 0);
        assert!(!decoder.is_open());
        assert_eq!(decoder.seek(Duration::ZERO), Err(EngineError::NoActiveSource));
    }
}
