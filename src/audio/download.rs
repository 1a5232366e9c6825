//! Network download producer for live streams
//!
//! This module provides:
//! - `StreamConnector` / `ChunkStream`: Seam between the HTTP client and the producer loop
//! - `HttpConnector`: reqwest-based connector (redirects followed, no read timeout)
//! - `DownloadProducer`: Worker thread that pushes received bytes into a `SharedTransfer`
//!
//! The worker checks the quit flag between reads and at every write attempt,
//! so `shutdown()` returns within one read-poll interval.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Url;

use super::transfer::SharedTransfer;
use crate::error::EngineError;
use crate::settings::StreamingSettings;

/// Valid audio extensions for URL parsing
const VALID_AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "aac", "ogg", "wav"];

// ============ Format Detection Helpers ============

/// Extract audio file extension from URL path
pub fn extract_extension_from_url(url: &str) -> Option<String> {
    let url_parsed = Url::parse(url).ok()?;
    let filename = url_parsed.path().rsplit('/').next()?;
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_lowercase();

    if VALID_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

/// Map Content-Type header to file extension
pub fn content_type_to_extension(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => Some("mp3".to_string()),
        "audio/flac" | "audio/x-flac" => Some("flac".to_string()),
        "audio/aac" | "audio/aacp" => Some("aac".to_string()),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a".to_string()),
        "audio/ogg" | "audio/vorbis" | "application/ogg" => Some("ogg".to_string()),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav".to_string()),
        _ => None,
    }
}

/// Validate a stream URL (http or https only)
pub fn parse_stream_url(url: &str) -> Result<Url, EngineError> {
    let parsed = Url::parse(url.trim()).map_err(|e| EngineError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(EngineError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            scheme, url
        ))),
    }
}

// ============ Connector Seam ============

/// Outcome of waiting for the next chunk of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPoll {
    /// Bytes received
    Data(Vec<u8>),
    /// Nothing arrived within the wait interval
    Pending,
    /// Server closed the stream
    End,
    /// Transfer error; the stream is unusable
    Failed(String),
}

/// An open byte stream, read on the producer thread only
pub trait ChunkStream: Send {
    /// Wait at most `wait` for the next chunk
    fn next_chunk(&mut self, wait: Duration) -> ChunkPoll;
}

/// A connected stream plus what the response says about its format
pub struct StreamResponse {
    pub stream: Box<dyn ChunkStream>,
    /// File extension usable as a decoder hint ("mp3", ...)
    pub format_hint: Option<String>,
}

/// Opens streams for the producer
///
/// Called on the producer thread; may block up to the configured connect timeout.
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: &Url, settings: &StreamingSettings) -> Result<StreamResponse, EngineError>;
}

// ============ HTTP Connector ============

/// HTTP GET connector backed by reqwest
///
/// Each connection gets its own current-thread tokio runtime, driven from the
/// producer thread by `block_on` for the lifetime of the transfer.
#[derive(Debug, Default, Clone)]
pub struct HttpConnector;

impl HttpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl StreamConnector for HttpConnector {
    fn connect(&self, url: &Url, settings: &StreamingSettings) -> Result<StreamResponse, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::Connect(format!("failed to create runtime: {}", e)))?;

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        // Only connection establishment is bounded; the body may run forever
        let response = runtime
            .block_on(async {
                tokio::time::timeout(settings.connect_timeout(), client.get(url.clone()).send()).await
            })
            .map_err(|_| EngineError::Connect(format!("timed out connecting to {}", url)))?
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Connect(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let format_hint = extract_extension_from_url(url.as_str())
            .or_else(|| content_type.as_deref().and_then(content_type_to_extension));

        tracing::info!(
            "Connected to {} (status: {}, content-type: {:?}, hint: {:?})",
            response.url(),
            status,
            content_type,
            format_hint
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();

        Ok(StreamResponse {
            stream: Box::new(HttpChunkStream { runtime, body }),
            format_hint,
        })
    }
}

struct HttpChunkStream {
    runtime: tokio::runtime::Runtime,
    body: BoxStream<'static, Result<Vec<u8>, String>>,
}

impl ChunkStream for HttpChunkStream {
    fn next_chunk(&mut self, wait: Duration) -> ChunkPoll {
        let body = &mut self.body;
        match self
            .runtime
            .block_on(async { tokio::time::timeout(wait, body.next()).await })
        {
            Err(_) => ChunkPoll::Pending,
            Ok(None) => ChunkPoll::End,
            Ok(Some(Ok(bytes))) if bytes.is_empty() => ChunkPoll::Pending,
            Ok(Some(Ok(bytes))) => ChunkPoll::Data(bytes),
            Ok(Some(Err(e))) => ChunkPoll::Failed(e),
        }
    }
}

// ============ Producer Thread ============

/// Releases the transfer's write side when the worker exits, even by panic
struct ProducerGuard {
    transfer: Arc<SharedTransfer>,
    failure: Option<String>,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.transfer.finish_producer(self.failure.take());
    }
}

/// Handle to the download worker thread
///
/// The thread must be joined before the transfer buffer is reset for another
/// stream; `Drop` enforces this if `shutdown()` was not called.
pub struct DownloadProducer {
    url: Url,
    transfer: Arc<SharedTransfer>,
    handle: Option<JoinHandle<()>>,
    format_hint: Option<String>,
}

impl std::fmt::Debug for DownloadProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadProducer")
            .field("url", &self.url.as_str())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl DownloadProducer {
    /// Start downloading `url` into `transfer` and wait for the connection
    ///
    /// Returns once the server answered, or with the connect error. The caller
    /// waits at most the configured connect timeout (plus a short grace period
    /// for the worker to report).
    pub fn spawn(
        url: Url,
        connector: Arc<dyn StreamConnector>,
        transfer: Arc<SharedTransfer>,
        settings: &StreamingSettings,
    ) -> Result<Self, EngineError> {
        if !transfer.begin_producer() {
            return Err(EngineError::Spawn(
                "a download thread is still attached to the transfer buffer".to_string(),
            ));
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Option<String>, EngineError>>(1);
        let worker_transfer = transfer.clone();
        let worker_url = url.clone();
        let worker_settings = settings.clone();

        let handle = thread::Builder::new()
            .name("stream-download".to_string())
            .spawn(move || {
                download_thread_main(worker_url, connector, worker_transfer, worker_settings, ready_tx)
            })
            .map_err(|e| {
                transfer.finish_producer(Some(e.to_string()));
                EngineError::Spawn(e.to_string())
            })?;

        let mut producer = Self {
            url,
            transfer,
            handle: Some(handle),
            format_hint: None,
        };

        let wait = settings.connect_timeout() + Duration::from_secs(1);
        match ready_rx.recv_timeout(wait) {
            Ok(Ok(format_hint)) => {
                producer.format_hint = format_hint;
                Ok(producer)
            }
            Ok(Err(e)) => {
                producer.shutdown();
                Err(e)
            }
            Err(_) => {
                producer.shutdown();
                Err(EngineError::Connect(format!(
                    "no response from {} within {:?}",
                    producer.url, wait
                )))
            }
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Decoder hint derived from the URL or Content-Type
    pub fn format_hint(&self) -> Option<&str> {
        self.format_hint.as_deref()
    }

    /// Ask the worker to stop; does not wait
    pub fn signal_quit(&self) {
        self.transfer.request_quit();
    }

    /// Wait for the worker to exit
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Download thread for {} panicked", self.url);
            }
        }
    }

    /// Signal quit and join
    pub fn shutdown(&mut self) {
        if self.handle.is_some() {
            tracing::debug!("Stopping download thread for {}", self.url);
            self.signal_quit();
            self.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for DownloadProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the download thread
fn download_thread_main(
    url: Url,
    connector: Arc<dyn StreamConnector>,
    transfer: Arc<SharedTransfer>,
    settings: StreamingSettings,
    ready_tx: mpsc::SyncSender<Result<Option<String>, EngineError>>,
) {
    let mut guard = ProducerGuard {
        transfer: transfer.clone(),
        failure: None,
    };

    let response = match connector.connect(&url, &settings) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", url, e);
            guard.failure = Some(e.to_string());
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(response.format_hint.clone()));

    let mut stream = response.stream;
    let read_poll = settings.read_poll();
    let backpressure_poll = settings.backpressure_poll();
    let mut received: u64 = 0;

    loop {
        if transfer.quit_requested() {
            tracing::debug!("Download of {} cancelled after {} bytes", url, received);
            break;
        }

        match stream.next_chunk(read_poll) {
            ChunkPoll::Data(chunk) => {
                received += chunk.len() as u64;
                if !transfer.write_blocking(&chunk, backpressure_poll) {
                    tracing::debug!("Download of {} cancelled while buffer was full", url);
                    break;
                }
            }
            ChunkPoll::Pending => continue,
            ChunkPoll::End => {
                tracing::info!("Stream {} ended after {} bytes", url, received);
                break;
            }
            ChunkPoll::Failed(e) => {
                tracing::warn!("Stream error on {} after {} bytes: {}", url, received, e);
                guard.failure = Some(e);
                break;
            }
        }
    }

    // Dropping the stream closes the connection
    drop(stream);
}

// ============ Tests ============
