//! Audio output device
//!
//! The engine talks to the device through `AudioOutput`. `RodioOutput` plays
//! the session's `DeviceFeed` on a rodio `Sink`; pausing the sink stops the
//! device from pulling.

use rodio::{OutputStream, OutputStreamBuilder, Sink};

use super::sink::{DeviceFeed, SinkAdapter};
use crate::error::EngineError;

/// Output device information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Device name (used with `Settings::audio_device_name`)
    pub name: String,
    /// Human-readable description
    pub description: String,
}

/// Device side of the engine
///
/// Not `Send`: cpal streams are tied to the thread that opened them on some
/// platforms, so the engine stays on the control thread.
pub trait AudioOutput {
    /// Start pulling from `feed`; the output begins paused
    fn attach(&mut self, feed: DeviceFeed<SinkAdapter>);
    /// Stop device pull
    fn pause(&self);
    fn resume(&self);
    /// Linear gain, 0.0 - 1.0
    fn set_volume(&self, gain: f32);
    /// Name of the opened device, None for the system default
    fn device_name(&self) -> Option<&str>;
}

/// rodio/cpal output
pub struct RodioOutput {
    // Must outlive the sink
    _stream: OutputStream,
    sink: Sink,
    device_name: Option<String>,
}

impl std::fmt::Debug for RodioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioOutput")
            .field("device_name", &self.device_name)
            .field("paused", &self.sink.is_paused())
            .finish()
    }
}

impl RodioOutput {
    /// Open the preferred device, falling back to the system default
    pub fn open(preferred: Option<&str>) -> Result<Self, EngineError> {
        use rodio::cpal::traits::{DeviceTrait, HostTrait};

        let host = rodio::cpal::default_host();
        let mut named = None;
        match host.output_devices() {
            Ok(devices) => {
                for device in devices {
                    let Ok(name) = device.name() else {
                        continue;
                    };
                    tracing::debug!("Found audio device: {}", name);
                    if named.is_none() && preferred == Some(name.as_str()) {
                        named = Some(device);
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to enumerate output devices: {}", e),
        }

        let opened = match (preferred, named) {
            (Some(name), Some(device)) => match open_device_stream(device) {
                Ok(stream) => Some((stream, name.to_string())),
                Err(e) => {
                    tracing::warn!("Cannot open audio device '{}' ({}), using default", name, e);
                    None
                }
            },
            (Some(name), None) => {
                tracing::warn!("Audio device '{}' not present, using default", name);
                None
            }
            (None, _) => None,
        };
        let (stream, device_name) = match opened {
            Some((stream, name)) => (stream, Some(name)),
            None => (open_default_stream()?, None),
        };

        let sink = Sink::connect_new(stream.mixer());
        sink.pause();

        tracing::info!(
            "Audio output opened on {}",
            device_name.as_deref().unwrap_or("default device")
        );
        Ok(Self {
            _stream: stream,
            sink,
            device_name,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn attach(&mut self, feed: DeviceFeed<SinkAdapter>) {
        self.sink.clear();
        self.sink.append(feed);
        self.sink.pause();
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn resume(&self) {
        self.sink.play();
    }

    fn set_volume(&self, gain: f32) {
        self.sink.set_volume(gain.clamp(0.0, 1.0));
    }

    fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

fn open_default_stream() -> Result<OutputStream, EngineError> {
    OutputStreamBuilder::open_default_stream()
        .map_err(|e| EngineError::DeviceUnavailable(format!("default output: {}", e)))
}

/// Stream on `device` at its preferred sample rate
fn open_device_stream(device: rodio::cpal::Device) -> Result<OutputStream, String> {
    use rodio::cpal::traits::DeviceTrait;

    let rate = device
        .default_output_config()
        .map_err(|e| e.to_string())?
        .sample_rate()
        .0;
    let builder = OutputStreamBuilder::from_device(device).map_err(|e| e.to_string())?;
    builder
        .with_sample_rate(rate)
        .open_stream()
        .map_err(|e| e.to_string())
}

/// List usable output devices
pub fn list_output_devices() -> Vec<AudioDevice> {
    use rodio::cpal::traits::{DeviceTrait, HostTrait};

    let host = rodio::cpal::default_host();
    let mut devices = Vec::new();

    let Ok(output_devices) = host.output_devices() else {
        tracing::warn!("Failed to enumerate output devices on {:?}", host.id());
        return devices;
    };

    for device in output_devices {
        let Ok(name) = device.name() else {
            continue;
        };
        match device.default_output_config() {
            Ok(config) => devices.push(AudioDevice {
                description: format!(
                    "{} Hz, {} ch",
                    config.sample_rate().0,
                    config.channels()
                ),
                name,
            }),
            Err(e) => tracing::debug!("Skipping device {}: {}", name, e),
        }
    }

    devices
}

// ============ Test Output ============
