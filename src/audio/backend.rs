use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::file::FileBackend;

/// Captured audio (f32 samples in [-1, 1], interleaved, at the device's native rate)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (interleaved)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let per_channel = self.samples.len() as u64 / self.channels as u64;
        per_channel * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Buffer size in milliseconds (one frame per buffer)
    pub buffer_duration_ms: u64,
    /// Pace frames at wall-clock speed (file sources)
    pub realtime: bool,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            buffer_duration_ms: 250, // 250ms frames
            realtime: true,
        }
    }
}

/// Audio capture backend trait
///
/// A backend is claimed for exactly one conversation attempt. Implementations:
/// - Microphone: default input device through cpal (`backend-cpal` feature)
/// - File: stream a WAV file as if it were a microphone
/// - Channel: frames pushed by the embedding application (its own device callback)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Produces a fresh backend for every conversation attempt
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync>;

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "backend-cpal")]
                {
                    Ok(Box::new(super::device::MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    let _ = config;
                    bail!("Microphone capture requires the backend-cpal feature")
                }
            }
            AudioSource::File(path) => Ok(Box::new(FileBackend::new(path, config))),
            AudioSource::Unavailable => bail!("No capture source configured"),
        }
    }

    /// Factory closure handing out a new backend per attempt
    pub fn for_source(source: AudioSource, config: AudioBackendConfig) -> BackendFactory {
        Arc::new(move || Self::create(source.clone(), config.clone()))
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default system input device
    Microphone,
    /// WAV file streamed at capture cadence
    File(PathBuf),
    /// No capture device present
    Unavailable,
}

/// Backend fed by frames the application pushes through a channel
pub struct ChannelBackend {
    rx: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
}

impl ChannelBackend {
    /// Returns the backend and the sender the application writes frames into
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<AudioFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx: Some(rx),
                capturing: false,
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl AudioBackend for ChannelBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }
        let Some(rx) = self.rx.take() else {
            bail!("Channel backend can only be started once");
        };

        self.capturing = true;
        info!("Channel capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}
