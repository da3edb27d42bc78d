use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::decoder::Waveform;
use super::pcm;

/// Audio output device abstraction
///
/// A sink plays waveforms strictly in the order they are handed over.
#[async_trait::async_trait]
pub trait AudioSink: Send {
    /// Schedule a waveform for playback after everything already scheduled
    async fn play(&mut self, waveform: Waveform) -> Result<()>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

/// Where an attempt's playback goes; turned into a sink on first use
#[derive(Debug, Clone, Default)]
pub enum PlaybackOutput {
    /// Drop everything
    #[default]
    Discard,
    /// Append to a WAV file
    WavFile(PathBuf),
    /// Forward to an application-provided channel
    Channel(mpsc::Sender<Waveform>),
    /// Default output device
    Speaker,
}

impl PlaybackOutput {
    pub fn open(&self) -> Result<Box<dyn AudioSink>> {
        match self {
            PlaybackOutput::Discard => Ok(Box::new(NullSink)),
            PlaybackOutput::WavFile(path) => Ok(Box::new(WavFileSink::new(path.clone()))),
            PlaybackOutput::Channel(tx) => Ok(Box::new(ChannelSink::new(tx.clone()))),
            PlaybackOutput::Speaker => {
                #[cfg(feature = "backend-cpal")]
                {
                    Ok(Box::new(super::device::SpeakerSink::open()?))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    anyhow::bail!("Speaker output requires the backend-cpal feature")
                }
            }
        }
    }
}

pub struct NullSink;

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn play(&mut self, _waveform: Waveform) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Forwards waveforms to whoever owns the receiving end
pub struct ChannelSink {
    tx: mpsc::Sender<Waveform>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Waveform>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl AudioSink for ChannelSink {
    async fn play(&mut self, waveform: Waveform) -> Result<()> {
        self.tx
            .send(waveform)
            .await
            .map_err(|_| anyhow::anyhow!("Playback receiver dropped"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Writes the agent's audio to a 16-bit WAV file
///
/// The file format (rate and channel count) is fixed by the first waveform;
/// later waveforms are resampled and mixed down to match. File I/O runs on
/// the blocking pool.
pub struct WavFileSink {
    file: Option<WavFile>,
}

struct WavFile {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: usize,
}

impl WavFile {
    fn writer_for(&mut self, waveform: &Waveform) -> Result<&mut hound::WavWriter<BufWriter<File>>> {
        if self.writer.is_none() {
            let spec = hound::WavSpec {
                channels: waveform.channels.max(1),
                sample_rate: waveform.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };

            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create playback directory")?;
            }
            let writer = hound::WavWriter::create(&self.path, spec)
                .with_context(|| format!("Failed to create WAV file: {:?}", self.path))?;

            info!(
                "Playback file opened: {} ({}Hz, {} channels)",
                self.path.display(),
                spec.sample_rate,
                spec.channels
            );
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Playback file is closed"))
    }

    fn write(&mut self, waveform: Waveform) -> Result<()> {
        let writer = self.writer_for(&waveform)?;
        let spec = writer.spec();

        let samples = if waveform.sample_rate == spec.sample_rate && waveform.channels == spec.channels {
            waveform.samples
        } else {
            let mono = pcm::downmix_to_mono(&waveform.samples, waveform.channels);
            let resampled = pcm::resample_nearest(&mono, waveform.sample_rate, spec.sample_rate);
            resampled
                .into_iter()
                .flat_map(|s| std::iter::repeat(s).take(spec.channels as usize))
                .collect()
        };

        for &sample in &samples {
            writer
                .write_sample(pcm::quantize(sample))
                .context("Failed to write sample to WAV")?;
        }
        writer.flush().context("Failed to flush WAV file")?;
        self.samples_written += samples.len();

        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(())
    }
}

impl WavFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: Some(WavFile {
                path,
                writer: None,
                samples_written: 0,
            }),
        }
    }

    /// Finalize the WAV header; returns the number of samples written
    pub fn finish(mut self) -> Result<usize> {
        let Some(mut file) = self.file.take() else {
            return Ok(0);
        };
        file.finalize()?;
        Ok(file.samples_written)
    }
}

#[async_trait::async_trait]
impl AudioSink for WavFileSink {
    async fn play(&mut self, waveform: Waveform) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| anyhow::anyhow!("Playback file is closed"))?;

        let (file, result) = tokio::task::spawn_blocking(move || {
            let result = file.write(waveform);
            (file, result)
        })
        .await
        .context("Playback file writer panicked")?;

        self.file = Some(file);
        result
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.finalize() {
                warn!("Failed to finalize WAV writer on drop: {:#}", e);
            }
        }
    }
}
