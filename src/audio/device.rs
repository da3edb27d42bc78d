//! Default system audio devices through cpal
//!
//! cpal streams are not `Send`, so each device lives on its own OS thread for
//! as long as it is claimed. The thread reports whether the device opened,
//! then parks until it is told to release it.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::decoder::Waveform;
use super::pcm;
use super::sink::AudioSink;

/// Longest a released speaker waits for queued audio to finish
const DRAIN_LIMIT: Duration = Duration::from_secs(30);

/// Capture from the default input device
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let frame_ms = self.config.buffer_duration_ms;

        let thread = std::thread::Builder::new()
            .name("convai-microphone".into())
            .spawn(move || match open_input(frame_ms, tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Either a stop signal or the backend being dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Input stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn microphone thread")?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => bail!("Microphone thread exited before the device opened"),
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Failed to join microphone thread")?
                .map_err(|_| anyhow!("Microphone thread panicked"))?;
            info!("Microphone released");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Open and start the default input stream; frames flow into `tx` from the device callback
fn open_input(frame_ms: u64, tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;
    let supported = device
        .default_input_config()
        .context("Failed to query input device (is microphone access allowed?)")?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.config();
    let chunker = FrameChunker::new(sample_rate, channels, frame_ms, tx);

    info!(
        "Opening input device {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        channels,
        supported.sample_format()
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, chunker)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, chunker)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, chunker)?,
        other => bail!("Unsupported input sample format {:?}", other),
    };
    stream.play().context("Failed to start input stream")?;

    Ok(stream)
}

fn build_input<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut chunker: FrameChunker) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                chunker.push(data.iter().map(|&s| f32::from_sample(s)));
            },
            |e| warn!("Input stream error: {}", e),
            None,
        )
        .context("Failed to open input stream (is microphone access allowed?)")
}

/// Cuts the device callback's buffers into fixed-duration frames
struct FrameChunker {
    buffer: Vec<f32>,
    samples_per_frame: usize,
    sample_rate: u32,
    channels: u16,
    frame_ms: u64,
    emitted: u64,
    tx: mpsc::Sender<AudioFrame>,
}

impl FrameChunker {
    fn new(sample_rate: u32, channels: u16, frame_ms: u64, tx: mpsc::Sender<AudioFrame>) -> Self {
        let per_channel = (sample_rate as u64 * frame_ms / 1000) as usize;
        let samples_per_frame = (per_channel * channels.max(1) as usize).max(1);
        Self {
            buffer: Vec::with_capacity(samples_per_frame),
            samples_per_frame,
            sample_rate,
            channels,
            frame_ms,
            emitted: 0,
            tx,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() < self.samples_per_frame {
                continue;
            }

            let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.samples_per_frame));
            let frame = AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: self.emitted * self.frame_ms,
            };
            self.emitted += 1;

            // Never block the device callback; a full queue loses the frame
            if self.tx.try_send(frame).is_err() {
                debug!("Capture consumer behind, dropping frame");
            }
        }
    }
}

/// Plays the agent's audio on the default output device
///
/// Waveforms are converted to the device format and appended to a queue
/// the output callback drains; gaps are filled with silence.
pub struct SpeakerSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    sample_rate: u32,
    channels: u16,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl SpeakerSink {
    pub fn open() -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(u32, u16)>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let shared = Arc::clone(&queue);
        std::thread::Builder::new()
            .name("convai-speaker".into())
            .spawn(move || {
                let stream = match open_output(Arc::clone(&shared)) {
                    Ok((stream, rate, channels)) => {
                        let _ = ready_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();

                // Audio already scheduled still plays out
                let started = Instant::now();
                while !lock(&shared).is_empty() && started.elapsed() < DRAIN_LIMIT {
                    std::thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                debug!("Output stream closed");
            })
            .context("Failed to spawn speaker thread")?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| anyhow!("Speaker thread exited before the device opened"))??;

        Ok(Self {
            queue,
            sample_rate,
            channels,
            stop_tx: Some(stop_tx),
        })
    }
}

#[async_trait::async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&mut self, waveform: Waveform) -> Result<()> {
        let samples = to_device_format(&waveform, self.sample_rate, self.channels);
        lock(&self.queue).extend(samples);
        Ok(())
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn open_output(queue: Arc<Mutex<VecDeque<f32>>>) -> Result<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let supported = device
        .default_output_config()
        .context("Failed to query output device")?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.config();

    info!(
        "Opening output device {} ({}Hz, {} channels)",
        device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        channels
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, queue)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, queue)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, queue)?,
        other => bail!("Unsupported output sample format {:?}", other),
    };
    stream.play().context("Failed to start output stream")?;

    Ok((stream, sample_rate, channels))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = lock(&queue);
                for slot in data.iter_mut() {
                    *slot = T::from_sample(queue.pop_front().unwrap_or(0.0));
                }
            },
            |e| warn!("Output stream error: {}", e),
            None,
        )
        .context("Failed to open output stream")
}

/// Mix down, resample and fan out to the device's channel count
fn to_device_format(waveform: &Waveform, sample_rate: u32, channels: u16) -> Vec<f32> {
    let mono = pcm::downmix_to_mono(&waveform.samples, waveform.channels);
    pcm::resample_nearest(&mono, waveform.sample_rate, sample_rate)
        .into_iter()
        .flat_map(|s| std::iter::repeat(s).take(channels.max(1) as usize))
        .collect()
}

fn lock(queue: &Mutex<VecDeque<f32>>) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
