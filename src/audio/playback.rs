use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::decoder::{decode_frame, Waveform};
use super::encoder::AudioEncoding;
use super::sink::{AudioSink, PlaybackOutput};
use crate::error::SessionError;

/// Renders inbound agent audio for one conversation attempt
///
/// The output sink is opened on the first frame and lives as long as the
/// pipeline. Frames are decoded and played one at a time, in the order
/// they are handed in.
pub struct PlaybackPipeline {
    output: PlaybackOutput,
    sink: Option<Box<dyn AudioSink>>,
    encoding: AudioEncoding,
    sample_rate: u32,
    frames_played: usize,
}

impl PlaybackPipeline {
    pub fn new(output: PlaybackOutput, encoding: AudioEncoding, sample_rate: u32) -> Self {
        Self {
            output,
            sink: None,
            encoding,
            sample_rate,
            frames_played: 0,
        }
    }

    /// Decode and play one inbound frame.
    ///
    /// Failures are confined to this frame; the caller logs them and keeps
    /// feeding subsequent frames.
    pub async fn play(&mut self, payload: &[u8]) -> Result<Waveform, SessionError> {
        let waveform = decode_frame(payload, self.encoding, self.sample_rate)
            .map_err(|e| SessionError::PlaybackDecodeError(format!("{:#}", e)))?;

        let sink = self.sink()?;
        sink.play(waveform.clone())
            .await
            .map_err(|e| SessionError::PlaybackDecodeError(format!("{:#}", e)))?;

        self.frames_played += 1;
        debug!(
            "Scheduled agent audio: {} samples at {}Hz ({:.0}ms)",
            waveform.samples.len(),
            waveform.sample_rate,
            waveform.duration_secs() * 1000.0
        );

        Ok(waveform)
    }

    /// Like [`play`](Self::play) but swallows the error after logging it
    pub async fn play_or_log(&mut self, payload: &[u8]) -> bool {
        match self.play(payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Error decoding or playing audio: {}", e);
                false
            }
        }
    }

    pub fn frames_played(&self) -> usize {
        self.frames_played
    }

    /// Move the pipeline onto its own task and feed it through an ordered queue
    ///
    /// `on_error` runs once for every frame that fails to decode or play.
    /// Dropping the returned queue lets frames already queued finish playing;
    /// the task then closes the sink and exits.
    pub fn spawn<F>(mut self, on_error: F) -> PlaybackQueue
    where
        F: Fn(&SessionError) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = self.play(&payload).await {
                    warn!("Error decoding or playing audio: {}", e);
                    on_error(&e);
                }
            }
            debug!("Playback queue drained after {} frames", self.frames_played);
        });

        PlaybackQueue { tx, queued: 0 }
    }

    fn sink(&mut self) -> Result<&mut Box<dyn AudioSink>, SessionError> {
        if self.sink.is_none() {
            let sink = self
                .output
                .open()
                .map_err(|e| SessionError::PlaybackDecodeError(format!("{:#}", e)))?;
            info!("Playback output opened ({})", sink.name());
            self.sink = Some(sink);
        }

        self.sink
            .as_mut()
            .ok_or_else(|| SessionError::PlaybackDecodeError("playback output closed".into()))
    }
}

/// Sending half of a spawned [`PlaybackPipeline`]
///
/// Enqueueing never waits on the sink.
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    queued: usize,
}

impl PlaybackQueue {
    /// Queue one inbound frame; false if the playback task has gone away
    pub fn enqueue(&mut self, payload: Vec<u8>) -> bool {
        if self.tx.send(payload).is_err() {
            return false;
        }
        self.queued += 1;
        true
    }

    pub fn queued(&self) -> usize {
        self.queued
    }
}
