use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::backend::AudioFrame;
use super::pcm;

/// Wire encoding negotiated for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw little-endian 16-bit mono PCM at the negotiated rate
    #[default]
    Pcm,
    /// Self-describing container chunks (WAV out, anything symphonia reads in)
    Container,
}

/// One outbound frame ready for the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub timestamp_ms: u64,
}

impl EncodedFrame {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns captured frames into wire frames for one session
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    encoding: AudioEncoding,
    target_rate: u32,
    silence_threshold: f32,
}

impl FrameEncoder {
    pub fn new(encoding: AudioEncoding, target_rate: u32, silence_threshold: f32) -> Self {
        Self {
            encoding,
            target_rate,
            silence_threshold,
        }
    }

    /// Encode a captured frame.
    ///
    /// Returns `Ok(None)` when the frame carries nothing worth sending
    /// (empty input, or silent when suppression is enabled).
    pub fn encode(&self, frame: &AudioFrame) -> Result<Option<EncodedFrame>> {
        let mono = pcm::downmix_to_mono(&frame.samples, frame.channels);
        let samples = pcm::resample_nearest(&mono, frame.sample_rate, self.target_rate);

        if samples.is_empty() {
            return Ok(None);
        }
        if self.silence_threshold > 0.0 && pcm::is_silent(&samples, self.silence_threshold) {
            return Ok(None);
        }

        let bytes = match self.encoding {
            AudioEncoding::Pcm => pcm::encode_pcm16(&samples),
            AudioEncoding::Container => encode_wav_chunk(&samples, self.target_rate)?,
        };

        Ok(Some(EncodedFrame {
            bytes,
            timestamp_ms: frame.timestamp_ms,
        }))
    }
}

/// Write mono samples as a complete 16-bit WAV file in memory
fn encode_wav_chunk(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV chunk")?;
        for &sample in samples {
            writer
                .write_sample(pcm::quantize(sample))
                .context("Failed to write sample to WAV chunk")?;
        }
        writer.finalize().context("Failed to finalize WAV chunk")?;
    }

    Ok(cursor.into_inner())
}
