use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::encoder::AudioEncoding;
use super::pcm;

/// Decoded audio ready for an output sink
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Waveform {
    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decode one inbound payload according to the session encoding
pub fn decode_frame(bytes: &[u8], encoding: AudioEncoding, sample_rate: u32) -> Result<Waveform> {
    match encoding {
        AudioEncoding::Pcm => Ok(decode_raw_pcm(bytes, sample_rate)),
        AudioEncoding::Container => decode_container(bytes),
    }
}

/// Interpret bytes as mono 16-bit little-endian PCM at `sample_rate`
pub fn decode_raw_pcm(bytes: &[u8], sample_rate: u32) -> Waveform {
    Waveform {
        samples: pcm::decode_pcm16(bytes),
        sample_rate,
        channels: 1,
    }
}

/// Decode a self-describing container (WAV, MP3, OGG, FLAC, ...) with symphonia
pub fn decode_container(bytes: &[u8]) -> Result<Waveform> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unrecognized audio container")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("Audio container has no tracks"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).context("Failed to decode audio packet")?;
        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if sample_rate == 0 || channels == 0 {
        return Err(anyhow!("Audio container did not declare a sample format"));
    }

    Ok(Waveform {
        samples,
        sample_rate,
        channels,
    })
}
