//! Sample-level conversions between capture, wire and playback formats.
//!
//! Resampling is nearest-neighbour: good enough for speech, no filtering.

/// Convert interleaved multi-channel samples to mono by averaging channels
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Nearest-neighbour resampling of a mono signal (decimates or repeats samples)
pub fn resample_nearest(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
            samples[src.min(last)]
        })
        .collect()
}

/// Quantize a float sample to i16.
///
/// Out-of-range input is clamped first; negative values scale by 32768 and
/// positive values by 32767 so both extremes map onto the i16 range.
/// Positive values round up: decoding divides by 32768, and rounding up keeps
/// `|dequantize(quantize(s)) - s|` within 1/32768 on both sides of zero.
pub fn quantize(sample: f32) -> i16 {
    // f32 * 32768 is exact in f64, so the rounding below sees the true product
    let s = f64::from(sample.clamp(-1.0, 1.0));
    let scaled = if s < 0.0 {
        (s * 32768.0).round()
    } else {
        (s * 32767.0).ceil()
    };
    scaled as i16
}

/// Inverse of [`quantize`] as the playback side does it: always divide by 32768
pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode float samples as little-endian 16-bit PCM bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| quantize(s).to_le_bytes())
        .collect()
}

/// Decode little-endian 16-bit PCM bytes; a trailing odd byte is ignored
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// True when no sample's magnitude exceeds `threshold`
pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
    samples.iter().all(|s| s.abs() <= threshold)
}
