//! Raw PCM payload decoding: base64 text → little-endian i16 → normalized f32.

use base64::{Engine as _, engine::general_purpose};

use super::error::{AudioError, Result};

/// Bytes per signed 16-bit sample.
const BYTES_PER_SAMPLE: usize = 2;

/// Divisor mapping i16 onto [-1.0, 1.0).
const I16_SCALE: f32 = 32768.0;

/// Decoded audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedAudioBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Frames per channel
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f32 / self.sample_rate as f32
    }

    /// Interleave all channels back into frame order (`frame * channels + channel`).
    pub fn interleaved(&self) -> Vec<f32> {
        let channels = self.channels.len();
        let mut out = Vec::with_capacity(self.frame_count() * channels);
        for i in 0..self.frame_count() {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Standard-alphabet base64 decode. Surrounding whitespace is ignored.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    Ok(general_purpose::STANDARD.decode(payload.trim())?)
}

/// Interpret `bytes` as interleaved little-endian i16 PCM.
///
/// Sample `i` of channel `c` is read from integer `i * channels + c`.
/// Lengths that do not split evenly into whole frames are rejected
/// instead of truncated.
pub fn pcm_to_buffer(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudioBuffer> {
    if channels == 0 {
        return Err(AudioError::MalformedAudio("channel count must be at least 1".into()));
    }
    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioError::MalformedAudio(format!(
            "{} bytes is not a whole number of {}-channel i16 frames",
            bytes.len(),
            channels
        )));
    }

    let channel_count = channels as usize;
    let frame_count = bytes.len() / frame_bytes;
    let mut data: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();

    for (idx, raw) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let value = i16::from_le_bytes([raw[0], raw[1]]);
        data[idx % channel_count].push(value as f32 / I16_SCALE);
    }

    Ok(DecodedAudioBuffer {
        sample_rate,
        channels: data,
    })
}

/// Full pipeline: base64 payload to a playable buffer.
pub fn decode_payload(payload: &str, sample_rate: u32, channels: u16) -> Result<DecodedAudioBuffer> {
    let bytes = decode_base64(payload)?;
    pcm_to_buffer(&bytes, sample_rate, channels)
}
