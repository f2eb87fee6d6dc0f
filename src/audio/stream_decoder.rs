//! Generic stream decoder trait for multi-format speech payloads.

use super::error::Result;
use super::pcm::{self, DecodedAudioBuffer};

/// A trait for decoders that turn a speech payload from the model API
/// into a buffer ready for the output device.
///
/// Implementations must be pure: no I/O, no state carried between calls.
pub trait StreamDecoder: Send + Sync {
    fn decode(&self, payload: &str) -> Result<DecodedAudioBuffer>;
}

/// Raw signed 16-bit little-endian PCM, base64 encoded.
pub struct PcmS16LeDecoder {
    sample_rate: u32,
    channels: u16,
}

impl PcmS16LeDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

impl StreamDecoder for PcmS16LeDecoder {
    fn decode(&self, payload: &str) -> Result<DecodedAudioBuffer> {
        pcm::decode_payload(payload, self.sample_rate, self.channels)
    }
}

/// Factory function: create a decoder based on the configured stream format.
pub fn create_decoder(
    stream_format: &str,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<Box<dyn StreamDecoder>> {
    match stream_format {
        "pcm_s16le" | "pcm" => Ok(Box::new(PcmS16LeDecoder::new(sample_rate, channels))),
        other => anyhow::bail!("Unsupported stream format: {}", other),
    }
}
