//! audio - Speech payload decoding and playback
//!
//! The model's TTS replies are base64 raw PCM (s16le, 24kHz, mono).
//! `pcm` turns them into float buffers, `player` plays one buffer at a time
//! through a lazily acquired output, `alsa_device` is the ALSA backend.

mod alsa_device;
mod error;
mod output;
mod pcm;
mod player;
mod stream_decoder;
#[cfg(test)]
pub(crate) mod testing;

pub use alsa_device::AlsaProvider;
pub use player::{AudioPlayer, PlayOutcome};
pub use stream_decoder::{PcmS16LeDecoder, create_decoder};
