//! Error kinds of the audio decode/playback core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    /// Payload is not valid base64
    #[error("Audio payload decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Byte layout does not match the declared sample format
    #[error("Malformed PCM audio: {0}")]
    MalformedAudio(String),

    /// Output device unavailable or failed to resume
    #[error("Audio output acquisition failed: {0}")]
    OutputAcquisition(String),

    /// Output handle failed to begin rendering
    #[error("Playback start failed: {0}")]
    PlaybackStart(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
