//! Seams between the playback controller and an audio output backend.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::Result;
use super::pcm::DecodedAudioBuffer;

/// One-shot notification fired by a backend when a handle finishes rendering.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Power state of the process-wide output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    Suspended,
}

/// Creates the process-wide output the first time the controller needs it.
///
/// Opening a device can block, so implementations do it off the async thread.
#[async_trait]
pub trait OutputProvider: Send + Sync {
    async fn acquire(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioOutput>>;
}

/// The shared output context. Lives as long as the controller.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    fn state(&self) -> OutputState;

    /// Bring a suspended output back to `Running`.
    async fn resume(&self) -> Result<()>;

    /// Begin rendering `buffer`. Called with the controller's slot lock held,
    /// so it must return without waiting on the device.
    ///
    /// `on_complete` must be delivered from another thread or task, when
    /// rendering finishes or fails after the handle was returned. A handle
    /// that was stopped never fires it.
    fn start(
        &self,
        buffer: DecodedAudioBuffer,
        on_complete: CompletionHandler,
    ) -> Result<Box<dyn OutputHandle>>;
}

/// A started rendering of one buffer.
pub trait OutputHandle: Send {
    /// Halt immediately. Stopping twice is a no-op.
    fn stop(&mut self) -> Result<()>;
}
