//! Playback controller: at most one active session, released on every exit path.

use std::sync::{Arc, Mutex, MutexGuard};

use super::error::{AudioError, Result};
use super::output::{AudioOutput, OutputHandle, OutputProvider, OutputState};
use super::pcm::DecodedAudioBuffer;
use super::stream_decoder::StreamDecoder;

/// Caller notification, fired once per `play` unless the session is
/// superseded or stopped.
pub type OnEnded = Box<dyn FnOnce() + Send + 'static>;

/// What `play` managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// `on_ended` has already been invoked
    Failed,
}

/// One in-flight rendering.
struct PlaybackSession {
    id: u64,
    handle: Box<dyn OutputHandle>,
    on_ended: Option<OnEnded>,
    stopped: bool,
}

impl PlaybackSession {
    /// Halt and release the output handle. The caller's callback is dropped unfired.
    fn halt(mut self) {
        self.stopped = true;
        self.on_ended = None;
        if let Err(e) = self.handle.stop() {
            log::debug!("Ignoring stop error for session {}: {}", self.id, e);
        }
        log::debug!("Session {} released (stopped={})", self.id, self.stopped);
    }
}

#[derive(Default)]
struct Slot {
    output: Option<Arc<dyn AudioOutput>>,
    active: Option<PlaybackSession>,
    next_id: u64,
}

/// Plays decoded speech payloads through a lazily acquired output.
pub struct AudioPlayer {
    provider: Box<dyn OutputProvider>,
    decoder: Box<dyn StreamDecoder>,
    sample_rate: u32,
    channels: u16,
    slot: Arc<Mutex<Slot>>,
}

impl AudioPlayer {
    pub fn new(
        provider: Box<dyn OutputProvider>,
        decoder: Box<dyn StreamDecoder>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            provider,
            decoder,
            sample_rate,
            channels,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Stop whatever is playing, then play `payload`.
    ///
    /// Never returns an error: failures are logged and reported through
    /// `on_ended` (invoked exactly once) and [`PlayOutcome::Failed`].
    pub async fn play(&self, payload: &str, on_ended: OnEnded) -> PlayOutcome {
        self.stop();

        match self.try_play(payload).await {
            Ok(start) => match self.start_session(start, on_ended) {
                Ok(id) => {
                    log::info!("Playback session {} started", id);
                    PlayOutcome::Started
                }
                Err((e, on_ended)) => Self::fail(e, on_ended),
            },
            Err(e) => Self::fail(e, on_ended),
        }
    }

    /// Halt the active session, if any. Does not fire its `on_ended`.
    pub fn stop(&self) {
        let session = lock(&self.slot).active.take();
        if let Some(session) = session {
            log::info!("Stopping playback session {}", session.id);
            session.halt();
        }
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.slot).active.is_some()
    }

    fn fail(e: AudioError, on_ended: OnEnded) -> PlayOutcome {
        log::error!("Error playing audio: {}", e);
        on_ended();
        PlayOutcome::Failed
    }

    async fn try_play(&self, payload: &str) -> Result<StartRequest> {
        let output = self.output().await?;
        if output.state() == OutputState::Suspended {
            log::info!("Audio output suspended, resuming");
            output.resume().await?;
        }

        let buffer = self.decoder.decode(payload)?;
        log::debug!(
            "Decoded {} frames ({:.2}s) at {}Hz",
            buffer.frame_count(),
            buffer.duration_secs(),
            buffer.sample_rate()
        );
        Ok(StartRequest { output, buffer })
    }

    /// Reuse the shared output, creating it on first use. A failed
    /// acquisition is not cached, so the next `play` retries.
    async fn output(&self) -> Result<Arc<dyn AudioOutput>> {
        if let Some(output) = lock(&self.slot).output.clone() {
            return Ok(output);
        }

        // 不持锁等待设备，stop() 和完成回调不受影响
        let acquired = self.provider.acquire(self.sample_rate, self.channels).await?;

        // 并发的 play 可能已先拿到输出，以先到者为准
        let mut slot = lock(&self.slot);
        Ok(slot.output.get_or_insert(acquired).clone())
    }

    fn start_session(
        &self,
        start: StartRequest,
        on_ended: OnEnded,
    ) -> std::result::Result<u64, (AudioError, OnEnded)> {
        let mut slot = lock(&self.slot);

        // Another play may have started while this one was resuming the output
        if let Some(previous) = slot.active.take() {
            log::info!("Superseding playback session {}", previous.id);
            previous.halt();
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let weak_slot = Arc::downgrade(&self.slot);

        let completion = Box::new(move || {
            let Some(slot) = weak_slot.upgrade() else {
                return;
            };
            let finished = {
                let mut slot = lock(&slot);
                if slot.active.as_ref().is_some_and(|session| session.id == id) {
                    slot.active.take()
                } else {
                    None
                }
            };
            if let Some(mut session) = finished {
                log::debug!("Playback session {} completed", id);
                if let Some(on_ended) = session.on_ended.take() {
                    on_ended();
                }
            }
        });

        match start.output.start(start.buffer, completion) {
            Ok(handle) => {
                slot.active = Some(PlaybackSession {
                    id,
                    handle,
                    on_ended: Some(on_ended),
                    stopped: false,
                });
                Ok(id)
            }
            Err(e) => Err((e, on_ended)),
        }
    }
}

struct StartRequest {
    output: Arc<dyn AudioOutput>,
    buffer: DecodedAudioBuffer,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // Callbacks run outside the lock, so a poisoned slot is still consistent
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
