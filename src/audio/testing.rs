//! In-memory output backend for player and controller tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::error::{AudioError, Result};
use super::output::{AudioOutput, CompletionHandler, OutputHandle, OutputProvider, OutputState};
use super::pcm::DecodedAudioBuffer;

/// Records every started handle so tests can finish or inspect them.
#[derive(Default)]
pub(crate) struct FakeState {
    pub completions: Vec<Option<CompletionHandler>>,
    pub stopped: Vec<Arc<AtomicBool>>,
    pub buffers: Vec<DecodedAudioBuffer>,
    pub resumes: usize,
}

/// Test-side view of what the fake backend was asked to do.
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    pub state: Arc<Mutex<FakeState>>,
    pub acquisitions: Arc<AtomicUsize>,
}

impl FakeBackend {
    /// Fire the natural-completion handler of the `index`-th started handle
    /// from a separate thread, as a real backend would.
    pub fn finish(&self, index: usize) {
        let handler = self.state.lock().unwrap().completions[index].take().unwrap();
        std::thread::spawn(handler).join().unwrap();
    }

    pub fn stopped(&self, index: usize) -> bool {
        self.state.lock().unwrap().stopped[index].load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.state.lock().unwrap().completions.len()
    }

    pub fn resumes(&self) -> usize {
        self.state.lock().unwrap().resumes
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    backend: FakeBackend,
    fail_first: usize,
    suspended: bool,
    fail_start: bool,
    gate: Option<Arc<Notify>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` acquisitions fail.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// The output starts out suspended.
    pub fn suspended(mut self) -> Self {
        self.suspended = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Acquisition waits until `gate` is notified, like a busy device.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn backend(&self) -> FakeBackend {
        self.backend.clone()
    }
}

#[async_trait]
impl OutputProvider for FakeProvider {
    async fn acquire(&self, _sample_rate: u32, _channels: u16) -> Result<Arc<dyn AudioOutput>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let attempt = self.backend.acquisitions.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(AudioError::OutputAcquisition("no device".into()));
        }
        Ok(Arc::new(FakeOutput {
            state: self.backend.state.clone(),
            suspended: AtomicBool::new(self.suspended),
            fail_start: self.fail_start,
        }))
    }
}

struct FakeOutput {
    state: Arc<Mutex<FakeState>>,
    suspended: AtomicBool,
    fail_start: bool,
}

#[async_trait]
impl AudioOutput for FakeOutput {
    fn state(&self) -> OutputState {
        if self.suspended.load(Ordering::SeqCst) {
            OutputState::Suspended
        } else {
            OutputState::Running
        }
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().unwrap().resumes += 1;
        // 让出执行权，其他 play 可在恢复期间插进来
        tokio::task::yield_now().await;
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(
        &self,
        buffer: DecodedAudioBuffer,
        on_complete: CompletionHandler,
    ) -> Result<Box<dyn OutputHandle>> {
        if self.fail_start {
            return Err(AudioError::PlaybackStart("device busy".into()));
        }
        let stopped = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock().unwrap();
        state.completions.push(Some(on_complete));
        state.stopped.push(stopped.clone());
        state.buffers.push(buffer);
        Ok(Box::new(FakeHandle { stopped }))
    }
}

struct FakeHandle {
    stopped: Arc<AtomicBool>,
}

impl OutputHandle for FakeHandle {
    fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
