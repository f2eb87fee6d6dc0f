//! ALSA PCM playback backend for the audio player.
//!
//! Each session renders on its own `audio-play` OS thread (NOT a tokio task)
//! so that blocking `writei` calls never stall the async runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM, State};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use async_trait::async_trait;

use super::error::AudioError;
use super::output::{AudioOutput, CompletionHandler, OutputHandle, OutputProvider, OutputState};
use super::pcm::DecodedAudioBuffer;

/// Consecutive XRUN recoveries tolerated before a session gives up.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Poll interval while waiting for the hardware to play out the tail.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::debug!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

/// Open, negotiate and close the device. There is no resampler in the
/// playback path, so the hardware must accept the exact payload format.
fn check_device(device: &str, sample_rate: u32, channels: u16, period_size: Option<usize>) -> Result<AlsaParams> {
    let (_pcm, params) = open_playback(device, sample_rate, channels as u32, period_size)?;
    if params.sample_rate != sample_rate || params.channels != channels as u32 {
        anyhow::bail!(
            "device '{}' negotiated {}Hz/{}ch, need {}Hz/{}ch",
            device,
            params.sample_rate,
            params.channels,
            sample_rate,
            channels
        );
    }
    Ok(params)
}

/// Creates the shared [`AlsaOutput`] for a playback device.
pub struct AlsaProvider {
    device: String,
    period_size: Option<usize>,
}

impl AlsaProvider {
    /// `period_size` of 0 lets ALSA decide.
    pub fn new(device: &str, period_size: usize) -> Self {
        Self {
            device: device.to_string(),
            period_size: (period_size > 0).then_some(period_size),
        }
    }
}

#[async_trait]
impl OutputProvider for AlsaProvider {
    async fn acquire(&self, sample_rate: u32, channels: u16) -> super::error::Result<Arc<dyn AudioOutput>> {
        // 阻塞模式打开设备，设备被占用时可能一直等待，放到阻塞线程池里
        let device = self.device.clone();
        let period = self.period_size;
        let params = tokio::task::spawn_blocking(move || check_device(&device, sample_rate, channels, period))
            .await
            .map_err(|e| AudioError::OutputAcquisition(format!("acquire task failed: {}", e)))?
            .map_err(|e| AudioError::OutputAcquisition(format!("{:#}", e)))?;

        log::info!(
            "Audio output ready: device={}, rate={}, ch={}, period={}",
            self.device,
            params.sample_rate,
            params.channels,
            params.period_size,
        );

        Ok(Arc::new(AlsaOutput {
            device: self.device.clone(),
            sample_rate,
            channels,
            period_size: self.period_size,
            suspended: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Process-wide ALSA output context.
pub struct AlsaOutput {
    device: String,
    sample_rate: u32,
    channels: u16,
    period_size: Option<usize>,
    /// Set by a session that found the PCM suspended (e.g. system sleep)
    suspended: Arc<AtomicBool>,
}

#[async_trait]
impl AudioOutput for AlsaOutput {
    fn state(&self) -> OutputState {
        if self.suspended.load(Ordering::SeqCst) {
            OutputState::Suspended
        } else {
            OutputState::Running
        }
    }

    async fn resume(&self) -> super::error::Result<()> {
        let device = self.device.clone();
        let (rate, channels, period) = (self.sample_rate, self.channels, self.period_size);

        tokio::task::spawn_blocking(move || check_device(&device, rate, channels, period))
            .await
            .map_err(|e| AudioError::OutputAcquisition(format!("resume task failed: {}", e)))?
            .map_err(|e| AudioError::OutputAcquisition(format!("{:#}", e)))?;

        self.suspended.store(false, Ordering::SeqCst);
        log::info!("Audio output resumed: device={}", self.device);
        Ok(())
    }

    fn start(
        &self,
        buffer: DecodedAudioBuffer,
        on_complete: CompletionHandler,
    ) -> super::error::Result<Box<dyn OutputHandle>> {
        if buffer.sample_rate() != self.sample_rate || buffer.channel_count() != self.channels {
            return Err(AudioError::PlaybackStart(format!(
                "buffer is {}Hz/{}ch, output is {}Hz/{}ch",
                buffer.sample_rate(),
                buffer.channel_count(),
                self.sample_rate,
                self.channels
            )));
        }

        let cancel = Arc::new(AtomicBool::new(false));

        let device = self.device.clone();
        let channels = self.channels as u32;
        let period_size = self.period_size;
        let suspended = self.suspended.clone();
        let thread_cancel = cancel.clone();
        let samples: Vec<i16> = buffer.interleaved().iter().map(|s| to_i16(*s)).collect();
        let rate = self.sample_rate;

        thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                // 在播放线程里打开设备，调用方不等待
                let (pcm, params) = match open_playback(&device, rate, channels, period_size) {
                    Ok(opened) => opened,
                    Err(e) => {
                        log::error!("Failed to start playback: {:#}", e);
                        if !thread_cancel.load(Ordering::SeqCst) {
                            on_complete();
                        }
                        return;
                    }
                };

                match render(&pcm, &params, &samples, &thread_cancel, &suspended) {
                    Ok(true) => {
                        log::debug!("Playback finished: {} frames", samples.len() / channels as usize);
                        on_complete();
                    }
                    Ok(false) => {
                        // 被打断，丢弃缓冲区中剩余的帧
                        let _ = pcm.drop();
                        log::debug!("Playback cancelled");
                    }
                    Err(e) => {
                        log::error!("Playback thread error: {:#}", e);
                        on_complete();
                    }
                }
            })
            .map_err(|e| AudioError::PlaybackStart(format!("failed to spawn playback thread: {}", e)))?;

        Ok(Box::new(AlsaHandle { cancel }))
    }
}

/// Write all frames, then wait for the hardware to play them out.
/// Returns `Ok(false)` if cancelled on the way.
fn render(
    pcm: &PCM,
    params: &AlsaParams,
    samples: &[i16],
    cancel: &AtomicBool,
    suspended: &AtomicBool,
) -> Result<bool> {
    let io = pcm.io_i16()?;
    let channels = params.channels as usize;
    let total_frames = samples.len() / channels;
    let chunk_frames = params.period_size.max(1);

    let mut frames_written = 0;
    let mut retry_count = 0u32;

    // Write decoded PCM to ALSA one period at a time so that a stop request
    // is honoured within a period, retrying short writes and XRUNs.
    while frames_written < total_frames {
        if cancel.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let end = (frames_written + chunk_frames).min(total_frames);
        match io.writei(&samples[frames_written * channels..end * channels]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                if pcm.state() == State::Suspended {
                    suspended.store(true, Ordering::SeqCst);
                    anyhow::bail!("PCM suspended during playback: {}", e);
                }

                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;
                pcm.prepare().context("Failed to recover PCM playback")?;

                if retry_count >= MAX_RECOVERY_RETRIES {
                    anyhow::bail!(
                        "Max recovery retries ({}) reached with {} frames unwritten",
                        retry_count,
                        total_frames - frames_written
                    );
                }
            }
        }
    }

    // 等待硬件缓冲区播放完毕，期间仍可被打断
    while !cancel.load(Ordering::SeqCst) {
        match pcm.delay() {
            Ok(pending) if pending > 0 && pcm.state() == State::Running => thread::sleep(DRAIN_POLL),
            _ => return Ok(true),
        }
    }
    Ok(false)
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Handle to a session running on an `audio-play` thread.
struct AlsaHandle {
    cancel: Arc<AtomicBool>,
}

impl OutputHandle for AlsaHandle {
    fn stop(&mut self) -> super::error::Result<()> {
        // 重复 stop 无副作用
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }
}
