//! System microphone capture via CPAL.
//!
//! `MicSource` implements the capture-adapter seam: opening it builds an
//! input stream in whatever format the device speaks, downmixes to mono, and
//! normalizes frames to 16 kHz. The handle does energy endpointing against a
//! calibrated ambient threshold so `listen` returns one phrase at a time.

use super::dispatch::FramePump;
use super::resample::convert_frame_to_target;
use super::source::{AudioSource, CaptureError, SourceHandle};
use super::{rms_db, AudioBuffer, TARGET_RATE};
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Threshold applied when `listen` runs without a prior calibration pass.
const UNCALIBRATED_THRESHOLD_DB: f32 = -45.0;

/// Endpointing knobs for the microphone source.
#[derive(Debug, Clone)]
pub struct MicTuning {
    /// Frame duration cut on the callback side.
    pub frame_ms: u64,
    /// Capacity of the callback-to-capture frame channel.
    pub channel_capacity: usize,
    /// Pre-speech audio retained so phrase onsets aren't clipped.
    pub lookback_ms: u64,
    /// Silence run that ends a phrase once speech has started.
    pub silence_tail_ms: u64,
    /// Margin added above the measured ambient level.
    pub margin_db: f32,
}

impl Default for MicTuning {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            channel_capacity: 64,
            lookback_ms: 300,
            silence_tail_ms: 600,
            margin_db: 6.0,
        }
    }
}

/// Microphone-backed [`AudioSource`].
pub struct MicSource {
    preferred_device: Option<String>,
    tuning: MicTuning,
}

impl MicSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            tuning: MicTuning::default(),
        }
    }

    pub fn with_tuning(preferred_device: Option<String>, tuning: MicTuning) -> Self {
        Self {
            preferred_device,
            tuning,
        }
    }

    /// List microphone names so the CLI can expose a selector.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match self.preferred_device.as_deref() {
            Some(name) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| anyhow!("input device '{name}' not found"))
            }
            None => host
                .default_input_device()
                .context("no default input device available"),
        }
    }
}

impl AudioSource for MicSource {
    fn open(&self) -> Result<Box<dyn SourceHandle>, CaptureError> {
        let device = self
            .find_device()
            .map_err(|err| CaptureError::Device(format!("{err:#}")))?;
        let handle = MicHandle::start(&device, self.tuning.clone())
            .map_err(|err| CaptureError::Device(format!("{err:#}")))?;
        Ok(Box::new(handle))
    }
}

/// An open input stream plus the receiving end of its frame channel.
///
/// Exclusively owned by the listening thread; dropping it pauses and tears
/// down the CPAL stream, releasing the device on every exit path.
struct MicHandle {
    stream: cpal::Stream,
    frames: Receiver<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    device_rate: u32,
    target_frame_samples: usize,
    tuning: MicTuning,
    threshold_db: Option<f32>,
}

impl MicHandle {
    fn start(device: &cpal::Device, tuning: MicTuning) -> Result<Self> {
        let default_config = device.default_input_config()?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let frame_ms = tuning.frame_ms.clamp(5, 120);
        let device_frame_samples = ((u64::from(device_rate) * frame_ms) / 1000).max(1) as usize;
        let target_frame_samples = ((u64::from(TARGET_RATE) * frame_ms) / 1000).max(1) as usize;

        tracing::debug!(
            ?format,
            device_rate,
            channels,
            "opening microphone input stream"
        );

        let (sender, frames) = bounded::<Vec<f32>>(tuning.channel_capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let pump = Arc::new(Mutex::new(FramePump::new(
            device_frame_samples,
            sender,
            dropped.clone(),
        )));

        let err_fn = |err| tracing::debug!("audio stream error: {err}");
        let stream = match format {
            SampleFormat::F32 => {
                let pump = pump.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = pump.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let pump = pump.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = pump.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let pump = pump.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = pump.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };
        stream.play()?;

        // Frames arrive at the device rate; conversion to the target rate
        // happens as they are drained, keeping the callback cheap.
        Ok(Self {
            stream,
            frames,
            dropped,
            device_rate,
            target_frame_samples,
            tuning: MicTuning { frame_ms, ..tuning },
            threshold_db: None,
        })
    }

    fn next_frame(&self, wait: Duration) -> Result<Option<Vec<f32>>, CaptureError> {
        match self.frames.recv_timeout(wait) {
            Ok(frame) => Ok(Some(convert_frame_to_target(
                frame,
                self.device_rate,
                self.target_frame_samples,
            ))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Device(
                "audio stream disconnected".to_string(),
            )),
        }
    }

    fn drain_pending(&self) {
        while self.frames.try_recv().is_ok() {}
    }
}

impl SourceHandle for MicHandle {
    fn calibrate(&mut self, duration: Duration) -> Result<(), CaptureError> {
        self.drain_pending();
        let wait = Duration::from_millis(self.tuning.frame_ms);
        let deadline = Instant::now() + duration;
        let mut level_sum = 0.0f32;
        let mut frames_seen = 0usize;
        while Instant::now() < deadline {
            if let Some(frame) = self.next_frame(wait)? {
                level_sum += rms_db(&frame);
                frames_seen += 1;
            }
        }
        if frames_seen == 0 {
            return Err(CaptureError::Device(format!(
                "no samples captured during calibration; check microphone permissions. {}",
                mic_permission_hint()
            )));
        }
        let ambient_db = level_sum / frames_seen as f32;
        let threshold = threshold_from_ambient(ambient_db, self.tuning.margin_db);
        tracing::debug!(ambient_db, threshold, "microphone calibrated");
        self.threshold_db = Some(threshold);
        Ok(())
    }

    fn listen(
        &mut self,
        timeout: Option<Duration>,
        phrase_limit: Duration,
    ) -> Result<AudioBuffer, CaptureError> {
        let threshold = self.threshold_db.unwrap_or(UNCALIBRATED_THRESHOLD_DB);
        let frame_ms = self.tuning.frame_ms;
        let wait = Duration::from_millis(frame_ms);
        let lookback_frames = (self.tuning.lookback_ms / frame_ms.max(1)).max(1) as usize;
        let onset_deadline = timeout.map(|t| Instant::now() + t);

        // Wait for speech onset, keeping a short lookback so the first
        // syllable isn't clipped.
        let mut lookback: VecDeque<Vec<f32>> = VecDeque::with_capacity(lookback_frames);
        loop {
            if let Some(deadline) = onset_deadline {
                if Instant::now() >= deadline {
                    return Err(CaptureError::ListenTimeout);
                }
            }
            match self.next_frame(wait)? {
                Some(frame) => {
                    let loud = rms_db(&frame) >= threshold;
                    if lookback.len() == lookback_frames {
                        lookback.pop_front();
                    }
                    lookback.push_back(frame);
                    if loud {
                        break;
                    }
                }
                None => continue,
            }
        }

        // Collect the phrase until a silence tail or the phrase limit.
        let mut samples: Vec<f32> = lookback.into_iter().flatten().collect();
        let phrase_start = Instant::now();
        let mut silence_streak_ms = 0u64;
        while phrase_start.elapsed() < phrase_limit {
            match self.next_frame(wait)? {
                Some(frame) => {
                    if rms_db(&frame) >= threshold {
                        silence_streak_ms = 0;
                    } else {
                        silence_streak_ms = silence_streak_ms.saturating_add(frame_ms);
                    }
                    samples.extend(frame);
                }
                None => {
                    silence_streak_ms = silence_streak_ms.saturating_add(frame_ms);
                }
            }
            if silence_streak_ms >= self.tuning.silence_tail_ms {
                break;
            }
        }

        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            tracing::debug!(dropped, "capture channel overran during phrase");
        }
        Ok(AudioBuffer::new(samples, TARGET_RATE))
    }
}

impl Drop for MicHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stream.pause() {
            tracing::debug!("failed to pause audio stream: {err}");
        }
    }
}

pub(super) fn threshold_from_ambient(ambient_db: f32, margin_db: f32) -> f32 {
    (ambient_db + margin_db).clamp(-55.0, -15.0)
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
