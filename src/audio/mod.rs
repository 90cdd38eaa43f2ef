//! Audio capture and voice-activity gating.
//!
//! Microphone audio is captured via CPAL, downmixed to mono, and normalized
//! to 16 kHz f32 PCM before anything downstream sees it. The capture adapter
//! and the speech gate are both trait seams so the listening session can be
//! exercised with fakes.

/// Sample rate every buffer is normalized to before gating and recognition.
pub const TARGET_RATE: u32 = 16_000;

mod dispatch;
pub mod filter;
mod mic;
mod resample;
mod source;
#[cfg(test)]
mod tests;

pub use filter::{FilterConfig, GateKind, SpeechGate};
pub use mic::{MicSource, MicTuning};
pub use source::{AudioSource, CaptureError, SourceHandle};

/// Mono linear-PCM audio with its sample rate, as produced by a capture
/// adapter and consumed by the gate and the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate)
    }
}

pub(crate) fn rms_db(samples: &[f32]) -> f32 {
    const FLOOR_DB: f32 = -60.0;
    if samples.is_empty() {
        return FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}
