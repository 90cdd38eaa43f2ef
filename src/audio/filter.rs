//! Voice-activity gate.
//!
//! Classifies a captured buffer as speech/non-speech before it is handed to
//! the recognizer, so silence and capture artifacts never cost a recognition
//! call. A buffer is accepted when any single frame classifies as speech;
//! buffers shorter than one frame carry no evaluable frames and are rejected.

use super::resample::resample_to_target_rate;
use super::{rms_db, AudioBuffer, TARGET_RATE};
#[cfg(feature = "vad_earshot")]
use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use std::borrow::Cow;

/// Gate configuration carried by the session so a fresh gate can be built
/// per background run.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub engine: GateKind,
    /// 0 (least filtering) through 3 (most). Applies to the earshot gate.
    pub aggressiveness: u8,
    /// Frame duration used to partition buffers. Earshot accepts 10/20/30.
    pub frame_ms: u64,
    /// RMS threshold for the energy gate.
    pub threshold_db: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            engine: default_gate_kind(),
            aggressiveness: 2,
            frame_ms: 30,
            threshold_db: -45.0,
        }
    }
}

/// Available gate implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GateKind {
    #[cfg(feature = "vad_earshot")]
    Earshot,
    Energy,
}

impl GateKind {
    pub fn label(self) -> &'static str {
        match self {
            #[cfg(feature = "vad_earshot")]
            GateKind::Earshot => "earshot",
            GateKind::Energy => "energy",
        }
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub fn default_gate_kind() -> GateKind {
    #[cfg(feature = "vad_earshot")]
    {
        GateKind::Earshot
    }
    #[cfg(not(feature = "vad_earshot"))]
    {
        GateKind::Energy
    }
}

/// Frame-level speech classifier. `accepts` partitions the buffer and
/// returns true if any complete frame classifies as speech.
pub trait SpeechGate: Send {
    fn accepts(&mut self, audio: &AudioBuffer) -> bool;
    fn reset(&mut self);
    fn name(&self) -> &'static str {
        "unknown_gate"
    }
}

/// Build the configured gate. Called once per background run so detector
/// state never leaks across sessions.
pub fn create_gate(cfg: &FilterConfig) -> Box<dyn SpeechGate> {
    match cfg.engine {
        #[cfg(feature = "vad_earshot")]
        GateKind::Earshot => Box::new(EarshotGate::from_config(cfg)),
        GateKind::Energy => Box::new(EnergyGate::new(cfg.threshold_db, cfg.frame_ms)),
    }
}

/// Normalize to the target rate, then yield complete frames of
/// `frame_samples`. A trailing partial frame is discarded rather than
/// padded: padding would let a sub-frame blip masquerade as a full frame of
/// speech.
fn frames_at_target_rate(audio: &AudioBuffer, frame_samples: usize) -> Vec<Vec<f32>> {
    let samples: Cow<'_, [f32]> = if audio.sample_rate == TARGET_RATE {
        Cow::Borrowed(&audio.samples)
    } else {
        Cow::Owned(resample_to_target_rate(&audio.samples, audio.sample_rate))
    };
    samples
        .chunks_exact(frame_samples.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// WebRTC-style gate backed by earshot.
#[cfg(feature = "vad_earshot")]
pub struct EarshotGate {
    detector: VoiceActivityDetector,
    frame_samples: usize,
    scratch: Vec<i16>,
}

#[cfg(feature = "vad_earshot")]
impl EarshotGate {
    pub fn from_config(cfg: &FilterConfig) -> Self {
        let profile = match cfg.aggressiveness {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        let frame_ms = cfg.frame_ms.clamp(10, 30) as usize;
        let frame_samples = ((TARGET_RATE as usize) * frame_ms) / 1000;
        Self {
            detector: VoiceActivityDetector::new(profile),
            frame_samples: frame_samples.max(160),
            scratch: Vec::new(),
        }
    }
}

#[cfg(feature = "vad_earshot")]
impl SpeechGate for EarshotGate {
    fn accepts(&mut self, audio: &AudioBuffer) -> bool {
        for frame in frames_at_target_rate(audio, self.frame_samples) {
            self.scratch.clear();
            self.scratch.reserve(frame.len());
            for sample in frame {
                self.scratch.push((sample.clamp(-1.0, 1.0) * 32_768.0) as i16);
            }
            match self.detector.predict_16khz(&self.scratch) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    // Frame-length mismatch; skip the frame, the caller
                    // still sees an honest reject for the buffer.
                    tracing::debug!("earshot rejected a frame: {err:?}");
                }
            }
        }
        false
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_gate"
    }
}

/// RMS-energy fallback gate, used when earshot is disabled or unavailable.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    threshold_db: f32,
    frame_samples: usize,
}

impl EnergyGate {
    pub fn new(threshold_db: f32, frame_ms: u64) -> Self {
        let frame_samples = ((TARGET_RATE as u64 * frame_ms.max(1)) / 1000).max(1) as usize;
        Self {
            threshold_db,
            frame_samples,
        }
    }
}

impl SpeechGate for EnergyGate {
    fn accepts(&mut self, audio: &AudioBuffer) -> bool {
        frames_at_target_rate(audio, self.frame_samples)
            .iter()
            .any(|frame| rms_db(frame) >= self.threshold_db)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy_gate"
    }
}
