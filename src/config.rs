//! Command-line parsing and validation for the demo binary.
//!
//! `AppConfig` is the clap surface; `validate()` normalizes and range-checks
//! everything before the library-facing configs (`SessionConfig`,
//! `MicTuning`, `WhisperOptions`) are assembled from it.

use crate::audio::filter::{default_gate_kind, FilterConfig, GateKind};
use crate::audio::MicTuning;
use crate::recognize::WhisperOptions;
use crate::session::SessionConfig;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const MAX_PHRASE_LIMIT_MS: u64 = 60_000;
const MAX_ANSWER_TIMEOUT_SECS: u64 = 300;

/// CLI options for the voxloop listener.
#[derive(Debug, Parser, Clone)]
#[command(about = "Wake-word listening loop", author, version)]
pub struct AppConfig {
    /// Trigger word matched against recognized text
    #[arg(long, env = "VOXLOOP_WAKE_WORD", default_value = "ava")]
    pub wake_word: String,

    /// Skip wake-word detection and treat every phrase as a command
    #[arg(long = "no-wake-word", default_value_t = false)]
    pub no_wake_word: bool,

    /// Path to the whisper GGML model
    #[arg(long, env = "VOXLOOP_MODEL", default_value = "models/ggml-base.en.bin")]
    pub model: PathBuf,

    /// Recognition language (ISO 639-1 code, or "auto")
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Whisper beam width; 1 selects greedy decoding
    #[arg(long = "beam-size", default_value_t = 1)]
    pub beam_size: u32,

    /// Whisper sampling temperature
    #[arg(long, default_value_t = 0.0)]
    pub temperature: f32,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Voice-activity gate implementation
    #[arg(long = "vad-engine", value_enum, default_value_t = default_gate_kind())]
    pub vad_engine: GateKind,

    /// Gate aggressiveness, 0 (permissive) through 3 (strict)
    #[arg(long = "vad-aggressiveness", default_value_t = 2)]
    pub vad_aggressiveness: u8,

    /// Gate frame duration in milliseconds (10, 20, or 30)
    #[arg(long = "vad-frame-ms", default_value_t = 30)]
    pub vad_frame_ms: u64,

    /// Energy-gate threshold in dBFS
    #[arg(long = "vad-threshold-db", default_value_t = -45.0)]
    pub vad_threshold_db: f32,

    /// Wake-word capture onset timeout (milliseconds)
    #[arg(long = "wake-timeout-ms", default_value_t = 1_000)]
    pub wake_timeout_ms: u64,

    /// Wake-word capture phrase limit (milliseconds)
    #[arg(long = "wake-phrase-limit-ms", default_value_t = 5_000)]
    pub wake_phrase_limit_ms: u64,

    /// Command capture onset timeout (milliseconds)
    #[arg(long = "command-timeout-ms", default_value_t = 5_000)]
    pub command_timeout_ms: u64,

    /// Command capture phrase limit (milliseconds)
    #[arg(long = "command-phrase-limit-ms", default_value_t = 10_000)]
    pub command_phrase_limit_ms: u64,

    /// How long answer mode waits for speech (seconds)
    #[arg(long = "answer-timeout-secs", default_value_t = 30)]
    pub answer_timeout_secs: u64,

    /// Continuous-mode phrase limit (milliseconds)
    #[arg(long = "continuous-phrase-limit-ms", default_value_t = 10_000)]
    pub continuous_phrase_limit_ms: u64,

    /// Ambient-noise calibration duration (milliseconds)
    #[arg(long = "calibration-ms", default_value_t = 500)]
    pub calibration_ms: u64,

    /// Pause between listen cycles (milliseconds)
    #[arg(long = "idle-pause-ms", default_value_t = 100)]
    pub idle_pause_ms: u64,

    /// Silence run that ends a phrase (milliseconds)
    #[arg(long = "silence-tail-ms", default_value_t = 600)]
    pub silence_tail_ms: u64,

    /// Pre-speech audio retained at phrase onset (milliseconds)
    #[arg(long = "lookback-ms", default_value_t = 300)]
    pub lookback_ms: u64,

    /// Retry inside answer mode on timeout instead of falling back
    #[arg(long = "answer-retry", default_value_t = false)]
    pub answer_retry: bool,

    /// Emit partial-recognition diagnostics for discarded wake-mode text
    #[arg(long = "emit-partial", default_value_t = false)]
    pub emit_partial: bool,

    /// Print events as JSON lines instead of human-readable text
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable structured trace logging to a temp file
    #[arg(long, env = "VOXLOOP_LOGS", default_value_t = false)]
    pub logs: bool,
}

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize the wake word.
    pub fn validate(&mut self) -> Result<()> {
        self.wake_word = self.wake_word.trim().to_lowercase();
        if !self.no_wake_word && self.wake_word.is_empty() {
            bail!("--wake-word must not be empty (or pass --no-wake-word)");
        }

        if !matches!(self.vad_frame_ms, 10 | 20 | 30) {
            bail!("--vad-frame-ms must be 10, 20, or 30, got {}", self.vad_frame_ms);
        }
        if self.vad_aggressiveness > 3 {
            bail!(
                "--vad-aggressiveness must be between 0 and 3, got {}",
                self.vad_aggressiveness
            );
        }
        if !(-90.0..=0.0).contains(&self.vad_threshold_db) {
            bail!(
                "--vad-threshold-db must be between -90 and 0, got {}",
                self.vad_threshold_db
            );
        }

        for (name, value) in [
            ("--wake-timeout-ms", self.wake_timeout_ms),
            ("--command-timeout-ms", self.command_timeout_ms),
        ] {
            if value == 0 || value > MAX_PHRASE_LIMIT_MS {
                bail!("{name} must be between 1 and {MAX_PHRASE_LIMIT_MS}, got {value}");
            }
        }
        for (name, value) in [
            ("--wake-phrase-limit-ms", self.wake_phrase_limit_ms),
            ("--command-phrase-limit-ms", self.command_phrase_limit_ms),
            ("--continuous-phrase-limit-ms", self.continuous_phrase_limit_ms),
        ] {
            if value == 0 || value > MAX_PHRASE_LIMIT_MS {
                bail!("{name} must be between 1 and {MAX_PHRASE_LIMIT_MS}, got {value}");
            }
        }
        if self.answer_timeout_secs == 0 || self.answer_timeout_secs > MAX_ANSWER_TIMEOUT_SECS {
            bail!(
                "--answer-timeout-secs must be between 1 and {MAX_ANSWER_TIMEOUT_SECS}, got {}",
                self.answer_timeout_secs
            );
        }
        if self.calibration_ms > 10_000 {
            bail!("--calibration-ms must be at most 10000, got {}", self.calibration_ms);
        }
        if self.idle_pause_ms > 5_000 {
            bail!("--idle-pause-ms must be at most 5000, got {}", self.idle_pause_ms);
        }
        if self.silence_tail_ms < 200 || self.silence_tail_ms > 5_000 {
            bail!(
                "--silence-tail-ms must be between 200 and 5000, got {}",
                self.silence_tail_ms
            );
        }
        if self.lookback_ms > 2_000 {
            bail!("--lookback-ms must be at most 2000, got {}", self.lookback_ms);
        }
        if !(1..=8).contains(&self.beam_size) {
            bail!("--beam-size must be between 1 and 8, got {}", self.beam_size);
        }
        if self.lang.len() > 8 || !self.lang.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("--lang must be a short alphanumeric language code, got {:?}", self.lang);
        }
        Ok(())
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            engine: self.vad_engine,
            aggressiveness: self.vad_aggressiveness,
            frame_ms: self.vad_frame_ms,
            threshold_db: self.vad_threshold_db,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let base = if self.no_wake_word {
            SessionConfig::continuous()
        } else {
            SessionConfig::new(&self.wake_word)
        };
        SessionConfig {
            wake_timeout: Duration::from_millis(self.wake_timeout_ms),
            wake_phrase_limit: Duration::from_millis(self.wake_phrase_limit_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            command_phrase_limit: Duration::from_millis(self.command_phrase_limit_ms),
            answer_timeout: Duration::from_secs(self.answer_timeout_secs),
            continuous_phrase_limit: Duration::from_millis(self.continuous_phrase_limit_ms),
            calibration: Duration::from_millis(self.calibration_ms),
            idle_pause: Duration::from_millis(self.idle_pause_ms),
            answer_retry: self.answer_retry,
            emit_partial: self.emit_partial,
            filter: self.filter_config(),
            ..base
        }
    }

    pub fn mic_tuning(&self) -> MicTuning {
        MicTuning {
            silence_tail_ms: self.silence_tail_ms,
            lookback_ms: self.lookback_ms,
            ..MicTuning::default()
        }
    }

    pub fn whisper_options(&self) -> WhisperOptions {
        WhisperOptions {
            language: self.lang.clone(),
            beam_size: self.beam_size,
            temperature: self.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ListenMode;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::parse_from(["voxloop"]);
        config.validate().expect("defaults should be valid");
        config
    }

    #[test]
    fn defaults_are_valid() {
        let config = test_config();
        assert_eq!(config.wake_word, "ava");
        assert!(!config.no_wake_word);
    }

    #[test]
    fn wake_word_is_normalized() {
        let mut config = AppConfig::parse_from(["voxloop", "--wake-word", "  AVA "]);
        config.validate().unwrap();
        assert_eq!(config.wake_word, "ava");
    }

    #[test]
    fn empty_wake_word_rejected_unless_continuous() {
        let mut config = AppConfig::parse_from(["voxloop", "--wake-word", ""]);
        assert!(config.validate().is_err());
        let mut config = AppConfig::parse_from(["voxloop", "--wake-word", "", "--no-wake-word"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_frame_duration_rejected() {
        let mut config = AppConfig::parse_from(["voxloop", "--vad-frame-ms", "25"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_aggressiveness_rejected() {
        let mut config = AppConfig::parse_from(["voxloop", "--vad-aggressiveness", "4"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_config_reflects_wake_word_usage() {
        let config = test_config();
        assert_eq!(config.session_config().home_mode(), ListenMode::WakeWord);

        let mut config = AppConfig::parse_from(["voxloop", "--no-wake-word"]);
        config.validate().unwrap();
        assert_eq!(
            config.session_config().home_mode(),
            ListenMode::ContinuousCommand
        );
    }

    #[test]
    fn session_config_carries_timeouts() {
        let mut config = AppConfig::parse_from([
            "voxloop",
            "--wake-timeout-ms",
            "1500",
            "--answer-timeout-secs",
            "12",
        ]);
        config.validate().unwrap();
        let session = config.session_config();
        assert_eq!(session.wake_timeout, Duration::from_millis(1500));
        assert_eq!(session.answer_timeout, Duration::from_secs(12));
    }
}
