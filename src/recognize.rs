//! Recognition adapter seam and its Whisper implementation.
//!
//! The listening session depends only on the [`Recognizer`] trait; failures
//! are typed so the state machine can map them to events without inspecting
//! message strings. The core never retries a recognition call.

use crate::audio::AudioBuffer;
use std::sync::OnceLock;
use thiserror::Error;

/// Recognition failures, mirroring the two conditions the state machine
/// distinguishes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognizeError {
    /// Audio was present but produced no decodable text.
    #[error("audio was not intelligible")]
    Unintelligible,
    /// The recognition backend itself failed; carries a diagnostic.
    #[error("recognition service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Converts one captured buffer to normalized text. Blocking; this is the
/// dominant latency source per cycle.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, audio: &AudioBuffer) -> Result<String, RecognizeError>;
}

/// Decoding options for the Whisper backend.
#[derive(Debug, Clone)]
pub struct WhisperOptions {
    /// ISO 639-1 code, or "auto" for language detection.
    pub language: String,
    /// Beam width; 1 selects greedy decoding.
    pub beam_size: u32,
    pub temperature: f32,
}

impl Default for WhisperOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            beam_size: 1,
            temperature: 0.0,
        }
    }
}

/// Strip non-speech markers ("[BLANK_AUDIO]", "(wind)", ...) and collapse
/// whitespace so downstream wake-word matching sees clean text.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        regex::Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
mod whisper {
    use super::{sanitize_transcript, RecognizeError, Recognizer, WhisperOptions};
    use crate::audio::AudioBuffer;
    use anyhow::{Context, Result};
    use std::os::raw::{c_char, c_uint, c_void};
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Whisper model context. Load once at startup and reuse for every
    /// recognition call; model loading is far more expensive than decoding.
    pub struct WhisperRecognizer {
        ctx: WhisperContext,
        opts: WhisperOptions,
    }

    impl WhisperRecognizer {
        pub fn new(model_path: &str, opts: WhisperOptions) -> Result<Self> {
            install_log_silencer();
            let ctx =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                    .context("failed to load whisper model")?;
            Ok(Self { ctx, opts })
        }

        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            let mut params = if self.opts.beam_size > 1 {
                FullParams::new(SamplingStrategy::BeamSearch {
                    beam_size: self.opts.beam_size as i32,
                    patience: -1.0,
                })
            } else {
                FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
            };
            if self.opts.language.eq_ignore_ascii_case("auto") {
                params.set_language(None);
                params.set_detect_language(true);
            } else {
                params.set_language(Some(&self.opts.language));
                params.set_detect_language(false);
            }
            params.set_temperature(self.opts.temperature);
            // Cap worker threads so the listen loop's host stays responsive.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state.full(params, samples)?;

            let mut transcript = String::new();
            let num_segments = state
                .full_n_segments()
                .context("failed to read segment count")?;
            for i in 0..num_segments.max(0) {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => transcript.push_str(&text),
                    Err(err) => tracing::debug!("failed to read whisper segment {i}: {err}"),
                }
            }
            Ok(transcript)
        }
    }

    impl Recognizer for WhisperRecognizer {
        fn recognize(&self, audio: &AudioBuffer) -> Result<String, RecognizeError> {
            if audio.is_empty() {
                return Err(RecognizeError::Unintelligible);
            }
            let raw = self
                .transcribe(&audio.samples)
                .map_err(|err| RecognizeError::ServiceUnavailable(format!("{err:#}")))?;
            let text = sanitize_transcript(&raw);
            if text.is_empty() {
                Err(RecognizeError::Unintelligible)
            } else {
                Ok(text)
            }
        }
    }

    fn install_log_silencer() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(silent_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn silent_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // whisper.cpp is chatty on stderr; keep it out of the event stream.
    }
}

#[cfg(unix)]
pub use whisper::WhisperRecognizer;

#[cfg(not(unix))]
mod whisper {
    use super::{RecognizeError, Recognizer, WhisperOptions};
    use crate::audio::AudioBuffer;
    use anyhow::{anyhow, Result};

    /// Stub for targets where whisper.cpp is not wired up.
    pub struct WhisperRecognizer;

    impl WhisperRecognizer {
        pub fn new(_: &str, _: WhisperOptions) -> Result<Self> {
            Err(anyhow!(
                "whisper recognition is currently supported only on Unix-like platforms"
            ))
        }
    }

    impl Recognizer for WhisperRecognizer {
        fn recognize(&self, _: &AudioBuffer) -> Result<String, RecognizeError> {
            Err(RecognizeError::ServiceUnavailable(
                "whisper recognition unavailable on this platform".to_string(),
            ))
        }
    }
}

#[cfg(not(unix))]
pub use whisper::WhisperRecognizer;
