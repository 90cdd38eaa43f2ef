//! Listening mode state machine.
//!
//! One `ListeningSession` owns a background thread that runs the
//! capture→filter→recognize→transition cycle and emits at most one event per
//! cycle to the installed sink. The control surface (`start`, `stop`,
//! `request_answer_mode`, `set_event_sink`) is safe to call from any thread;
//! the sink is invoked on the listen thread and consumers do their own
//! marshaling.

use crate::audio::filter::{create_gate, FilterConfig, SpeechGate};
use crate::audio::{AudioSource, CaptureError, SourceHandle};
use crate::lock_or_recover;
use crate::recognize::{RecognizeError, Recognizer};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Behavior driver for the listen loop. `Command` and `Answer` are only
/// reachable when wake-word usage is enabled; continuous sessions stay in
/// `ContinuousCommand` for their whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    WakeWord,
    Command,
    Answer,
    ContinuousCommand,
}

impl ListenMode {
    fn as_u8(self) -> u8 {
        match self {
            ListenMode::WakeWord => 0,
            ListenMode::Command => 1,
            ListenMode::Answer => 2,
            ListenMode::ContinuousCommand => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenMode::WakeWord,
            1 => ListenMode::Command,
            2 => ListenMode::Answer,
            _ => ListenMode::ContinuousCommand,
        }
    }
}

/// Discrete events emitted to the sink, one per cycle at most.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "text", rename_all = "snake_case")]
pub enum ListenEvent {
    WakeWordDetected,
    CommandFinished(String),
    CommandTimeout,
    CommandUnrecognized,
    AnswerReceived(String),
    AnswerTimeout,
    /// Diagnostic: text recognized in wake-word mode that did not contain
    /// the wake word. Only emitted when `SessionConfig::emit_partial` is set.
    PartialRecognition(String),
    Error(String),
}

/// Callback invoked from the listen thread. Consumers marshal to their own
/// threads as needed.
pub type EventSink = Box<dyn FnMut(ListenEvent) + Send>;

/// Session tuning. Capture windows are (onset timeout, phrase limit) pairs;
/// the continuous window has no onset timeout by design.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lower-cased trigger token matched as a substring of recognized text.
    pub wake_word: String,
    /// When false the session starts and always returns to
    /// `ContinuousCommand`.
    pub use_wake_word: bool,
    pub wake_timeout: Duration,
    pub wake_phrase_limit: Duration,
    pub command_timeout: Duration,
    pub command_phrase_limit: Duration,
    /// How long answer mode waits for speech before giving up.
    pub answer_timeout: Duration,
    pub continuous_phrase_limit: Duration,
    /// Ambient-noise calibration performed once per acquisition.
    pub calibration: Duration,
    /// Pause between cycles to bound busy-looping.
    pub idle_pause: Duration,
    /// Retry within answer mode on timeout/unintelligible instead of
    /// falling back to the home mode.
    pub answer_retry: bool,
    /// Emit `PartialRecognition` for discarded wake-mode text.
    pub emit_partial: bool,
    pub filter: FilterConfig,
}

impl SessionConfig {
    pub fn new(wake_word: &str) -> Self {
        Self {
            wake_word: wake_word.trim().to_lowercase(),
            use_wake_word: true,
            wake_timeout: Duration::from_secs(1),
            wake_phrase_limit: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            command_phrase_limit: Duration::from_secs(10),
            answer_timeout: Duration::from_secs(30),
            continuous_phrase_limit: Duration::from_secs(10),
            calibration: Duration::from_millis(500),
            idle_pause: Duration::from_millis(100),
            answer_retry: false,
            emit_partial: false,
            filter: FilterConfig::default(),
        }
    }

    pub fn continuous() -> Self {
        Self {
            use_wake_word: false,
            ..Self::new("")
        }
    }

    /// Mode the session starts in and falls back to after a command cycle.
    pub fn home_mode(&self) -> ListenMode {
        if self.use_wake_word {
            ListenMode::WakeWord
        } else {
            ListenMode::ContinuousCommand
        }
    }

    fn capture_window(&self, mode: ListenMode) -> (Option<Duration>, Duration) {
        match mode {
            ListenMode::WakeWord => (Some(self.wake_timeout), self.wake_phrase_limit),
            ListenMode::Command => (Some(self.command_timeout), self.command_phrase_limit),
            ListenMode::Answer => (Some(self.answer_timeout), self.command_phrase_limit),
            ListenMode::ContinuousCommand => (None, self.continuous_phrase_limit),
        }
    }
}

/// State shared between the control surface and the listen thread. The mode
/// cell and the two flags are the only cross-thread state; everything else
/// lives on the thread.
struct Shared {
    mode: AtomicU8,
    stop: AtomicBool,
    listening: AtomicBool,
    sink: Mutex<Option<EventSink>>,
}

impl Shared {
    fn mode(&self) -> ListenMode {
        ListenMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn set_mode(&self, mode: ListenMode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    fn emit(&self, event: ListenEvent) {
        let mut guard = lock_or_recover(&self.sink, "event sink");
        match guard.as_mut() {
            Some(sink) => sink(event),
            None => tracing::debug!(?event, "no event sink installed; dropping event"),
        }
    }
}

/// One listening session: owns the mode, the cancellation flag, and the
/// background thread. Construct once per assistant run; `start` and `stop`
/// may alternate any number of times.
pub struct ListeningSession {
    config: SessionConfig,
    source: Arc<dyn AudioSource>,
    recognizer: Arc<dyn Recognizer>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ListeningSession {
    pub fn new(
        config: SessionConfig,
        source: Arc<dyn AudioSource>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        let home = config.home_mode();
        Self {
            config,
            source,
            recognizer,
            shared: Arc::new(Shared {
                mode: AtomicU8::new(home.as_u8()),
                stop: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                sink: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// Launch the background listen thread. Idempotent: a second call while
    /// listening is a no-op. Returns before the capture device is open.
    pub fn start(&mut self) {
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            tracing::debug!("already listening; start ignored");
            return;
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.set_mode(self.config.home_mode());

        let shared = self.shared.clone();
        let source = self.source.clone();
        let recognizer = self.recognizer.clone();
        let config = self.config.clone();
        self.worker = Some(thread::spawn(move || {
            run_listen_loop(shared, source, recognizer, config);
        }));
    }

    /// Request cooperative cancellation and join the listen thread. The
    /// thread observes the flag between cycles, so the wait is bounded by
    /// one capture window. No-op when not listening.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("listen thread panicked");
            }
        }
        self.shared.listening.store(false, Ordering::SeqCst);
    }

    /// Switch to answer capture. Only meaningful for wake-word sessions; a
    /// continuous session treats an answer as just another command.
    pub fn request_answer_mode(&self) {
        if !self.config.use_wake_word {
            tracing::debug!("answer mode ignored for continuous session");
            return;
        }
        self.shared.set_mode(ListenMode::Answer);
    }

    /// Replace the event callback. Safe to call while listening.
    pub fn set_event_sink(&self, sink: EventSink) {
        *lock_or_recover(&self.shared.sink, "event sink") = Some(sink);
    }

    /// Install a channel-backed sink and return its receiving end.
    pub fn events(&self) -> crossbeam_channel::Receiver<ListenEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.set_event_sink(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        rx
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> ListenMode {
        self.shared.mode()
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What one capture→filter→recognize attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleOutcome {
    Recognized(String),
    /// Capture timed out before speech onset.
    NothingHeard,
    /// The gate classified the buffer as non-speech.
    Rejected,
    Unintelligible,
    ServiceDown(String),
}

/// Marks the session stopped when the listen thread exits, whatever the
/// exit path.
struct ListeningGuard<'a>(&'a Shared);

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        self.0.listening.store(false, Ordering::SeqCst);
    }
}

fn run_listen_loop(
    shared: Arc<Shared>,
    source: Arc<dyn AudioSource>,
    recognizer: Arc<dyn Recognizer>,
    config: SessionConfig,
) {
    let _guard = ListeningGuard(&shared);

    let mut handle = match source.open() {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!("failed to open capture source: {err}");
            shared.emit(ListenEvent::Error(err.to_string()));
            return;
        }
    };
    if let Err(err) = handle.calibrate(config.calibration) {
        tracing::error!("calibration failed: {err}");
        shared.emit(ListenEvent::Error(err.to_string()));
        return;
    }
    let mut gate = create_gate(&config.filter);

    while !shared.stop.load(Ordering::Acquire) {
        let mode = shared.mode();
        tracing::debug!(?mode, "listen cycle");
        let (timeout, phrase_limit) = config.capture_window(mode);
        let outcome = match observe(
            handle.as_mut(),
            gate.as_mut(),
            recognizer.as_ref(),
            timeout,
            phrase_limit,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Device-level failure is fatal to the session.
                tracing::error!("capture source failed: {err}");
                shared.emit(ListenEvent::Error(err.to_string()));
                break;
            }
        };

        let (next_mode, event) = advance(mode, outcome, &config);
        if let Some(next) = next_mode {
            shared.set_mode(next);
        }
        if let Some(event) = event {
            shared.emit(event);
        }
        thread::sleep(config.idle_pause);
    }
}

/// One capture→filter→recognize attempt. `Err` is reserved for device
/// failures; every recognition-level outcome maps into [`CycleOutcome`].
fn observe(
    handle: &mut dyn SourceHandle,
    gate: &mut dyn SpeechGate,
    recognizer: &dyn Recognizer,
    timeout: Option<Duration>,
    phrase_limit: Duration,
) -> Result<CycleOutcome, CaptureError> {
    let audio = match handle.listen(timeout, phrase_limit) {
        Ok(audio) => audio,
        Err(CaptureError::ListenTimeout) => return Ok(CycleOutcome::NothingHeard),
        Err(err @ CaptureError::Device(_)) => return Err(err),
    };
    if !gate.accepts(&audio) {
        tracing::debug!(ms = audio.duration_ms(), "gate rejected captured buffer");
        return Ok(CycleOutcome::Rejected);
    }
    match recognizer.recognize(&audio) {
        Ok(text) => Ok(CycleOutcome::Recognized(text)),
        Err(RecognizeError::Unintelligible) => Ok(CycleOutcome::Unintelligible),
        Err(RecognizeError::ServiceUnavailable(msg)) => Ok(CycleOutcome::ServiceDown(msg)),
    }
}

/// Pure transition function: (mode, outcome) to (mode write, event).
///
/// A `None` mode write leaves the shared cell untouched so an external
/// answer-mode request landing mid-cycle is not clobbered by a cycle that
/// had no transition of its own.
fn advance(
    mode: ListenMode,
    outcome: CycleOutcome,
    config: &SessionConfig,
) -> (Option<ListenMode>, Option<ListenEvent>) {
    let home = config.home_mode();
    match mode {
        ListenMode::WakeWord => match outcome {
            CycleOutcome::Recognized(text) => {
                let lower = text.to_lowercase();
                match trailing_after_wake_word(&lower, &config.wake_word) {
                    Some(rest) if !rest.is_empty() => {
                        // Inline command: skip the separate command phase.
                        (None, Some(ListenEvent::CommandFinished(rest)))
                    }
                    Some(_) => (
                        Some(ListenMode::Command),
                        Some(ListenEvent::WakeWordDetected),
                    ),
                    None if config.emit_partial => {
                        (None, Some(ListenEvent::PartialRecognition(text)))
                    }
                    None => (None, None),
                }
            }
            CycleOutcome::ServiceDown(msg) => (None, Some(ListenEvent::Error(msg))),
            CycleOutcome::NothingHeard
            | CycleOutcome::Rejected
            | CycleOutcome::Unintelligible => (None, None),
        },
        // One command attempt per wake event: the return to the home mode is
        // unconditional, whichever branch fired.
        ListenMode::Command => {
            let event = match outcome {
                CycleOutcome::Recognized(text) => ListenEvent::CommandFinished(text),
                CycleOutcome::NothingHeard => ListenEvent::CommandTimeout,
                CycleOutcome::Rejected | CycleOutcome::Unintelligible => {
                    ListenEvent::CommandUnrecognized
                }
                CycleOutcome::ServiceDown(msg) => ListenEvent::Error(msg),
            };
            (Some(home), Some(event))
        }
        ListenMode::Answer => match outcome {
            CycleOutcome::Recognized(text) => {
                (Some(home), Some(ListenEvent::AnswerReceived(text)))
            }
            CycleOutcome::NothingHeard
            | CycleOutcome::Rejected
            | CycleOutcome::Unintelligible => {
                // Any failure to understand surfaces as a timeout; whether we
                // retry in place or fall back is a single policy knob.
                let next = if config.answer_retry { None } else { Some(home) };
                (next, Some(ListenEvent::AnswerTimeout))
            }
            CycleOutcome::ServiceDown(msg) => {
                let next = if config.answer_retry { None } else { Some(home) };
                (next, Some(ListenEvent::Error(msg)))
            }
        },
        ListenMode::ContinuousCommand => match outcome {
            CycleOutcome::Recognized(text) => (None, Some(ListenEvent::CommandFinished(text))),
            CycleOutcome::ServiceDown(msg) => (None, Some(ListenEvent::Error(msg))),
            CycleOutcome::NothingHeard
            | CycleOutcome::Rejected
            | CycleOutcome::Unintelligible => (None, None),
        },
    }
}

/// Substring wake-word match against lower-cased text. Returns the text
/// after the wake word (separators trimmed) when matched, `None` otherwise.
fn trailing_after_wake_word(lower_text: &str, wake_word: &str) -> Option<String> {
    if wake_word.is_empty() {
        return None;
    }
    let idx = lower_text.find(wake_word)?;
    let rest = &lower_text[idx + wake_word.len()..];
    Some(
        rest.trim_start_matches([' ', ',', '.', '!', '?', ':', ';'])
            .trim_end()
            .to_string(),
    )
}
