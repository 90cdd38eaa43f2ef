//! State-machine integration tests driven by scripted capture and
//! recognition fakes; no audio hardware involved.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use voxloop::audio::filter::{FilterConfig, GateKind};
use voxloop::audio::TARGET_RATE;
use voxloop::{
    AudioBuffer, AudioSource, CaptureError, ListenEvent, ListenMode, ListeningSession,
    RecognizeError, Recognizer, SessionConfig, SourceHandle,
};

type ListenStep = Result<AudioBuffer, CaptureError>;

/// Capture fake: every `listen` pops one scripted step, or times out when
/// the script is exhausted.
struct ScriptedSource {
    steps: Receiver<ListenStep>,
    opens: Arc<AtomicUsize>,
    fail_open: bool,
}

impl ScriptedSource {
    fn new(fail_open: bool) -> (Arc<Self>, Sender<ListenStep>, Arc<AtomicUsize>) {
        let (tx, rx) = unbounded();
        let opens = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(Self {
            steps: rx,
            opens: opens.clone(),
            fail_open,
        });
        (source, tx, opens)
    }
}

impl AudioSource for ScriptedSource {
    fn open(&self) -> Result<Box<dyn SourceHandle>, CaptureError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CaptureError::Device("microphone unplugged".to_string()));
        }
        Ok(Box::new(ScriptedHandle {
            steps: self.steps.clone(),
        }))
    }
}

struct ScriptedHandle {
    steps: Receiver<ListenStep>,
}

impl SourceHandle for ScriptedHandle {
    fn calibrate(&mut self, _duration: Duration) -> Result<(), CaptureError> {
        Ok(())
    }

    fn listen(
        &mut self,
        timeout: Option<Duration>,
        _phrase_limit: Duration,
    ) -> Result<AudioBuffer, CaptureError> {
        // Honor the mode's onset timeout so answer-mode waits don't expire
        // underneath the tests; continuous mode polls in short slices.
        let wait = timeout.unwrap_or(Duration::from_millis(200));
        match self.steps.recv_timeout(wait) {
            Ok(step) => step,
            Err(_) => Err(CaptureError::ListenTimeout),
        }
    }
}

/// Recognition fake replaying a fixed reply script.
struct ScriptedRecognizer {
    replies: Mutex<VecDeque<Result<String, RecognizeError>>>,
}

impl ScriptedRecognizer {
    fn new<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<String, RecognizeError>>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
        })
    }
}

impl Recognizer for ScriptedRecognizer {
    fn recognize(&self, _audio: &AudioBuffer) -> Result<String, RecognizeError> {
        self.replies
            .lock()
            .expect("reply script lock")
            .pop_front()
            .unwrap_or(Err(RecognizeError::Unintelligible))
    }
}

fn speech(ms: usize) -> ListenStep {
    Ok(AudioBuffer::new(vec![0.5; 16 * ms], TARGET_RATE))
}

fn silence(ms: usize) -> ListenStep {
    Ok(AudioBuffer::new(vec![0.0; 16 * ms], TARGET_RATE))
}

fn test_config(use_wake_word: bool) -> SessionConfig {
    let mut config = if use_wake_word {
        SessionConfig::new("ava")
    } else {
        SessionConfig::continuous()
    };
    config.idle_pause = Duration::from_millis(1);
    config.calibration = Duration::from_millis(0);
    config.wake_timeout = Duration::from_millis(200);
    config.command_timeout = Duration::from_millis(300);
    config.filter = FilterConfig {
        engine: GateKind::Energy,
        aggressiveness: 2,
        frame_ms: 30,
        threshold_db: -80.0,
    };
    config
}

fn recv(events: &Receiver<ListenEvent>) -> ListenEvent {
    events
        .recv_timeout(Duration::from_secs(5))
        .expect("expected an event before timeout")
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn wake_word_then_command_flow() {
    let (source, steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([
        Ok("hey ava".to_string()),
        Ok("open the browser".to_string()),
    ]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    let events = session.events();

    session.start();
    steps.send(speech(100)).unwrap();
    steps.send(speech(100)).unwrap();

    assert_eq!(recv(&events), ListenEvent::WakeWordDetected);
    assert_eq!(
        recv(&events),
        ListenEvent::CommandFinished("open the browser".to_string())
    );
    session.stop();
}

#[test]
fn inline_command_skips_wake_event() {
    let (source, steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([Ok("hey ava turn on the lights".to_string())]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    let events = session.events();

    session.start();
    steps.send(speech(100)).unwrap();

    assert_eq!(
        recv(&events),
        ListenEvent::CommandFinished("turn on the lights".to_string())
    );
    session.stop();
}

#[test]
fn command_timeout_returns_to_wake_word() {
    let (source, steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([Ok("ava".to_string())]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    let events = session.events();

    session.start();
    steps.send(speech(100)).unwrap();
    // No further steps: the command capture times out.

    assert_eq!(recv(&events), ListenEvent::WakeWordDetected);
    assert_eq!(recv(&events), ListenEvent::CommandTimeout);
    assert!(wait_until(Duration::from_secs(2), || session.mode()
        == ListenMode::WakeWord));
    session.stop();
}

#[test]
fn answer_mode_roundtrip() {
    let (source, steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([Ok("forty two".to_string())]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    let events = session.events();

    session.start();
    std::thread::sleep(Duration::from_millis(50));
    session.request_answer_mode();
    // Let any wake-mode listen that was already in flight drain first so the
    // scripted buffer is consumed by the answer cycle.
    std::thread::sleep(Duration::from_millis(300));
    steps.send(speech(100)).unwrap();

    assert_eq!(
        recv(&events),
        ListenEvent::AnswerReceived("forty two".to_string())
    );
    assert!(wait_until(Duration::from_secs(2), || session.mode()
        == ListenMode::WakeWord));
    session.stop();
}

#[test]
fn answer_mode_is_refused_for_continuous_sessions() {
    let (source, _steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([]);
    let session = ListeningSession::new(test_config(false), source, recognizer);
    session.request_answer_mode();
    assert_eq!(session.mode(), ListenMode::ContinuousCommand);
}

#[test]
fn continuous_session_survives_service_errors() {
    let (source, steps, _) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([
        Err(RecognizeError::ServiceUnavailable("offline".to_string())),
        Ok("play music".to_string()),
    ]);
    let mut session = ListeningSession::new(test_config(false), source, recognizer);
    let events = session.events();

    session.start();
    steps.send(speech(100)).unwrap();
    steps.send(speech(100)).unwrap();

    assert_eq!(recv(&events), ListenEvent::Error("offline".to_string()));
    assert_eq!(
        recv(&events),
        ListenEvent::CommandFinished("play music".to_string())
    );
    assert_eq!(session.mode(), ListenMode::ContinuousCommand);
    session.stop();
}

#[test]
fn gate_rejection_consumes_no_recognition() {
    let (source, steps, _) = ScriptedSource::new(false);
    // One reply only: if the silent buffer reached the recognizer, the
    // spoken command below would miss its reply.
    let recognizer = ScriptedRecognizer::new([Ok("play music".to_string())]);
    let mut session = ListeningSession::new(test_config(false), source, recognizer);
    let events = session.events();

    session.start();
    steps.send(silence(100)).unwrap();
    steps.send(speech(100)).unwrap();

    assert_eq!(
        recv(&events),
        ListenEvent::CommandFinished("play music".to_string())
    );
    session.stop();
}

#[test]
fn start_is_idempotent_while_listening() {
    let (source, _steps, opens) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);

    session.start();
    session.start();
    assert!(session.is_listening());
    assert!(wait_until(Duration::from_secs(2), || opens
        .load(Ordering::SeqCst)
        == 1));
    session.stop();
    assert!(!session.is_listening());

    // A fresh start after a completed stop opens the source again.
    session.start();
    assert!(wait_until(Duration::from_secs(2), || opens
        .load(Ordering::SeqCst)
        == 2));
    session.stop();
}

#[test]
fn stop_without_start_is_a_noop() {
    let (source, _steps, opens) = ScriptedSource::new(false);
    let recognizer = ScriptedRecognizer::new([]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    session.stop();
    assert!(!session.is_listening());
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}

#[test]
fn device_failure_settles_the_session() {
    let (source, _steps, _) = ScriptedSource::new(true);
    let recognizer = ScriptedRecognizer::new([]);
    let mut session = ListeningSession::new(test_config(true), source, recognizer);
    let events = session.events();

    session.start();
    match recv(&events) {
        ListenEvent::Error(message) => assert!(message.contains("microphone unplugged")),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(wait_until(Duration::from_secs(2), || !session.is_listening()));
}
