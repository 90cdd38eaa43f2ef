pub mod audio;
pub mod config;
mod lock;
pub mod recognize;
pub mod session;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use telemetry::init_tracing;

pub use audio::{AudioBuffer, AudioSource, CaptureError, MicSource, SourceHandle};
pub use recognize::{RecognizeError, Recognizer, WhisperRecognizer};
pub use session::{EventSink, ListenEvent, ListenMode, ListeningSession, SessionConfig};
