//! Capture adapter seam.
//!
//! The listening session only ever talks to these traits. The production
//! implementation is [`super::MicSource`]; tests inject scripted fakes.

use super::AudioBuffer;
use std::time::Duration;
use thiserror::Error;

/// Capture failures. `ListenTimeout` is an expected outcome that drives
/// mode-specific events; `Device` is fatal to the listening session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no speech captured within the listen window")]
    ListenTimeout,
    #[error("audio device failure: {0}")]
    Device(String),
}

/// Factory for capture handles. Shared across threads; the session opens one
/// handle per background run.
pub trait AudioSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn SourceHandle>, CaptureError>;
}

/// An acquired capture device. Owned exclusively by the background listen
/// thread; dropping it must release the device on every exit path.
pub trait SourceHandle {
    /// Sample ambient noise once so `listen` can tell speech from room tone.
    fn calibrate(&mut self, duration: Duration) -> Result<(), CaptureError>;

    /// Block until speech-like audio is captured or `timeout` elapses.
    ///
    /// `timeout` bounds the wait for speech onset (`None` waits
    /// indefinitely); `phrase_limit` bounds the captured phrase itself.
    /// Fails with [`CaptureError::ListenTimeout`] when no audio arrives in
    /// time.
    fn listen(
        &mut self,
        timeout: Option<Duration>,
        phrase_limit: Duration,
    ) -> Result<AudioBuffer, CaptureError>;
}
