//! Audio playback: backend contract and the serializing playback queue.

pub mod player;
#[cfg(feature = "playback")]
pub mod rodio_backend;

pub use player::{AudioPlayer, PlaybackItem};
#[cfg(feature = "playback")]
pub use rodio_backend::RodioBackend;

use crate::error::{Result, TalkError};
use std::sync::{Arc, Mutex};

/// Trait for audio output devices.
///
/// `play` is synchronous: it returns once the audio has finished (or failed).
/// The playback queue relies on that to serialize items.
pub trait PlaybackBackend: Send + 'static {
    fn play(&mut self, wav: &[u8]) -> Result<()>;
}

/// Backend that records every payload it is asked to play. Used in tests to
/// assert playback order and in headless runs to swallow audio.
#[derive(Clone, Default)]
pub struct CapturingBackend {
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_on: Vec<Vec<u8>>,
    delay: Option<std::time::Duration>,
}

impl CapturingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes playback of this exact payload fail.
    pub fn with_failure_for(mut self, wav: &[u8]) -> Self {
        self.fail_on.push(wav.to_vec());
        self
    }

    /// Adds a fixed per-item playback duration.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Payloads played so far, in playback order.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().expect("backend lock poisoned").clone()
    }

    /// Played payloads reinterpreted as UTF-8, for tests that use text bytes
    /// as stand-in audio.
    pub fn played_texts(&self) -> Vec<String> {
        self.played()
            .into_iter()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .collect()
    }
}

impl PlaybackBackend for CapturingBackend {
    fn play(&mut self, wav: &[u8]) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on.iter().any(|f| f == wav) {
            return Err(TalkError::Playback {
                message: "mock playback failure".to_string(),
            });
        }
        self.played
            .lock()
            .expect("backend lock poisoned")
            .push(wav.to_vec());
        Ok(())
    }
}

/// Backend that drops all audio. For builds without the `playback` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardBackend;

impl PlaybackBackend for DiscardBackend {
    fn play(&mut self, _wav: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_backend_records_in_order() {
        let mut backend = CapturingBackend::new();
        backend.play(b"one").unwrap();
        backend.play(b"two").unwrap();
        assert_eq!(backend.played_texts(), vec!["one", "two"]);
    }

    #[test]
    fn test_capturing_backend_scripted_failure() {
        let mut backend = CapturingBackend::new().with_failure_for(b"bad");
        assert!(backend.play(b"good").is_ok());
        assert!(backend.play(b"bad").is_err());
        assert_eq!(backend.played_texts(), vec!["good"]);
    }

    #[test]
    fn test_discard_backend_accepts_anything() {
        let mut backend = DiscardBackend;
        assert!(backend.play(&[]).is_ok());
        assert!(backend.play(&[1, 2, 3]).is_ok());
    }
}
