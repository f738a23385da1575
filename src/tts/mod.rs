//! Speech synthesis collaborator contract.

pub mod voicevox;

pub use voicevox::{VoicevoxClient, VoicevoxConfig};

use crate::error::{Result, TalkError};
use std::sync::{Arc, Mutex};

/// Trait for text-to-speech backends.
///
/// This trait allows swapping implementations (real VOICEVOX vs mock).
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes one sentence into encoded audio bytes.
    ///
    /// Empty input or empty output both mean "nothing to play" and are not
    /// errors.
    fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Implement SpeechSynthesizer for Arc<T> to allow sharing across threads.
impl<T: SpeechSynthesizer> SpeechSynthesizer for Arc<T> {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        (**self).synthesize(text)
    }
}

/// Mock synthesizer for testing.
///
/// Returns the sentence's own UTF-8 bytes as "audio", so tests can match
/// played bytes back to sentences. Individual sentences can be scripted to
/// fail, and a per-call delay simulates synthesis latency jitter.
#[derive(Clone, Default)]
pub struct MockSynthesizer {
    failing: Vec<String>,
    delay: Option<std::time::Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes synthesis of this exact sentence fail.
    pub fn with_failure_for(mut self, text: &str) -> Self {
        self.failing.push(text.to_string());
        self
    }

    /// Adds a fixed per-call delay.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sentences synthesized so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(text.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.iter().any(|f| f == text) {
            return Err(TalkError::TtsBackend {
                message: format!("mock synthesis failure for '{text}'"),
            });
        }
        Ok(text.as_bytes().to_vec())
    }
}
