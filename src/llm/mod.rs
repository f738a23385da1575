//! Language model collaborator contract.

pub mod ollama;

pub use ollama::{OllamaClient, OllamaConfig};

use crate::error::{Result, TalkError};
use crate::history::Message;
use std::sync::{Arc, Mutex};

/// A lazy stream of reply fragments. Fragments carry no sentence-boundary
/// guarantee; a network failure mid-stream surfaces as an `Err` item.
pub type FragmentStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Diagnostic snapshot of the model server, collected purely for logging.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub reachable: bool,
    pub version: Option<String>,
    pub models: Vec<String>,
}

impl ServerInfo {
    /// One-line summary for startup logging, e.g.
    /// `version=0.5.7 models=llama3.1, qwen2 ... (+4 more)`.
    pub fn summary(&self) -> String {
        let version = self.version.as_deref().unwrap_or("(unknown)");
        if self.models.is_empty() {
            return format!("version={version} models=(none listed)");
        }
        let mut listed = self.models.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        if self.models.len() > 3 {
            listed.push_str(&format!(" ... (+{} more)", self.models.len() - 3));
        }
        format!("version={version} models={listed}")
    }
}

/// Trait for streaming language model backends.
///
/// This trait allows swapping implementations (real Ollama vs mock).
pub trait LanguageModel: Send + Sync {
    /// Starts a streaming reply for the given conversation context.
    ///
    /// The history is the complete ordered prompt; the implementation must
    /// not reorder it. Errors may surface either here (request setup) or as
    /// stream items (mid-stream failure).
    fn stream_reply(&self, history: &[Message]) -> Result<FragmentStream>;

    /// Best-effort server diagnostics; `None` when the backend has nothing
    /// to report. Must never block for long and must never fail.
    fn server_info(&self) -> Option<ServerInfo> {
        None
    }
}

/// Implement LanguageModel for Arc<T> to allow sharing across threads.
impl<T: LanguageModel> LanguageModel for Arc<T> {
    fn stream_reply(&self, history: &[Message]) -> Result<FragmentStream> {
        (**self).stream_reply(history)
    }

    fn server_info(&self) -> Option<ServerInfo> {
        (**self).server_info()
    }
}

/// Mock language model for testing.
///
/// Replays a scripted fragment sequence, optionally failing before the
/// stream starts or after a given number of fragments. Records every history
/// snapshot it was called with.
#[derive(Clone)]
pub struct MockLanguageModel {
    fragments: Vec<String>,
    fail_on_request: bool,
    fail_after: Option<usize>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            fail_on_request: false,
            fail_after: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Scripts the fragments returned by every stream.
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = fragments.into_iter().map(Into::into).collect();
        self
    }

    /// Makes `stream_reply` itself fail, before any fragment is produced.
    pub fn with_request_failure(mut self) -> Self {
        self.fail_on_request = true;
        self
    }

    /// Makes the stream yield an error after `n` successful fragments.
    pub fn with_failure_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// History snapshots passed to `stream_reply`, in call order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageModel for MockLanguageModel {
    fn stream_reply(&self, history: &[Message]) -> Result<FragmentStream> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(history.to_vec());

        if self.fail_on_request {
            return Err(TalkError::LlmBackend {
                message: "mock request failure".to_string(),
            });
        }

        let fail_after = self.fail_after;
        let fragments = self.fragments.clone();
        let iter = fragments
            .into_iter()
            .map(Ok)
            .enumerate()
            .map(move |(i, item)| {
                if fail_after.is_some_and(|n| i >= n) {
                    Err(TalkError::LlmBackend {
                        message: "mock stream failure".to_string(),
                    })
                } else {
                    item
                }
            });
        Ok(Box::new(iter))
    }
}
