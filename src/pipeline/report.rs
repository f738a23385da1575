//! Pipeline observation and latency reporting.
//!
//! Observers are fire-and-forget: every callback must return quickly and
//! never block the worker that invoked it.

use crate::error::TalkError;
use owo_colors::OwoColorize;
use std::sync::Mutex;
use std::time::Instant;

/// Observer notified at the pipeline's latency-relevant moments.
///
/// Default implementations are no-ops, so observers implement only what
/// they care about. Purely observational; no control-flow effect.
pub trait PipelineObserver: Send + Sync {
    /// A new round started with this user prompt.
    fn start_round(&self, _prompt: &str) {}
    /// The model completed a sentence (segmenter output).
    fn llm_sentence(&self, _text: &str) {}
    /// Synthesis produced audio for a sentence.
    fn tts_ready(&self, _text: &str, _byte_len: usize) {}
    /// Playback of a sentence is about to begin.
    fn play_start(&self, _text: &str) {}
    /// A recoverable error occurred in the named stage.
    fn error(&self, _scope: &str, _error: &TalkError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl PipelineObserver for NullObserver {}

#[derive(Debug, Default)]
struct RoundTimes {
    started: Option<Instant>,
    first_sentence: bool,
    first_audio: bool,
    first_play: bool,
}

/// Console reporter: colorized per-stage log lines plus time-to-first
/// milestones (first sentence, first audio ready, first playback) measured
/// from round start.
pub struct ConsoleReporter {
    round: Mutex<RoundTimes>,
    color: bool,
    quiet: bool,
}

enum Tag {
    Info,
    Llm,
    Tts,
    Play,
    Err,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            round: Mutex::new(RoundTimes::default()),
            color: std::env::var_os("NO_COLOR").is_none(),
            quiet: false,
        }
    }

    /// Suppresses everything except errors.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color && std::env::var_os("NO_COLOR").is_none();
        self
    }

    fn elapsed_ms(&self) -> Option<u128> {
        self.round
            .lock()
            .ok()
            .and_then(|r| r.started)
            .map(|t0| t0.elapsed().as_millis())
    }

    fn log(&self, tag: Tag, msg: &str) {
        if self.quiet && !matches!(tag, Tag::Err) {
            return;
        }
        let elapsed = self
            .elapsed_ms()
            .map(|ms| format!(" +{ms}ms"))
            .unwrap_or_default();
        let label = match tag {
            Tag::Info => "INFO",
            Tag::Llm => "LLM",
            Tag::Tts => "TTS",
            Tag::Play => "PLAY",
            Tag::Err => "ERR",
        };
        let line = format!("[{label}{elapsed}] {msg}");
        if self.color {
            match tag {
                Tag::Info => println!("{}", line.cyan()),
                Tag::Llm => println!("{}", line.magenta()),
                Tag::Tts => println!("{}", line.yellow()),
                Tag::Play => println!("{}", line.green()),
                Tag::Err => eprintln!("{}", line.red()),
            }
        } else if matches!(tag, Tag::Err) {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates to a display-safe prefix on a character boundary.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

impl PipelineObserver for ConsoleReporter {
    fn start_round(&self, prompt: &str) {
        if let Ok(mut round) = self.round.lock() {
            *round = RoundTimes {
                started: Some(Instant::now()),
                ..Default::default()
            };
        }
        self.log(Tag::Info, &format!("PROMPT: {prompt}"));
    }

    fn llm_sentence(&self, text: &str) {
        let first = self
            .round
            .lock()
            .map(|mut r| !std::mem::replace(&mut r.first_sentence, true))
            .unwrap_or(false);
        if first && let Some(ms) = self.elapsed_ms() {
            self.log(Tag::Llm, &format!("first_sentence {ms} ms"));
        }
        self.log(Tag::Llm, text);
    }

    fn tts_ready(&self, text: &str, byte_len: usize) {
        let first = self
            .round
            .lock()
            .map(|mut r| !std::mem::replace(&mut r.first_audio, true))
            .unwrap_or(false);
        if first && let Some(ms) = self.elapsed_ms() {
            self.log(Tag::Tts, &format!("first_audio_ready {ms} ms"));
        }
        self.log(
            Tag::Tts,
            &format!("queued bytes={byte_len} text='{}'", preview(text, 24)),
        );
    }

    fn play_start(&self, text: &str) {
        let first = self
            .round
            .lock()
            .map(|mut r| !std::mem::replace(&mut r.first_play, true))
            .unwrap_or(false);
        if first && let Some(ms) = self.elapsed_ms() {
            self.log(Tag::Play, &format!("first_play {ms} ms"));
        }
        self.log(Tag::Play, &format!("start '{}'", preview(text, 24)));
    }

    fn error(&self, scope: &str, error: &TalkError) {
        self.log(Tag::Err, &format!("{scope}: {error}"));
    }
}

/// Event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    RoundStarted(String),
    Sentence(String),
    TtsReady { text: String, byte_len: usize },
    PlayStart(String),
    Error { scope: String, message: String },
}

/// Observer that records every callback, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().expect("observer lock poisoned").clone()
    }

    /// Sentences reported via `llm_sentence`, in order.
    pub fn sentences(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Sentence(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Scopes of reported errors, in order.
    pub fn error_scopes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Error { scope, .. } => Some(scope),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObserverEvent) {
        self.events
            .lock()
            .expect("observer lock poisoned")
            .push(event);
    }
}

impl PipelineObserver for RecordingObserver {
    fn start_round(&self, prompt: &str) {
        self.push(ObserverEvent::RoundStarted(prompt.to_string()));
    }

    fn llm_sentence(&self, text: &str) {
        self.push(ObserverEvent::Sentence(text.to_string()));
    }

    fn tts_ready(&self, text: &str, byte_len: usize) {
        self.push(ObserverEvent::TtsReady {
            text: text.to_string(),
            byte_len,
        });
    }

    fn play_start(&self, text: &str) {
        self.push(ObserverEvent::PlayStart(text.to_string()));
    }

    fn error(&self, scope: &str, error: &TalkError) {
        self.push(ObserverEvent::Error {
            scope: scope.to_string(),
            message: error.to_string(),
        });
    }
}
