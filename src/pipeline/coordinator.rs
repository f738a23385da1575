//! Pipeline coordinator: three persistent workers joined by FIFO queues.
//!
//! Stage layout mirrors the data flow: user text enters the generation
//! queue, the generation worker streams model fragments and cuts them into
//! sentences, the synthesis worker turns sentences into audio, and the
//! playback queue plays them in order. Each worker is single-threaded and
//! owns its stage's state, so no stage needs a lock.
//!
//! Shutdown runs front-to-back: `close` injects a stop marker into the
//! generation queue only, and the generation worker forwards one into the
//! synthesis queue when it exits. Exactly one authority injects the marker
//! per queue, so a marker can never overtake work from an in-flight turn.

use crate::audio::{AudioPlayer, PlaybackBackend, PlaybackItem};
use crate::history::ConversationHistory;
use crate::llm::LanguageModel;
use crate::pipeline::report::PipelineObserver;
use crate::segment::{JAPANESE_TERMINATORS, SentenceSegmenter};
use crate::tts::SpeechSynthesizer;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work unit for the generation stage.
enum GenerationInput {
    UserText(String),
    Stop,
}

/// Work unit for the synthesis stage.
enum SynthesisInput {
    Sentence(String),
    Stop,
}

/// Pipeline-level settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// System prompt seeding the conversation. Blank disables it.
    pub system_prompt: String,
    /// Sentence-terminal markers used to cut the model stream.
    pub sentence_terminators: Vec<char>,
    /// Upper bound on waiting for workers during `close`.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: "あなたは音声対話アシスタントです。短い話し言葉の日本語で答えてください。".to_string(),
            sentence_terminators: JAPANESE_TERMINATORS.to_vec(),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// The full speaking pipeline. `push_user_text` is the only input; audio
/// comes out of the playback backend as a side effect.
pub struct TalkPipeline {
    generation_tx: Sender<GenerationInput>,
    closed: AtomicBool,
    generation_worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    synthesis_worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    player: Arc<AudioPlayer>,
    shutdown_timeout: Duration,
    observer: Arc<dyn PipelineObserver>,
}

impl TalkPipeline {
    /// Wires up the queues and spawns the generation, synthesis and playback
    /// workers. The pipeline accepts input immediately.
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        backend: Box<dyn PlaybackBackend>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        if let Some(info) = model.server_info() {
            if info.reachable {
                eprintln!("talkpipe: model server {}", info.summary());
            } else {
                eprintln!("talkpipe: model server unreachable; replies will fail until it is up");
            }
        }

        let (generation_tx, generation_rx) = unbounded::<GenerationInput>();
        let (synthesis_tx, synthesis_rx) = unbounded::<SynthesisInput>();

        let player = Arc::new(AudioPlayer::new(backend, observer.clone()));

        let synthesis_worker = {
            let player = player.clone();
            let observer = observer.clone();
            thread::spawn(move || {
                run_synthesis_worker(synthesis_rx, synthesizer, player, observer);
            })
        };

        let generation_worker = {
            let observer = observer.clone();
            let history = ConversationHistory::with_system(&config.system_prompt);
            let terminators = config.sentence_terminators.clone();
            thread::spawn(move || {
                run_generation_worker(
                    generation_rx,
                    synthesis_tx,
                    model,
                    history,
                    terminators,
                    observer,
                );
            })
        };

        Self {
            generation_tx,
            closed: AtomicBool::new(false),
            generation_worker: std::sync::Mutex::new(Some(generation_worker)),
            synthesis_worker: std::sync::Mutex::new(Some(synthesis_worker)),
            player,
            shutdown_timeout: config.shutdown_timeout,
            observer,
        }
    }

    /// Submits one user utterance. Returns immediately; generation,
    /// synthesis and playback proceed in the background. Blank input and
    /// input after `close` are ignored.
    pub fn push_user_text(&self, text: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.observer.start_round(text);
        let _ = self
            .generation_tx
            .send(GenerationInput::UserText(text.to_string()));
    }

    /// Shuts the pipeline down. Idempotent. Work already queued ahead of the
    /// stop marker drains through generation and synthesis; audio still
    /// queued at the player is discarded after the current item.
    ///
    /// Waits up to the configured shutdown timeout per stage; a worker that
    /// misses its deadline is detached rather than blocked on.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop marker enters at the front; the generation worker forwards it.
        let _ = self.generation_tx.send(GenerationInput::Stop);

        join_worker(
            &self.generation_worker,
            self.shutdown_timeout,
            "generation",
        );
        join_worker(&self.synthesis_worker, self.shutdown_timeout, "synthesis");

        self.player.stop();
        self.player.join(self.shutdown_timeout);
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for TalkPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Polls a worker handle until it finishes or the deadline passes, then
/// joins it. A worker past its deadline is detached and dies with the
/// process. Returns `false` on detach.
fn join_worker(
    slot: &std::sync::Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
    name: &str,
) -> bool {
    let Some(handle) = slot.lock().expect("pipeline lock poisoned").take() else {
        return true;
    };

    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(10);
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            eprintln!("talkpipe: {name} worker still running at shutdown, detaching");
            return false;
        }
        thread::sleep(poll_interval);
    }

    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        eprintln!("talkpipe: {name} worker panicked: {msg}");
    }
    true
}

/// Generation worker: one turn at a time, history owned exclusively here.
///
/// A turn streams fragments, cuts sentences as they complete and hands each
/// to synthesis immediately. Turn failures are contained: the history rolls
/// back (or keeps only what was actually spoken) and the worker waits for
/// the next utterance.
fn run_generation_worker(
    rx: Receiver<GenerationInput>,
    synthesis_tx: Sender<SynthesisInput>,
    model: Arc<dyn LanguageModel>,
    mut history: ConversationHistory,
    terminators: Vec<char>,
    observer: Arc<dyn PipelineObserver>,
) {
    // Channel disconnect (pipeline dropped) winds the worker down the same
    // way a stop marker does.
    loop {
        let text = match rx.recv() {
            Ok(GenerationInput::UserText(text)) => text,
            Ok(GenerationInput::Stop) | Err(_) => break,
        };
        run_turn(
            &text,
            &synthesis_tx,
            &model,
            &mut history,
            &terminators,
            &observer,
        );
    }
    // Forward the stop marker; synthesis work queued ahead of it drains
    // first. If the synthesis worker is already gone this is a no-op.
    let _ = synthesis_tx.send(SynthesisInput::Stop);
}

fn run_turn(
    text: &str,
    synthesis_tx: &Sender<SynthesisInput>,
    model: &Arc<dyn LanguageModel>,
    history: &mut ConversationHistory,
    terminators: &[char],
    observer: &Arc<dyn PipelineObserver>,
) {
    history.begin_turn(text);

    let stream = match model.stream_reply(history.messages()) {
        Ok(stream) => stream,
        Err(e) => {
            observer.error("llm", &e);
            history.rollback_last_user();
            return;
        }
    };

    let mut segmenter = SentenceSegmenter::with_terminators(terminators.iter().copied());
    // Only sentences actually handed to synthesis count as spoken; the
    // history must match what the user heard.
    let mut spoken = String::new();
    let mut failed = false;

    for item in stream {
        match item {
            Ok(fragment) => {
                for sentence in segmenter.feed(&fragment) {
                    observer.llm_sentence(&sentence);
                    spoken.push_str(&sentence);
                    let _ = synthesis_tx.send(SynthesisInput::Sentence(sentence));
                }
            }
            Err(e) => {
                observer.error("llm", &e);
                failed = true;
                break;
            }
        }
    }

    if !failed {
        let remainder = segmenter.flush();
        if !remainder.is_empty() {
            observer.llm_sentence(&remainder);
            spoken.push_str(&remainder);
            let _ = synthesis_tx.send(SynthesisInput::Sentence(remainder));
        }
    }

    if spoken.is_empty() {
        // Nothing reached the user; pretend the turn never happened.
        history.rollback_last_user();
    } else {
        history.commit_assistant(&spoken);
    }
}

/// Synthesis worker: sentence in, audio out, strictly in arrival order.
/// Per-sentence failures are reported and skipped so one bad sentence does
/// not silence the rest of the reply.
fn run_synthesis_worker(
    rx: Receiver<SynthesisInput>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<AudioPlayer>,
    observer: Arc<dyn PipelineObserver>,
) {
    loop {
        let sentence = match rx.recv() {
            Ok(SynthesisInput::Sentence(sentence)) => sentence,
            Ok(SynthesisInput::Stop) | Err(_) => break,
        };
        match synthesizer.synthesize(&sentence) {
            Ok(wav) if wav.is_empty() => {
                // Nothing to play for this sentence.
            }
            Ok(wav) => {
                observer.tts_ready(&sentence, wav.len());
                player.enqueue(PlaybackItem {
                    wav,
                    text: sentence,
                });
            }
            Err(e) => {
                observer.error("tts", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CapturingBackend;
    use crate::llm::MockLanguageModel;
    use crate::pipeline::report::{ObserverEvent, RecordingObserver};
    use crate::tts::MockSynthesizer;

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            system_prompt: "sys".to_string(),
            ..Default::default()
        }
    }

    fn build(
        model: MockLanguageModel,
        synthesizer: MockSynthesizer,
        backend: CapturingBackend,
        observer: Arc<RecordingObserver>,
    ) -> TalkPipeline {
        TalkPipeline::new(
            test_config(),
            Arc::new(model),
            Arc::new(synthesizer),
            Box::new(backend),
            observer,
        )
    }

    #[test]
    fn test_turn_streams_sentences_through_to_playback() {
        let model = MockLanguageModel::new().with_fragments(["こんにち", "は。元気", "？まだ"]);
        let backend = CapturingBackend::new();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(
            model,
            MockSynthesizer::new(),
            backend.clone(),
            observer.clone(),
        );

        pipeline.push_user_text("やあ");

        assert!(wait_until(Duration::from_secs(2), || {
            backend.played().len() == 3
        }));
        // Trailing remainder becomes the final sentence.
        assert_eq!(backend.played_texts(), vec!["こんにちは。", "元気？", "まだ"]);
        assert_eq!(observer.sentences(), vec!["こんにちは。", "元気？", "まだ"]);

        pipeline.close();
    }

    #[test]
    fn test_committed_history_is_what_was_spoken() {
        let model = MockLanguageModel::new().with_fragments(["一。二。"]);
        let pipeline = build(
            model.clone(),
            MockSynthesizer::new(),
            CapturingBackend::new(),
            Arc::new(RecordingObserver::new()),
        );

        pipeline.push_user_text("q1");
        pipeline.push_user_text("q2");
        pipeline.close();

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        // Second call sees sys, q1, assistant reply, q2.
        let roles: Vec<String> = calls[1].iter().map(|m| format!("{:?}", m.role)).collect();
        assert_eq!(roles, vec!["System", "User", "Assistant", "User"]);
        assert_eq!(calls[1][2].content, "一。二。");
    }

    #[test]
    fn test_request_failure_rolls_back_turn() {
        let model = MockLanguageModel::new().with_request_failure();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(
            model.clone(),
            MockSynthesizer::new(),
            CapturingBackend::new(),
            observer.clone(),
        );

        pipeline.push_user_text("first");
        pipeline.push_user_text("second");
        pipeline.close();

        assert_eq!(observer.error_scopes(), vec!["llm", "llm"]);
        // The rolled-back first turn leaves no trace in the second prompt.
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 2); // sys + "second" only
        assert_eq!(calls[1][1].content, "second");
    }

    #[test]
    fn test_mid_stream_failure_keeps_spoken_prefix() {
        // Two fragments succeed ("ほい。" completes a sentence), then the
        // stream dies. What was spoken stays in history.
        let model = MockLanguageModel::new()
            .with_fragments(["ほい。", "つづき", "まだまだ"])
            .with_failure_after(1);
        let backend = CapturingBackend::new();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(
            model.clone(),
            MockSynthesizer::new(),
            backend.clone(),
            observer.clone(),
        );

        pipeline.push_user_text("q1");
        assert!(wait_until(Duration::from_secs(2), || {
            !backend.played().is_empty()
        }));
        pipeline.push_user_text("q2");
        assert!(wait_until(Duration::from_secs(2), || {
            backend.played().len() == 2
        }));
        pipeline.close();

        assert_eq!(backend.played_texts(), vec!["ほい。", "ほい。"]);
        assert_eq!(observer.error_scopes(), vec!["llm", "llm"]);

        let calls = model.calls();
        // Second prompt keeps the partial assistant reply.
        let roles: Vec<String> = calls[1].iter().map(|m| format!("{:?}", m.role)).collect();
        assert_eq!(roles, vec!["System", "User", "Assistant", "User"]);
        assert_eq!(calls[1][2].content, "ほい。");
    }

    #[test]
    fn test_synthesis_failure_skips_sentence_only() {
        let model = MockLanguageModel::new().with_fragments(["甲。乙。丙。"]);
        let synthesizer = MockSynthesizer::new().with_failure_for("乙。");
        let backend = CapturingBackend::new();
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(model, synthesizer, backend.clone(), observer.clone());

        pipeline.push_user_text("q");
        assert!(wait_until(Duration::from_secs(2), || {
            backend.played().len() == 2
        }));
        pipeline.close();

        assert_eq!(backend.played_texts(), vec!["甲。", "丙。"]);
        assert_eq!(observer.error_scopes(), vec!["tts"]);
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let model = MockLanguageModel::new().with_fragments(["x。"]);
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(
            model.clone(),
            MockSynthesizer::new(),
            CapturingBackend::new(),
            observer.clone(),
        );

        pipeline.push_user_text("   ");
        pipeline.push_user_text("");
        pipeline.close();

        assert!(model.calls().is_empty());
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_input() {
        let model = MockLanguageModel::new().with_fragments(["x。"]);
        let pipeline = build(
            model.clone(),
            MockSynthesizer::new(),
            CapturingBackend::new(),
            Arc::new(RecordingObserver::new()),
        );

        pipeline.close();
        pipeline.close();
        assert!(pipeline.is_closed());

        pipeline.push_user_text("late");
        assert!(model.calls().is_empty());
    }

    #[test]
    fn test_close_drains_queued_turn_before_stopping() {
        // The turn is queued before close; the stop marker sits behind it,
        // so generation and synthesis still run for it.
        let model = MockLanguageModel::new().with_fragments(["お先。"]);
        let synthesizer = MockSynthesizer::new();
        let pipeline = build(
            model,
            synthesizer.clone(),
            CapturingBackend::new(),
            Arc::new(RecordingObserver::new()),
        );

        pipeline.push_user_text("q");
        pipeline.close();

        assert_eq!(synthesizer.calls(), vec!["お先。"]);
    }

    #[test]
    fn test_tts_ready_reports_audio_size() {
        let model = MockLanguageModel::new().with_fragments(["や。"]);
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = build(
            model,
            MockSynthesizer::new(),
            CapturingBackend::new(),
            observer.clone(),
        );

        pipeline.push_user_text("q");
        pipeline.close();

        let ready: Vec<(String, usize)> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::TtsReady { text, byte_len } => Some((text, byte_len)),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![("や。".to_string(), "や。".len())]);
    }

    #[test]
    fn test_drop_without_close_shuts_down() {
        let backend = CapturingBackend::new();
        {
            let model = MockLanguageModel::new().with_fragments(["済。"]);
            let pipeline = build(
                model,
                MockSynthesizer::new(),
                backend.clone(),
                Arc::new(RecordingObserver::new()),
            );
            pipeline.push_user_text("q");
            assert!(wait_until(Duration::from_secs(2), || {
                !backend.played().is_empty()
            }));
            // Drop runs close() for the rest of the teardown.
        }
        assert_eq!(backend.played_texts(), vec!["済。"]);
    }
}
