//! Single-consumer playback queue.
//!
//! Synthesized audio arrives with jittery latency; this queue serializes
//! playback on one dedicated thread so items always play in submission order.

use crate::audio::PlaybackBackend;
use crate::pipeline::report::PipelineObserver;
use crossbeam_channel::{Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One unit of playable audio. Ownership transfers to the queue on enqueue.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    /// Encoded audio (WAV) bytes.
    pub wav: Vec<u8>,
    /// The sentence this audio speaks, carried for observer callbacks.
    pub text: String,
}

enum PlayerCommand {
    Item(PlaybackItem),
    Stop,
}

/// FIFO playback queue with its own worker thread.
///
/// `enqueue` never blocks. `stop` is idempotent and cooperative: the item
/// currently playing finishes, items still queued are discarded. Enqueues
/// racing with `stop` are best-effort and may be dropped silently.
pub struct AudioPlayer {
    tx: Sender<PlayerCommand>,
    stopping: Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    /// Spawns the playback worker. The observer's `play_start` fires before
    /// each item begins playing.
    pub fn new(mut backend: Box<dyn PlaybackBackend>, observer: Arc<dyn PipelineObserver>) -> Self {
        let (tx, rx) = unbounded::<PlayerCommand>();
        let stopping = Arc::new(AtomicBool::new(false));

        let worker_stopping = stopping.clone();
        let worker = thread::spawn(move || {
            // rx.iter() ends when every sender is dropped, so an AudioPlayer
            // dropped without stop() still winds the worker down.
            for command in rx.iter() {
                match command {
                    PlayerCommand::Stop => break,
                    PlayerCommand::Item(item) => {
                        if worker_stopping.load(Ordering::SeqCst) {
                            // Queued behind a stop: discard.
                            continue;
                        }
                        observer.play_start(&item.text);
                        if let Err(e) = backend.play(&item.wav) {
                            // One bad item must not stall the queue.
                            observer.error("play", &e);
                        }
                    }
                }
            }
        });

        Self {
            tx,
            stopping,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    /// Appends an item to the tail. Never blocks; after `stop` this is a
    /// best-effort no-op.
    pub fn enqueue(&self, item: PlaybackItem) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(PlayerCommand::Item(item));
    }

    /// Signals the worker to exit after its current item. Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(PlayerCommand::Stop);
    }

    /// Waits for the worker to exit, up to `timeout`. Returns `false` if the
    /// deadline passed with the worker still running (it is then detached
    /// and dies with the process).
    pub fn join(&self, timeout: Duration) -> bool {
        let Some(handle) = self.worker.lock().expect("player lock poisoned").take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        let poll_interval = Duration::from_millis(10);
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                eprintln!("talkpipe: playback worker still running at shutdown, detaching");
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
            eprintln!("talkpipe: playback worker panicked: {msg}");
        }
        true
    }

    /// Returns true if `stop` has been called.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}
