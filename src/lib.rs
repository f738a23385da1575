//! talkpipe: low-latency spoken replies from a streaming language model.
//!
//! Text goes in, speech comes out. The model's reply streams in fragments;
//! each sentence is synthesized and played the moment it completes, so the
//! first audio starts long before the full reply exists. Three persistent
//! workers (generation, synthesis, playback) are joined by FIFO queues, and
//! every stage preserves sentence order end to end.
//!
//! ```no_run
//! use std::sync::Arc;
//! use talkpipe::audio::DiscardBackend;
//! use talkpipe::llm::{OllamaClient, OllamaConfig};
//! use talkpipe::pipeline::{NullObserver, PipelineConfig, TalkPipeline};
//! use talkpipe::tts::{VoicevoxClient, VoicevoxConfig};
//!
//! # fn main() -> talkpipe::Result<()> {
//! let pipeline = TalkPipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(OllamaClient::new(OllamaConfig::default())?),
//!     Arc::new(VoicevoxClient::new(VoicevoxConfig::default())?),
//!     Box::new(DiscardBackend),
//!     Arc::new(NullObserver),
//! );
//! pipeline.push_user_text("こんにちは");
//! pipeline.close();
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod segment;
pub mod tts;

pub use config::Config;
pub use error::{Result, TalkError};
pub use history::{ConversationHistory, Message, Role};
pub use pipeline::{PipelineConfig, PipelineObserver, TalkPipeline};
pub use segment::SentenceSegmenter;
