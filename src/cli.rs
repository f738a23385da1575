//! Command-line interface definition.

use clap::Parser;
use std::path::PathBuf;

/// Streaming voice chat: type a line, hear the reply sentence by sentence.
#[derive(Parser, Debug)]
#[command(name = "talkpipe", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "talkpipe.toml")]
    pub config: PathBuf,

    /// Ollama server URL (overrides config and OLLAMA_HOST).
    #[arg(long)]
    pub host: Option<String>,

    /// Model name (overrides config and OLLAMA_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// VOICEVOX speaker id (overrides config and VOICEVOX_SPEAKER_ID).
    #[arg(short, long)]
    pub speaker: Option<u32>,

    /// System prompt override.
    #[arg(long)]
    pub system: Option<String>,

    /// Discard audio instead of playing it.
    #[arg(long)]
    pub mute: bool,

    /// Only print errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Folds flag overrides into a loaded config. Precedence: flags over
    /// environment over file.
    pub fn apply_to(&self, mut config: crate::config::Config) -> crate::config::Config {
        if let Some(host) = &self.host {
            config.llm.host = host.clone();
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(speaker) = self.speaker {
            config.tts.speaker_id = speaker;
        }
        if let Some(system) = &self.system {
            config.pipeline.system_prompt = system.clone();
        }
        config
    }
}
