use anyhow::Context;
use clap::Parser;
use std::io::{BufRead, Write};
use std::sync::Arc;
use talkpipe::audio::PlaybackBackend;
use talkpipe::cli::Cli;
use talkpipe::config::Config;
use talkpipe::llm::OllamaClient;
use talkpipe::pipeline::{ConsoleReporter, TalkPipeline};
use talkpipe::tts::VoicevoxClient;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .with_env_overrides();
    let config = cli.apply_to(config);

    let model = OllamaClient::new(config.ollama()).context("setting up the Ollama client")?;
    let synthesizer =
        VoicevoxClient::new(config.voicevox()).context("setting up the VOICEVOX client")?;
    let backend = open_backend(cli.mute).context("opening the audio output")?;
    let reporter = ConsoleReporter::new()
        .with_quiet(cli.quiet)
        .with_color(!cli.no_color);

    let pipeline = TalkPipeline::new(
        config.pipeline(),
        Arc::new(model),
        Arc::new(synthesizer),
        backend,
        Arc::new(reporter),
    );

    eprintln!("talkpipe: type a message and press Enter; 'exit' or Ctrl-D quits");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let text = line.trim();
        if matches!(text, "exit" | "quit") {
            break;
        }
        pipeline.push_user_text(text);
    }

    pipeline.close();
    Ok(())
}

#[cfg(feature = "playback")]
fn open_backend(mute: bool) -> anyhow::Result<Box<dyn PlaybackBackend>> {
    if mute {
        Ok(Box::new(talkpipe::audio::DiscardBackend))
    } else {
        Ok(Box::new(talkpipe::audio::RodioBackend::new()?))
    }
}

#[cfg(not(feature = "playback"))]
fn open_backend(_mute: bool) -> anyhow::Result<Box<dyn PlaybackBackend>> {
    Ok(Box::new(talkpipe::audio::DiscardBackend))
}
