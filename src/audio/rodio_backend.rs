//! Default audio output via rodio.

use crate::audio::PlaybackBackend;
use crate::error::{Result, TalkError};
use std::io::Cursor;

/// Plays WAV bytes on the system's default output device.
pub struct RodioBackend {
    stream: rodio::OutputStream,
}

impl RodioBackend {
    /// Opens the default output device. Fails if no device is available,
    /// which surfaces as a startup error rather than a per-item one.
    pub fn new() -> Result<Self> {
        let stream = rodio::OutputStreamBuilder::open_default_stream().map_err(|e| {
            TalkError::AudioDevice {
                message: format!("failed to open default output stream: {e}"),
            }
        })?;
        Ok(Self { stream })
    }
}

impl PlaybackBackend for RodioBackend {
    fn play(&mut self, wav: &[u8]) -> Result<()> {
        let source =
            rodio::Decoder::new(Cursor::new(wav.to_vec())).map_err(|e| TalkError::Playback {
                message: format!("failed to decode audio: {e}"),
            })?;
        let sink = rodio::Sink::connect_new(self.stream.mixer());
        sink.append(source);
        // Block until playback finishes; the queue worker serializes items.
        sink.sleep_until_end();
        Ok(())
    }
}
