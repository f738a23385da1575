//! VOICEVOX synthesis backend: two-step audio_query/synthesis HTTP flow.

use crate::error::{Result, TalkError};
use crate::tts::SpeechSynthesizer;
use serde_json::{Value, json};
use std::time::Duration;

/// Connection and voice-tuning settings for a VOICEVOX engine.
#[derive(Debug, Clone)]
pub struct VoicevoxConfig {
    pub url: String,
    pub speaker_id: u32,
    /// Speaking rate multiplier. Slightly above 1.0 keeps replies snappy.
    pub speed_scale: f64,
    pub intonation_scale: f64,
    /// Leading/trailing silence in seconds, kept short so back-to-back
    /// sentences flow naturally.
    pub pre_phoneme_length: f64,
    pub post_phoneme_length: f64,
    pub query_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl Default for VoicevoxConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:50021".to_string(),
            speaker_id: 1,
            speed_scale: 1.05,
            intonation_scale: 1.0,
            pre_phoneme_length: 0.08,
            post_phoneme_length: 0.08,
            query_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(20),
        }
    }
}

/// Blocking client for the VOICEVOX HTTP engine. Returns WAV bytes.
pub struct VoicevoxClient {
    config: VoicevoxConfig,
    http: reqwest::blocking::Client,
}

impl VoicevoxClient {
    /// Builds the client and warms up the speaker. Speaker initialization is
    /// best-effort; an engine that is still loading answers later requests
    /// fine, just slower on the first one.
    pub fn new(mut config: VoicevoxConfig) -> Result<Self> {
        config.url = config.url.trim().trim_end_matches('/').to_string();
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| TalkError::TtsBackend {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let client = Self { config, http };
        client.init_speaker();
        Ok(client)
    }

    fn init_speaker(&self) {
        let _ = self
            .http
            .post(format!("{}/initialize_speaker", self.config.url))
            .query(&[("speaker", self.config.speaker_id)])
            .timeout(Duration::from_secs(3))
            .send();
    }

    /// Applies voice tuning on top of the engine's generated query.
    fn tune_query(&self, query: &mut Value) {
        if let Value::Object(map) = query {
            map.insert("speedScale".to_string(), json!(self.config.speed_scale));
            map.insert(
                "intonationScale".to_string(),
                json!(self.config.intonation_scale),
            );
            map.insert(
                "prePhonemeLength".to_string(),
                json!(self.config.pre_phoneme_length),
            );
            map.insert(
                "postPhonemeLength".to_string(),
                json!(self.config.post_phoneme_length),
            );
        }
    }
}

impl SpeechSynthesizer for VoicevoxClient {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let query_resp = self
            .http
            .post(format!("{}/audio_query", self.config.url))
            .query(&[
                ("text", text.to_string()),
                ("speaker", self.config.speaker_id.to_string()),
            ])
            .timeout(self.config.query_timeout)
            .send()
            .map_err(|e| TalkError::TtsBackend {
                message: format!("audio_query request failed: {e}"),
            })?;
        if !query_resp.status().is_success() {
            return Err(TalkError::TtsBackend {
                message: format!("audio_query returned status={}", query_resp.status()),
            });
        }
        let mut query: Value = query_resp.json().map_err(|e| TalkError::TtsBackend {
            message: format!("audio_query returned invalid JSON: {e}"),
        })?;
        self.tune_query(&mut query);

        let synth_resp = self
            .http
            .post(format!("{}/synthesis", self.config.url))
            .query(&[("speaker", self.config.speaker_id.to_string())])
            .json(&query)
            .timeout(self.config.synthesis_timeout)
            .send()
            .map_err(|e| TalkError::TtsBackend {
                message: format!("synthesis request failed: {e}"),
            })?;
        if !synth_resp.status().is_success() {
            return Err(TalkError::TtsBackend {
                message: format!("synthesis returned status={}", synth_resp.status()),
            });
        }
        let bytes = synth_resp.bytes().map_err(|e| TalkError::TtsBackend {
            message: format!("failed to read synthesis body: {e}"),
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = VoicevoxConfig::default();
        assert_eq!(config.url, "http://127.0.0.1:50021");
        assert_eq!(config.speaker_id, 1);
        assert!((config.speed_scale - 1.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tune_query_overwrites_fields() {
        let client = VoicevoxClient {
            config: VoicevoxConfig::default(),
            http: reqwest::blocking::Client::new(),
        };
        let mut query = json!({
            "accent_phrases": [],
            "speedScale": 1.0,
            "volumeScale": 1.0
        });
        client.tune_query(&mut query);

        assert_eq!(query["speedScale"], 1.05);
        assert_eq!(query["intonationScale"], 1.0);
        assert_eq!(query["prePhonemeLength"], 0.08);
        assert_eq!(query["postPhonemeLength"], 0.08);
        // untouched fields survive
        assert_eq!(query["volumeScale"], 1.0);
    }

    #[test]
    fn test_trailing_slash_stripped_from_url() {
        let client = VoicevoxClient::new(VoicevoxConfig {
            url: "http://127.0.0.1:50021///".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.config.url, "http://127.0.0.1:50021");
    }
}
