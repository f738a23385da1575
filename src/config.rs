//! TOML configuration with environment overrides.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working local setup: Ollama on 127.0.0.1:11434, VOICEVOX on
//! 127.0.0.1:50021.

use crate::error::{Result, TalkError};
use crate::llm::OllamaConfig;
use crate::pipeline::PipelineConfig;
use crate::segment::JAPANESE_TERMINATORS;
use crate::tts::VoicevoxConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, one section per collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSection,
    pub tts: TtsSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub host: String,
    pub model: String,
    /// Model options forwarded verbatim (temperature, num_predict, ...).
    pub options: Option<serde_json::Value>,
    /// Extra request payload fields, merged under the standard ones.
    pub payload_overrides: Option<serde_json::Value>,
    pub connect_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        let base = OllamaConfig::default();
        Self {
            host: base.host,
            model: base.model,
            options: base.options,
            payload_overrides: base.payload_overrides,
            connect_timeout_secs: base.connect_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsSection {
    pub url: String,
    pub speaker_id: u32,
    pub speed_scale: f64,
    pub intonation_scale: f64,
    pub pre_phoneme_length: f64,
    pub post_phoneme_length: f64,
    pub query_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
}

impl Default for TtsSection {
    fn default() -> Self {
        let base = VoicevoxConfig::default();
        Self {
            url: base.url,
            speaker_id: base.speaker_id,
            speed_scale: base.speed_scale,
            intonation_scale: base.intonation_scale,
            pre_phoneme_length: base.pre_phoneme_length,
            post_phoneme_length: base.post_phoneme_length,
            query_timeout_secs: base.query_timeout.as_secs(),
            synthesis_timeout_secs: base.synthesis_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub system_prompt: String,
    /// Sentence-terminal markers as a string, one marker per character.
    pub sentence_terminators: String,
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let base = PipelineConfig::default();
        Self {
            system_prompt: base.system_prompt,
            sentence_terminators: JAPANESE_TERMINATORS.iter().collect(),
            shutdown_timeout_ms: base.shutdown_timeout.as_millis() as u64,
        }
    }
}

impl Config {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|_| TalkError::ConfigFileNotFound {
            path: path.display().to_string(),
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, defaults otherwise. A file that exists but
    /// fails to parse or validate is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies environment overrides on top of the file values. Recognized:
    /// `OLLAMA_HOST`, `OLLAMA_MODEL`, `OLLAMA_OPTIONS_JSON`, `VOICEVOX_URL`,
    /// `VOICEVOX_SPEAKER_ID`. Unparsable values are ignored.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = get("OLLAMA_HOST")
            && !host.trim().is_empty()
        {
            self.llm.host = host;
        }
        if let Some(model) = get("OLLAMA_MODEL")
            && !model.trim().is_empty()
        {
            self.llm.model = model;
        }
        if let Some(raw) = get("OLLAMA_OPTIONS_JSON")
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw)
        {
            self.llm.options = Some(value);
        }
        if let Some(url) = get("VOICEVOX_URL")
            && !url.trim().is_empty()
        {
            self.tts.url = url;
        }
        if let Some(raw) = get("VOICEVOX_SPEAKER_ID")
            && let Ok(id) = raw.trim().parse::<u32>()
        {
            self.tts.speaker_id = id;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(TalkError::ConfigInvalidValue {
                key: "llm.model".to_string(),
                message: "model name must not be empty".to_string(),
            });
        }
        if self.tts.speed_scale <= 0.0 {
            return Err(TalkError::ConfigInvalidValue {
                key: "tts.speed_scale".to_string(),
                message: format!("must be positive, got {}", self.tts.speed_scale),
            });
        }
        if self.pipeline.sentence_terminators.is_empty() {
            return Err(TalkError::ConfigInvalidValue {
                key: "pipeline.sentence_terminators".to_string(),
                message: "at least one terminator character is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn ollama(&self) -> OllamaConfig {
        OllamaConfig {
            host: self.llm.host.clone(),
            model: self.llm.model.clone(),
            options: self.llm.options.clone(),
            payload_overrides: self.llm.payload_overrides.clone(),
            connect_timeout: Duration::from_secs(self.llm.connect_timeout_secs),
        }
    }

    pub fn voicevox(&self) -> VoicevoxConfig {
        VoicevoxConfig {
            url: self.tts.url.clone(),
            speaker_id: self.tts.speaker_id,
            speed_scale: self.tts.speed_scale,
            intonation_scale: self.tts.intonation_scale,
            pre_phoneme_length: self.tts.pre_phoneme_length,
            post_phoneme_length: self.tts.post_phoneme_length,
            query_timeout: Duration::from_secs(self.tts.query_timeout_secs),
            synthesis_timeout: Duration::from_secs(self.tts.synthesis_timeout_secs),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            system_prompt: self.pipeline.system_prompt.clone(),
            sentence_terminators: self.pipeline.sentence_terminators.chars().collect(),
            shutdown_timeout: Duration::from_millis(self.pipeline.shutdown_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llm.host, "http://127.0.0.1:11434");
        assert_eq!(config.tts.url, "http://127.0.0.1:50021");
        assert_eq!(config.tts.speaker_id, 1);
        assert_eq!(config.pipeline.sentence_terminators, "。！？");
    }

    #[test]
    fn test_partial_toml_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "qwen2.5"

            [tts]
            speaker_id = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.llm.host, "http://127.0.0.1:11434");
        assert_eq!(config.tts.speaker_id, 8);
        assert!((config.tts.speed_scale - 1.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_llm_options_parse_into_json_value() {
        let config: Config = toml::from_str(
            r#"
            [llm.options]
            temperature = 0.7
            num_predict = 256
            "#,
        )
        .unwrap();
        let options = config.llm.options.unwrap();
        assert_eq!(options["num_predict"], 256);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_HOST", "http://gpu-box:11434"),
            ("OLLAMA_MODEL", "llama3.2"),
            ("VOICEVOX_SPEAKER_ID", "14"),
        ]);
        let config =
            Config::default().apply_env(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.llm.host, "http://gpu-box:11434");
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.tts.speaker_id, 14);
        // untouched by any override
        assert_eq!(config.tts.url, "http://127.0.0.1:50021");
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VOICEVOX_SPEAKER_ID", "not-a-number"),
            ("OLLAMA_OPTIONS_JSON", "{broken"),
            ("OLLAMA_MODEL", "   "),
        ]);
        let config =
            Config::default().apply_env(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.tts.speaker_id, 1);
        assert!(config.llm.options.is_none());
        assert_eq!(config.llm.model, OllamaConfig::default().model);
    }

    #[test]
    fn test_options_json_env_parses() {
        let env: HashMap<&str, &str> =
            HashMap::from([("OLLAMA_OPTIONS_JSON", r#"{"temperature": 0.2}"#)]);
        let config =
            Config::default().apply_env(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.llm.options.unwrap()["temperature"], 0.2);
    }

    #[test]
    fn test_validation_rejects_empty_model() {
        let config: Config = toml::from_str("[llm]\nmodel = \"  \"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(TalkError::ConfigInvalidValue { key, .. }) if key == "llm.model"
        ));
    }

    #[test]
    fn test_validation_rejects_nonpositive_speed() {
        let config: Config = toml::from_str("[tts]\nspeed_scale = 0.0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/talkpipe.toml")).unwrap_err();
        assert!(matches!(err, TalkError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talkpipe.toml");
        std::fs::write(&path, "[llm]\nmodel = \"qwen2.5\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.llm.model, "qwen2.5");

        std::fs::write(&path, "[tts]\nspeed_scale = -1.0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_or_default_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/talkpipe.toml")).unwrap();
        assert_eq!(config.llm.model, OllamaConfig::default().model);
    }

    #[test]
    fn test_section_conversions_round_values() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            sentence_terminators = ".!?"
            shutdown_timeout_ms = 500
            "#,
        )
        .unwrap();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.sentence_terminators, vec!['.', '!', '?']);
        assert_eq!(pipeline.shutdown_timeout, Duration::from_millis(500));
    }
}
