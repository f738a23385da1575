//! Ollama chat backend: streams reply fragments over NDJSON.

use crate::error::{Result, TalkError};
use crate::history::Message;
use crate::llm::{FragmentStream, LanguageModel, ServerInfo};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

/// Connection settings for an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server base URL; bare `host:port` and `0.0.0.0` are normalized.
    pub host: String,
    /// Model name, e.g. `llama3.1`.
    pub model: String,
    /// Generation options (`num_predict`, `temperature`, ...), merged into
    /// the request payload last so they win over `payload_overrides`.
    pub options: Option<Value>,
    /// Extra top-level payload keys (`keep_alive`, `stop`, ...); an inner
    /// `options` table here seeds the options map.
    pub payload_overrides: Option<Value>,
    /// TCP connect timeout. The streaming read itself is unbounded — the
    /// model may legitimately think for a long time between fragments.
    pub connect_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:11434".to_string(),
            model: "llama3.1".to_string(),
            options: None,
            payload_overrides: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Blocking streaming client for the Ollama chat API.
///
/// One client holds one keep-alive HTTP session; construct it once and share
/// it via `Arc` rather than building per turn.
pub struct OllamaClient {
    config: OllamaConfig,
    http: reqwest::blocking::Client,
}

/// Normalizes a host string into a usable base URL.
///
/// `0.0.0.0` is a listen address, not a connect address; rewrite it to
/// loopback. A missing scheme defaults to plain HTTP.
pub(crate) fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "http://127.0.0.1:11434".to_string();
    }
    let rebound = if let Some(rest) = trimmed.strip_prefix("0.0.0.0:") {
        format!("127.0.0.1:{rest}")
    } else {
        trimmed.to_string()
    };
    if rebound.starts_with("http://") || rebound.starts_with("https://") {
        rebound
    } else {
        format!("http://{rebound}")
    }
}

impl OllamaClient {
    /// Builds the client. Fails only if the HTTP client itself cannot be
    /// constructed; server reachability is checked lazily.
    pub fn new(mut config: OllamaConfig) -> Result<Self> {
        config.host = normalize_host(&config.host);
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(None)
            .build()
            .map_err(|e| TalkError::LlmBackend {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.host)
    }

    /// Assembles the chat payload: overrides first, then model/messages/
    /// stream, then options (overrides' inner `options` seeds the map and
    /// `config.options` wins on conflict).
    fn build_payload(&self, history: &[Message]) -> Result<Value> {
        let mut payload = serde_json::Map::new();
        let mut options = serde_json::Map::new();

        if let Some(Value::Object(overrides)) = &self.config.payload_overrides {
            for (key, value) in overrides {
                if key == "options" {
                    if let Value::Object(inner) = value {
                        options.extend(inner.clone());
                    }
                } else {
                    payload.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(Value::Object(opts)) = &self.config.options {
            options.extend(opts.clone());
        }

        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "messages".to_string(),
            serde_json::to_value(history).map_err(|e| TalkError::LlmBackend {
                message: format!("failed to encode history: {e}"),
            })?,
        );
        payload.insert("stream".to_string(), json!(true));
        if !options.is_empty() {
            payload.insert("options".to_string(), Value::Object(options));
        }
        Ok(Value::Object(payload))
    }

    /// Maps a non-success response to an error with a configuration hint.
    fn status_error(&self, status: reqwest::StatusCode, body: &str) -> TalkError {
        let lowered = body.to_lowercase();
        if status == reqwest::StatusCode::NOT_FOUND
            && lowered.contains("model")
            && lowered.contains("not found")
        {
            return TalkError::LlmModelMissing {
                model: self.config.model.clone(),
                message: body.chars().take(200).collect(),
            };
        }
        TalkError::LlmBackend {
            message: format!(
                "{} returned status={} body={} (check OLLAMA_HOST / OLLAMA_MODEL)",
                self.chat_url(),
                status,
                body.chars().take(200).collect::<String>()
            ),
        }
    }

    fn fetch_json(&self, path: &str, timeout: Duration) -> Option<Value> {
        self.http
            .get(format!("{}{}", self.config.host, path))
            .timeout(timeout)
            .send()
            .ok()
            .filter(|r| r.status().is_success())
            .and_then(|r| r.json().ok())
    }
}

impl LanguageModel for OllamaClient {
    fn stream_reply(&self, history: &[Message]) -> Result<FragmentStream> {
        let payload = self.build_payload(history)?;
        let response = self
            .http
            .post(self.chat_url())
            .json(&payload)
            .send()
            .map_err(|e| TalkError::LlmBackend {
                message: format!("request to {} failed: {e}", self.chat_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(self.status_error(status, &body));
        }

        Ok(Box::new(NdjsonFragments {
            lines: BufReader::new(response).lines(),
            done: false,
        }))
    }

    fn server_info(&self) -> Option<ServerInfo> {
        let timeout = Duration::from_secs(3);
        let mut info = ServerInfo::default();

        if let Some(version) = self
            .fetch_json("/api/version", timeout)
            .and_then(|v| v.get("version").and_then(Value::as_str).map(String::from))
        {
            info.version = Some(version);
            info.reachable = true;
        }
        if let Some(models) = self
            .fetch_json("/api/tags", timeout)
            .and_then(|v| v.get("models").cloned())
            .and_then(|m| match m {
                Value::Array(entries) => Some(
                    entries
                        .iter()
                        .filter_map(|e| e.get("name").and_then(Value::as_str).map(String::from))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
        {
            if !models.is_empty() {
                info.reachable = true;
            }
            info.models = models;
        }
        Some(info)
    }
}

/// Lazy NDJSON reader over the streaming response body.
struct NdjsonFragments {
    lines: Lines<BufReader<reqwest::blocking::Response>>,
    done: bool,
}

/// Pulls the text fragment out of a chat (`message.content`) or legacy
/// generate (`response`) stream object.
fn extract_fragment(obj: &Value) -> &str {
    if let Some(content) = obj
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        return content;
    }
    obj.get("response").and_then(Value::as_str).unwrap_or("")
}

impl Iterator for NdjsonFragments {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(TalkError::LlmBackend {
                        message: format!("stream read failed: {e}"),
                    }));
                }
                Some(Ok(line)) => line,
            };
            if line.trim().is_empty() {
                continue;
            }
            // Stray non-JSON lines occasionally appear; skip them.
            let Ok(obj) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let fragment = extract_fragment(&obj).to_string();
            if obj.get("done").and_then(Value::as_bool).unwrap_or(false) {
                self.done = true;
                if fragment.is_empty() {
                    return None;
                }
                return Some(Ok(fragment));
            }
            if !fragment.is_empty() {
                return Some(Ok(fragment));
            }
        }
    }
}
