//! Error types for talkpipe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Language model errors
    #[error("Language model request failed: {message}")]
    LlmBackend { message: String },

    #[error("Model '{model}' not available on the server: {message}")]
    LlmModelMissing { model: String, message: String },

    // Speech synthesis errors
    #[error("Speech synthesis failed: {message}")]
    TtsBackend { message: String },

    // Playback errors
    #[error("Audio output unavailable: {message}")]
    AudioDevice { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkError>;
