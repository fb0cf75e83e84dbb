//! Error types for the interject pipeline

use thiserror::Error;

/// Result type alias for interject operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
///
/// Cancellation and capture timeouts are not errors; they surface as
/// outcome values from the pipeline stages instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake word classifier error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Language model error
    #[error("model error: {0}")]
    Model(String),

    /// Pipeline lifecycle error (already running, not started)
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
