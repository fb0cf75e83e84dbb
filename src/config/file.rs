//! TOML configuration file loading
//!
//! Supports `~/.config/interject/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Pipeline timing, segmentation and phrases
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Pipeline configuration; durations are in milliseconds
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFileConfig {
    pub min_sentence_length: Option<usize>,
    pub max_sentence_length: Option<usize>,
    pub memory_turns: Option<usize>,
    pub settle_interval_ms: Option<u64>,
    pub settle_timeout_ms: Option<u64>,
    pub queue_poll_ms: Option<u64>,
    pub preempt_timeout_ms: Option<u64>,
    pub capture_timeout_ms: Option<u64>,
    pub phrase_limit_ms: Option<u64>,
    pub acknowledgement: Option<String>,
    pub fallback: Option<String>,
    pub apology: Option<String>,
    pub greeting: Option<String>,
    pub farewell: Option<String>,
    pub shutdown_words: Option<Vec<String>>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceFileConfig {
    /// Path to the wake word model (`.rpw`)
    pub wake_model: Option<String>,

    /// Wake classifier score threshold (0.0 to 1.0)
    pub wake_threshold: Option<f32>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// RMS energy above which capture treats audio as speech
    pub energy_threshold: Option<f32>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmFileConfig {
    /// Ollama server URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "llama3.2")
    pub model: Option<String>,

    pub temperature: Option<f32>,

    /// Context window in tokens
    pub context_tokens: Option<u32>,

    pub system_prompt: Option<String>,

    pub request_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from `path`
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/interject/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "omni", "interject")
        .map(|d| d.config_dir().join("config.toml"))
}
