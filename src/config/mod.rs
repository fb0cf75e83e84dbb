//! Configuration management for interject
//!
//! Precedence: built-in defaults, then the TOML file, then environment.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::segmenter::{DEFAULT_MAX_LENGTH, DEFAULT_MIN_LENGTH};
use crate::{Error, Result};

use file::ConfigFile;

/// Default Ollama server address
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default system prompt for the assistant
const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant. Your replies are spoken aloud, \
so be concise and direct (one or two sentences), respond conversationally, avoid markdown, \
and focus on the core information requested.";

/// Interject configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Pipeline timing, segmentation and phrases
    pub pipeline: PipelineConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// File the configuration was overlaid from, if any
    pub source: Option<PathBuf>,
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum characters before a natural sentence boundary is honoured
    pub min_sentence_length: usize,

    /// Buffer length that forces a sentence break
    pub max_sentence_length: usize,

    /// Completed turns kept for prompt construction
    pub memory_turns: usize,

    /// Grace interval after an interrupt before the cancel signal is lowered
    pub settle_interval: Duration,

    /// Upper bound on waiting for an interrupted session to unwind
    pub settle_timeout: Duration,

    /// How long the speech worker waits on an empty queue per poll
    pub queue_poll_interval: Duration,

    /// How long a pre-emptive utterance waits for the speaker
    pub preempt_timeout: Duration,

    /// How long capture waits for speech to begin
    pub capture_timeout: Duration,

    /// Maximum length of a captured phrase
    pub phrase_limit: Duration,

    /// Spoken right after a wake trigger
    pub acknowledgement: String,

    /// Spoken when the model fails
    pub fallback: String,

    /// Spoken when command capture fails
    pub apology: String,

    /// Queued once when the pipeline starts (empty to skip)
    pub greeting: String,

    /// Spoken before a voice-requested shutdown
    pub farewell: String,

    /// Command words that shut the assistant down
    pub shutdown_words: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_sentence_length: DEFAULT_MIN_LENGTH,
            max_sentence_length: DEFAULT_MAX_LENGTH,
            memory_turns: 2,
            settle_interval: Duration::from_millis(300),
            settle_timeout: Duration::from_secs(2),
            queue_poll_interval: Duration::from_millis(100),
            preempt_timeout: Duration::from_secs(2),
            capture_timeout: Duration::from_secs(6),
            phrase_limit: Duration::from_secs(6),
            acknowledgement: "Yes?".to_string(),
            fallback: "I'm having trouble processing that request.".to_string(),
            apology: "Sorry, I didn't catch that.".to_string(),
            greeting: "Systems ready. Say the wake word to begin.".to_string(),
            farewell: "Shutting down.".to_string(),
            shutdown_words: vec!["exit".to_string(), "quit".to_string(), "shutdown".to_string()],
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Wake word model file
    pub wake_model: Option<PathBuf>,

    /// Wake classifier score threshold
    pub wake_threshold: f32,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// RMS energy above which capture treats audio as speech
    pub energy_threshold: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_model: None,
            wake_threshold: 0.5,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            energy_threshold: 0.03,
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama server URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    pub temperature: f32,

    /// Context window in tokens
    pub context_tokens: u32,

    pub system_prompt: String,

    /// Timeout for establishing a streaming request
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.5,
            context_tokens: 2048,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load configuration from the standard file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::load_from(file::config_file_path().as_deref())
    }

    /// Load configuration overlaying `path` (if any) and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            config.apply_file(file::load_config_file(path));
            config.source = Some(path.to_path_buf());
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay every field the file sets
    pub fn apply_file(&mut self, file: ConfigFile) {
        let p = file.pipeline;
        let pipeline = &mut self.pipeline;
        set(&mut pipeline.min_sentence_length, p.min_sentence_length);
        set(&mut pipeline.max_sentence_length, p.max_sentence_length);
        set(&mut pipeline.memory_turns, p.memory_turns);
        set(&mut pipeline.settle_interval, p.settle_interval_ms.map(Duration::from_millis));
        set(&mut pipeline.settle_timeout, p.settle_timeout_ms.map(Duration::from_millis));
        set(&mut pipeline.queue_poll_interval, p.queue_poll_ms.map(Duration::from_millis));
        set(&mut pipeline.preempt_timeout, p.preempt_timeout_ms.map(Duration::from_millis));
        set(&mut pipeline.capture_timeout, p.capture_timeout_ms.map(Duration::from_millis));
        set(&mut pipeline.phrase_limit, p.phrase_limit_ms.map(Duration::from_millis));
        set(&mut pipeline.acknowledgement, p.acknowledgement);
        set(&mut pipeline.fallback, p.fallback);
        set(&mut pipeline.apology, p.apology);
        set(&mut pipeline.greeting, p.greeting);
        set(&mut pipeline.farewell, p.farewell);
        set(&mut pipeline.shutdown_words, p.shutdown_words);

        let v = file.voice;
        let voice = &mut self.voice;
        if let Some(path) = v.wake_model {
            voice.wake_model = Some(PathBuf::from(path));
        }
        set(&mut voice.wake_threshold, v.wake_threshold);
        set(&mut voice.stt_model, v.stt_model);
        set(&mut voice.tts_model, v.tts_model);
        set(&mut voice.tts_voice, v.tts_voice);
        set(&mut voice.tts_speed, v.tts_speed);
        set(&mut voice.energy_threshold, v.energy_threshold);

        let l = file.llm;
        let llm = &mut self.llm;
        set(&mut llm.base_url, l.base_url);
        set(&mut llm.model, l.model);
        set(&mut llm.temperature, l.temperature);
        set(&mut llm.context_tokens, l.context_tokens);
        set(&mut llm.system_prompt, l.system_prompt);
        set(&mut llm.request_timeout, l.request_timeout_secs.map(Duration::from_secs));

        if file.api_keys.openai.is_some() {
            self.api_keys.openai = file.api_keys.openai;
        }
    }

    /// Overlay environment variables
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api_keys.openai = Some(key);
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.llm.base_url = host;
        }
        if let Ok(model) = std::env::var("INTERJECT_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(path) = std::env::var("INTERJECT_WAKE_MODEL") {
            self.voice.wake_model = Some(PathBuf::from(path));
        }
        if let Ok(voice) = std::env::var("INTERJECT_TTS_VOICE") {
            self.voice.tts_voice = voice;
        }
        set(
            &mut self.voice.tts_speed,
            std::env::var("INTERJECT_TTS_SPEED").ok().and_then(|s| s.parse().ok()),
        );
        set(
            &mut self.pipeline.memory_turns,
            std::env::var("INTERJECT_MEMORY_TURNS").ok().and_then(|s| s.parse().ok()),
        );
    }

    /// Check invariants the pipeline relies on
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.min_sentence_length == 0 {
            return Err(Error::Config("min_sentence_length must be positive".to_string()));
        }
        if p.max_sentence_length <= p.min_sentence_length {
            return Err(Error::Config(format!(
                "max_sentence_length ({}) must exceed min_sentence_length ({})",
                p.max_sentence_length, p.min_sentence_length
            )));
        }
        if p.memory_turns == 0 {
            return Err(Error::Config("memory_turns must be positive".to_string()));
        }
        if p.settle_timeout < p.settle_interval {
            return Err(Error::Config(
                "settle_timeout must not be shorter than settle_interval".to_string(),
            ));
        }
        if !(0.25..=4.0).contains(&self.voice.tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed {} outside 0.25..=4.0",
                self.voice.tts_speed
            )));
        }
        if !(0.0..=1.0).contains(&self.voice.wake_threshold) {
            return Err(Error::Config(format!(
                "wake_threshold {} outside 0.0..=1.0",
                self.voice.wake_threshold
            )));
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.min_sentence_length, 15);
        assert_eq!(config.pipeline.max_sentence_length, 200);
        assert_eq!(config.pipeline.memory_turns, 2);
    }

    #[test]
    fn test_file_overlay() {
        let file: ConfigFile = toml::from_str(
            r#"
            [pipeline]
            settle_interval_ms = 50
            greeting = ""

            [llm]
            model = "mistral"

            [voice]
            wake_model = "/tmp/hey.rpw"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(file);

        assert_eq!(config.pipeline.settle_interval, Duration::from_millis(50));
        assert!(config.pipeline.greeting.is_empty());
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.voice.wake_model, Some(PathBuf::from("/tmp/hey.rpw")));
        // Untouched fields keep defaults
        assert_eq!(config.pipeline.acknowledgement, "Yes?");
    }

    #[test]
    fn test_validate_rejects_bad_lengths() {
        let mut config = Config::default();
        config.pipeline.max_sentence_length = config.pipeline.min_sentence_length;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.pipeline.min_sentence_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_speed() {
        let mut config = Config::default();
        config.voice.tts_speed = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_keys_redacted_in_debug() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
        };
        assert!(!format!("{keys:?}").contains("sk-secret"));
    }
}
