//! Contracts for the external voice collaborators
//!
//! The pipeline only talks to audio hardware, the wake classifier, speech
//! synthesis, speech recognition and the language model through these
//! traits, so every stage can be driven by fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::Result;
use crate::pipeline::Turn;

/// Fixed-length block of 16-bit mono PCM
///
/// Length and sample rate are dictated by the wake classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A positive wake classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeEvent {
    /// Index of the keyword that matched
    pub keyword: usize,
    /// When the frame was classified
    pub at: DateTime<Utc>,
}

impl WakeEvent {
    #[must_use]
    pub fn now(keyword: usize) -> Self {
        Self {
            keyword,
            at: Utc::now(),
        }
    }
}

/// Command text captured after a wake trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
}

impl Utterance {
    /// Wrap captured text; `None` if it is blank
    #[must_use]
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| Self {
            text: trimmed.to_string(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.text
    }
}

/// Ordered stream of generated text chunks; may fail at any point
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Live microphone delivering frames sized for the wake classifier
///
/// Not `Send`: platform audio streams generally have to stay on the thread
/// that opened them.
pub trait AudioSource {
    /// Open the device and start delivering frames
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened; this is fatal
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop delivery; the frame channel closes
    fn stop(&mut self);
}

/// Per-frame wake phrase classifier
pub trait WakeClassifier: Send {
    /// Samples per frame the classifier expects
    fn frame_length(&self) -> usize;

    /// Sample rate the classifier expects
    fn sample_rate(&self) -> u32;

    /// Classify one frame; `Some(keyword)` on a positive match
    fn classify(&mut self, frame: &AudioFrame) -> Option<usize>;
}

/// Speech synthesis and playback
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speak `text`, returning once playback completes or is stopped
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Ask an in-progress [`speak`](Self::speak) to return early
    ///
    /// Has no effect on utterances started afterwards.
    fn stop(&self);
}

/// Speech-to-text command capture
#[async_trait]
pub trait CommandCapture: Send + Sync {
    /// Listen for one phrase
    ///
    /// Waits up to `timeout` for speech to begin and records at most
    /// `phrase_limit` of it. `Ok(None)` on timeout or silence.
    ///
    /// # Errors
    ///
    /// Returns error if recording or transcription fails
    async fn capture(&self, timeout: Duration, phrase_limit: Duration)
    -> Result<Option<Utterance>>;
}

/// Streaming language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a response to `input` given the remembered turns
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream(&self, history: &[Turn], input: &str) -> Result<ChunkStream>;
}
