//! Text-to-speech (TTS) processing

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::playback::{AudioPlayback, PlaybackEnd};
use super::traits::SpeechEngine;
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Synthesizes speech from text using `OpenAI` TTS
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Speech engine that synthesizes with `OpenAI` and plays through cpal
///
/// [`stop`](SpeechEngine::stop) bumps an epoch; an utterance started under an
/// older epoch abandons synthesis or cuts playback at its next poll.
pub struct OpenAiSpeechEngine {
    tts: TextToSpeech,
    epoch: Arc<AtomicU64>,
    stopped: Notify,
}

impl OpenAiSpeechEngine {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            epoch: Arc::new(AtomicU64::new(0)),
            stopped: Notify::new(),
        }
    }
}

#[async_trait]
impl SpeechEngine for OpenAiSpeechEngine {
    async fn speak(&self, text: &str) -> Result<()> {
        let started = self.epoch.load(Ordering::Acquire);
        let stopped = self.stopped.notified();

        let audio = tokio::select! {
            audio = self.tts.synthesize(text) => audio?,
            () = stopped => {
                tracing::debug!("stopped during synthesis");
                return Ok(());
            }
        };

        let epoch = Arc::clone(&self.epoch);
        let end = tokio::task::spawn_blocking(move || {
            if epoch.load(Ordering::Acquire) != started {
                return Ok(PlaybackEnd::Stopped);
            }
            AudioPlayback::new()?.play_mp3(&audio, || epoch.load(Ordering::Acquire) != started)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))??;

        tracing::trace!(?end, "utterance ended");
        Ok(())
    }

    fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.stopped.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let result = TextToSpeech::new(
            String::new(),
            "alloy".to_string(),
            1.0,
            "tts-1".to_string(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
