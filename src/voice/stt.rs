//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::endpoint::Endpointer;
use super::traits::{CommandCapture, Utterance};
use crate::{Error, Result};

const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text with `OpenAI` Whisper
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl SpeechToText {
    /// Create a new STT instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(OPENAI_TRANSCRIPTION_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Records one phrase from the microphone and transcribes it
pub struct WhisperCapture {
    stt: SpeechToText,
    energy_threshold: f32,
}

impl WhisperCapture {
    #[must_use]
    pub const fn new(stt: SpeechToText, energy_threshold: f32) -> Self {
        Self {
            stt,
            energy_threshold,
        }
    }
}

#[async_trait]
impl CommandCapture for WhisperCapture {
    async fn capture(
        &self,
        timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Option<Utterance>> {
        let threshold = self.energy_threshold;

        let samples = tokio::task::spawn_blocking(move || {
            let mut endpointer = Endpointer::new(threshold, SAMPLE_RATE, timeout, phrase_limit);
            AudioCapture::new()?.record_phrase(&mut endpointer)
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))??;

        let Some(samples) = samples else {
            return Ok(None);
        };

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        let text = self.stt.transcribe(&wav).await?;
        Ok(Utterance::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(SpeechToText::new(String::new(), "whisper-1".to_string()).is_err());
    }
}
