//! Streamed response generation
//!
//! Consumes the model's chunk stream, segments it into sentences and hands
//! each one to the speech queue. The cancellation signal is checked before
//! acting on every chunk; a cancelled session stops without enqueuing or
//! touching memory.

use std::sync::Arc;

use futures::StreamExt;

use super::memory::ConversationMemory;
use super::output::SpeechOutputQueue;
use super::segmenter::{SentenceSegmenter, clean_for_speech};
use super::state::{InterruptCoordinator, SessionId};
use crate::voice::LanguageModel;

/// How a generation session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Stream ran to the end; turn recorded in memory
    Completed {
        /// Sentence units handed to the speech queue
        sentences: usize,
    },
    /// Session was interrupted; nothing further was queued
    Cancelled,
    /// Model failed; the fallback phrase was spoken
    Failed,
}

/// Drives one model response per session
pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
    output: SpeechOutputQueue,
    coordinator: Arc<InterruptCoordinator>,
    memory: Arc<ConversationMemory>,
    min_length: usize,
    max_length: usize,
    fallback: String,
}

impl ResponseGenerator {
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        output: SpeechOutputQueue,
        coordinator: Arc<InterruptCoordinator>,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        Self {
            model,
            output,
            coordinator,
            memory,
            min_length: super::segmenter::DEFAULT_MIN_LENGTH,
            max_length: super::segmenter::DEFAULT_MAX_LENGTH,
            fallback: "I'm having trouble processing that request.".to_string(),
        }
    }

    /// Set the segmenter bounds used for each session
    #[must_use]
    pub const fn with_sentence_bounds(mut self, min_length: usize, max_length: usize) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Set the phrase spoken when the model fails
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Stream a response to `command` for `session`
    pub async fn generate(&self, session: SessionId, command: &str) -> GenerationOutcome {
        if !self.coordinator.begin_generating(session) {
            tracing::debug!(session, "session cancelled before generation");
            return GenerationOutcome::Cancelled;
        }

        tracing::info!(session, command, "generating response");
        let outcome = self.stream_response(session, command).await;
        self.coordinator.end_generating(session);

        match outcome {
            Ok(outcome) => {
                tracing::debug!(session, ?outcome, "generation finished");
                outcome
            }
            Err(e) if self.coordinator.is_cancelled(session) => {
                tracing::debug!(session, error = %e, "model failed after cancellation");
                GenerationOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!(session, error = %e, "response generation failed");
                if let Err(e) = self.output.speak_now(&self.fallback).await {
                    tracing::warn!(error = %e, "failed to speak fallback");
                }
                GenerationOutcome::Failed
            }
        }
    }

    async fn stream_response(
        &self,
        session: SessionId,
        command: &str,
    ) -> crate::Result<GenerationOutcome> {
        let history = self.memory.snapshot();
        let mut chunks = self.model.stream(&history, command).await?;

        let mut segmenter = SentenceSegmenter::new(self.min_length, self.max_length);
        let mut full_text = String::new();
        let mut sentences = 0;

        while let Some(chunk) = chunks.next().await {
            if self.coordinator.is_cancelled(session) {
                tracing::debug!(
                    session,
                    unspoken = segmenter.pending().len(),
                    "generation interrupted"
                );
                return Ok(GenerationOutcome::Cancelled);
            }

            let chunk = chunk?;
            full_text.push_str(&chunk);

            for sentence in segmenter.add_chunk(&chunk) {
                if self.enqueue(session, &sentence) {
                    sentences += 1;
                }
            }
        }

        if self.coordinator.is_cancelled(session) {
            return Ok(GenerationOutcome::Cancelled);
        }

        if let Some(tail) = segmenter.flush()
            && self.enqueue(session, &tail)
        {
            sentences += 1;
        }

        let recorded = self
            .coordinator
            .if_current(session, || self.memory.push(command, full_text.trim()));
        if recorded.is_none() {
            tracing::debug!(session, "interrupted before the turn was recorded");
            return Ok(GenerationOutcome::Cancelled);
        }

        Ok(GenerationOutcome::Completed { sentences })
    }

    fn enqueue(&self, session: SessionId, sentence: &str) -> bool {
        let cleaned = clean_for_speech(sentence);
        if cleaned.is_empty() {
            return false;
        }
        tracing::trace!(session, sentence = %cleaned, "sentence ready");
        self.output.enqueue(session, cleaned)
    }
}
