//! The interruptible voice pipeline
//!
//! ```text
//!  mic ──frames──▶ WakeListener ──trigger──▶ WakeHandler ──command──▶ ResponseGenerator
//!                   (thread)     (1 slot)     interrupt/ack/capture     stream + segment
//!                                                   │                         │
//!                                               speak_now                  enqueue
//!                                                   ▼                         ▼
//!                                   InterruptCoordinator ◀──── SpeechOutputQueue worker
//! ```
//!
//! [`Assistant`] wires the stages together and owns their lifetimes.

pub mod generator;
pub mod memory;
pub mod output;
pub mod segmenter;
pub mod state;
pub mod wake;

use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use generator::{GenerationOutcome, ResponseGenerator};
pub use memory::{ConversationMemory, Turn};
pub use output::{QueuedUnit, SpeechOutputQueue};
pub use segmenter::{SentenceSegmenter, clean_for_speech};
pub use state::{InterruptCoordinator, PipelineState, SessionId, SpeakGrant};
pub use wake::{WakeHandler, WakeListener, WakeOutcome, trigger_channel};

use crate::config::{Config, PipelineConfig};
use crate::voice::{AudioSource, CommandCapture, LanguageModel, SpeechEngine, WakeClassifier};
use crate::{Error, Result};

/// External collaborators the pipeline drives
pub struct Collaborators {
    pub audio: Box<dyn AudioSource>,
    pub classifier: Box<dyn WakeClassifier>,
    pub speech: Arc<dyn SpeechEngine>,
    pub capture: Arc<dyn CommandCapture>,
    pub model: Arc<dyn LanguageModel>,
}

/// Snapshot of the running pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub session: SessionId,
    /// Sentence units waiting to be spoken
    pub pending: usize,
    /// Completed turns remembered
    pub turns: usize,
}

struct Workers {
    speech: JoinHandle<()>,
    handler: JoinHandle<()>,
    listener: thread::JoinHandle<()>,
}

/// The assembled assistant
pub struct Assistant {
    config: PipelineConfig,
    coordinator: Arc<InterruptCoordinator>,
    memory: Arc<ConversationMemory>,
    output: SpeechOutputQueue,
    capture: Arc<dyn CommandCapture>,
    generator: Arc<ResponseGenerator>,
    audio: Box<dyn AudioSource>,
    classifier: Option<Box<dyn WakeClassifier>>,
    shutdown: CancellationToken,
    workers: Option<Workers>,
}

impl Assistant {
    /// Assemble the pipeline; nothing runs until [`start`](Self::start)
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: &Config, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let pipeline = config.pipeline.clone();

        let coordinator = Arc::new(InterruptCoordinator::new());
        let memory = Arc::new(ConversationMemory::new(pipeline.memory_turns));
        let output = SpeechOutputQueue::new(
            parts.speech,
            Arc::clone(&coordinator),
            pipeline.queue_poll_interval,
            pipeline.preempt_timeout,
        );
        let generator = Arc::new(
            ResponseGenerator::new(
                parts.model,
                output.clone(),
                Arc::clone(&coordinator),
                Arc::clone(&memory),
            )
            .with_sentence_bounds(pipeline.min_sentence_length, pipeline.max_sentence_length)
            .with_fallback(pipeline.fallback.clone()),
        );

        Ok(Self {
            config: pipeline,
            coordinator,
            memory,
            output,
            capture: parts.capture,
            generator,
            audio: parts.audio,
            classifier: Some(parts.classifier),
            shutdown: CancellationToken::new(),
            workers: None,
        })
    }

    /// Open the audio source and spawn every worker
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if already started or the audio source cannot be
    /// opened; no worker is left running on error
    pub fn start(&mut self) -> Result<()> {
        if self.workers.is_some() {
            return Err(Error::Pipeline("already running".to_string()));
        }
        let classifier = self
            .classifier
            .take()
            .ok_or_else(|| Error::Pipeline("cannot restart a stopped pipeline".to_string()))?;

        let frames = match self.audio.start() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(error = %e, "failed to open audio source");
                self.classifier = Some(classifier);
                return Err(e);
            }
        };

        let (trigger_tx, trigger_rx) = trigger_channel();
        let listener = match WakeListener::new(classifier, trigger_tx)
            .spawn(frames, self.shutdown.clone())
        {
            Ok(listener) => listener,
            Err(e) => {
                self.audio.stop();
                return Err(e);
            }
        };

        let speech = self.output.spawn_worker(self.shutdown.clone());
        let handler = WakeHandler::new(
            Arc::clone(&self.coordinator),
            self.output.clone(),
            Arc::clone(&self.capture),
            Arc::clone(&self.generator),
            self.config.clone(),
            self.shutdown.clone(),
        )
        .spawn(trigger_rx);

        self.workers = Some(Workers {
            speech,
            handler,
            listener,
        });

        let session = self.coordinator.session();
        if self.output.enqueue(session, self.config.greeting.as_str()) {
            tracing::debug!("greeting queued");
        }

        tracing::info!("assistant started");
        Ok(())
    }

    /// Stop every worker and release the audio source
    pub async fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };

        tracing::info!("stopping assistant");
        self.shutdown.cancel();
        self.coordinator.begin_interrupt();
        self.output.stop_speech();
        self.output.clear();

        // Closing the frame channel releases the listener thread
        self.audio.stop();

        if let Err(e) = workers.handler.await {
            tracing::warn!(error = %e, "wake handler failed");
        }
        if let Err(e) = workers.speech.await {
            tracing::warn!(error = %e, "speech worker failed");
        }
        match tokio::task::spawn_blocking(move || workers.listener.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::warn!("wake listener panicked"),
            Err(e) => tracing::warn!(error = %e, "failed to join wake listener"),
        }

        self.coordinator.finish_interrupt();
        tracing::info!("assistant stopped");
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.coordinator.state(),
            session: self.coordinator.session(),
            pending: self.output.len(),
            turns: self.memory.len(),
        }
    }

    /// Subscribe to pipeline state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.coordinator.subscribe()
    }

    /// Token cancelled when a shutdown is requested (by voice or `stop`)
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub const fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }
}
