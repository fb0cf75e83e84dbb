//! Wake listening and wake handling
//!
//! [`WakeListener`] classifies audio frames on its own thread and hands
//! positive matches to a single-slot channel without ever blocking; a trigger
//! that arrives while the slot is full is dropped. [`WakeHandler`] drains that
//! channel one trigger at a time: interrupt, acknowledge, capture, dispatch.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::generator::{GenerationOutcome, ResponseGenerator};
use super::output::SpeechOutputQueue;
use super::state::{InterruptCoordinator, SessionId};
use crate::config::PipelineConfig;
use crate::voice::{AudioFrame, CommandCapture, Utterance, WakeClassifier, WakeEvent};
use crate::{Error, Result};

/// Poll granularity while waiting for an interrupted session to unwind
const SETTLE_POLL: Duration = Duration::from_millis(20);

/// Extra time allowed on top of the capture bounds before giving up
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

/// Create the single-slot trigger channel between listener and handler
#[must_use]
pub fn trigger_channel() -> (mpsc::Sender<WakeEvent>, mpsc::Receiver<WakeEvent>) {
    mpsc::channel(1)
}

/// Classifies frames and forwards wake triggers
pub struct WakeListener {
    classifier: Box<dyn WakeClassifier>,
    triggers: mpsc::Sender<WakeEvent>,
    dropped: u64,
}

impl WakeListener {
    #[must_use]
    pub fn new(classifier: Box<dyn WakeClassifier>, triggers: mpsc::Sender<WakeEvent>) -> Self {
        Self {
            classifier,
            triggers,
            dropped: 0,
        }
    }

    /// Classify one frame; never waits on downstream work
    ///
    /// Returns the event if a trigger was handed off.
    pub fn on_frame(&mut self, frame: &AudioFrame) -> Option<WakeEvent> {
        let expected = self.classifier.frame_length();
        if frame.len() != expected {
            tracing::trace!(len = frame.len(), expected, "skipping misaligned frame");
            return None;
        }

        let keyword = self.classifier.classify(frame)?;
        let event = WakeEvent::now(keyword);

        match self.triggers.try_send(event) {
            Ok(()) => {
                tracing::info!(keyword, "wake word detected");
                Some(event)
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::debug!(keyword, dropped = self.dropped, "wake handler busy, trigger coalesced");
                None
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("wake handler gone, ignoring trigger");
                None
            }
        }
    }

    /// Triggers dropped because the handler was busy
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Run on a dedicated thread until the frame channel closes or `shutdown`
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(
        mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        shutdown: CancellationToken,
    ) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("wake-listener".to_string())
            .spawn(move || {
                tracing::debug!(
                    frame_length = self.classifier.frame_length(),
                    sample_rate = self.classifier.sample_rate(),
                    "wake listener started"
                );
                while let Some(frame) = frames.blocking_recv() {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    self.on_frame(&frame);
                }
                tracing::debug!("wake listener stopped");
            })
            .map_err(|e| Error::Pipeline(format!("failed to spawn wake listener: {e}")))
    }
}

/// How a wake trigger was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Capture timed out or heard nothing
    NoCommand,
    /// Capture failed; an apology was spoken
    CaptureFailed,
    /// A shutdown phrase was heard
    Shutdown,
    /// Command handed to the generator
    Dispatched(SessionId),
}

/// Runs the wake-handling sequence, one trigger at a time
pub struct WakeHandler {
    coordinator: Arc<InterruptCoordinator>,
    output: SpeechOutputQueue,
    capture: Arc<dyn CommandCapture>,
    generator: Arc<ResponseGenerator>,
    config: PipelineConfig,
    shutdown: CancellationToken,
    generation: Option<JoinHandle<GenerationOutcome>>,
}

impl WakeHandler {
    #[must_use]
    pub fn new(
        coordinator: Arc<InterruptCoordinator>,
        output: SpeechOutputQueue,
        capture: Arc<dyn CommandCapture>,
        generator: Arc<ResponseGenerator>,
        config: PipelineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            output,
            capture,
            generator,
            config,
            shutdown,
            generation: None,
        }
    }

    /// Spawn the handler loop
    #[must_use]
    pub fn spawn(self, triggers: mpsc::Receiver<WakeEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(triggers))
    }

    async fn run(mut self, mut triggers: mpsc::Receiver<WakeEvent>) {
        tracing::debug!("wake handler started");

        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = triggers.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let outcome = self.handle(event).await;
            tracing::debug!(?outcome, "wake handled");

            let mut coalesced = 0;
            while triggers.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                tracing::debug!(coalesced, "dropped triggers received during handling");
            }
        }

        if let Some(generation) = self.generation.take() {
            match tokio::time::timeout(self.config.settle_timeout, generation).await {
                Ok(Ok(outcome)) => tracing::debug!(?outcome, "last generation joined"),
                Ok(Err(e)) => tracing::warn!(error = %e, "generation task failed"),
                Err(_) => tracing::debug!("generation still running at shutdown, detaching"),
            }
        }

        tracing::debug!("wake handler stopped");
    }

    /// Handle one trigger end to end
    pub async fn handle(&mut self, event: WakeEvent) -> WakeOutcome {
        tracing::info!(keyword = event.keyword, at = %event.at, "handling wake trigger");

        let session = self.interrupt().await;

        if let Err(e) = self.output.speak_now(&self.config.acknowledgement).await {
            tracing::warn!(error = %e, "failed to speak acknowledgement");
        }

        let command = match self.capture_command().await {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::info!("no command heard");
                return WakeOutcome::NoCommand;
            }
            Err(e) => {
                tracing::warn!(error = %e, "command capture failed");
                self.say(&self.config.apology).await;
                return WakeOutcome::CaptureFailed;
            }
        };

        tracing::info!(command = command.as_str(), session, "command received");

        if self.is_shutdown_command(command.as_str()) {
            self.say(&self.config.farewell).await;
            self.shutdown.cancel();
            return WakeOutcome::Shutdown;
        }

        let generator = Arc::clone(&self.generator);
        let text = command.into_inner();
        self.generation = Some(tokio::spawn(async move {
            generator.generate(session, &text).await
        }));

        WakeOutcome::Dispatched(session)
    }

    /// Cancel whatever is in flight and wait for it to unwind
    async fn interrupt(&mut self) -> SessionId {
        let interrupt = self.coordinator.begin_interrupt();

        self.output.stop_speech();
        let dropped = self.output.clear();

        if interrupt.was_active || dropped > 0 {
            tracing::info!(dropped, "interrupting active session");
        }
        self.settle().await;

        if let Some(generation) = self.generation.take() {
            if generation.is_finished() {
                if let Err(e) = generation.await {
                    tracing::warn!(error = %e, "generation task failed");
                }
            } else {
                // Cancelled sessions never enqueue, so a slow stream is left
                // to notice on its next chunk.
                tracing::debug!("previous generation still unwinding, detaching");
            }
        }

        self.coordinator.finish_interrupt();
        tracing::debug!(session = interrupt.session, "interrupt complete");
        interrupt.session
    }

    /// Wait for the grace interval and until nothing speaks or is queued
    ///
    /// Always waits the full interval, even when nothing was active, so audio
    /// from the trigger itself has passed before the acknowledgement.
    async fn settle(&self) {
        let started = Instant::now();

        loop {
            let speaking = self.coordinator.is_speaking();
            let elapsed = started.elapsed();

            if !speaking && self.output.is_empty() && elapsed >= self.config.settle_interval {
                break;
            }
            if elapsed >= self.config.settle_timeout {
                tracing::warn!(speaking, "session did not unwind within settle timeout");
                break;
            }

            if speaking {
                self.output.stop_speech();
            }
            self.output.clear();
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    async fn capture_command(&self) -> Result<Option<Utterance>> {
        let timeout = self.config.capture_timeout;
        let phrase_limit = self.config.phrase_limit;
        let bound = timeout + phrase_limit + CAPTURE_GRACE;

        match tokio::time::timeout(bound, self.capture.capture(timeout, phrase_limit)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?bound, "capture exceeded its bound");
                Ok(None)
            }
        }
    }

    fn is_shutdown_command(&self, command: &str) -> bool {
        command
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .any(|word| {
                self.config
                    .shutdown_words
                    .iter()
                    .any(|phrase| phrase.eq_ignore_ascii_case(&word))
            })
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.output.speak_now(text).await {
            tracing::warn!(error = %e, "failed to speak");
        }
    }
}
