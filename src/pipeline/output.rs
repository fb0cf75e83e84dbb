//! Speech output queue
//!
//! Ordered queue of sentence units drained by one long-lived worker. The
//! worker claims the speaker from the coordinator immediately before each
//! synthesis call, so a unit from a cancelled session is discarded instead of
//! spoken even if it was dequeued just before the interrupt.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::state::{InterruptCoordinator, SessionId, SpeakGrant};
use crate::voice::SpeechEngine;
use crate::{Error, Result};

/// How long to back off when the speaker is taken
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// A pending unit of speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUnit {
    pub session: SessionId,
    pub text: String,
}

struct Shared {
    units: Mutex<VecDeque<QueuedUnit>>,
    available: Notify,
    engine: Arc<dyn SpeechEngine>,
    coordinator: Arc<InterruptCoordinator>,
    poll_interval: Duration,
    preempt_timeout: Duration,
}

/// Handle to the speech queue; clones share the same queue
#[derive(Clone)]
pub struct SpeechOutputQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SpeechOutputQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutputQueue")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl SpeechOutputQueue {
    /// Create a queue speaking through `engine`
    ///
    /// `poll_interval` bounds how long the worker waits on an empty queue
    /// before re-checking shutdown; `preempt_timeout` bounds how long a
    /// pre-emptive utterance waits for the speaker.
    #[must_use]
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        coordinator: Arc<InterruptCoordinator>,
        poll_interval: Duration,
        preempt_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                units: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                engine,
                coordinator,
                poll_interval,
                preempt_timeout,
            }),
        }
    }

    /// Queue `text` for `session`
    ///
    /// Returns false (and drops the text) if it is blank or the session is
    /// already cancelled.
    pub fn enqueue(&self, session: SessionId, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() {
            return false;
        }

        let mut units = self.lock();
        if !self.shared.coordinator.track_queued(session) {
            return false;
        }
        units.push_back(QueuedUnit { session, text });
        drop(units);

        self.shared.available.notify_one();
        true
    }

    /// Drop every pending unit without speaking it; returns how many
    pub fn clear(&self) -> usize {
        let mut units = self.lock();
        let dropped = units.len();
        units.clear();
        self.shared.coordinator.discard_queued(dropped);
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ask the engine to cut off whatever it is saying
    pub fn stop_speech(&self) {
        self.shared.engine.stop();
    }

    /// Speak `text` now, ahead of the queue
    ///
    /// Stops the current utterance first. Queued units stay queued and
    /// resume afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if the speaker could not be claimed within the
    /// pre-emption timeout or the engine fails
    pub async fn speak_now(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let coordinator = &self.shared.coordinator;
        coordinator.begin_priority();

        let deadline = Instant::now() + self.shared.preempt_timeout;
        while !coordinator.try_claim_priority() {
            if Instant::now() >= deadline {
                coordinator.abandon_priority();
                return Err(Error::Tts("speaker still busy after stop request".to_string()));
            }
            self.shared.engine.stop();
            tokio::time::sleep(BUSY_BACKOFF).await;
        }

        tracing::debug!(text, "speaking immediately");
        let result = self.shared.engine.speak(text).await;
        coordinator.end_speaking();
        result
    }

    /// Spawn the worker that drains the queue until `shutdown` fires
    #[must_use]
    pub fn spawn_worker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        tracing::debug!("speech worker started");

        loop {
            let unit = tokio::select! {
                () = shutdown.cancelled() => break,
                unit = self.next_unit() => unit,
            };

            if let Some(unit) = unit {
                self.speak_unit(unit).await;
            }
        }

        tracing::debug!("speech worker stopped");
    }

    /// Wait up to the poll interval for a unit
    async fn next_unit(&self) -> Option<QueuedUnit> {
        let wait = async {
            loop {
                if let Some(unit) = self.lock().pop_front() {
                    return unit;
                }
                self.shared.available.notified().await;
            }
        };
        tokio::time::timeout(self.shared.poll_interval, wait).await.ok()
    }

    async fn speak_unit(&self, unit: QueuedUnit) {
        let coordinator = &self.shared.coordinator;

        match coordinator.try_begin_speaking(unit.session) {
            SpeakGrant::Stale => {
                tracing::debug!(session = unit.session, text = %unit.text, "discarding cancelled unit");
            }
            SpeakGrant::Busy => {
                self.lock().push_front(unit);
                tokio::time::sleep(BUSY_BACKOFF).await;
            }
            SpeakGrant::Granted => {
                tracing::debug!(session = unit.session, text = %unit.text, "speaking");
                if let Err(e) = self.shared.engine.speak(&unit.text).await {
                    tracing::warn!(error = %e, "speech synthesis failed");
                }
                coordinator.end_speaking();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedUnit>> {
        self.shared.units.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
