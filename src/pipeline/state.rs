//! Interrupt coordination
//!
//! The single source of truth for "is anything speaking", "is a response being
//! generated" and "has cancellation been requested". Every mutation goes
//! through one lock, so those facts are never observed in a torn state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

/// Identifies one wake-to-response cycle
///
/// Incremented on every interrupt; work tagged with an older id is stale.
pub type SessionId = u64;

/// Observable pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Waiting for a wake trigger
    #[default]
    Idle,
    /// Model is streaming a response
    Generating,
    /// An output unit is being synthesized or waiting in the queue
    /// (generation may still be running)
    Speaking,
    /// Cancellation in progress
    Interrupting,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
            Self::Interrupting => "interrupting",
        };
        f.write_str(name)
    }
}

/// Answer to a queued unit asking for the speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakGrant {
    /// Speaker claimed; caller must call [`InterruptCoordinator::end_speaking`]
    Granted,
    /// Unit belongs to a cancelled session; discard it
    Stale,
    /// Speaker is taken or a pre-emptive utterance is waiting
    Busy,
}

/// Result of starting an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    /// Session that replaces the cancelled one
    pub session: SessionId,
    /// Whether anything was speaking or generating when the interrupt fired
    pub was_active: bool,
}

#[derive(Debug, Default)]
struct Record {
    session: SessionId,
    cancel: bool,
    interrupting: bool,
    generating: Option<SessionId>,
    speaking: bool,
    queued: usize,
    priority_waiters: usize,
}

impl Record {
    const fn state(&self) -> PipelineState {
        if self.interrupting {
            PipelineState::Interrupting
        } else if self.speaking || self.queued > 0 {
            PipelineState::Speaking
        } else if self.generating.is_some() {
            PipelineState::Generating
        } else {
            PipelineState::Idle
        }
    }

    const fn is_cancelled(&self, session: SessionId) -> bool {
        self.cancel || self.session != session
    }
}

/// Shared coordination record for all pipeline stages
#[derive(Debug)]
pub struct InterruptCoordinator {
    record: Mutex<Record>,
    state_tx: watch::Sender<PipelineState>,
}

impl Default for InterruptCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            record: Mutex::new(Record::default()),
            state_tx,
        }
    }

    /// Current observable state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.lock().state()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// The session new work should be tagged with
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.lock().session
    }

    /// Whether work for `session` must stop at its next poll point
    #[must_use]
    pub fn is_cancelled(&self, session: SessionId) -> bool {
        self.lock().is_cancelled(session)
    }

    /// Whether the cancellation signal is currently raised
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.lock().cancel
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.lock().speaking
    }

    /// Raise the cancellation signal and retire the current session
    ///
    /// State moves to `Interrupting` only if something was active. The signal
    /// stays raised until [`finish_interrupt`](Self::finish_interrupt).
    pub fn begin_interrupt(&self) -> Interrupt {
        self.transition(|r| {
            let was_active = r.state() != PipelineState::Idle;
            r.cancel = true;
            r.interrupting = was_active;
            r.session += 1;
            r.generating = None;
            Interrupt {
                session: r.session,
                was_active,
            }
        })
    }

    /// Lower the cancellation signal once the old session has unwound
    pub fn finish_interrupt(&self) {
        self.transition(|r| {
            r.cancel = false;
            r.interrupting = false;
        });
    }

    /// Mark `session` as generating; false if it is already cancelled
    pub fn begin_generating(&self, session: SessionId) -> bool {
        self.transition(|r| {
            if r.is_cancelled(session) {
                return false;
            }
            r.generating = Some(session);
            true
        })
    }

    /// Clear the generating flag if `session` still owns it
    pub fn end_generating(&self, session: SessionId) {
        self.transition(|r| {
            if r.generating == Some(session) {
                r.generating = None;
            }
        });
    }

    /// Run `record` under the coordination lock if `session` is still current
    ///
    /// No interrupt can land between the check and `record`. Returns `None`
    /// without running it when the session is cancelled.
    pub fn if_current<R>(&self, session: SessionId, record: impl FnOnce() -> R) -> Option<R> {
        let guard = self.lock();
        if guard.is_cancelled(session) {
            return None;
        }
        let result = record();
        drop(guard);
        Some(result)
    }

    /// Count a unit entering the speech queue; false if `session` is cancelled
    pub fn track_queued(&self, session: SessionId) -> bool {
        self.transition(|r| {
            if r.is_cancelled(session) {
                return false;
            }
            r.queued += 1;
            true
        })
    }

    /// Forget `count` queued units dropped without being spoken
    pub fn discard_queued(&self, count: usize) {
        if count > 0 {
            self.transition(|r| r.queued = r.queued.saturating_sub(count));
        }
    }

    /// Claim the speaker for a queued unit of `session`
    ///
    /// A granted or stale unit leaves the queued count in the same step, so
    /// the state never passes through `Idle` between sentences.
    pub fn try_begin_speaking(&self, session: SessionId) -> SpeakGrant {
        self.transition(|r| {
            if r.is_cancelled(session) {
                r.queued = r.queued.saturating_sub(1);
                SpeakGrant::Stale
            } else if r.speaking || r.priority_waiters > 0 {
                SpeakGrant::Busy
            } else {
                r.queued = r.queued.saturating_sub(1);
                r.speaking = true;
                SpeakGrant::Granted
            }
        })
    }

    /// Register a pre-emptive utterance; queued units yield until it is served
    pub fn begin_priority(&self) {
        self.transition(|r| r.priority_waiters += 1);
    }

    /// Claim the speaker for a registered pre-emptive utterance
    pub fn try_claim_priority(&self) -> bool {
        self.transition(|r| {
            if r.speaking {
                return false;
            }
            r.speaking = true;
            r.priority_waiters = r.priority_waiters.saturating_sub(1);
            true
        })
    }

    /// Withdraw a pre-emptive registration that never got the speaker
    pub fn abandon_priority(&self) {
        self.transition(|r| r.priority_waiters = r.priority_waiters.saturating_sub(1));
    }

    /// Release the speaker
    pub fn end_speaking(&self) {
        self.transition(|r| r.speaking = false);
    }

    fn transition<R>(&self, apply: impl FnOnce(&mut Record) -> R) -> R {
        let mut record = self.lock();
        let result = apply(&mut record);
        let state = record.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        result
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
