//! Bounded conversation window

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub input: String,
    pub output: String,
    /// When the response finished streaming
    pub at: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            at: Utc::now(),
        }
    }
}

/// The last `capacity` completed turns, oldest first
///
/// Only sessions that ran to completion are recorded.
#[derive(Debug)]
pub struct ConversationMemory {
    turns: Mutex<VecDeque<Turn>>,
    capacity: usize,
}

impl ConversationMemory {
    /// Create a window holding at most `capacity` turns (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a completed turn, evicting the oldest if full
    pub fn push(&self, input: impl Into<String>, output: impl Into<String>) {
        let mut turns = self.lock();
        if turns.len() == self.capacity {
            turns.pop_front();
        }
        turns.push_back(Turn::new(input, output));
    }

    /// Copy of the window for prompt construction
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Turn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let memory = ConversationMemory::new(2);
        memory.push("one", "1");
        memory.push("two", "2");
        memory.push("three", "3");

        let turns = memory.snapshot();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].input, "two");
        assert_eq!(turns[1].output, "3");
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let memory = ConversationMemory::new(0);
        assert_eq!(memory.capacity(), 1);
        memory.push("a", "b");
        memory.push("c", "d");
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.snapshot()[0].input, "c");
    }

    #[test]
    fn test_turns_are_timestamped_in_order() {
        let memory = ConversationMemory::new(2);
        let before = Utc::now();
        memory.push("first", "1");
        memory.push("second", "2");

        let turns = memory.snapshot();
        assert!(turns[0].at >= before);
        assert!(turns[1].at >= turns[0].at);
    }
}
