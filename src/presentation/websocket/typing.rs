//! Typing indicator timers
//!
//! One timer per (connection, thread). A repeated start replaces the timer;
//! expiry has the same effect as an explicit stop.

use std::time::Duration;

use super::timers::Timers;
use crate::domain::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypingKey {
    pub connection_id: ConnectionId,
    pub thread_id: String,
}

impl TypingKey {
    pub fn new(connection_id: ConnectionId, thread_id: impl Into<String>) -> Self {
        Self {
            connection_id,
            thread_id: thread_id.into(),
        }
    }
}

pub struct TypingRegistry {
    timeout: Duration,
    timers: Timers<TypingKey>,
}

impl TypingRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            timers: Timers::new(),
        }
    }

    /// Start (or restart) the typing timer. Returns `true` on restart.
    pub fn start(&mut self, key: TypingKey) -> bool {
        self.timers.arm(key, self.timeout)
    }

    /// Cancel the timer. `false` means there was nothing to stop.
    pub fn stop(&mut self, key: &TypingKey) -> bool {
        self.timers.cancel(key)
    }

    /// Cancel every timer of a connection, returning the affected threads.
    pub fn stop_all(&mut self, connection_id: &ConnectionId) -> Vec<String> {
        self.timers
            .cancel_where(|key| key.connection_id == *connection_id)
            .into_iter()
            .map(|key| key.thread_id)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_typing(&self, key: &TypingKey) -> bool {
        self.timers.contains(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub(crate) fn timers_mut(&mut self) -> &mut Timers<TypingKey> {
        &mut self.timers
    }
}
