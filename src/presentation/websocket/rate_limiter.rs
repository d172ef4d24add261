//! Per-connection rate limiting
//!
//! Fixed-window counter keyed by connection. The first event after the
//! window has elapsed opens a new window with a count of one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::ConnectionId;

/// Outcome of recording one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Events counted in the current window, including this one
    pub count: u32,
    pub limit: u32,
}

impl RateDecision {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_events: u32,
    windows: HashMap<ConnectionId, Window>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_events: u32) -> Self {
        Self {
            window,
            max_events,
            windows: HashMap::new(),
        }
    }

    /// Record an event for `connection_id` and decide whether it may proceed.
    pub fn check_and_record(&mut self, connection_id: ConnectionId) -> RateDecision {
        self.check_and_record_at(connection_id, Instant::now())
    }

    pub fn check_and_record_at(&mut self, connection_id: ConnectionId, now: Instant) -> RateDecision {
        let window = self.window;
        let entry = self.windows.entry(connection_id).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now > entry.started_at + window {
            entry.started_at = now;
            entry.count = 1;
        } else {
            entry.count = entry.count.saturating_add(1);
        }

        RateDecision {
            allowed: entry.count <= self.max_events,
            count: entry.count,
            limit: self.max_events,
        }
    }

    /// Drop the state of a departed connection.
    pub fn forget(&mut self, connection_id: &ConnectionId) -> bool {
        self.windows.remove(connection_id).is_some()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }

    /// Connections with rate state
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    #[cfg(test)]
    fn is_tracked(&self, connection_id: &ConnectionId) -> bool {
        self.windows.contains_key(connection_id)
    }
}
