//! Keyed timer queue
//!
//! Idle and typing timers are entries in a [`DelayQueue`] owned by the hub
//! task. At most one timer is live per key: arming a key that already has a
//! timer replaces it.

use std::collections::HashMap;
use std::future::poll_fn;
use std::hash::Hash;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};

pub struct Timers<K> {
    queue: DelayQueue<K>,
    armed: HashMap<K, (delay_queue::Key, Instant)>,
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            armed: HashMap::new(),
        }
    }

    /// Arm a timer for `key` firing after `after`.
    ///
    /// Returns `true` when a live timer for the key was replaced.
    pub fn arm(&mut self, key: K, after: Duration) -> bool {
        let replaced = self.cancel(&key);
        let deadline = Instant::now() + after;
        let handle = self.queue.insert_at(key.clone(), deadline);
        self.armed.insert(key, (handle, deadline));
        replaced
    }

    /// Cancel the timer for `key`. Returns `false` if none was live.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.armed.remove(key) {
            Some((handle, _)) => {
                self.queue.remove(&handle);
                true
            }
            None => false,
        }
    }

    /// Cancel every timer whose key matches, returning the cancelled keys.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> Vec<K> {
        let keys: Vec<K> = self
            .armed
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &keys {
            self.cancel(key);
        }
        keys
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.armed.clear();
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    #[cfg(test)]
    fn deadline(&self, key: &K) -> Option<Instant> {
        self.armed.get(key).map(|(_, deadline)| *deadline)
    }

    /// Poll for the next fired timer.
    ///
    /// `Ready(None)` means no timer is armed. A fired key is no longer
    /// tracked once returned.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<K>> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let key = expired.into_inner();
                self.armed.remove(&key);
                Poll::Ready(Some(key))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    pub async fn next_expired(&mut self) -> Option<K> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }
}

impl<K> Default for Timers<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
